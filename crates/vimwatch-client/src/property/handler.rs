// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Batch handlers.
//!
//! Implement [`BatchHandler`] to consume change pages from a watch. The
//! engine awaits each call before polling again, so a handler sees pages
//! strictly in server order and never concurrently.

use async_trait::async_trait;
use tokio::sync::mpsc;
use vimwatch_core::VimResult;

use super::update::ChangeBatch;

/// What the engine should do after a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Flow {
    /// Keep watching.
    #[default]
    Continue,
    /// End the watch once the current logical batch is complete.
    Stop,
}

/// Consumer of change pages.
#[async_trait]
pub trait BatchHandler: Send {
    /// Called for every non-empty page, and for the initial state even when
    /// it is empty. An error ends the watch with that error.
    async fn on_batch(&mut self, batch: &ChangeBatch) -> VimResult<Flow>;
}

/// Adapts a closure into a [`BatchHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> BatchHandler for FnHandler<F>
where
    F: FnMut(&ChangeBatch) -> VimResult<Flow> + Send,
{
    async fn on_batch(&mut self, batch: &ChangeBatch) -> VimResult<Flow> {
        (self.0)(batch)
    }
}

/// Forwards pages to an mpsc channel. Stops the watch when the receiver is
/// dropped.
pub struct ChannelHandler {
    sender: mpsc::Sender<ChangeBatch>,
}

impl ChannelHandler {
    /// Creates a handler around `sender`.
    pub fn new(sender: mpsc::Sender<ChangeBatch>) -> Self {
        Self { sender }
    }

    /// Creates a handler together with its receiver.
    pub fn with_channel(capacity: usize) -> (Self, mpsc::Receiver<ChangeBatch>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl BatchHandler for ChannelHandler {
    async fn on_batch(&mut self, batch: &ChangeBatch) -> VimResult<Flow> {
        match self.sender.send(batch.clone()).await {
            Ok(()) => Ok(Flow::Continue),
            Err(_) => {
                tracing::debug!("Batch receiver dropped, stopping watch");
                Ok(Flow::Stop)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(sequence: u64) -> ChangeBatch {
        ChangeBatch {
            sequence,
            page: 0,
            last_page: true,
            initial: sequence == 0,
            version: sequence.to_string(),
            updates: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_fn_handler() {
        let mut seen = Vec::new();
        {
            let mut handler = FnHandler(|b: &ChangeBatch| {
                seen.push(b.sequence);
                Ok(if b.sequence == 1 { Flow::Stop } else { Flow::Continue })
            });
            assert_eq!(handler.on_batch(&page(0)).await.unwrap(), Flow::Continue);
            assert_eq!(handler.on_batch(&page(1)).await.unwrap(), Flow::Stop);
        }
        assert_eq!(seen, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_channel_handler_stops_when_receiver_dropped() {
        let (mut handler, mut rx) = ChannelHandler::with_channel(4);
        assert_eq!(handler.on_batch(&page(0)).await.unwrap(), Flow::Continue);
        assert_eq!(rx.recv().await.unwrap().sequence, 0);

        drop(rx);
        assert_eq!(handler.on_batch(&page(1)).await.unwrap(), Flow::Stop);
    }
}
