// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Property subscription: filters, watch policies, change batches and the
//! long-poll engine that ties them together.

pub mod engine;
pub mod filter;
pub mod handler;
pub mod policy;
pub mod update;

pub use engine::{EngineStats, PropertyEngine, StopReason, WatchSummary};
pub use filter::{build_filter, Filter, FilterBuilder, FilterRoot};
pub use handler::{BatchHandler, ChannelHandler, Flow, FnHandler};
pub use policy::{PropertyMatch, WatchPolicy, UNBOUNDED};
pub use update::{group_updates, ChangeBatch, Snapshot};
