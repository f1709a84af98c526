// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Cancellation Integration Tests
//!
//! Interrupts delivered through a [`CancellationCoordinator`] while a watch
//! is blocked on the server.

use std::time::Duration;

use vimwatch_client::{CancellationCoordinator, Filter, ManualInterrupt, StopReason, WatchPolicy};
use vimwatch_tests::prelude::*;

fn filter() -> Filter {
    Filter::builder()
        .root(InventoryFixtures::vm(1))
        .property("VirtualMachine", "runtime.powerState")
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupt_during_blocked_wait() {
    init_test_logging();
    let service = InventoryFixtures::service();
    let handle = connect_to(&service, CredentialFixtures::root(), OptionFixtures::passthrough())
        .await
        .unwrap();

    let interrupt = ManualInterrupt::new();
    let coordinator = CancellationCoordinator::new(interrupt.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        interrupt.trigger();
    });

    let mut handler = CollectingHandler::new();
    let err = handle
        .watch_cancellable(&coordinator, &filter(), &WatchPolicy::new(), &mut handler)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(coordinator.interrupts(), 1);
    assert!(!coordinator.is_active());
    assert_eq!(handler.collected().len(), 1);

    // The pending wait is cancelled server-side before the filter goes away.
    let cancel = service.first_call("CancelWaitForUpdates").unwrap();
    let destroy = service.first_call("DestroyFilter").unwrap();
    assert!(cancel < destroy);
    assert_eq!(service.filter_count(), 0);
    assert_eq!(handle.engine().stats().cancellations(), 1);
}

#[tokio::test]
async fn test_cancel_interrupt_before_start_sends_nothing() {
    init_test_logging();
    let service = InventoryFixtures::service();
    let handle = connect_to(&service, CredentialFixtures::root(), OptionFixtures::passthrough())
        .await
        .unwrap();
    service.clear_calls();

    let interrupt = ManualInterrupt::new();
    interrupt.trigger();
    let coordinator = CancellationCoordinator::new(interrupt);

    let mut handler = CollectingHandler::new();
    let err = handle
        .watch_cancellable(&coordinator, &filter(), &WatchPolicy::new(), &mut handler)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(service.calls().is_empty());
    assert!(handler.collected().is_empty());
}

#[tokio::test]
async fn test_cancel_completed_watch_is_unaffected() {
    init_test_logging();
    let service = InventoryFixtures::service();
    let handle = connect_to(&service, CredentialFixtures::root(), OptionFixtures::passthrough())
        .await
        .unwrap();
    let coordinator = CancellationCoordinator::new(ManualInterrupt::new());

    let mut handler = CollectingHandler::new();
    let summary = handle
        .watch_cancellable(&coordinator, &filter(), &WatchPolicy::new().count(1), &mut handler)
        .await
        .unwrap();

    assert_eq!(summary.reason, StopReason::CountReached);
    assert_eq!(coordinator.interrupts(), 0);
    assert_eq!(service.count("CancelWaitForUpdates"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_then_session_stays_usable() {
    init_test_logging();
    let service = InventoryFixtures::service();
    let handle = connect_to(&service, CredentialFixtures::root(), OptionFixtures::passthrough())
        .await
        .unwrap();

    let interrupt = ManualInterrupt::new();
    let coordinator = CancellationCoordinator::new(interrupt.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        interrupt.trigger();
    });
    let mut handler = CollectingHandler::new();
    assert!(handle
        .watch_cancellable(&coordinator, &filter(), &WatchPolicy::new(), &mut handler)
        .await
        .is_err());

    // A fresh watch on the same session starts from the initial state again.
    let mut handler = CollectingHandler::new();
    let summary = handle
        .watch(&filter(), &WatchPolicy::new().count(1), &mut handler)
        .await
        .unwrap();
    assert_eq!(summary.batches, 1);
    assert!(handler.collected()[0].initial);

    handle.close().await.unwrap();
    assert_eq!(service.session_count(), 0);
}
