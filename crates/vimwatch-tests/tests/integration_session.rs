// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Session Integration Tests
//!
//! Session lifecycle against the simulated service:
//!
//! - Cache persistence, restore and fallback to login
//! - Every login strategy
//! - Clone ticket handoff between two clients
//! - Logout and passthrough close
//!
//! ## Test Categories
//!
//! - `test_cache_*`: persistent sessions
//! - `test_login_*`: login strategies
//! - `test_logout_*` / `test_close_*`: session teardown

use vimwatch_client::{CredentialKind, SessionState};
use vimwatch_core::VimError;
use vimwatch_tests::prelude::*;

// =============================================================================
// Cache Tests
// =============================================================================

#[tokio::test]
async fn test_cache_second_connect_restores_without_login() {
    init_test_logging();
    let service = InventoryFixtures::service();
    let dir = temp_test_dir("vimwatch-cache");

    let first = connect_to(&service, CredentialFixtures::root(), OptionFixtures::persistent(dir.path()))
        .await
        .unwrap();
    assert!(!first.session().await.unwrap().restored);
    first.close().await.unwrap();

    // A persistent close leaves the server session alive.
    assert_eq!(service.session_count(), 1);
    assert_eq!(service.count("Logout"), 0);

    let second = connect_to(&service, CredentialFixtures::root(), OptionFixtures::persistent(dir.path()))
        .await
        .unwrap();
    let session = second.session().await.unwrap();
    assert!(session.restored);
    assert_eq!(session.user.as_deref(), Some("root"));
    assert_eq!(service.count("Login"), 1);
    assert_eq!(service.login_count(), 1);
    assert_eq!(second.manager().stats().restores(), 1);
}

#[tokio::test]
async fn test_cache_expired_entry_falls_back_to_login() {
    init_test_logging();
    let service = InventoryFixtures::service();
    let dir = temp_test_dir("vimwatch-cache");

    let first = connect_to(&service, CredentialFixtures::root(), OptionFixtures::persistent(dir.path()))
        .await
        .unwrap();
    let stale = first.cookie().await.unwrap();
    first.close().await.unwrap();

    service.expire_sessions();

    let second = connect_to(&service, CredentialFixtures::root(), OptionFixtures::persistent(dir.path()))
        .await
        .unwrap();
    let session = second.session().await.unwrap();
    assert!(!session.restored);
    assert_ne!(session.cookie.as_ref(), Some(&stale));
    assert_eq!(service.count("Login"), 2);
    assert_eq!(second.manager().stats().restore_misses(), 1);

    // The fresh session replaced the stale entry.
    let manager = second.manager();
    let path = manager.cache().unwrap().entry_path(&manager.cache_key());
    let stored = std::fs::read_to_string(path).unwrap();
    assert!(stored.contains(session.cookie.as_ref().unwrap().expose()));
}

#[tokio::test]
async fn test_cache_entries_are_per_user() {
    init_test_logging();
    let service = InventoryFixtures::service();
    service.add_user("auditor", "readonly");
    let dir = temp_test_dir("vimwatch-cache");

    let root = connect_to(&service, CredentialFixtures::root(), OptionFixtures::persistent(dir.path()))
        .await
        .unwrap();
    root.close().await.unwrap();

    let auditor = connect_to(
        &service,
        vimwatch_client::CredentialSpec::password("auditor", "readonly"),
        OptionFixtures::persistent(dir.path()),
    )
    .await
    .unwrap();
    let session = auditor.session().await.unwrap();
    assert!(!session.restored);
    assert_eq!(session.user.as_deref(), Some("auditor"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

// =============================================================================
// Login Tests
// =============================================================================

#[tokio::test]
async fn test_login_wrong_password_is_auth_error() {
    init_test_logging();
    let service = InventoryFixtures::service();

    let err = connect_to(&service, CredentialFixtures::wrong_password(), OptionFixtures::passthrough())
        .await
        .unwrap_err();
    assert!(matches!(err, VimError::Auth { .. }), "got {err:?}");
    assert_eq!(service.session_count(), 0);
}

#[tokio::test]
async fn test_login_by_token() {
    init_test_logging();
    let service = InventoryFixtures::service();
    service.add_token("signed-token-1", "svc-automation");

    let handle = connect_to(&service, CredentialFixtures::token("signed-token-1"), OptionFixtures::passthrough())
        .await
        .unwrap();
    assert_eq!(handle.manager().credential_kind(), CredentialKind::Token);
    assert_eq!(
        handle.session().await.unwrap().user.as_deref(),
        Some("svc-automation")
    );
    assert_eq!(service.count("LoginByToken"), 1);
}

#[tokio::test]
async fn test_login_by_certificate_extension() {
    init_test_logging();
    let service = InventoryFixtures::service();
    service.add_extension("com.example.monitor");

    let credentials = vimwatch_client::CredentialSpec::from_source(vimwatch_client::CredentialSource {
        certificate: Some("client.pem".into()),
        private_key: Some("client.key".into()),
        extension_key: Some("com.example.monitor".into()),
        ..Default::default()
    })
    .unwrap();

    let handle = connect_to(&service, credentials, OptionFixtures::passthrough())
        .await
        .unwrap();
    assert_eq!(handle.manager().credential_kind(), CredentialKind::Certificate);
    assert_eq!(service.count("LoginExtensionByCertificate"), 1);
}

#[tokio::test]
async fn test_login_cookie_reuses_existing_session() {
    init_test_logging();
    let service = InventoryFixtures::service();

    let owner = connect_to(&service, CredentialFixtures::root(), OptionFixtures::passthrough())
        .await
        .unwrap();
    let cookie = owner.cookie().await.unwrap();

    let borrower = connect_to(&service, CredentialFixtures::cookie(cookie.clone()), OptionFixtures::passthrough())
        .await
        .unwrap();
    assert_eq!(borrower.cookie().await, Some(cookie));
    assert_eq!(borrower.session().await.unwrap().user.as_deref(), Some("root"));
    assert_eq!(service.login_count(), 1);
    assert_eq!(service.session_count(), 1);
}

#[tokio::test]
async fn test_login_clone_ticket_handoff() {
    init_test_logging();
    let service = InventoryFixtures::service();

    let parent = connect_to(&service, CredentialFixtures::root(), OptionFixtures::passthrough())
        .await
        .unwrap();
    let ticket = parent.clone_ticket().await.unwrap();

    let child = connect_to(&service, CredentialFixtures::ticket(ticket.clone()), OptionFixtures::passthrough())
        .await
        .unwrap();
    assert_eq!(child.session().await.unwrap().user.as_deref(), Some("root"));
    assert_ne!(child.cookie().await, parent.cookie().await);
    assert_eq!(service.session_count(), 2);

    // Tickets are single use.
    let err = connect_to(&service, CredentialFixtures::ticket(ticket), OptionFixtures::passthrough())
        .await
        .unwrap_err();
    assert!(matches!(err, VimError::Auth { .. }), "got {err:?}");
}

// =============================================================================
// Teardown Tests
// =============================================================================

#[tokio::test]
async fn test_close_passthrough_logs_out() {
    init_test_logging();
    let service = InventoryFixtures::service();

    let handle = connect_to(&service, CredentialFixtures::root(), OptionFixtures::passthrough())
        .await
        .unwrap();
    let manager = handle.manager().clone();
    handle.close().await.unwrap();

    assert_eq!(service.count("Logout"), 1);
    assert_eq!(service.session_count(), 0);
    assert_eq!(manager.state().await, SessionState::Closed);
}

#[tokio::test]
async fn test_logout_removes_cache_entry() {
    init_test_logging();
    let service = InventoryFixtures::service();
    let dir = temp_test_dir("vimwatch-cache");

    let handle = connect_to(&service, CredentialFixtures::root(), OptionFixtures::persistent(dir.path()))
        .await
        .unwrap();
    let manager = handle.manager().clone();
    let path = manager.cache().unwrap().entry_path(&manager.cache_key());
    assert!(path.exists());

    handle.logout().await.unwrap();

    assert!(!path.exists());
    assert_eq!(service.session_count(), 0);
    assert_eq!(manager.stats().logouts(), 1);
}

#[tokio::test]
async fn test_logout_after_server_expiry_still_clears_cache() {
    init_test_logging();
    let service = InventoryFixtures::service();
    let dir = temp_test_dir("vimwatch-cache");

    let handle = connect_to(&service, CredentialFixtures::root(), OptionFixtures::persistent(dir.path()))
        .await
        .unwrap();
    let manager = handle.manager().clone();
    let path = manager.cache().unwrap().entry_path(&manager.cache_key());

    service.expire_sessions();
    handle.logout().await.unwrap();

    assert!(!path.exists());
}
