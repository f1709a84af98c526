// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built inventories, credentials and options so every suite starts
//! from the same, realistic scenario.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use vimwatch_client::{
    connect_with_transport, BatchHandler, ChangeBatch, ConnectOptions, CredentialSpec, Flow,
    SessionHandle,
};
use vimwatch_core::{ManagedObjectReference, Secret, Transport, VimResult};

use super::mocks::SimulatedService;

// =============================================================================
// Inventory Fixtures
// =============================================================================

/// Fixture providing a small datacenter.
///
/// ```text
/// Folder:group-v1
/// ├── vm-1 (web-01, poweredOn)
/// ├── vm-2 (web-02, poweredOn)
/// ├── vm-3 (db-01, poweredOff)
/// └── Folder:group-v2
///     └── vm-4 (batch-01, poweredOff)
/// HostSystem:host-9 (esx-09)
/// ```
pub struct InventoryFixtures;

impl InventoryFixtures {
    /// The top-level VM folder.
    pub fn vm_folder() -> ManagedObjectReference {
        ManagedObjectReference::new("Folder", "group-v1")
    }

    /// The nested folder.
    pub fn nested_folder() -> ManagedObjectReference {
        ManagedObjectReference::new("Folder", "group-v2")
    }

    /// A virtual machine reference.
    pub fn vm(n: u32) -> ManagedObjectReference {
        ManagedObjectReference::new("VirtualMachine", format!("vm-{}", n))
    }

    /// The host.
    pub fn host() -> ManagedObjectReference {
        ManagedObjectReference::new("HostSystem", "host-9")
    }

    /// Populates `service` with the datacenter above.
    pub fn datacenter(service: &SimulatedService) {
        let vms = [
            (1, "web-01", "poweredOn"),
            (2, "web-02", "poweredOn"),
            (3, "db-01", "poweredOff"),
            (4, "batch-01", "poweredOff"),
        ];
        for (n, name, power) in vms {
            service.add_object(
                &Self::vm(n),
                [("name", name), ("runtime.powerState", power)],
            );
        }
        service.add_object(&Self::host(), [("name", "esx-09")]);

        for n in 1..=3 {
            service.add_to_container(&Self::vm_folder(), &Self::vm(n));
        }
        service.add_to_container(&Self::vm_folder(), &Self::nested_folder());
        service.add_to_container(&Self::nested_folder(), &Self::vm(4));
    }

    /// A service with the datacenter already loaded.
    pub fn service() -> Arc<SimulatedService> {
        let service = Arc::new(SimulatedService::new());
        Self::datacenter(&service);
        service
    }

    /// `count` plain VMs with a `name` property, outside any folder.
    pub fn vm_batch(service: &SimulatedService, count: u32) -> Vec<ManagedObjectReference> {
        (1..=count)
            .map(|n| {
                let obj = ManagedObjectReference::new("VirtualMachine", format!("bulk-{:03}", n));
                service.add_object(&obj, [("name", format!("bulk-{:03}", n))]);
                obj
            })
            .collect()
    }
}

// =============================================================================
// Credential Fixtures
// =============================================================================

/// Fixture providing credentials the simulated service accepts or rejects.
pub struct CredentialFixtures;

impl CredentialFixtures {
    /// The default account.
    pub fn root() -> CredentialSpec {
        CredentialSpec::password("root", "secret")
    }

    /// Right user, wrong password.
    pub fn wrong_password() -> CredentialSpec {
        CredentialSpec::password("root", "not-the-password")
    }

    /// A token login; register it with [`SimulatedService::add_token`].
    pub fn token(token: &str) -> CredentialSpec {
        CredentialSpec::Token {
            token: Secret::new(token),
        }
    }

    /// A clone ticket login.
    pub fn ticket(ticket: Secret) -> CredentialSpec {
        CredentialSpec::Ticket { ticket }
    }

    /// Reuse of an existing session cookie.
    pub fn cookie(cookie: Secret) -> CredentialSpec {
        CredentialSpec::Cookie { cookie }
    }
}

// =============================================================================
// Option Fixtures
// =============================================================================

/// Fixture providing connection options.
pub struct OptionFixtures;

impl OptionFixtures {
    /// No cache, no keepalive: every connect is a fresh login and `close`
    /// logs out.
    pub fn passthrough() -> ConnectOptions {
        ConnectOptions {
            persist: false,
            cache_dir: None,
            keepalive: false,
            ..Default::default()
        }
    }

    /// Sessions cached under `dir`, no keepalive.
    pub fn persistent(dir: &Path) -> ConnectOptions {
        ConnectOptions {
            persist: true,
            cache_dir: Some(dir.to_path_buf()),
            keepalive: false,
            ..Default::default()
        }
    }

    /// Passthrough with a keepalive tick every `interval`.
    pub fn keepalive(interval: Duration) -> ConnectOptions {
        ConnectOptions {
            keepalive: true,
            keepalive_interval: Some(interval),
            ..Self::passthrough()
        }
    }
}

/// Connects to `service` with `credentials` and `options`.
pub async fn connect_to(
    service: &Arc<SimulatedService>,
    credentials: CredentialSpec,
    options: ConnectOptions,
) -> VimResult<SessionHandle> {
    let transport: Arc<dyn Transport> = service.clone();
    connect_with_transport(transport, credentials, false, options).await
}

// =============================================================================
// Handlers
// =============================================================================

/// Records every page it receives. Optionally runs a callback per page,
/// which is how tests change the inventory between waits.
pub struct CollectingHandler {
    pages: Arc<Mutex<Vec<ChangeBatch>>>,
    on_page: Option<Box<dyn FnMut(&ChangeBatch) -> Flow + Send>>,
}

impl CollectingHandler {
    /// A handler that only records.
    pub fn new() -> Self {
        Self {
            pages: Arc::new(Mutex::new(Vec::new())),
            on_page: None,
        }
    }

    /// A handler that records and then calls `f`.
    pub fn with_callback(f: impl FnMut(&ChangeBatch) -> Flow + Send + 'static) -> Self {
        Self {
            on_page: Some(Box::new(f)),
            ..Self::new()
        }
    }

    /// Shared view of the recorded pages.
    pub fn pages(&self) -> Arc<Mutex<Vec<ChangeBatch>>> {
        self.pages.clone()
    }

    /// Copy of the recorded pages.
    pub fn collected(&self) -> Vec<ChangeBatch> {
        self.pages.lock().clone()
    }
}

impl Default for CollectingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchHandler for CollectingHandler {
    async fn on_batch(&mut self, batch: &ChangeBatch) -> VimResult<Flow> {
        self.pages.lock().push(batch.clone());
        Ok(match self.on_page.as_mut() {
            Some(f) => f(batch),
            None => Flow::Continue,
        })
    }
}
