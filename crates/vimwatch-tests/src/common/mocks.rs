// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Simulated Object Service
//!
//! [`SimulatedService`] implements [`Transport`] against an in-memory
//! inventory. It understands every request the client sends:
//!
//! - sessions and all login strategies (password, certificate extension,
//!   token, single-use clone tickets, cookie reuse through `UserSession`)
//! - container views, property filters and blocking waits with paging
//! - `CancelWaitForUpdates`, which ends a pending wait with `RequestCanceled`
//!
//! Tests drive it from the outside: mutate properties, expire every session,
//! or inject transient failures and faults for a named method. Every request
//! is recorded by method name.
//!
//! Filter versions are per filter. A wait reports the difference between
//! what the filter last delivered and the current inventory, so several
//! changes to the same property between two waits collapse into one.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use vimwatch_core::{
    AboutInfo, Endpoint, Envelope, FaultKind, FilterSpec, LoginResult, ManagedObjectReference,
    ObjectUpdate, ObjectUpdateKind, PropertyChange, PropertyFilterUpdate, Request, Response,
    Secret, TransportErrorKind, UpdateSet, UserSession, Value, Verification, VimError, VimResult,
    WaitOptions,
};

/// Object type of container views.
pub const VIEW_TYPE: &str = "ContainerView";

/// Object type of property filters.
pub const FILTER_TYPE: &str = "PropertyFilter";

// =============================================================================
// Failure injection
// =============================================================================

/// An error to return instead of handling a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injected {
    /// A network failure of the given kind.
    Transport(TransportErrorKind),
    /// A server fault.
    Fault(FaultKind),
}

impl Injected {
    fn to_error(&self, method: &str) -> VimError {
        match self {
            Self::Transport(kind) => {
                VimError::transport(*kind, format!("simulated {} during {}", kind, method))
            }
            Self::Fault(fault) => {
                VimError::fault(fault.clone(), format!("simulated {} fault", fault.name()))
            }
        }
    }
}

struct Injection {
    method: &'static str,
    remaining: u32,
    error: Injected,
}

// =============================================================================
// Server state
// =============================================================================

struct ViewState {
    owner: String,
    container: ManagedObjectReference,
    types: Vec<String>,
    recursive: bool,
}

struct FilterState {
    owner: String,
    spec: FilterSpec,
    version: u64,
    reported: BTreeMap<ManagedObjectReference, BTreeMap<String, Value>>,
    pending: VecDeque<Vec<ObjectUpdate>>,
    cancel_requested: bool,
}

#[derive(Default)]
struct State {
    users: BTreeMap<String, String>,
    extensions: BTreeSet<String>,
    tokens: BTreeMap<String, String>,
    tickets: BTreeMap<String, String>,
    sessions: BTreeMap<String, String>,
    next_id: u64,
    inventory: BTreeMap<ManagedObjectReference, BTreeMap<String, Value>>,
    children: BTreeMap<ManagedObjectReference, Vec<ManagedObjectReference>>,
    views: BTreeMap<ManagedObjectReference, ViewState>,
    filters: BTreeMap<ManagedObjectReference, FilterState>,
    injections: Vec<Injection>,
    session_timeout_secs: Option<u64>,
    logins: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn open_session(&mut self, user: &str) -> LoginResult {
        let id = self.next_id();
        let cookie = format!("session-{}", id);
        self.sessions.insert(cookie.clone(), user.to_string());
        self.logins += 1;
        LoginResult {
            session: user_session(&cookie, user),
            cookie: Secret::new(cookie),
        }
    }

    fn user_of(&self, envelope: &Envelope) -> VimResult<String> {
        envelope
            .cookie
            .as_ref()
            .and_then(|c| self.sessions.get(c.expose()))
            .cloned()
            .ok_or_else(VimError::not_authenticated)
    }

    fn drop_session(&mut self, cookie: &str) {
        self.sessions.remove(cookie);
        self.filters.retain(|_, f| f.owner != cookie);
        self.views.retain(|_, v| v.owner != cookie);
    }

    fn take_injection(&mut self, method: &str) -> Option<Injected> {
        let position = self
            .injections
            .iter()
            .position(|i| i.method == method && i.remaining > 0)?;
        let injection = &mut self.injections[position];
        injection.remaining -= 1;
        let error = injection.error.clone();
        if injection.remaining == 0 {
            self.injections.remove(position);
        }
        Some(error)
    }

    fn is_container(&self, obj: &ManagedObjectReference) -> bool {
        self.children.contains_key(obj)
    }

    fn view_members(&self, view: &ViewState) -> Vec<ManagedObjectReference> {
        let mut members = Vec::new();
        let mut seen = BTreeSet::new();
        self.collect_members(&view.container, view, &mut members, &mut seen);
        members
    }

    fn collect_members(
        &self,
        container: &ManagedObjectReference,
        view: &ViewState,
        members: &mut Vec<ManagedObjectReference>,
        seen: &mut BTreeSet<ManagedObjectReference>,
    ) {
        let Some(children) = self.children.get(container) else {
            return;
        };
        for child in children {
            if !seen.insert(child.clone()) {
                continue;
            }
            if view.types.contains(&child.kind) && self.inventory.contains_key(child) {
                members.push(child.clone());
            }
            if view.recursive && self.is_container(child) {
                self.collect_members(child, view, members, seen);
            }
        }
    }

    fn filter_objects(&self, spec: &FilterSpec) -> Vec<ManagedObjectReference> {
        let mut objects = Vec::new();
        for object_spec in &spec.object_set {
            if object_spec.obj.kind == VIEW_TYPE {
                if let Some(view) = self.views.get(&object_spec.obj) {
                    objects.extend(self.view_members(view));
                }
            } else if !object_spec.skip && self.inventory.contains_key(&object_spec.obj) {
                objects.push(object_spec.obj.clone());
            }
        }
        let mut seen = BTreeSet::new();
        objects.retain(|o| seen.insert(o.clone()));
        objects
    }

    fn selected(
        &self,
        spec: &FilterSpec,
        obj: &ManagedObjectReference,
    ) -> BTreeMap<String, Value> {
        let Some(properties) = self.inventory.get(obj) else {
            return BTreeMap::new();
        };
        spec.prop_set
            .iter()
            .filter(|p| p.kind == obj.kind)
            .flat_map(|p| p.path_set.iter())
            .filter_map(|path| properties.get(path).map(|v| (path.clone(), v.clone())))
            .collect()
    }

    /// Computes the next update set for `filter`, or `None` when nothing
    /// changed since the last delivery.
    fn poll(
        &mut self,
        filter: &ManagedObjectReference,
        version: &str,
        options: WaitOptions,
    ) -> VimResult<Option<UpdateSet>> {
        let Some(state) = self.filters.get(filter) else {
            return Err(VimError::fault(
                FaultKind::ManagedObjectNotFound,
                format!("{} does not exist", filter),
            ));
        };
        if state.cancel_requested {
            if let Some(state) = self.filters.get_mut(filter) {
                state.cancel_requested = false;
            }
            return Err(VimError::fault(FaultKind::RequestCanceled, "wait cancelled"));
        }

        let initial = version.is_empty();
        let spec = state.spec.clone();
        let mut previous = if initial {
            BTreeMap::new()
        } else {
            state.reported.clone()
        };
        let has_pending = !initial && !state.pending.is_empty();

        let page = if has_pending {
            None
        } else {
            let mut updates = Vec::new();
            let objects = self.filter_objects(&spec);
            let mut current = BTreeMap::new();
            for obj in &objects {
                let values = self.selected(&spec, obj);
                match previous.remove(obj) {
                    None => updates.push(ObjectUpdate {
                        kind: ObjectUpdateKind::Enter,
                        obj: obj.clone(),
                        change_set: values
                            .iter()
                            .map(|(path, val)| PropertyChange::assign(path.clone(), val.clone()))
                            .collect(),
                    }),
                    Some(before) => {
                        let change_set: Vec<PropertyChange> = values
                            .iter()
                            .filter(|(path, val)| before.get(*path) != Some(*val))
                            .map(|(path, val)| PropertyChange::assign(path.clone(), val.clone()))
                            .collect();
                        if !change_set.is_empty() {
                            updates.push(ObjectUpdate {
                                kind: ObjectUpdateKind::Modify,
                                obj: obj.clone(),
                                change_set,
                            });
                        }
                    }
                }
                current.insert(obj.clone(), values);
            }
            for gone in previous.into_keys() {
                updates.push(ObjectUpdate {
                    kind: ObjectUpdateKind::Leave,
                    obj: gone,
                    change_set: Vec::new(),
                });
            }

            if updates.is_empty() && !initial {
                return Ok(None);
            }
            Some((updates, current))
        };

        let Some(state) = self.filters.get_mut(filter) else {
            return Ok(None);
        };
        if let Some((updates, current)) = page {
            state.reported = current;
            state.version += 1;
            state.pending.clear();
            let size = options
                .max_object_updates
                .map(|n| n.max(1) as usize)
                .unwrap_or(usize::MAX);
            if updates.is_empty() {
                state.pending.push_back(Vec::new());
            }
            let mut rest = updates.into_iter().peekable();
            while rest.peek().is_some() {
                state.pending.push_back(rest.by_ref().take(size).collect());
            }
        }

        let object_set = state.pending.pop_front().unwrap_or_default();
        let truncated = !state.pending.is_empty();
        let version = if truncated {
            format!("{}.{}", state.version, state.pending.len())
        } else {
            state.version.to_string()
        };
        Ok(Some(UpdateSet {
            version,
            filter_set: vec![PropertyFilterUpdate {
                filter: filter.clone(),
                object_set,
            }],
            truncated,
        }))
    }
}

fn user_session(cookie: &str, user: &str) -> UserSession {
    UserSession {
        key: format!("key-{}", cookie),
        user_name: user.to_string(),
        login_time: Utc::now(),
    }
}

fn invalid_login(message: &str) -> VimError {
    VimError::fault(FaultKind::InvalidLogin, message)
}

fn not_found(obj: &ManagedObjectReference) -> VimError {
    VimError::fault(
        FaultKind::ManagedObjectNotFound,
        format!("{} does not exist", obj),
    )
}

// =============================================================================
// SimulatedService
// =============================================================================

/// In-memory stand-in for the remote object service.
///
/// Accepts user `root` with password `secret` unless configured otherwise.
pub struct SimulatedService {
    endpoint: Endpoint,
    verification: Verification,
    state: Mutex<State>,
    epoch: watch::Sender<u64>,
    calls: Mutex<Vec<&'static str>>,
}

impl SimulatedService {
    /// Creates a service at `https://vc.example.test/sdk` with the default
    /// account and an empty inventory.
    pub fn new() -> Self {
        Self::with_endpoint("vc.example.test")
    }

    /// Creates a service for `url`.
    ///
    /// # Panics
    ///
    /// Panics if `url` is not a valid endpoint.
    pub fn with_endpoint(url: &str) -> Self {
        let endpoint = Endpoint::parse(url).expect("valid endpoint");
        let mut state = State {
            session_timeout_secs: Some(1800),
            ..Default::default()
        };
        state.users.insert("root".into(), "secret".into());
        let (epoch, _) = watch::channel(0);
        Self {
            endpoint,
            verification: Verification::Verified,
            state: Mutex::new(state),
            epoch,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reports the connection as unverified, like an insecure transport.
    pub fn unverified(mut self) -> Self {
        self.verification = Verification::Skipped;
        self
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Adds or replaces a password account.
    pub fn add_user(&self, user: &str, password: &str) {
        self.state.lock().users.insert(user.into(), password.into());
    }

    /// Registers an extension key for certificate login.
    pub fn add_extension(&self, key: &str) {
        self.state.lock().extensions.insert(key.into());
    }

    /// Accepts `token` as a login token for `user`.
    pub fn add_token(&self, token: &str, user: &str) {
        self.state.lock().tokens.insert(token.into(), user.into());
    }

    /// Sets the advertised idle session timeout.
    pub fn set_session_timeout(&self, timeout: Option<Duration>) {
        self.state.lock().session_timeout_secs = timeout.map(|t| t.as_secs());
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Adds (or replaces) an object with its properties.
    pub fn add_object<I, P, V>(&self, obj: &ManagedObjectReference, properties: I)
    where
        I: IntoIterator<Item = (P, V)>,
        P: Into<String>,
        V: Into<Value>,
    {
        let properties = properties
            .into_iter()
            .map(|(p, v)| (p.into(), v.into()))
            .collect();
        self.state.lock().inventory.insert(obj.clone(), properties);
        self.bump();
    }

    /// Places `child` inside `container`, creating the container if needed.
    pub fn add_to_container(&self, container: &ManagedObjectReference, child: &ManagedObjectReference) {
        {
            let mut state = self.state.lock();
            state
                .inventory
                .entry(container.clone())
                .or_default();
            let children = state.children.entry(container.clone()).or_default();
            if !children.contains(child) {
                children.push(child.clone());
            }
        }
        self.bump();
    }

    /// Sets one property of an existing object.
    pub fn set_property(&self, obj: &ManagedObjectReference, path: &str, value: impl Into<Value>) {
        {
            let mut state = self.state.lock();
            if let Some(properties) = state.inventory.get_mut(obj) {
                properties.insert(path.into(), value.into());
            }
        }
        self.bump();
    }

    /// Current value of a property.
    pub fn property(&self, obj: &ManagedObjectReference, path: &str) -> Option<Value> {
        self.state
            .lock()
            .inventory
            .get(obj)
            .and_then(|p| p.get(path))
            .cloned()
    }

    /// Removes an object and its container memberships.
    pub fn remove_object(&self, obj: &ManagedObjectReference) {
        {
            let mut state = self.state.lock();
            state.inventory.remove(obj);
            state.children.remove(obj);
            for children in state.children.values_mut() {
                children.retain(|c| c != obj);
            }
        }
        self.bump();
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Forgets every session, with their filters and views.
    pub fn expire_sessions(&self) {
        {
            let mut state = self.state.lock();
            state.sessions.clear();
            state.filters.clear();
            state.views.clear();
        }
        self.bump();
    }

    /// Forgets every session but leaves filters registered and blocked
    /// waits asleep, so the loss is only noticed by the next request.
    pub fn expire_sessions_quietly(&self) {
        self.state.lock().sessions.clear();
    }

    /// Makes the next `times` calls of `method` fail with a transport error.
    pub fn fail_transport(&self, method: &'static str, times: u32, kind: TransportErrorKind) {
        self.inject(method, times, Injected::Transport(kind));
    }

    /// Makes the next `times` calls of `method` fail with a fault.
    pub fn fail_fault(&self, method: &'static str, times: u32, fault: FaultKind) {
        self.inject(method, times, Injected::Fault(fault));
    }

    fn inject(&self, method: &'static str, times: u32, error: Injected) {
        if times == 0 {
            return;
        }
        self.state.lock().injections.push(Injection {
            method,
            remaining: times,
            error,
        });
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Method names of every request received, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    /// Number of requests received for `method`.
    pub fn count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == method).count()
    }

    /// Position of the first request for `method`.
    pub fn first_call(&self, method: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| *c == method)
    }

    /// Forgets the recorded requests.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Number of successful logins of any kind.
    pub fn login_count(&self) -> u64 {
        self.state.lock().logins
    }

    /// Number of registered filters.
    pub fn filter_count(&self) -> usize {
        self.state.lock().filters.len()
    }

    /// Number of live container views.
    pub fn view_count(&self) -> usize {
        self.state.lock().views.len()
    }

    // =========================================================================
    // Request handling
    // =========================================================================

    fn bump(&self) {
        self.epoch.send_modify(|e| *e += 1);
    }

    fn handle(&self, envelope: &Envelope) -> VimResult<Response> {
        let mut state = self.state.lock();
        match &envelope.request {
            Request::RetrieveServiceContent => Ok(Response::About(AboutInfo {
                name: "Simulated Object Service".into(),
                api_version: "8.0.3.0".into(),
                session_timeout_secs: state.session_timeout_secs,
            })),
            Request::Login {
                user_name,
                password,
            } => {
                if state.users.get(user_name).map(String::as_str) != Some(password.expose()) {
                    return Err(invalid_login("incorrect user name or password"));
                }
                Ok(Response::LoggedIn(state.open_session(user_name)))
            }
            Request::LoginExtensionByCertificate { extension_key } => {
                if !state.extensions.contains(extension_key) {
                    return Err(invalid_login("extension is not registered"));
                }
                Ok(Response::LoggedIn(state.open_session(extension_key)))
            }
            Request::LoginByToken { token } => {
                let user = state
                    .tokens
                    .get(token.expose())
                    .cloned()
                    .ok_or_else(|| invalid_login("token rejected"))?;
                Ok(Response::LoggedIn(state.open_session(&user)))
            }
            Request::CloneSession { clone_ticket } => {
                let user = state
                    .tickets
                    .remove(clone_ticket.expose())
                    .ok_or_else(|| invalid_login("clone ticket is invalid or already used"))?;
                Ok(Response::LoggedIn(state.open_session(&user)))
            }
            Request::AcquireCloneTicket => {
                let user = state.user_of(envelope)?;
                let ticket = format!("cst-{}", state.next_id());
                state.tickets.insert(ticket.clone(), user);
                Ok(Response::Ticket(Secret::new(ticket)))
            }
            Request::UserSession => {
                let session = envelope.cookie.as_ref().and_then(|cookie| {
                    state
                        .sessions
                        .get(cookie.expose())
                        .map(|user| user_session(cookie.expose(), user))
                });
                Ok(Response::Session(session))
            }
            Request::CurrentTime => {
                state.user_of(envelope)?;
                Ok(Response::Time(Utc::now()))
            }
            Request::Logout => {
                state.user_of(envelope)?;
                if let Some(cookie) = &envelope.cookie {
                    state.drop_session(cookie.expose());
                }
                Ok(Response::Empty)
            }
            Request::CreateContainerView {
                container,
                types,
                recursive,
            } => {
                state.user_of(envelope)?;
                if !state.is_container(container) {
                    return Err(not_found(container));
                }
                let view = ManagedObjectReference::new(VIEW_TYPE, format!("session[{}]", state.next_id()));
                let owner = owner(envelope);
                state.views.insert(
                    view.clone(),
                    ViewState {
                        owner,
                        container: container.clone(),
                        types: types.clone(),
                        recursive: *recursive,
                    },
                );
                Ok(Response::Reference(view))
            }
            Request::DestroyView { view } => {
                state.user_of(envelope)?;
                state
                    .views
                    .remove(view)
                    .map(|_| Response::Empty)
                    .ok_or_else(|| not_found(view))
            }
            Request::CreateFilter { spec, .. } => {
                state.user_of(envelope)?;
                for object_spec in &spec.object_set {
                    let known = if object_spec.obj.kind == VIEW_TYPE {
                        state.views.contains_key(&object_spec.obj)
                    } else {
                        state.inventory.contains_key(&object_spec.obj)
                    };
                    if !known {
                        return Err(not_found(&object_spec.obj));
                    }
                }
                let filter =
                    ManagedObjectReference::new(FILTER_TYPE, format!("filter-{}", state.next_id()));
                let owner = owner(envelope);
                state.filters.insert(
                    filter.clone(),
                    FilterState {
                        owner,
                        spec: spec.clone(),
                        version: 0,
                        reported: BTreeMap::new(),
                        pending: VecDeque::new(),
                        cancel_requested: false,
                    },
                );
                Ok(Response::Reference(filter))
            }
            Request::DestroyFilter { filter } => {
                state.user_of(envelope)?;
                state
                    .filters
                    .remove(filter)
                    .map(|_| Response::Empty)
                    .ok_or_else(|| not_found(filter))
            }
            Request::CancelWaitForUpdates { filter } => {
                state.user_of(envelope)?;
                let found = match state.filters.get_mut(filter) {
                    Some(f) => {
                        f.cancel_requested = true;
                        true
                    }
                    None => false,
                };
                drop(state);
                if !found {
                    return Err(not_found(filter));
                }
                self.bump();
                Ok(Response::Empty)
            }
            Request::WaitForUpdates { .. } => Err(VimError::internal(
                "WaitForUpdates is handled asynchronously",
            )),
        }
    }

    async fn wait_for_updates(
        &self,
        envelope: &Envelope,
        filter: &ManagedObjectReference,
        version: &str,
        options: WaitOptions,
    ) -> VimResult<Response> {
        let deadline = options
            .max_wait_seconds
            .map(|s| Instant::now() + Duration::from_secs(u64::from(s)));
        loop {
            // Subscribe before looking so a change in between is not missed.
            let mut epoch = self.epoch.subscribe();
            {
                let mut state = self.state.lock();
                let user = state.user_of(envelope)?;
                let owned = state
                    .filters
                    .get(filter)
                    .is_some_and(|f| Some(f.owner.as_str()) == envelope.cookie.as_ref().map(Secret::expose));
                if !owned {
                    tracing::debug!(user = %user, filter = %filter, "Wait on unknown filter");
                    return Err(not_found(filter));
                }
                if let Some(set) = state.poll(filter, version, options)? {
                    return Ok(Response::Updates(Some(set)));
                }
            }
            if options.max_wait_seconds == Some(0) {
                return Ok(Response::Updates(None));
            }

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        changed = epoch.changed() => {
                            if changed.is_err() {
                                return Err(VimError::internal("service shut down"));
                            }
                        }
                        _ = tokio::time::sleep_until(deadline) => {
                            return Ok(Response::Updates(None));
                        }
                    }
                }
                None => {
                    if epoch.changed().await.is_err() {
                        return Err(VimError::internal("service shut down"));
                    }
                }
            }
        }
    }
}

impl Default for SimulatedService {
    fn default() -> Self {
        Self::new()
    }
}

fn owner(envelope: &Envelope) -> String {
    envelope
        .cookie
        .as_ref()
        .map(|c| c.expose().to_string())
        .unwrap_or_default()
}

#[async_trait]
impl vimwatch_core::Transport for SimulatedService {
    async fn round_trip(&self, envelope: &Envelope) -> VimResult<Response> {
        let method = envelope.request.name();
        self.calls.lock().push(method);

        let injected = self.state.lock().take_injection(method);
        if let Some(injected) = injected {
            return Err(injected.to_error(method));
        }

        match &envelope.request {
            Request::WaitForUpdates {
                filter,
                version,
                options,
            } => {
                self.wait_for_updates(envelope, filter, version, *options)
                    .await
            }
            _ => self.handle(envelope),
        }
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn verification(&self) -> Verification {
        self.verification
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use vimwatch_core::{ObjectSpec, PropertySpec, Transport};

    fn vm(id: &str) -> ManagedObjectReference {
        ManagedObjectReference::new("VirtualMachine", id)
    }

    async fn login(service: &SimulatedService) -> Secret {
        service
            .round_trip(&Envelope::anonymous(Request::Login {
                user_name: "root".into(),
                password: Secret::new("secret"),
            }))
            .await
            .unwrap()
            .into_login()
            .unwrap()
            .cookie
    }

    async fn create_filter(service: &SimulatedService, cookie: &Secret, objs: &[&str]) -> ManagedObjectReference {
        let spec = FilterSpec {
            object_set: objs
                .iter()
                .map(|id| ObjectSpec {
                    obj: vm(id),
                    skip: false,
                    select_set: vec![],
                })
                .collect(),
            prop_set: vec![PropertySpec {
                kind: "VirtualMachine".into(),
                path_set: vec!["name".into()],
            }],
        };
        service
            .round_trip(&Envelope::with_cookie(
                Request::CreateFilter {
                    spec,
                    partial_updates: false,
                },
                cookie.clone(),
            ))
            .await
            .unwrap()
            .into_reference()
            .unwrap()
    }

    async fn wait(
        service: &SimulatedService,
        cookie: &Secret,
        filter: &ManagedObjectReference,
        version: &str,
        options: WaitOptions,
    ) -> VimResult<Option<UpdateSet>> {
        service
            .round_trip(&Envelope::with_cookie(
                Request::WaitForUpdates {
                    filter: filter.clone(),
                    version: version.into(),
                    options,
                },
                cookie.clone(),
            ))
            .await?
            .into_updates()
    }

    #[tokio::test]
    async fn test_initial_state_then_single_check() {
        let service = SimulatedService::new();
        service.add_object(&vm("vm-1"), [("name", "web")]);
        let cookie = login(&service).await;
        let filter = create_filter(&service, &cookie, &["vm-1"]).await;

        let single = WaitOptions {
            max_wait_seconds: Some(0),
            max_object_updates: None,
        };
        let initial = wait(&service, &cookie, &filter, "", single).await.unwrap().unwrap();
        assert_eq!(initial.version, "1");
        let updates: Vec<_> = initial.updates_for(&filter).collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].kind, ObjectUpdateKind::Enter);

        assert!(wait(&service, &cookie, &filter, "1", single).await.unwrap().is_none());

        service.set_property(&vm("vm-1"), "name", "db");
        let next = wait(&service, &cookie, &filter, "1", single).await.unwrap().unwrap();
        let updates: Vec<_> = next.updates_for(&filter).collect();
        assert_eq!(updates[0].kind, ObjectUpdateKind::Modify);
        assert_eq!(updates[0].change_set[0].val, Value::from("db"));
    }

    #[tokio::test]
    async fn test_paging() {
        let service = SimulatedService::new();
        for id in ["vm-1", "vm-2", "vm-3"] {
            service.add_object(&vm(id), [("name", id)]);
        }
        let cookie = login(&service).await;
        let filter = create_filter(&service, &cookie, &["vm-1", "vm-2", "vm-3"]).await;
        let options = WaitOptions {
            max_wait_seconds: Some(0),
            max_object_updates: Some(2),
        };

        let first = wait(&service, &cookie, &filter, "", options).await.unwrap().unwrap();
        assert!(first.truncated);
        assert_eq!(first.updates_for(&filter).count(), 2);

        let second = wait(&service, &cookie, &filter, &first.version, options)
            .await
            .unwrap()
            .unwrap();
        assert!(!second.truncated);
        assert_eq!(second.updates_for(&filter).count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_ends_blocking_wait() {
        let service = std::sync::Arc::new(SimulatedService::new());
        service.add_object(&vm("vm-1"), [("name", "web")]);
        let cookie = login(&service).await;
        let filter = create_filter(&service, &cookie, &["vm-1"]).await;
        wait(&service, &cookie, &filter, "", WaitOptions::default()).await.unwrap();

        let pending = {
            let service = service.clone();
            let cookie = cookie.clone();
            let filter = filter.clone();
            tokio::spawn(async move {
                wait(&service, &cookie, &filter, "1", WaitOptions::default()).await
            })
        };
        tokio::task::yield_now().await;
        service
            .round_trip(&Envelope::with_cookie(
                Request::CancelWaitForUpdates {
                    filter: filter.clone(),
                },
                cookie.clone(),
            ))
            .await
            .unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_expired_session_is_not_authenticated() {
        let service = SimulatedService::new();
        let cookie = login(&service).await;
        service.expire_sessions();

        let err = service
            .round_trip(&Envelope::with_cookie(Request::CurrentTime, cookie))
            .await
            .unwrap_err();
        assert!(err.is_session_expired());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let service = SimulatedService::new();
        service.fail_transport("RetrieveServiceContent", 2, TransportErrorKind::ConnectionReset);
        let request = Envelope::anonymous(Request::RetrieveServiceContent);

        assert!(service.round_trip(&request).await.unwrap_err().is_transient());
        assert!(service.round_trip(&request).await.unwrap_err().is_transient());
        assert!(service.round_trip(&request).await.is_ok());
        assert_eq!(service.count("RetrieveServiceContent"), 3);
    }

    #[tokio::test]
    async fn test_clone_ticket_is_single_use() {
        let service = SimulatedService::new();
        let cookie = login(&service).await;
        let ticket = service
            .round_trip(&Envelope::with_cookie(Request::AcquireCloneTicket, cookie))
            .await
            .unwrap()
            .into_ticket()
            .unwrap();

        let clone = Envelope::anonymous(Request::CloneSession {
            clone_ticket: ticket,
        });
        assert!(service.round_trip(&clone).await.is_ok());
        assert!(service.round_trip(&clone).await.is_err());
        assert_eq!(service.session_count(), 2);
    }
}
