// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Change batches delivered to watch handlers.
//!
//! One logical batch is the result of one wait cycle. When the server
//! truncates it, the batch arrives as several pages that share a
//! `sequence`; only the page with `last_page` set closes the batch.
//!
//! [`Snapshot`] mirrors the property values seen so far. After a
//! re-registration the server replays the full state, and
//! [`Snapshot::resync`] reduces that replay to the real differences.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vimwatch_core::{
    ChangeOp, ManagedObjectReference, ObjectUpdate, ObjectUpdateKind, PropertyChange, Value,
};

// =============================================================================
// ChangeBatch
// =============================================================================

/// One page of a logical update batch.
///
/// Pages follow the server's paging, so a page carries at most
/// `max_object_updates` objects. The batch that resynchronizes a watch
/// after a re-login is the exception: the server's replay is gathered and
/// reduced first, then delivered as a single page of any size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Logical batch number, starting at 0 for the initial state.
    pub sequence: u64,
    /// Page number within the batch, starting at 0.
    pub page: u32,
    /// `true` on the page that completes the batch.
    pub last_page: bool,
    /// `true` for the pages of the initial state.
    pub initial: bool,
    /// Server version after this page.
    pub version: String,
    /// Object updates, one per object.
    pub updates: Vec<ObjectUpdate>,
}

impl ChangeBatch {
    /// Returns `true` if the page carries no updates.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Iterates over every `(object, change)` pair in order.
    pub fn changes(&self) -> impl Iterator<Item = (&ManagedObjectReference, &PropertyChange)> {
        self.updates
            .iter()
            .flat_map(|u| u.change_set.iter().map(move |c| (&u.obj, c)))
    }
}

/// Merges updates for the same object into one entry, keeping the order in
/// which objects first appear and the server order of their changes.
pub fn group_updates(updates: impl IntoIterator<Item = ObjectUpdate>) -> Vec<ObjectUpdate> {
    let mut grouped: Vec<ObjectUpdate> = Vec::new();
    let mut index: BTreeMap<ManagedObjectReference, usize> = BTreeMap::new();

    for update in updates {
        match index.get(&update.obj) {
            Some(&at) => {
                let existing = &mut grouped[at];
                existing.kind = match (existing.kind, update.kind) {
                    (_, ObjectUpdateKind::Leave) => ObjectUpdateKind::Leave,
                    (ObjectUpdateKind::Leave, ObjectUpdateKind::Enter) => ObjectUpdateKind::Enter,
                    (kind, _) => kind,
                };
                existing.change_set.extend(update.change_set);
            }
            None => {
                index.insert(update.obj.clone(), grouped.len());
                grouped.push(update);
            }
        }
    }
    grouped
}

// =============================================================================
// Snapshot
// =============================================================================

/// Last known property values per object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    objects: BTreeMap<ManagedObjectReference, BTreeMap<String, Value>>,
}

impl Snapshot {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if no object is tracked.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Current value of `path` on `obj`.
    pub fn get(&self, obj: &ManagedObjectReference, path: &str) -> Option<&Value> {
        self.objects.get(obj).and_then(|props| props.get(path))
    }

    /// Applies delivered updates.
    pub fn apply<'a>(&mut self, updates: impl IntoIterator<Item = &'a ObjectUpdate>) {
        for update in updates {
            if update.kind == ObjectUpdateKind::Leave {
                self.objects.remove(&update.obj);
                continue;
            }
            let props = self.objects.entry(update.obj.clone()).or_default();
            for change in &update.change_set {
                apply_change(props, change);
            }
        }
    }

    /// Compares a full-state replay against the snapshot and returns the
    /// updates that turn the snapshot into the replayed state. The snapshot
    /// is left equal to the replay.
    pub fn resync(&mut self, replay: &[ObjectUpdate]) -> Vec<ObjectUpdate> {
        let mut fresh = Snapshot::new();
        fresh.apply(replay);

        let mut diff = Vec::new();

        for (obj, props) in &fresh.objects {
            match self.objects.get(obj) {
                None => diff.push(ObjectUpdate {
                    kind: ObjectUpdateKind::Enter,
                    obj: obj.clone(),
                    change_set: props
                        .iter()
                        .map(|(name, val)| PropertyChange::assign(name.clone(), val.clone()))
                        .collect(),
                }),
                Some(known) => {
                    let mut change_set: Vec<PropertyChange> = props
                        .iter()
                        .filter(|(name, val)| known.get(*name) != Some(*val))
                        .map(|(name, val)| PropertyChange::assign(name.clone(), val.clone()))
                        .collect();
                    change_set.extend(known.keys().filter(|k| !props.contains_key(*k)).map(
                        |name| PropertyChange {
                            name: name.clone(),
                            op: ChangeOp::IndirectRemove,
                            val: Value::Null,
                        },
                    ));
                    if !change_set.is_empty() {
                        diff.push(ObjectUpdate {
                            kind: ObjectUpdateKind::Modify,
                            obj: obj.clone(),
                            change_set,
                        });
                    }
                }
            }
        }

        for obj in self.objects.keys().filter(|o| !fresh.objects.contains_key(*o)) {
            diff.push(ObjectUpdate {
                kind: ObjectUpdateKind::Leave,
                obj: obj.clone(),
                change_set: Vec::new(),
            });
        }

        *self = fresh;
        diff
    }
}

fn apply_change(props: &mut BTreeMap<String, Value>, change: &PropertyChange) {
    match change.op {
        ChangeOp::Assign => {
            props.insert(change.name.clone(), change.val.clone());
        }
        ChangeOp::Add => match props.get_mut(&change.name) {
            Some(Value::Array(items)) => items.push(change.val.clone()),
            _ => {
                props.insert(change.name.clone(), Value::Array(vec![change.val.clone()]));
            }
        },
        ChangeOp::Remove => match props.get_mut(&change.name) {
            Some(Value::Array(items)) if !change.val.is_null() => {
                items.retain(|item| item != &change.val);
            }
            _ => {
                props.remove(&change.name);
            }
        },
        ChangeOp::IndirectRemove => {
            props.remove(&change.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(id: &str) -> ManagedObjectReference {
        ManagedObjectReference::new("VirtualMachine", id)
    }

    fn enter(id: &str, props: &[(&str, &str)]) -> ObjectUpdate {
        ObjectUpdate {
            kind: ObjectUpdateKind::Enter,
            obj: vm(id),
            change_set: props
                .iter()
                .map(|(k, v)| PropertyChange::assign(*k, *v))
                .collect(),
        }
    }

    #[test]
    fn test_group_updates_per_object() {
        let mut modify = enter("vm-1", &[("power.state", "on")]);
        modify.kind = ObjectUpdateKind::Modify;
        let grouped = group_updates(vec![
            enter("vm-1", &[("name", "a")]),
            enter("vm-2", &[("name", "b")]),
            modify,
        ]);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].obj, vm("vm-1"));
        assert_eq!(grouped[0].kind, ObjectUpdateKind::Enter);
        assert_eq!(grouped[0].change_set.len(), 2);
        assert_eq!(grouped[0].change_set[1].name, "power.state");
    }

    #[test]
    fn test_snapshot_apply() {
        let mut snap = Snapshot::new();
        snap.apply(&[enter("vm-1", &[("name", "a"), ("power.state", "off")])]);
        assert_eq!(snap.get(&vm("vm-1"), "power.state"), Some(&Value::from("off")));

        snap.apply(&[ObjectUpdate {
            kind: ObjectUpdateKind::Leave,
            obj: vm("vm-1"),
            change_set: Vec::new(),
        }]);
        assert!(snap.is_empty());
    }

    #[test]
    fn test_resync_reports_only_differences() {
        let mut snap = Snapshot::new();
        snap.apply(&[
            enter("vm-1", &[("name", "a"), ("power.state", "off"), ("note", "x")]),
            enter("vm-2", &[("name", "b")]),
        ]);

        let diff = snap.resync(&[
            enter("vm-1", &[("name", "a"), ("power.state", "on")]),
            enter("vm-3", &[("name", "c")]),
        ]);

        assert_eq!(diff.len(), 3);
        let vm1 = diff.iter().find(|u| u.obj == vm("vm-1")).unwrap();
        assert_eq!(vm1.kind, ObjectUpdateKind::Modify);
        assert_eq!(vm1.change_set.len(), 2);
        assert!(vm1
            .change_set
            .iter()
            .any(|c| c.name == "note" && c.op == ChangeOp::IndirectRemove));
        assert_eq!(
            diff.iter().find(|u| u.obj == vm("vm-3")).unwrap().kind,
            ObjectUpdateKind::Enter
        );
        assert_eq!(
            diff.iter().find(|u| u.obj == vm("vm-2")).unwrap().kind,
            ObjectUpdateKind::Leave
        );
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn test_resync_identical_state_is_empty() {
        let state = [enter("vm-1", &[("name", "a")])];
        let mut snap = Snapshot::new();
        snap.apply(&state);
        assert!(snap.resync(&state).is_empty());
    }
}
