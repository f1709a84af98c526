// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Property collector data model.
//!
//! These are the structures exchanged with the remote property collector:
//! filter specifications going out, update sets coming back.
//!
//! ```text
//! FilterSpec
//! ├── object_set: [ObjectSpec { obj, skip, select_set: [TraversalSpec] }]
//! └── prop_set:   [PropertySpec { type, path_set }]
//!
//! UpdateSet { version, truncated }
//! └── filter_set: [PropertyFilterUpdate { filter }]
//!     └── object_set: [ObjectUpdate { kind, obj }]
//!         └── change_set: [PropertyChange { name, op, val }]
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ManagedObjectReference, Value};

// =============================================================================
// Filter Specification
// =============================================================================

/// Which properties to collect for one object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Object type the paths apply to.
    #[serde(rename = "type")]
    pub kind: String,
    /// Property paths, e.g. `runtime.powerState`.
    pub path_set: Vec<String>,
}

/// A relationship to follow from an object, possibly nested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalSpec {
    /// Optional name so other specs can refer to it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Type of the object the traversal starts from.
    #[serde(rename = "type")]
    pub kind: String,
    /// Property holding the references to follow.
    pub path: String,
    /// Whether the traversed-through object itself is excluded from results.
    #[serde(default)]
    pub skip: bool,
    /// Further traversals applied to the reached objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select_set: Vec<TraversalSpec>,
}

impl TraversalSpec {
    /// Creates a traversal over `kind.path`.
    pub fn new(kind: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: None,
            kind: kind.into(),
            path: path.into(),
            skip: false,
            select_set: Vec::new(),
        }
    }

    /// Marks the traversal as skipping the intermediate object.
    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// Returns the nesting depth of this traversal (1 for a leaf).
    pub fn depth(&self) -> usize {
        1 + self.select_set.iter().map(TraversalSpec::depth).max().unwrap_or(0)
    }
}

/// A starting object for collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSpec {
    /// The root object.
    pub obj: ManagedObjectReference,
    /// Whether the root itself is excluded from results.
    #[serde(default)]
    pub skip: bool,
    /// Traversals from the root.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select_set: Vec<TraversalSpec>,
}

/// The full filter registered with the property collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FilterSpec {
    /// Root objects.
    pub object_set: Vec<ObjectSpec>,
    /// Per-type property selections.
    pub prop_set: Vec<PropertySpec>,
}

impl FilterSpec {
    /// Total number of property paths across all types.
    pub fn path_count(&self) -> usize {
        self.prop_set.iter().map(|p| p.path_set.len()).sum()
    }
}

/// Options for a single wait call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WaitOptions {
    /// Server-side block time in seconds. `Some(0)` is a single check,
    /// `None` blocks until a change arrives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_seconds: Option<u32>,
    /// Maximum object updates per page before the server truncates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_object_updates: Option<u32>,
}

// =============================================================================
// Updates
// =============================================================================

/// How an object relates to the filter in an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectUpdateKind {
    /// Object entered the filter's result set.
    Enter,
    /// Properties of an already-reported object changed.
    Modify,
    /// Object left the result set.
    Leave,
}

impl fmt::Display for ObjectUpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enter => write!(f, "enter"),
            Self::Modify => write!(f, "modify"),
            Self::Leave => write!(f, "leave"),
        }
    }
}

/// How a property changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    /// Value set or replaced.
    Assign,
    /// Element added to an array property.
    Add,
    /// Element removed from an array property.
    Remove,
    /// Property became unset because a parent was removed.
    IndirectRemove,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assign => write!(f, "assign"),
            Self::Add => write!(f, "add"),
            Self::Remove => write!(f, "remove"),
            Self::IndirectRemove => write!(f, "indirect_remove"),
        }
    }
}

/// A single property delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    /// Property path.
    pub name: String,
    /// Operation.
    pub op: ChangeOp,
    /// New value (`Null` for removals).
    #[serde(default)]
    pub val: Value,
}

impl PropertyChange {
    /// Creates an `assign` change.
    pub fn assign(name: impl Into<String>, val: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            op: ChangeOp::Assign,
            val: val.into(),
        }
    }
}

/// All changes for one object in one update set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectUpdate {
    /// Update kind.
    pub kind: ObjectUpdateKind,
    /// The object.
    pub obj: ManagedObjectReference,
    /// Property changes, in server order.
    #[serde(default)]
    pub change_set: Vec<PropertyChange>,
}

/// Updates attributed to one filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilterUpdate {
    /// The filter these updates belong to.
    pub filter: ManagedObjectReference,
    /// Object updates.
    #[serde(default)]
    pub object_set: Vec<ObjectUpdate>,
}

/// Result of one wait call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UpdateSet {
    /// Version to pass to the next wait call.
    pub version: String,
    /// Per-filter updates.
    #[serde(default)]
    pub filter_set: Vec<PropertyFilterUpdate>,
    /// `true` when more pages of the same logical update are pending.
    #[serde(default)]
    pub truncated: bool,
}

impl UpdateSet {
    /// Returns the object updates for `filter`, in order.
    pub fn updates_for<'a>(
        &'a self,
        filter: &'a ManagedObjectReference,
    ) -> impl Iterator<Item = &'a ObjectUpdate> + 'a {
        self.filter_set
            .iter()
            .filter(move |f| &f.filter == filter)
            .flat_map(|f| f.object_set.iter())
    }
}
