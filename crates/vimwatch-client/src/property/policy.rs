// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! When a watch ends.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vimwatch_core::{ChangeOp, ObjectUpdate, VimError, VimResult};

/// Unbounded batch count.
pub const UNBOUNDED: i64 = -1;

// =============================================================================
// PropertyMatch
// =============================================================================

/// `path == value` over a single property.
///
/// A batch matches when any object update in it assigns `path` a value
/// equal to `value`. Values compare by their textual form, so `true`, `42`
/// and `poweredOn` all work as typed on a command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyMatch {
    /// Property path.
    pub path: String,
    /// Expected value.
    pub value: String,
}

impl PropertyMatch {
    /// Creates a predicate.
    pub fn new(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Parses `path=value`.
    pub fn parse(input: &str) -> VimResult<Self> {
        match input.split_once('=') {
            Some((path, value)) if !path.trim().is_empty() => {
                Ok(Self::new(path.trim(), value.trim()))
            }
            _ => Err(VimError::configuration(
                "match",
                format!("'{}' is not of the form path=value", input),
            )),
        }
    }

    /// Returns `true` if any update carries the expected value for the path.
    pub fn matches<'a>(&self, updates: impl IntoIterator<Item = &'a ObjectUpdate>) -> bool {
        updates.into_iter().any(|update| {
            update.change_set.iter().any(|change| {
                change.name == self.path
                    && matches!(change.op, ChangeOp::Assign | ChangeOp::Add)
                    && change.val.matches_text(&self.value)
            })
        })
    }
}

impl fmt::Display for PropertyMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.path, self.value)
    }
}

impl FromStr for PropertyMatch {
    type Err = VimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// WatchPolicy
// =============================================================================

/// Bounds for a watch. All bounds are optional; the first one reached ends
/// the watch.
///
/// `count` counts logical batches including the initial state. Pages of a
/// truncated update are one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchPolicy {
    /// Stop after this many batches; [`UNBOUNDED`] for no limit.
    pub count: i64,
    /// Stop after this much wall-clock time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Stop on the first batch matching this predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<PropertyMatch>,
    /// Server-side block time per wait call. `Some(0)` is a single check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait: Option<Duration>,
    /// Object updates per page before the server truncates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_object_updates: Option<u32>,
}

impl Default for WatchPolicy {
    fn default() -> Self {
        Self {
            count: UNBOUNDED,
            timeout: None,
            predicate: None,
            max_wait: None,
            max_object_updates: None,
        }
    }
}

impl WatchPolicy {
    /// Unbounded policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops after `count` batches.
    pub fn count(mut self, count: i64) -> Self {
        self.count = count;
        self
    }

    /// Stops after `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Stops on the first batch matching `predicate`.
    pub fn predicate(mut self, predicate: PropertyMatch) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Sets the server-side block time per wait call.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Sets the page size.
    pub fn max_object_updates(mut self, max: u32) -> Self {
        self.max_object_updates = Some(max);
        self
    }

    /// Returns `true` if the batch limit is reached after `delivered` batches.
    pub fn count_reached(&self, delivered: u64) -> bool {
        self.count > 0 && delivered >= self.count as u64
    }

    /// Checks the bounds for consistency.
    pub fn validate(&self) -> VimResult<()> {
        if self.count == 0 || self.count < UNBOUNDED {
            return Err(VimError::configuration(
                "count",
                format!("must be positive or {} for unbounded, got {}", UNBOUNDED, self.count),
            ));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(VimError::configuration("timeout", "must be greater than zero"));
        }
        if self.max_object_updates == Some(0) {
            return Err(VimError::configuration(
                "max_object_updates",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vimwatch_core::{ManagedObjectReference, ObjectUpdateKind, PropertyChange};

    fn update(path: &str, value: &str) -> ObjectUpdate {
        ObjectUpdate {
            kind: ObjectUpdateKind::Modify,
            obj: ManagedObjectReference::new("VirtualMachine", "vm-1"),
            change_set: vec![PropertyChange::assign(path, value)],
        }
    }

    #[test]
    fn test_parse_match() {
        let m = PropertyMatch::parse("power.state = on").unwrap();
        assert_eq!(m.path, "power.state");
        assert_eq!(m.value, "on");
        assert_eq!(m.to_string(), "power.state=on");
        assert!(PropertyMatch::parse("no-equals").is_err());
        assert!(PropertyMatch::parse("=x").is_err());
    }

    #[test]
    fn test_match_against_updates() {
        let m = PropertyMatch::new("power.state", "on");
        assert!(m.matches(&[update("name", "web"), update("power.state", "on")]));
        assert!(!m.matches(&[update("power.state", "off")]));
        assert!(!m.matches(Vec::<ObjectUpdate>::new().iter()));
    }

    #[test]
    fn test_non_string_values_match_textually() {
        let mut u = update("x", "y");
        u.change_set = vec![PropertyChange::assign("summary.overallStatus.ok", true)];
        assert!(PropertyMatch::new("summary.overallStatus.ok", "true").matches([&u]));
    }

    #[test]
    fn test_policy_validation() {
        assert!(WatchPolicy::new().validate().is_ok());
        assert!(WatchPolicy::new().count(1).validate().is_ok());
        assert!(WatchPolicy::new().count(0).validate().is_err());
        assert!(WatchPolicy::new().count(-2).validate().is_err());
        assert!(WatchPolicy::new().max_object_updates(0).validate().is_err());
        assert!(WatchPolicy::new().timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_count_reached() {
        let unbounded = WatchPolicy::new();
        assert!(!unbounded.count_reached(1_000_000));
        let one = WatchPolicy::new().count(1);
        assert!(!one.count_reached(0));
        assert!(one.count_reached(1));
    }
}
