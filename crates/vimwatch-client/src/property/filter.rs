// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Property filters.
//!
//! A [`Filter`] names what to observe: either explicit root objects (with
//! optional traversals) or a container whose members of given types are
//! collected through a container view.
//!
//! ```text
//! Objects root                         Container root
//! ────────────                         ──────────────
//! ObjectSpec(vm-1) ─┐                  ObjectSpec(view, skip) ── ContainerView.view
//! ObjectSpec(vm-2) ─┼─ select_set           │
//!                   │   (user traversals)   └── viewed objects of `types`
//! PropertySpec(VirtualMachine: [name, runtime.powerState])
//! ```
//!
//! Filters are validated when built; an invalid filter never reaches the
//! server.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use vimwatch_core::{
    FilterSpec, ManagedObjectReference, ObjectSpec, PropertySpec, TraversalSpec, VimError,
    VimResult,
};

use super::policy::PropertyMatch;

/// Type of the managed container view object.
pub const CONTAINER_VIEW_TYPE: &str = "ContainerView";

/// Property of a container view that lists its members.
pub const CONTAINER_VIEW_PATH: &str = "view";

// =============================================================================
// FilterRoot
// =============================================================================

/// Where collection starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterRoot {
    /// Explicit root objects.
    Objects {
        /// The roots.
        roots: Vec<ManagedObjectReference>,
    },
    /// Members of a container, through a container view.
    Container {
        /// The container (folder, datacenter, cluster, ...).
        container: ManagedObjectReference,
        /// Member types to include.
        types: Vec<String>,
        /// Whether to include members of nested containers.
        recursive: bool,
    },
}

// =============================================================================
// Filter
// =============================================================================

/// A validated property filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    root: FilterRoot,
    props: Vec<PropertySpec>,
    traversal: Vec<TraversalSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    predicate: Option<PropertyMatch>,
}

impl Filter {
    /// Starts a builder.
    pub fn builder() -> FilterBuilder {
        FilterBuilder::default()
    }

    /// The root.
    pub fn root(&self) -> &FilterRoot {
        &self.root
    }

    /// Per-type property selections.
    pub fn props(&self) -> &[PropertySpec] {
        &self.props
    }

    /// Traversals from the roots.
    pub fn traversal(&self) -> &[TraversalSpec] {
        &self.traversal
    }

    /// Optional match predicate carried with the filter.
    pub fn predicate(&self) -> Option<&PropertyMatch> {
        self.predicate.as_ref()
    }

    /// Total property paths.
    pub fn path_count(&self) -> usize {
        self.props.iter().map(|p| p.path_set.len()).sum()
    }

    /// Returns `true` if registering the filter needs a container view.
    pub fn requires_view(&self) -> bool {
        matches!(self.root, FilterRoot::Container { .. })
    }

    /// Produces the wire filter spec. `view` must be the container view
    /// created for a container root.
    pub fn spec(&self, view: Option<&ManagedObjectReference>) -> VimResult<FilterSpec> {
        let object_set = match (&self.root, view) {
            (FilterRoot::Objects { roots }, _) => roots
                .iter()
                .map(|obj| ObjectSpec {
                    obj: obj.clone(),
                    skip: false,
                    select_set: self.traversal.clone(),
                })
                .collect(),
            (FilterRoot::Container { .. }, Some(view)) => {
                let mut through_view = TraversalSpec::new(CONTAINER_VIEW_TYPE, CONTAINER_VIEW_PATH);
                through_view.select_set = self.traversal.clone();
                vec![ObjectSpec {
                    obj: view.clone(),
                    skip: true,
                    select_set: vec![through_view],
                }]
            }
            (FilterRoot::Container { container, .. }, None) => {
                return Err(VimError::internal(format!(
                    "container filter on {} registered without a view",
                    container
                )))
            }
        };

        Ok(FilterSpec {
            object_set,
            prop_set: self.props.clone(),
        })
    }
}

/// Builds and validates a filter from its parts.
pub fn build_filter(
    root: FilterRoot,
    props: Vec<PropertySpec>,
    traversal: Vec<TraversalSpec>,
) -> VimResult<Filter> {
    let props = merge_props(props)?;

    let root = match root {
        FilterRoot::Objects { roots } => {
            if roots.is_empty() {
                return Err(invalid("at least one root object is required"));
            }
            let mut seen = BTreeSet::new();
            let roots = roots.into_iter().filter(|r| seen.insert(r.clone())).collect();
            FilterRoot::Objects { roots }
        }
        FilterRoot::Container {
            container,
            types,
            recursive,
        } => {
            let types = if types.is_empty() {
                props.iter().map(|p| p.kind.clone()).collect()
            } else {
                dedup(types)
            };
            if let Some(outside) = props.iter().find(|p| !types.contains(&p.kind)) {
                return Err(invalid(format!(
                    "properties requested for type '{}' which the container view does not include",
                    outside.kind
                )));
            }
            FilterRoot::Container {
                container,
                types,
                recursive,
            }
        }
    };

    for spec in &traversal {
        validate_traversal(spec)?;
    }

    Ok(Filter {
        root,
        props,
        traversal,
        predicate: None,
    })
}

fn merge_props(props: Vec<PropertySpec>) -> VimResult<Vec<PropertySpec>> {
    if props.is_empty() {
        return Err(invalid("at least one property path is required"));
    }

    let mut merged: Vec<PropertySpec> = Vec::with_capacity(props.len());
    for spec in props {
        if spec.kind.trim().is_empty() {
            return Err(invalid("property spec without an object type"));
        }
        if spec.path_set.is_empty() {
            return Err(invalid(format!(
                "type '{}' has no property paths",
                spec.kind
            )));
        }
        if spec.path_set.iter().any(|p| p.trim().is_empty()) {
            return Err(invalid(format!("type '{}' has an empty property path", spec.kind)));
        }

        match merged.iter_mut().find(|m| m.kind == spec.kind) {
            Some(existing) => {
                for path in spec.path_set {
                    if !existing.path_set.contains(&path) {
                        existing.path_set.push(path);
                    }
                }
            }
            None => merged.push(PropertySpec {
                kind: spec.kind,
                path_set: dedup(spec.path_set),
            }),
        }
    }
    Ok(merged)
}

fn validate_traversal(spec: &TraversalSpec) -> VimResult<()> {
    if spec.kind.is_empty() || spec.path.is_empty() {
        return Err(invalid("traversal needs both a type and a path"));
    }
    spec.select_set.iter().try_for_each(validate_traversal)
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

fn invalid(message: impl Into<String>) -> VimError {
    VimError::configuration("filter", message)
}

// =============================================================================
// FilterBuilder
// =============================================================================

/// Fluent construction of a [`Filter`].
///
/// ```rust,ignore
/// let filter = Filter::builder()
///     .root("VirtualMachine:vm-42".parse()?)
///     .properties("VirtualMachine", ["name", "runtime.powerState"])
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    roots: Vec<ManagedObjectReference>,
    container: Option<(ManagedObjectReference, Vec<String>, bool)>,
    props: Vec<PropertySpec>,
    traversal: Vec<TraversalSpec>,
    predicate: Option<PropertyMatch>,
}

impl FilterBuilder {
    /// Adds a root object.
    pub fn root(mut self, obj: ManagedObjectReference) -> Self {
        self.roots.push(obj);
        self
    }

    /// Adds several root objects.
    pub fn roots(mut self, objs: impl IntoIterator<Item = ManagedObjectReference>) -> Self {
        self.roots.extend(objs);
        self
    }

    /// Collects members of `container` through a view instead of explicit roots.
    pub fn container(
        mut self,
        container: ManagedObjectReference,
        types: impl IntoIterator<Item = impl Into<String>>,
        recursive: bool,
    ) -> Self {
        self.container = Some((
            container,
            types.into_iter().map(Into::into).collect(),
            recursive,
        ));
        self
    }

    /// Adds one property path for `kind`.
    pub fn property(self, kind: impl Into<String>, path: impl Into<String>) -> Self {
        self.properties(kind, [path])
    }

    /// Adds property paths for `kind`.
    pub fn properties(
        mut self,
        kind: impl Into<String>,
        paths: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.props.push(PropertySpec {
            kind: kind.into(),
            path_set: paths.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Adds a traversal applied from every root.
    pub fn traverse(mut self, spec: TraversalSpec) -> Self {
        self.traversal.push(spec);
        self
    }

    /// Attaches a match predicate.
    pub fn matching(mut self, predicate: PropertyMatch) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Validates and builds the filter.
    pub fn build(self) -> VimResult<Filter> {
        let root = match (self.container, self.roots.is_empty()) {
            (Some(_), false) => {
                return Err(invalid("give either root objects or a container, not both"))
            }
            (Some((container, types, recursive)), true) => FilterRoot::Container {
                container,
                types,
                recursive,
            },
            (None, _) => FilterRoot::Objects { roots: self.roots },
        };

        let mut filter = build_filter(root, self.props, self.traversal)?;
        filter.predicate = self.predicate;
        Ok(filter)
    }
}
