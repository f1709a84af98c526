// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `watch` command.
//!
//! Text output is one tab-separated line per property change:
//!
//! ```text
//! VirtualMachine:vm-42    runtime.powerState    assign    poweredOn
//! ```
//!
//! An object that leaves the result set prints `<obj>  -  leave  -`.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::time::Duration;

use vimwatch_client::{
    CancellationCoordinator, ChangeBatch, CredentialSpec, Filter, Flow, FnHandler,
    PropertyMatch, WatchPolicy,
};
use vimwatch_config::ClientConfig;
use vimwatch_core::{ManagedObjectReference, ObjectUpdateKind, VimError};

use super::{open, Completion};
use crate::cli::WatchArgs;
use crate::error::{BinError, BinResult};
use crate::settings;

/// Executes the `watch` command.
pub async fn watch(config: ClientConfig, args: &WatchArgs) -> BinResult<Completion> {
    let filter = build_filter(args).map_err(|e| e.with_context("watch"))?;
    let policy = build_policy(args, &config).map_err(|e| e.with_context("watch"))?;

    let credentials = CredentialSpec::from_source(settings::credential_source(&config))?;
    let handle = open(&config, credentials, true).await?;
    let completion = Completion::from_verification(handle.verification());

    let json = args.json;
    let mut printer = FnHandler(move |batch: &ChangeBatch| print_batch(batch, json));
    let coordinator = CancellationCoordinator::ctrl_c();

    let result = handle
        .watch_cancellable(&coordinator, &filter, &policy, &mut printer)
        .await;

    if let Err(e) = handle.close().await {
        e.log("close after watch");
    }

    match result {
        Ok(summary) => {
            tracing::info!(
                batches = summary.batches,
                pages = summary.pages,
                relogins = summary.relogins,
                reason = ?summary.reason,
                "Watch finished"
            );
            Ok(completion)
        }
        Err(e) if e.is_cancelled() && coordinator.interrupts() > 0 => Err(BinError::Interrupted),
        Err(e) => Err(e.into()),
    }
}

/// Builds the filter from the positional objects or `--container`.
pub fn build_filter(args: &WatchArgs) -> BinResult<Filter> {
    let mut builder = Filter::builder();

    if let Some(container) = &args.container {
        let container = parse_ref(container)?;
        let kind = args
            .kind
            .clone()
            .ok_or_else(|| BinError::usage("--container requires --type"))?;
        builder = builder
            .container(container, [kind.clone()], !args.no_recursive)
            .properties(kind, args.properties.iter().cloned());
    } else {
        let roots = args
            .objects
            .iter()
            .map(|r| parse_ref(r))
            .collect::<BinResult<Vec<_>>>()?;
        let kinds: BTreeSet<String> = match &args.kind {
            Some(kind) => BTreeSet::from([kind.clone()]),
            None => roots.iter().map(|r| r.kind.clone()).collect(),
        };
        for kind in kinds {
            builder = builder.properties(kind, args.properties.iter().cloned());
        }
        builder = builder.roots(roots);
    }

    Ok(builder.build()?)
}

/// Builds the policy from the flags and the `watch` configuration section.
pub fn build_policy(args: &WatchArgs, config: &ClientConfig) -> BinResult<WatchPolicy> {
    let mut policy = WatchPolicy::new()
        .count(args.count)
        .max_object_updates(config.watch.max_object_updates);
    if let Some(secs) = args.timeout {
        policy = policy.timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.wait.or(config.watch.max_wait_secs) {
        policy = policy.max_wait(Duration::from_secs(u64::from(secs)));
    }
    if let Some(matching) = &args.matching {
        policy = policy.predicate(PropertyMatch::parse(matching)?);
    }
    policy.validate()?;
    Ok(policy)
}

fn parse_ref(input: &str) -> BinResult<ManagedObjectReference> {
    input
        .parse()
        .map_err(|_| BinError::usage(format!("'{}' is not an object reference (Type:value)", input)))
}

/// Renders a page as text lines.
pub fn format_batch(batch: &ChangeBatch) -> Vec<String> {
    let mut lines = Vec::new();
    for update in &batch.updates {
        if update.kind == ObjectUpdateKind::Leave && update.change_set.is_empty() {
            lines.push(format!("{}\t-\tleave\t-", update.obj));
            continue;
        }
        for change in &update.change_set {
            lines.push(format!(
                "{}\t{}\t{}\t{}",
                update.obj, change.name, change.op, change.val
            ));
        }
    }
    lines
}

fn print_batch(batch: &ChangeBatch, json: bool) -> Result<Flow, VimError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let written = if json {
        let line = serde_json::to_string(batch)
            .map_err(|e| VimError::internal(format!("encoding batch: {}", e)))?;
        writeln!(out, "{}", line)
    } else {
        format_batch(batch)
            .iter()
            .try_for_each(|line| writeln!(out, "{}", line))
    };

    match written.and_then(|()| out.flush()) {
        Ok(()) => Ok(Flow::Continue),
        // Reader went away (e.g. `| head`).
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(Flow::Stop),
        Err(e) => Err(VimError::internal(format!("writing output: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vimwatch_client::FilterRoot;
    use vimwatch_core::{ObjectUpdate, PropertyChange};

    fn args(objects: &[&str], properties: &[&str]) -> WatchArgs {
        WatchArgs {
            objects: objects.iter().map(|s| s.to_string()).collect(),
            properties: properties.iter().map(|s| s.to_string()).collect(),
            count: -1,
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_from_objects() {
        let filter = build_filter(&args(
            &["VirtualMachine:vm-1", "VirtualMachine:vm-2", "HostSystem:host-9"],
            &["name"],
        ))
        .unwrap();

        let FilterRoot::Objects { roots } = filter.root() else {
            panic!("Expected object roots");
        };
        assert_eq!(roots.len(), 3);
        let kinds: Vec<&str> = filter.props().iter().map(|p| p.kind.as_str()).collect();
        assert_eq!(kinds, vec!["HostSystem", "VirtualMachine"]);
    }

    #[test]
    fn test_filter_from_container() {
        let watch = WatchArgs {
            container: Some("Folder:group-d1".into()),
            kind: Some("VirtualMachine".into()),
            no_recursive: true,
            ..args(&[], &["runtime.powerState"])
        };
        let filter = build_filter(&watch).unwrap();
        assert!(filter.requires_view());
        assert!(matches!(
            filter.root(),
            FilterRoot::Container { recursive: false, .. }
        ));
    }

    #[test]
    fn test_bad_reference_is_usage_error() {
        let err = build_filter(&args(&["vm-1"], &["name"])).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_policy_from_flags_and_config() {
        let mut config = ClientConfig::default();
        config.watch.max_wait_secs = Some(30);

        let watch = WatchArgs {
            count: 2,
            timeout: Some(60),
            matching: Some("runtime.powerState=poweredOn".into()),
            ..args(&["VirtualMachine:vm-1"], &["runtime.powerState"])
        };
        let policy = build_policy(&watch, &config).unwrap();
        assert_eq!(policy.count, 2);
        assert_eq!(policy.timeout, Some(Duration::from_secs(60)));
        assert_eq!(policy.max_wait, Some(Duration::from_secs(30)));
        assert_eq!(
            policy.predicate,
            Some(PropertyMatch::new("runtime.powerState", "poweredOn"))
        );

        let single = WatchArgs {
            wait: Some(0),
            ..watch
        };
        assert_eq!(
            build_policy(&single, &config).unwrap().max_wait,
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_policy_rejects_zero_count() {
        let watch = WatchArgs {
            count: 0,
            ..args(&["VirtualMachine:vm-1"], &["name"])
        };
        let err = build_policy(&watch, &ClientConfig::default()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_format_batch() {
        let vm: ManagedObjectReference = "VirtualMachine:vm-1".parse().unwrap();
        let batch = ChangeBatch {
            sequence: 1,
            page: 0,
            last_page: true,
            initial: false,
            version: "2".into(),
            updates: vec![
                ObjectUpdate {
                    kind: ObjectUpdateKind::Modify,
                    obj: vm.clone(),
                    change_set: vec![PropertyChange::assign("runtime.powerState", "poweredOff")],
                },
                ObjectUpdate {
                    kind: ObjectUpdateKind::Leave,
                    obj: "VirtualMachine:vm-2".parse().unwrap(),
                    change_set: vec![],
                },
            ],
        };

        assert_eq!(
            format_batch(&batch),
            vec![
                "VirtualMachine:vm-1\truntime.powerState\tassign\tpoweredOff".to_string(),
                "VirtualMachine:vm-2\t-\tleave\t-".to_string(),
            ]
        );
    }
}
