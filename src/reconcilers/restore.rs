//! Restore reconciler
//!
//! Drives a Restore resource through its one-shot lifecycle:
//! New -> Validating -> Downloading -> Restoring -> Completed | Failed.
//! Each phase runs in its own reconcile; terminal phases are never left.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{DynamicObject, Patch, PatchParams, PostParams},
    core::GroupVersionKind,
    discovery::ApiResource,
    runtime::controller::Action,
    Api, Client, ResourceExt,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::crd::{
    BackupInfo, FailedResource, Restore, RestoreTarget, RestoredResource, SkippedResource,
};
use crate::error::{Error, Result};
use crate::metrics;
use crate::resources;
use crate::storage::{self, layout};

/// Field manager for status patches
const MANAGER: &str = "cluster-backup-operator";

/// Validate the Restore spec
pub fn validate(restore: &Restore) -> Result<()> {
    let source = &restore.spec.source;

    if source.backup_path.is_empty() {
        return Err(Error::validation("Backup path must be specified"));
    }

    let location = &source.storage_location;
    if location.provider.is_empty() {
        return Err(Error::validation("Storage provider must be specified"));
    }
    if location.bucket.is_empty() {
        return Err(Error::validation("Storage bucket must be specified"));
    }
    if location.endpoint.is_empty() {
        return Err(Error::validation("Storage endpoint must be specified"));
    }

    match restore.spec.target.conflict_resolution.as_str() {
        "" | "skip" | "overwrite" | "fail" => {}
        other => {
            return Err(Error::validation(format!(
                "Invalid conflict resolution '{}': must be one of: skip, overwrite, fail",
                other
            )));
        }
    }

    Ok(())
}

/// Dispatch one reconcile for a Restore resource
pub async fn reconcile(restore: &Restore, client: &Client, namespace: &str) -> Result<Action> {
    let api: Api<Restore> = Api::namespaced(client.clone(), namespace);

    let phase = restore
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("");

    match phase {
        // One-shot: terminal phases never run again
        "Completed" | "Failed" => Ok(Action::await_change()),
        "" => initialize(restore, &api).await,
        "New" => enter_validating(restore, &api).await,
        "Validating" => run_validation(restore, &api).await,
        "Downloading" => download_backup_info(restore, &api).await,
        "Restoring" => run_restore(restore, client, &api, namespace).await,
        other => {
            warn!(phase = %other, "Unknown Restore phase, reinitializing");
            initialize(restore, &api).await
        }
    }
}

/// unset -> New
async fn initialize(restore: &Restore, api: &Api<Restore>) -> Result<Action> {
    let name = restore.name_any();
    info!(name = %name, "Initializing Restore");

    let status = json!({
        "status": {
            "phase": "New",
            "message": "Restore resource created",
            "startTime": Utc::now(),
            "observedGeneration": restore.metadata.generation,
        }
    });
    api.patch_status(&name, &PatchParams::apply(MANAGER), &Patch::Merge(status))
        .await?;

    Ok(Action::requeue(Duration::ZERO))
}

/// New -> Validating
async fn enter_validating(restore: &Restore, api: &Api<Restore>) -> Result<Action> {
    let name = restore.name_any();

    let status = json!({
        "status": {
            "phase": "Validating",
            "message": "Validating restore source",
            "observedGeneration": restore.metadata.generation,
        }
    });
    api.patch_status(&name, &PatchParams::apply(MANAGER), &Patch::Merge(status))
        .await?;

    Ok(Action::requeue(Duration::ZERO))
}

/// Validating -> Downloading, or Failed
async fn run_validation(restore: &Restore, api: &Api<Restore>) -> Result<Action> {
    let name = restore.name_any();

    if let Err(e) = validate(restore) {
        warn!(name = %name, error = %e, "Restore spec validation failed");
        return fail(restore, api, &e.to_string()).await;
    }

    let store = storage::client_for(&restore.spec.source.storage_location);
    let bucket = &restore.spec.source.storage_location.bucket;
    let backup_path = &restore.spec.source.backup_path;

    if !store.bucket_exists().await {
        return fail(restore, api, &format!("Bucket '{}' not found", bucket)).await;
    }

    let keys = match store.list_prefix(backup_path).await {
        Ok(keys) => keys,
        Err(e) => return fail(restore, api, &e.to_string()).await,
    };
    if keys.is_empty() {
        return fail(
            restore,
            api,
            &format!("No objects found under backup path '{}'", backup_path),
        )
        .await;
    }

    info!(name = %name, backup_path = %backup_path, objects = keys.len(), "Restore source validated");

    let status = json!({
        "status": {
            "phase": "Downloading",
            "message": "Reading backup contents",
            "observedGeneration": restore.metadata.generation,
        }
    });
    api.patch_status(&name, &PatchParams::apply(MANAGER), &Patch::Merge(status))
        .await?;

    Ok(Action::requeue(Duration::ZERO))
}

/// Downloading -> Restoring, or Failed
async fn download_backup_info(restore: &Restore, api: &Api<Restore>) -> Result<Action> {
    let name = restore.name_any();
    let backup_path = &restore.spec.source.backup_path;

    let store = storage::client_for(&restore.spec.source.storage_location);
    let keys = match store.list_prefix(backup_path).await {
        Ok(keys) => keys,
        Err(e) => return fail(restore, api, &e.to_string()).await,
    };

    let mut kinds = BTreeSet::new();
    let mut namespaces = BTreeSet::new();
    let mut resource_count = 0u64;

    for key in &keys {
        // Non-JSON entries and foreign layouts are not an error here
        let Some(entry) = layout::parse_object_key(backup_path, key) else {
            continue;
        };
        resource_count += 1;
        kinds.insert(entry.kind);
        if let Some(ns) = entry.namespace {
            namespaces.insert(ns);
        }
    }

    let info = BackupInfo {
        backup_path: backup_path.clone(),
        resource_count,
        kinds: kinds.into_iter().collect(),
        namespaces: namespaces.into_iter().collect(),
    };

    info!(
        name = %name,
        objects = info.resource_count,
        kinds = info.kinds.len(),
        namespaces = info.namespaces.len(),
        "Backup contents indexed"
    );

    let status = json!({
        "status": {
            "phase": "Restoring",
            "message": "Restoring resources",
            "backupInfo": info,
            "observedGeneration": restore.metadata.generation,
        }
    });
    api.patch_status(&name, &PatchParams::apply(MANAGER), &Patch::Merge(status))
        .await?;

    Ok(Action::requeue(Duration::ZERO))
}

/// Accumulated audit lists for one restore pass
#[derive(Default)]
struct RestoreOutcome {
    restored: Vec<RestoredResource>,
    failed: Vec<FailedResource>,
    skipped: Vec<SkippedResource>,
}

/// Restoring -> Completed, or Failed on a fatal store error
async fn run_restore(
    restore: &Restore,
    client: &Client,
    api: &Api<Restore>,
    namespace: &str,
) -> Result<Action> {
    let name = restore.name_any();
    let _timer = metrics::RESTORE_DURATION
        .with_label_values(&[namespace, &name])
        .start_timer();

    match perform_restore(restore, client).await {
        Ok(outcome) => {
            metrics::RESTORES_TOTAL
                .with_label_values(&["success", namespace, &name])
                .inc();
            metrics::RESTORE_RESOURCES
                .with_label_values(&[namespace, &name])
                .set(outcome.restored.len() as f64);

            let message = format!(
                "Restore completed: {} restored, {} skipped, {} failed",
                outcome.restored.len(),
                outcome.skipped.len(),
                outcome.failed.len()
            );
            info!(name = %name, "{}", message);

            let status = json!({
                "status": {
                    "phase": "Completed",
                    "message": message,
                    "completionTime": Utc::now(),
                    "restoredCount": outcome.restored.len() as u64,
                    "restoredResources": outcome.restored,
                    "failedResources": outcome.failed,
                    "skippedResources": outcome.skipped,
                    "observedGeneration": restore.metadata.generation,
                }
            });
            api.patch_status(&name, &PatchParams::apply(MANAGER), &Patch::Merge(status))
                .await?;

            Ok(Action::await_change())
        }
        Err(e) => {
            metrics::RESTORES_TOTAL
                .with_label_values(&["failure", namespace, &name])
                .inc();
            fail(restore, api, &format!("Restore failed: {}", e)).await
        }
    }
}

/// Walk the backup and materialize each entry into the target cluster
async fn perform_restore(restore: &Restore, client: &Client) -> Result<RestoreOutcome> {
    let spec = &restore.spec;
    let target = &spec.target;
    let options = &spec.options;
    let backup_path = &spec.source.backup_path;

    let info = restore
        .status
        .as_ref()
        .and_then(|s| s.backup_info.clone())
        .ok_or_else(|| Error::validation("Backup contents were not indexed"))?;

    let mut outcome = RestoreOutcome::default();
    let mutating = !options.dry_run && !options.validate_only;

    if options.create_namespaces && mutating {
        let wanted = target_namespace_set(&info, target);
        ensure_namespaces(client, &wanted, &mut outcome.failed).await;
    }

    let store = storage::client_for(&spec.source.storage_location);
    let keys = store.list_prefix(backup_path).await?;

    for key in keys {
        let Some(entry) = layout::parse_object_key(backup_path, &key) else {
            debug!(key = %key, "Skipping entry outside the backup layout");
            continue;
        };

        if entry.is_cluster_scoped() && options.skip_cluster_resources {
            continue;
        }
        if !target.resource_types.is_empty() && !target.resource_types.contains(&entry.kind) {
            continue;
        }

        let effective_ns = entry
            .namespace
            .as_deref()
            .map(|ns| effective_namespace(ns, target));
        if let Some(ns) = &effective_ns {
            if !target.namespaces.is_empty() && !target.namespaces.contains(ns) {
                continue;
            }
        }

        if !mutating {
            outcome.restored.push(RestoredResource {
                api_version: String::new(),
                kind: entry.kind.clone(),
                name: entry.name.clone(),
                namespace: effective_ns.clone(),
                action: "dry-run".to_string(),
            });
            continue;
        }

        let bytes = store.get_object(&key).await?;
        let mut doc: Value = match serde_json::from_slice(&bytes) {
            Ok(doc) => doc,
            Err(e) => {
                outcome.failed.push(FailedResource {
                    api_version: String::new(),
                    kind: entry.kind.clone(),
                    name: entry.name.clone(),
                    namespace: effective_ns.clone(),
                    error: format!("Invalid JSON: {}", e),
                });
                continue;
            }
        };

        resources::sanitize_for_restore(&mut doc, effective_ns.as_deref());
        apply_object(
            client,
            &entry,
            doc,
            effective_ns,
            target.conflict_resolution.as_str(),
            &mut outcome,
        )
        .await;
    }

    Ok(outcome)
}

/// Create or update one object under the conflict policy
async fn apply_object(
    client: &Client,
    entry: &layout::ObjectKey,
    doc: Value,
    effective_ns: Option<String>,
    conflict_resolution: &str,
    outcome: &mut RestoreOutcome,
) {
    let api_version = doc
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let kind = doc
        .get("kind")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if api_version.is_empty() || kind.is_empty() {
        outcome.failed.push(FailedResource {
            api_version,
            kind: entry.kind.clone(),
            name: entry.name.clone(),
            namespace: effective_ns,
            error: "Stored object is missing apiVersion or kind".to_string(),
        });
        return;
    }

    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version.as_str()),
    };
    let gvk = GroupVersionKind::gvk(group, version, &kind);
    // The plural comes from the store key, so no guessing is involved
    let ar = ApiResource::from_gvk_with_plural(&gvk, &entry.kind);

    let api: Api<DynamicObject> = match &effective_ns {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
        None => Api::all_with(client.clone(), &ar),
    };

    let mut object: DynamicObject = match serde_json::from_value(doc) {
        Ok(object) => object,
        Err(e) => {
            outcome.failed.push(FailedResource {
                api_version,
                kind,
                name: entry.name.clone(),
                namespace: effective_ns,
                error: format!("Not a valid object document: {}", e),
            });
            return;
        }
    };

    match api.get(&entry.name).await {
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            match api.create(&PostParams::default(), &object).await {
                Ok(_) => outcome.restored.push(RestoredResource {
                    api_version,
                    kind,
                    name: entry.name.clone(),
                    namespace: effective_ns,
                    action: "created".to_string(),
                }),
                Err(e) => outcome.failed.push(FailedResource {
                    api_version,
                    kind,
                    name: entry.name.clone(),
                    namespace: effective_ns,
                    error: e.to_string(),
                }),
            }
        }
        Ok(existing) => match conflict_resolution {
            "overwrite" => {
                // Updates must carry the live resourceVersion
                object.metadata.resource_version = existing.metadata.resource_version.clone();
                match api
                    .replace(&entry.name, &PostParams::default(), &object)
                    .await
                {
                    Ok(_) => outcome.restored.push(RestoredResource {
                        api_version,
                        kind,
                        name: entry.name.clone(),
                        namespace: effective_ns,
                        action: "updated".to_string(),
                    }),
                    Err(e) => outcome.failed.push(FailedResource {
                        api_version,
                        kind,
                        name: entry.name.clone(),
                        namespace: effective_ns,
                        error: e.to_string(),
                    }),
                }
            }
            "fail" => outcome.failed.push(FailedResource {
                api_version,
                kind,
                name: entry.name.clone(),
                namespace: effective_ns,
                error: "resource already exists".to_string(),
            }),
            _ => outcome.skipped.push(SkippedResource {
                api_version,
                kind,
                name: entry.name.clone(),
                namespace: effective_ns,
                reason: "resource already exists".to_string(),
            }),
        },
        Err(e) => outcome.failed.push(FailedResource {
            api_version,
            kind,
            name: entry.name.clone(),
            namespace: effective_ns,
            error: e.to_string(),
        }),
    }
}

/// Map a source namespace to its target.
///
/// Explicit mappings win; a single-entry target list collapses everything
/// into that namespace; otherwise the source namespace is preserved.
pub fn effective_namespace(source: &str, target: &RestoreTarget) -> String {
    if let Some(mapped) = target.namespace_mapping.get(source) {
        return mapped.clone();
    }
    if target.namespaces.len() == 1 {
        return target.namespaces[0].clone();
    }
    source.to_string()
}

/// Namespaces a restore will materialize into
fn target_namespace_set(info: &BackupInfo, target: &RestoreTarget) -> BTreeSet<String> {
    if !target.namespaces.is_empty() {
        target.namespaces.iter().cloned().collect()
    } else {
        info.namespaces
            .iter()
            .map(|ns| effective_namespace(ns, target))
            .collect()
    }
}

/// Create missing namespaces; errors are recorded, never fatal
async fn ensure_namespaces(
    client: &Client,
    namespaces: &BTreeSet<String>,
    failed: &mut Vec<FailedResource>,
) {
    let api: Api<Namespace> = Api::all(client.clone());

    for ns in namespaces {
        match api.get(ns).await {
            Ok(_) => continue,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                let namespace = Namespace {
                    metadata: ObjectMeta {
                        name: Some(ns.clone()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                if let Err(e) = api.create(&PostParams::default(), &namespace).await {
                    failed.push(namespace_failure(ns, e));
                } else {
                    info!(namespace = %ns, "Created target namespace");
                }
            }
            Err(e) => failed.push(namespace_failure(ns, e)),
        }
    }
}

fn namespace_failure(ns: &str, error: kube::Error) -> FailedResource {
    FailedResource {
        api_version: "v1".to_string(),
        kind: "Namespace".to_string(),
        name: ns.to_string(),
        namespace: None,
        error: error.to_string(),
    }
}

/// Move the resource to Failed with a completion time
async fn fail(restore: &Restore, api: &Api<Restore>, message: &str) -> Result<Action> {
    let name = restore.name_any();

    let status = json!({
        "status": {
            "phase": "Failed",
            "message": message,
            "completionTime": Utc::now(),
            "observedGeneration": restore.metadata.generation,
        }
    });
    api.patch_status(&name, &PatchParams::apply(MANAGER), &Patch::Merge(status))
        .await?;

    Ok(Action::await_change())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn target(
        namespaces: &[&str],
        mapping: &[(&str, &str)],
    ) -> RestoreTarget {
        RestoreTarget {
            namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
            namespace_mapping: mapping
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        }
    }

    #[test]
    fn explicit_mapping_wins() {
        let target = target(&["other"], &[("src", "tgt")]);
        assert_eq!(effective_namespace("src", &target), "tgt");
    }

    #[test]
    fn single_target_namespace_collapses() {
        let target = target(&["tgt"], &[]);
        assert_eq!(effective_namespace("src", &target), "tgt");
        assert_eq!(effective_namespace("other", &target), "tgt");
    }

    #[test]
    fn unmapped_namespaces_are_preserved() {
        let target = target(&[], &[]);
        assert_eq!(effective_namespace("src", &target), "src");

        let multi = target_multi();
        assert_eq!(effective_namespace("src", &multi), "src");
    }

    fn target_multi() -> RestoreTarget {
        target(&["a", "b"], &[])
    }

    #[test]
    fn creation_set_maps_backup_namespaces() {
        let info = BackupInfo {
            backup_path: "backups/cluster-backup/2025-01-21T02-00-00".to_string(),
            resource_count: 2,
            kinds: vec!["deployments".to_string()],
            namespaces: vec!["src".to_string(), "other".to_string()],
        };

        let mapped = target(&[], &[("src", "tgt")]);
        let wanted = target_namespace_set(&info, &mapped);
        assert!(wanted.contains("tgt"));
        assert!(wanted.contains("other"));
        assert!(!wanted.contains("src"));

        let explicit = target(&["pinned"], &[]);
        let wanted = target_namespace_set(&info, &explicit);
        assert_eq!(wanted.into_iter().collect::<Vec<_>>(), vec!["pinned"]);
    }
}
