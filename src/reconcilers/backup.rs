//! Backup reconciler
//!
//! Drives a Backup resource through its scheduling cycle:
//! New -> Scheduled -> Running -> Scheduled, with Failed as the error
//! terminal. Each invocation performs at most one bounded unit of work
//! (a phase transition or a single backup run) and persists status before
//! returning.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use kube::{
    api::{Patch, PatchParams},
    runtime::controller::Action,
    Api, Client, ResourceExt,
};
use serde_json::json;
use tracing::{info, warn};

use crate::crd::{Backup, SourceSelector};
use crate::error::{Error, Result};
use crate::metrics;
use crate::resources;
use crate::schedule;
use crate::storage::{self, layout};

/// Field manager for status patches
const MANAGER: &str = "cluster-backup-operator";

/// Validate the Backup spec
pub fn validate(backup: &Backup) -> Result<()> {
    schedule::parse(&backup.spec.schedule)?;

    let location = &backup.spec.storage_location;
    if location.bucket.is_empty() {
        return Err(Error::validation("Storage bucket must be specified"));
    }
    if location.endpoint.is_empty() {
        return Err(Error::validation("Storage endpoint must be specified"));
    }

    Ok(())
}

/// Dispatch one reconcile for a Backup resource
pub async fn reconcile(backup: &Backup, client: &Client, namespace: &str) -> Result<Action> {
    let api: Api<Backup> = Api::namespaced(client.clone(), namespace);

    let phase = backup
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("");

    match phase {
        "" => initialize(backup, &api).await,
        "New" => enter_schedule(backup, &api).await,
        // A stale Running phase (crash mid-run) re-enters via the same
        // due-time check as Scheduled.
        "Scheduled" | "Running" => run_if_due(backup, client, &api, namespace).await,
        "Failed" | "Completed" => reenter_if_edited(backup, &api).await,
        other => {
            warn!(phase = %other, "Unknown Backup phase, reinitializing");
            initialize(backup, &api).await
        }
    }
}

/// unset -> New
async fn initialize(backup: &Backup, api: &Api<Backup>) -> Result<Action> {
    let name = backup.name_any();
    info!(name = %name, "Initializing Backup");

    let status = json!({
        "status": {
            "phase": "New",
            "message": "Backup resource created",
            "observedGeneration": backup.metadata.generation,
        }
    });
    api.patch_status(&name, &PatchParams::apply(MANAGER), &Patch::Merge(status))
        .await?;

    Ok(Action::requeue(Duration::ZERO))
}

/// New -> Scheduled, or Failed on an invalid spec
async fn enter_schedule(backup: &Backup, api: &Api<Backup>) -> Result<Action> {
    let name = backup.name_any();

    if let Err(e) = validate(backup) {
        warn!(name = %name, error = %e, "Backup spec validation failed");
        return fail(backup, api, &e.to_string()).await;
    }

    let now = Utc::now();
    let next = match schedule::next_fire_of(&backup.spec.schedule, now) {
        Ok(next) => next,
        Err(e) => return fail(backup, api, &e.to_string()).await,
    };

    info!(name = %name, next_backup = %next, "Backup scheduled");

    let status = json!({
        "status": {
            "phase": "Scheduled",
            "message": format!("Next backup at {}", next.format("%Y-%m-%dT%H:%M:%SZ")),
            "nextBackupTime": next,
            "observedGeneration": backup.metadata.generation,
        }
    });
    api.patch_status(&name, &PatchParams::apply(MANAGER), &Patch::Merge(status))
        .await?;

    Ok(Action::requeue(delay_until(next, now)))
}

/// Scheduled: wait until the fire time, then run one backup
async fn run_if_due(
    backup: &Backup,
    client: &Client,
    api: &Api<Backup>,
    namespace: &str,
) -> Result<Action> {
    let name = backup.name_any();
    let now = Utc::now();

    // A spec edit may have changed the schedule; an unparseable one moves
    // the resource to Failed without touching the run history.
    let sched = match schedule::parse(&backup.spec.schedule) {
        Ok(sched) => sched,
        Err(e) => {
            warn!(name = %name, error = %e, "Schedule no longer parses");
            return fail(backup, api, &e.to_string()).await;
        }
    };

    if let Some(next) = backup.status.as_ref().and_then(|s| s.next_backup_time) {
        if next > now {
            return Ok(Action::requeue(delay_until(next, now)));
        }
    }

    match perform_backup(backup, client, api, namespace).await {
        Ok(run) => complete_run(backup, api, &sched, run, namespace).await,
        Err(e) => {
            metrics::BACKUPS_TOTAL
                .with_label_values(&["failure", namespace, &name])
                .inc();
            fail(backup, api, &format!("Backup failed: {}", e)).await
        }
    }
}

/// Terminal phases re-enter the machine when the spec was edited
async fn reenter_if_edited(backup: &Backup, api: &Api<Backup>) -> Result<Action> {
    let observed = backup.status.as_ref().and_then(|s| s.observed_generation);
    if backup.metadata.generation != observed {
        initialize(backup, api).await
    } else {
        Ok(Action::await_change())
    }
}

/// Outcome of one successful backup run
struct BackupRun {
    backup_path: String,
    resource_counts: BTreeMap<String, u64>,
}

/// Execute one bounded backup run
async fn perform_backup(
    backup: &Backup,
    client: &Client,
    api: &Api<Backup>,
    namespace: &str,
) -> Result<BackupRun> {
    let name = backup.name_any();
    let _timer = metrics::BACKUP_DURATION
        .with_label_values(&[namespace, &name])
        .start_timer();

    let running = json!({
        "status": {
            "phase": "Running",
            "message": "Backup in progress",
            "observedGeneration": backup.metadata.generation,
        }
    });
    api.patch_status(&name, &PatchParams::apply(MANAGER), &Patch::Merge(running))
        .await?;

    let store = storage::client_for(&backup.spec.storage_location);
    store.ensure_bucket().await?;

    let backup_path = layout::backup_prefix(Utc::now());
    let namespaces = resources::resolve_namespaces(client, &backup.spec.source).await?;
    let kinds = resource_kinds(&backup.spec.source);
    let lp = resources::list_params(backup.spec.source.label_selector.as_ref())?;

    info!(
        name = %name,
        backup_path = %backup_path,
        namespaces = namespaces.len(),
        kinds = kinds.len(),
        "Starting backup run"
    );

    let mut resource_counts = BTreeMap::new();

    for ns in &namespaces {
        for kind in &kinds {
            let objects = resources::collect_namespaced_kind(client, ns, kind, &lp).await?;
            for (object_name, doc) in &objects {
                let key = layout::namespaced_object_key(&backup_path, ns, kind, object_name);
                store.put_object(&key, render_document(doc)?).await?;
            }
            resource_counts.insert(format!("{}/{}", ns, kind), objects.len() as u64);
        }
    }

    if backup.spec.source.include_cluster_resources {
        for kind in resources::DEFAULT_CLUSTER_RESOURCE_TYPES {
            let objects = resources::collect_cluster_kind(client, kind, &lp).await?;
            for (object_name, doc) in &objects {
                let key = layout::cluster_object_key(&backup_path, kind, object_name);
                store.put_object(&key, render_document(doc)?).await?;
            }
            resource_counts.insert(format!("cluster/{}", kind), objects.len() as u64);
        }
    }

    let total: u64 = resource_counts.values().sum();
    info!(name = %name, backup_path = %backup_path, objects = total, "Backup run finished");

    Ok(BackupRun {
        backup_path,
        resource_counts,
    })
}

/// Record a successful run and swing back to Scheduled
async fn complete_run(
    backup: &Backup,
    api: &Api<Backup>,
    sched: &Schedule,
    run: BackupRun,
    namespace: &str,
) -> Result<Action> {
    let name = backup.name_any();
    let now = Utc::now();

    let next = match schedule::next_fire(sched, now) {
        Ok(next) => next,
        Err(e) => return fail(backup, api, &e.to_string()).await,
    };

    let backup_count = backup
        .status
        .as_ref()
        .and_then(|s| s.backup_count)
        .unwrap_or(0)
        + 1;
    let total: u64 = run.resource_counts.values().sum();

    metrics::BACKUPS_TOTAL
        .with_label_values(&["success", namespace, &name])
        .inc();
    metrics::BACKUP_RESOURCES
        .with_label_values(&[namespace, &name])
        .set(total as f64);

    let status = json!({
        "status": {
            "phase": "Scheduled",
            "message": "Backup completed successfully",
            "lastBackupTime": now,
            "nextBackupTime": next,
            "backupCount": backup_count,
            "resourceCounts": run.resource_counts,
            "backupPath": run.backup_path,
            "observedGeneration": backup.metadata.generation,
        }
    });
    api.patch_status(&name, &PatchParams::apply(MANAGER), &Patch::Merge(status))
        .await?;

    info!(
        name = %name,
        backup_count = backup_count,
        objects = total,
        next_backup = %next,
        "Backup completed"
    );

    Ok(Action::requeue(delay_until(next, now)))
}

/// Move the resource to Failed; run history fields are left untouched
async fn fail(backup: &Backup, api: &Api<Backup>, message: &str) -> Result<Action> {
    let name = backup.name_any();

    let status = json!({
        "status": {
            "phase": "Failed",
            "message": message,
            "observedGeneration": backup.metadata.generation,
        }
    });
    api.patch_status(&name, &PatchParams::apply(MANAGER), &Patch::Merge(status))
        .await?;

    Ok(Action::await_change())
}

/// Default kinds plus any extras from the spec, first occurrence wins
fn resource_kinds(source: &SourceSelector) -> Vec<String> {
    let mut kinds: Vec<String> = resources::DEFAULT_RESOURCE_TYPES
        .iter()
        .map(|k| k.to_string())
        .collect();
    for kind in &source.resource_types {
        if !kinds.contains(kind) {
            kinds.push(kind.clone());
        }
    }
    kinds
}

/// Stored representation: pretty-printed JSON, 2-space indent
fn render_document(doc: &serde_json::Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_string_pretty(doc)?.into_bytes())
}

/// Requeue delay to an instant; past instants fire immediately
fn delay_until(next: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (next - now).to_std().unwrap_or(Duration::ZERO)
}
