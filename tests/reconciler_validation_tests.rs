//! Integration tests for reconciler validation logic
//!
//! These tests verify that the validation functions for each CRD type
//! correctly accept valid specs and reject invalid ones.

use std::collections::HashMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use cluster_backup_operator::crd::{
    Backup, BackupSpec, Restore, RestoreOptions, RestoreSource, RestoreSpec, RestoreTarget,
    SourceSelector, StorageLocation,
};
use cluster_backup_operator::reconcilers::{backup, restore};

// ============================================================================
// Test Helpers
// ============================================================================

fn valid_storage_location() -> StorageLocation {
    StorageLocation {
        provider: "minio".to_string(),
        bucket: "cluster-backups".to_string(),
        endpoint: "http://minio.minio-system.svc:9000".to_string(),
        access_key: "minioadmin".to_string(),
        secret_key: "minioadmin123".to_string(),
    }
}

fn default_metadata(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("default".to_string()),
        ..Default::default()
    }
}

// ============================================================================
// Backup Validation Tests
// ============================================================================

fn valid_backup_spec() -> BackupSpec {
    BackupSpec {
        source: SourceSelector {
            namespaces: vec!["app".to_string()],
            ..Default::default()
        },
        schedule: "0 2 * * *".to_string(),
        retention: Some("720h".to_string()),
        storage_location: valid_storage_location(),
    }
}

fn create_backup(spec: BackupSpec) -> Backup {
    Backup {
        metadata: default_metadata("test-backup"),
        spec,
        status: None,
    }
}

#[test]
fn backup_valid_spec_passes_validation() {
    let backup = create_backup(valid_backup_spec());
    let result = backup::validate(&backup);
    if let Err(e) = &result {
        panic!("Validation failed unexpectedly: {:?}", e);
    }
    assert!(result.is_ok());
}

#[test]
fn backup_invalid_cron_schedule_fails_validation() {
    let mut spec = valid_backup_spec();
    spec.schedule = "not-a-cron".to_string();

    let backup = create_backup(spec);
    let result = backup::validate(&backup);

    assert!(result.is_err());
    let err_msg = result.unwrap_err().to_string();
    assert!(err_msg.contains("not-a-cron"));
}

#[test]
fn backup_valid_cron_schedules_pass_validation() {
    let valid_schedules = vec![
        "0 2 * * *",   // Every day at 02:00
        "*/5 * * * *", // Every 5 minutes
        "0 */2 * * *", // Every 2 hours
        "30 4 * * MON", // Every Monday at 04:30
        "@hourly",
        "@daily",
        "@weekly",
        "@monthly",
        "@yearly",
    ];

    for schedule in valid_schedules {
        let mut spec = valid_backup_spec();
        spec.schedule = schedule.to_string();

        let backup = create_backup(spec);
        let result = backup::validate(&backup);
        assert!(
            result.is_ok(),
            "Schedule '{}' should be valid, got error: {:?}",
            schedule,
            result.err()
        );
    }
}

#[test]
fn backup_unknown_descriptor_fails_validation() {
    let mut spec = valid_backup_spec();
    spec.schedule = "@fortnightly".to_string();

    let backup = create_backup(spec);
    let result = backup::validate(&backup);

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("@fortnightly"));
}

#[test]
fn backup_empty_bucket_fails_validation() {
    let mut spec = valid_backup_spec();
    spec.storage_location.bucket = String::new();

    let backup = create_backup(spec);
    let result = backup::validate(&backup);

    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .to_lowercase()
        .contains("bucket"));
}

#[test]
fn backup_empty_endpoint_fails_validation() {
    let mut spec = valid_backup_spec();
    spec.storage_location.endpoint = String::new();

    let backup = create_backup(spec);
    let result = backup::validate(&backup);

    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .to_lowercase()
        .contains("endpoint"));
}

#[test]
fn backup_empty_credentials_pass_validation() {
    // Empty credentials fall back to the workshop defaults
    let mut spec = valid_backup_spec();
    spec.storage_location.access_key = String::new();
    spec.storage_location.secret_key = String::new();

    let backup = create_backup(spec);
    assert!(backup::validate(&backup).is_ok());
}

#[test]
fn backup_wildcard_namespace_selection_passes_validation() {
    let mut spec = valid_backup_spec();
    spec.source.namespaces = vec!["*".to_string()];
    spec.source.exclude_namespaces = vec!["staging".to_string()];

    let backup = create_backup(spec);
    assert!(backup::validate(&backup).is_ok());
}

#[test]
fn backup_legacy_single_namespace_passes_validation() {
    let mut spec = valid_backup_spec();
    spec.source.namespaces = vec![];
    spec.source.namespace = Some("app".to_string());

    let backup = create_backup(spec);
    assert!(backup::validate(&backup).is_ok());
}

// ============================================================================
// Restore Validation Tests
// ============================================================================

fn valid_restore_spec() -> RestoreSpec {
    RestoreSpec {
        source: RestoreSource {
            storage_location: valid_storage_location(),
            backup_path: "backups/cluster-backup/2025-01-21T02-00-00".to_string(),
        },
        target: RestoreTarget::default(),
        options: RestoreOptions::default(),
    }
}

fn create_restore(spec: RestoreSpec) -> Restore {
    Restore {
        metadata: default_metadata("test-restore"),
        spec,
        status: None,
    }
}

#[test]
fn restore_valid_spec_passes_validation() {
    let restore = create_restore(valid_restore_spec());
    assert!(restore::validate(&restore).is_ok());
}

#[test]
fn restore_empty_backup_path_fails_validation() {
    let mut spec = valid_restore_spec();
    spec.source.backup_path = String::new();

    let restore = create_restore(spec);
    let result = restore::validate(&restore);

    assert!(result.is_err());
    let err_msg = result.unwrap_err().to_string().to_lowercase();
    assert!(err_msg.contains("backup path"));
}

#[test]
fn restore_empty_bucket_fails_validation() {
    let mut spec = valid_restore_spec();
    spec.source.storage_location.bucket = String::new();

    let restore = create_restore(spec);
    let result = restore::validate(&restore);

    assert!(result.is_err());
    assert!(result
        .unwrap_err()
        .to_string()
        .to_lowercase()
        .contains("bucket"));
}

#[test]
fn restore_empty_endpoint_fails_validation() {
    let mut spec = valid_restore_spec();
    spec.source.storage_location.endpoint = String::new();

    let restore = create_restore(spec);
    assert!(restore::validate(&restore).is_err());
}

#[test]
fn restore_valid_conflict_resolutions_pass_validation() {
    for policy in ["", "skip", "overwrite", "fail"] {
        let mut spec = valid_restore_spec();
        spec.target.conflict_resolution = policy.to_string();

        let restore = create_restore(spec);
        assert!(
            restore::validate(&restore).is_ok(),
            "Conflict resolution '{}' should be valid",
            policy
        );
    }
}

#[test]
fn restore_invalid_conflict_resolution_fails_validation() {
    let mut spec = valid_restore_spec();
    spec.target.conflict_resolution = "merge".to_string();

    let restore = create_restore(spec);
    let result = restore::validate(&restore);

    assert!(result.is_err());
    let err_msg = result.unwrap_err().to_string();
    assert!(err_msg.contains("merge"));
    assert!(err_msg.contains("skip"));
}

#[test]
fn restore_empty_target_namespaces_allowed_for_restore_all() {
    let mut spec = valid_restore_spec();
    spec.target.namespaces = vec![]; // Means "all namespaces from the backup"

    let restore = create_restore(spec);
    assert!(restore::validate(&restore).is_ok());
}

#[test]
fn restore_namespace_mapping_passes_validation() {
    let mut spec = valid_restore_spec();
    spec.target.namespace_mapping =
        HashMap::from([("src".to_string(), "tgt".to_string())]);

    let restore = create_restore(spec);
    assert!(restore::validate(&restore).is_ok());
}

#[test]
fn restore_dry_run_mode_passes_validation() {
    let mut spec = valid_restore_spec();
    spec.options.dry_run = true;

    let restore = create_restore(spec);
    assert!(restore::validate(&restore).is_ok());
}

#[test]
fn restore_skip_cluster_resources_passes_validation() {
    let mut spec = valid_restore_spec();
    spec.options.skip_cluster_resources = true;

    let restore = create_restore(spec);
    assert!(restore::validate(&restore).is_ok());
}
