//! Backup Custom Resource Definition

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Backup resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "backup.cnd.io",
    version = "v1alpha1",
    kind = "Backup",
    plural = "backups",
    singular = "backup",
    shortname = "bkp",
    namespaced,
    status = "BackupStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Last Backup", "type": "string", "jsonPath": ".status.lastBackupTime"}"#,
    printcolumn = r#"{"name": "Next Backup", "type": "string", "jsonPath": ".status.nextBackupTime"}"#,
    printcolumn = r#"{"name": "Count", "type": "integer", "jsonPath": ".status.backupCount"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Which cluster objects to include
    pub source: SourceSelector,

    /// Cron schedule (5-field, or @hourly/@daily/@weekly/@monthly/@yearly)
    pub schedule: String,

    /// Retention duration hint (recorded, not enforced)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<String>,

    /// Object store to write to
    pub storage_location: StorageLocation,
}

/// Selects the object set for a backup run
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceSelector {
    /// Namespaces to back up; "*" selects all namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// Legacy single-namespace field, honored when `namespaces` is empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Namespaces to subtract from the selection
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_namespaces: Vec<String>,

    /// Additional resource kinds (lowercase plural) beyond the default set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<String>,

    /// Only back up objects matching this selector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,

    /// Also back up cluster-scoped resources
    #[serde(default)]
    pub include_cluster_resources: bool,
}

/// S3-compatible object store location and credentials
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageLocation {
    /// Provider tag (minio, s3)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Bucket name
    pub bucket: String,

    /// Endpoint URL; the scheme is stripped before use
    pub endpoint: String,

    /// Access key; falls back to the workshop default when empty
    #[serde(default)]
    pub access_key: String,

    /// Secret key; falls back to the workshop default when empty
    #[serde(default)]
    pub secret_key: String,
}

fn default_provider() -> String {
    "minio".to_string()
}

/// Backup status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    /// Current phase (New, Scheduled, Running, Completed, Failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Completion time of the last successful run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup_time: Option<DateTime<Utc>>,

    /// Next scheduled fire time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_backup_time: Option<DateTime<Utc>>,

    /// Successful runs since creation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_count: Option<u64>,

    /// Objects written per "namespace/kind" (or "cluster/kind") in the last run
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_counts: BTreeMap<String, u64>,

    /// Store prefix of the most recent successful run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
