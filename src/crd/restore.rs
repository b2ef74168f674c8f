//! Restore Custom Resource Definition

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::StorageLocation;

/// Restore resource specification
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "backup.cnd.io",
    version = "v1alpha1",
    kind = "Restore",
    plural = "restores",
    singular = "restore",
    shortname = "rst",
    namespaced,
    status = "RestoreStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Backup", "type": "string", "jsonPath": ".spec.source.backupPath"}"#,
    printcolumn = r#"{"name": "Restored", "type": "integer", "jsonPath": ".status.restoredCount"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    /// Where to read the backup from
    pub source: RestoreSource,

    /// What to restore and where
    #[serde(default)]
    pub target: RestoreTarget,

    /// Execution options
    #[serde(default)]
    pub options: RestoreOptions,
}

/// Backup location to replay
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSource {
    /// Object store holding the backup
    pub storage_location: StorageLocation,

    /// Prefix of the backup run within the bucket
    pub backup_path: String,
}

/// Restore target filters and rewrites
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreTarget {
    /// Namespaces to restore into (empty = all namespaces from the backup)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// Resource kinds to restore (empty = all kinds from the backup)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<String>,

    /// Policy when the target object already exists (skip, overwrite, fail)
    #[serde(default = "default_conflict_resolution")]
    pub conflict_resolution: String,

    /// Recorded label filter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,

    /// Source namespace -> target namespace rewrites
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub namespace_mapping: HashMap<String, String>,
}

impl Default for RestoreTarget {
    fn default() -> Self {
        Self {
            namespaces: Vec::new(),
            resource_types: Vec::new(),
            conflict_resolution: default_conflict_resolution(),
            label_selector: None,
            namespace_mapping: HashMap::new(),
        }
    }
}

fn default_conflict_resolution() -> String {
    "skip".to_string()
}

/// Restore execution options
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOptions {
    /// Walk the backup without mutating the cluster
    #[serde(default)]
    pub dry_run: bool,

    /// Validate the backup contents only
    #[serde(default)]
    pub validate_only: bool,

    /// Create missing target namespaces before restoring
    #[serde(default)]
    pub create_namespaces: bool,

    /// Ignore cluster-scoped entries in the backup
    #[serde(default)]
    pub skip_cluster_resources: bool,
}

/// Restore status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreStatus {
    /// Current phase (New, Validating, Downloading, Restoring, Completed, Failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// When the restore started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// When the restore reached a terminal phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Snapshot of the backup contents taken while downloading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_info: Option<BackupInfo>,

    /// Number of objects restored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restored_count: Option<u64>,

    /// Objects created or updated (or walked under dry-run)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restored_resources: Vec<RestoredResource>,

    /// Objects that could not be restored
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_resources: Vec<FailedResource>,

    /// Objects skipped by policy or filters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_resources: Vec<SkippedResource>,

    /// Observed generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Summary of a backup's contents
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    /// Prefix the summary was built from
    pub backup_path: String,

    /// Total number of stored objects
    pub resource_count: u64,

    /// Distinct resource kinds present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,

    /// Distinct source namespaces present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

/// Audit record for a restored object
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoredResource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// What happened (created, updated, dry-run)
    pub action: String,
}

/// Audit record for a failed object
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailedResource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub error: String,
}

/// Audit record for a skipped object
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SkippedResource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub reason: String,
}
