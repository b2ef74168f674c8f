//! Object-store key scheme
//!
//! Every backup run writes under a unique timestamped prefix:
//!
//! ```text
//! backups/cluster-backup/<YYYY-MM-DDTHH-MM-SS>/
//!   namespaces/<ns>/<kind>/<name>.json
//!   cluster/<kind>/<name>.json
//! ```
//!
//! The restore path parses the same scheme, so builders and parser live
//! together here.

use chrono::{DateTime, Utc};

/// Common prefix of all backup runs within a bucket
pub const BACKUP_ROOT: &str = "backups/cluster-backup";

/// Store prefix for a run started at `at` (UTC, colons replaced by dashes)
pub fn backup_prefix(at: DateTime<Utc>) -> String {
    format!("{}/{}", BACKUP_ROOT, at.format("%Y-%m-%dT%H-%M-%S"))
}

/// Key for a namespace-scoped object
pub fn namespaced_object_key(prefix: &str, namespace: &str, kind: &str, name: &str) -> String {
    format!("{}/namespaces/{}/{}/{}.json", prefix, namespace, kind, name)
}

/// Key for a cluster-scoped object
pub fn cluster_object_key(prefix: &str, kind: &str, name: &str) -> String {
    format!("{}/cluster/{}/{}.json", prefix, kind, name)
}

/// An object key parsed back into its components
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectKey {
    /// Source namespace; `None` for cluster-scoped entries
    pub namespace: Option<String>,
    /// Lowercase plural kind tag
    pub kind: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_none()
    }
}

/// Parse a store key relative to a backup prefix.
///
/// Returns `None` for keys outside the prefix, non-`.json` entries, and
/// anything not matching the layout; callers skip those.
pub fn parse_object_key(prefix: &str, key: &str) -> Option<ObjectKey> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;
    let segments: Vec<&str> = rest.split('/').collect();

    let (namespace, kind, file) = match segments.as_slice() {
        ["namespaces", ns, kind, file] => (Some(*ns), *kind, *file),
        ["cluster", kind, file] => (None, *kind, *file),
        _ => return None,
    };

    let name = file.strip_suffix(".json")?;
    if name.is_empty() || kind.is_empty() || namespace.is_some_and(str::is_empty) {
        return None;
    }

    Some(ObjectKey {
        namespace: namespace.map(str::to_string),
        kind: kind.to_string(),
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn prefix_uses_dashes_for_colons() {
        let at = Utc.with_ymd_and_hms(2025, 1, 21, 2, 0, 0).unwrap();
        assert_eq!(
            backup_prefix(at),
            "backups/cluster-backup/2025-01-21T02-00-00"
        );
    }

    #[test]
    fn namespaced_key_round_trips() {
        let prefix = "backups/cluster-backup/2025-01-21T02-00-00";
        let key = namespaced_object_key(prefix, "app", "deployments", "web");
        assert_eq!(
            key,
            "backups/cluster-backup/2025-01-21T02-00-00/namespaces/app/deployments/web.json"
        );

        let parsed = parse_object_key(prefix, &key).unwrap();
        assert_eq!(parsed.namespace.as_deref(), Some("app"));
        assert_eq!(parsed.kind, "deployments");
        assert_eq!(parsed.name, "web");
        assert!(!parsed.is_cluster_scoped());
    }

    #[test]
    fn cluster_key_round_trips() {
        let prefix = "backups/cluster-backup/2025-01-21T02-00-00";
        let key = cluster_object_key(prefix, "persistentvolumes", "pv-1");
        let parsed = parse_object_key(prefix, &key).unwrap();
        assert_eq!(parsed.namespace, None);
        assert_eq!(parsed.kind, "persistentvolumes");
        assert_eq!(parsed.name, "pv-1");
        assert!(parsed.is_cluster_scoped());
    }

    #[test]
    fn non_json_entries_are_rejected() {
        let prefix = "backups/cluster-backup/2025-01-21T02-00-00";
        let key = format!("{}/namespaces/app/deployments/web.yaml", prefix);
        assert_eq!(parse_object_key(prefix, &key), None);
    }

    #[test]
    fn foreign_prefixes_are_rejected() {
        let prefix = "backups/cluster-backup/2025-01-21T02-00-00";
        assert_eq!(
            parse_object_key(
                prefix,
                "backups/cluster-backup/2025-01-22T02-00-00/namespaces/app/deployments/web.json"
            ),
            None
        );
    }

    #[test]
    fn malformed_layouts_are_rejected() {
        let prefix = "backups/cluster-backup/2025-01-21T02-00-00";
        for key in [
            format!("{}/manifest.json", prefix),
            format!("{}/namespaces/app/deployments/web/extra.json", prefix),
            format!("{}/cluster/persistentvolumes/.json", prefix),
            format!("{}/namespaces//deployments/web.json", prefix),
        ] {
            assert_eq!(parse_object_key(prefix, &key), None, "key {}", key);
        }
    }
}
