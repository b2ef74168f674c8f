//! Structural cleanup applied before restoring an object
//!
//! Stored objects carry server-populated fields that must not be sent back
//! on create/update. Cleanup strips them, drops `status`, rewrites the
//! namespace, and clears kind-specific immutable allocations.

use serde_json::{json, Value};

/// Server-populated metadata fields stripped before create/update
const STRIPPED_METADATA_FIELDS: &[&str] = &[
    "resourceVersion",
    "uid",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
    "selfLink",
    "managedFields",
];

/// Prepare a stored object document for replay into the target cluster.
///
/// `target_namespace` is the effective namespace after mapping; it is only
/// applied when the source object was namespaced.
pub fn sanitize_for_restore(doc: &mut Value, target_namespace: Option<&str>) {
    if let Some(root) = doc.as_object_mut() {
        root.remove("status");
    }

    if let Some(metadata) = doc.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in STRIPPED_METADATA_FIELDS {
            metadata.remove(*field);
        }
        if metadata.contains_key("namespace") {
            if let Some(ns) = target_namespace {
                metadata.insert("namespace".to_string(), json!(ns));
            }
        }
    }

    // Immutable allocations the target cluster must hand out itself
    match doc.get("kind").and_then(Value::as_str) {
        Some("Service") => {
            if let Some(spec) = doc.get_mut("spec").and_then(Value::as_object_mut) {
                spec.remove("clusterIP");
                spec.remove("clusterIPs");
            }
        }
        Some("PersistentVolumeClaim") => {
            if let Some(spec) = doc.get_mut("spec").and_then(Value::as_object_mut) {
                spec.remove("volumeName");
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_populated_metadata_is_stripped() {
        let mut doc = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "app",
                "uid": "abc-123",
                "resourceVersion": "42",
                "generation": 3,
                "creationTimestamp": "2025-01-21T02:00:00Z",
                "managedFields": [{"manager": "kubectl"}],
                "labels": {"app": "web"}
            },
            "spec": {"replicas": 2},
            "status": {"readyReplicas": 2}
        });

        sanitize_for_restore(&mut doc, Some("app"));

        let metadata = doc["metadata"].as_object().unwrap();
        assert!(!metadata.contains_key("uid"));
        assert!(!metadata.contains_key("resourceVersion"));
        assert!(!metadata.contains_key("generation"));
        assert!(!metadata.contains_key("creationTimestamp"));
        assert!(!metadata.contains_key("managedFields"));
        assert_eq!(metadata["labels"]["app"], "web");
        assert!(doc.get("status").is_none());
    }

    #[test]
    fn namespace_is_rewritten_to_the_effective_target() {
        let mut doc = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cfg", "namespace": "src"}
        });

        sanitize_for_restore(&mut doc, Some("tgt"));
        assert_eq!(doc["metadata"]["namespace"], "tgt");
    }

    #[test]
    fn cluster_scoped_objects_gain_no_namespace() {
        let mut doc = json!({
            "apiVersion": "v1",
            "kind": "PersistentVolume",
            "metadata": {"name": "pv-1"}
        });

        sanitize_for_restore(&mut doc, None);
        assert!(doc["metadata"].get("namespace").is_none());
    }

    #[test]
    fn service_cluster_ip_allocation_is_cleared() {
        let mut doc = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": "web", "namespace": "app"},
            "spec": {
                "clusterIP": "10.0.0.5",
                "clusterIPs": ["10.0.0.5"],
                "ports": [{"port": 80}]
            }
        });

        sanitize_for_restore(&mut doc, Some("app"));

        let spec = doc["spec"].as_object().unwrap();
        assert!(!spec.contains_key("clusterIP"));
        assert!(!spec.contains_key("clusterIPs"));
        assert!(spec.contains_key("ports"));
    }

    #[test]
    fn pvc_volume_binding_is_cleared() {
        let mut doc = json!({
            "apiVersion": "v1",
            "kind": "PersistentVolumeClaim",
            "metadata": {"name": "data", "namespace": "app"},
            "spec": {
                "volumeName": "pv-1",
                "accessModes": ["ReadWriteOnce"]
            }
        });

        sanitize_for_restore(&mut doc, Some("app"));

        let spec = doc["spec"].as_object().unwrap();
        assert!(!spec.contains_key("volumeName"));
        assert!(spec.contains_key("accessModes"));
    }
}
