//! Per-kind resource enumeration
//!
//! Each backup run walks a (namespace, kind) grid and serializes whatever
//! the cluster returns. Kinds are addressed by their lowercase plural tag;
//! a tag without a handler yields an empty list so the run records a zero
//! count instead of failing.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolume, PersistentVolumeClaim, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::{api::ListParams, Api, Client, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::crd::SourceSelector;
use crate::error::{Error, Result};

/// Namespace-scoped kinds backed up by default
pub const DEFAULT_RESOURCE_TYPES: &[&str] = &[
    "deployments",
    "services",
    "configmaps",
    "secrets",
    "persistentvolumeclaims",
    "ingresses",
];

/// Cluster-scoped kinds backed up when `includeClusterResources` is set
pub const DEFAULT_CLUSTER_RESOURCE_TYPES: &[&str] = &[
    "persistentvolumes",
    "clusterroles",
    "clusterrolebindings",
    "storageclasses",
];

/// Namespaces excluded from backups unless selected explicitly
pub const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public", "kube-node-lease"];

/// Build list parameters from an optional label selector
pub fn list_params(selector: Option<&LabelSelector>) -> Result<ListParams> {
    match selector {
        Some(selector) => Ok(ListParams::default().labels(&selector_string(selector)?)),
        None => Ok(ListParams::default()),
    }
}

/// Render a `LabelSelector` as the string form the list API accepts
pub fn selector_string(selector: &LabelSelector) -> Result<String> {
    let mut parts = Vec::new();

    if let Some(labels) = &selector.match_labels {
        for (key, value) in labels {
            parts.push(format!("{}={}", key, value));
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let values = expr.values.clone().unwrap_or_default().join(",");
            match expr.operator.as_str() {
                "In" => parts.push(format!("{} in ({})", expr.key, values)),
                "NotIn" => parts.push(format!("{} notin ({})", expr.key, values)),
                "Exists" => parts.push(expr.key.clone()),
                "DoesNotExist" => parts.push(format!("!{}", expr.key)),
                other => {
                    return Err(Error::validation(format!(
                        "Unsupported label selector operator '{}'",
                        other
                    )))
                }
            }
        }
    }

    Ok(parts.join(","))
}

/// List a namespace-scoped kind as (name, document) pairs.
///
/// Kind-specific system noise is filtered out here so it is never written
/// to the store.
pub async fn collect_namespaced_kind(
    client: &Client,
    namespace: &str,
    kind: &str,
    lp: &ListParams,
) -> Result<Vec<(String, Value)>> {
    match kind {
        "deployments" => collect_namespaced::<Deployment>(client, namespace, lp).await,
        "configmaps" => collect_namespaced::<ConfigMap>(client, namespace, lp).await,
        "persistentvolumeclaims" => {
            collect_namespaced::<PersistentVolumeClaim>(client, namespace, lp).await
        }
        "ingresses" => collect_namespaced::<Ingress>(client, namespace, lp).await,
        "services" => {
            let api: Api<Service> = Api::namespaced(client.clone(), namespace);
            api.list(lp)
                .await?
                .items
                .into_iter()
                .filter(|svc| !is_system_service(namespace, svc))
                .map(serialize_object)
                .collect()
        }
        "secrets" => {
            let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
            api.list(lp)
                .await?
                .items
                .into_iter()
                .filter(|secret| !is_service_account_secret(secret))
                .map(serialize_object)
                .collect()
        }
        other => {
            debug!(kind = %other, "No list handler for kind, recording zero");
            Ok(Vec::new())
        }
    }
}

/// List a cluster-scoped kind as (name, document) pairs.
///
/// Cluster RBAC and storage classes are declared in the default set but
/// have no handlers in this revision; they list as empty.
pub async fn collect_cluster_kind(
    client: &Client,
    kind: &str,
    lp: &ListParams,
) -> Result<Vec<(String, Value)>> {
    match kind {
        "persistentvolumes" => collect_cluster::<PersistentVolume>(client, lp).await,
        other => {
            debug!(kind = %other, "No cluster list handler for kind, recording zero");
            Ok(Vec::new())
        }
    }
}

async fn collect_namespaced<K>(
    client: &Client,
    namespace: &str,
    lp: &ListParams,
) -> Result<Vec<(String, Value)>>
where
    K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + k8s_openapi::Resource
        + Clone
        + std::fmt::Debug
        + DeserializeOwned
        + Serialize,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let list = api.list(lp).await?;
    list.items.into_iter().map(serialize_object).collect()
}

async fn collect_cluster<K>(client: &Client, lp: &ListParams) -> Result<Vec<(String, Value)>>
where
    K: kube::Resource<Scope = ClusterResourceScope, DynamicType = ()>
        + k8s_openapi::Resource
        + Clone
        + std::fmt::Debug
        + DeserializeOwned
        + Serialize,
{
    let api: Api<K> = Api::all(client.clone());
    let list = api.list(lp).await?;
    list.items.into_iter().map(serialize_object).collect()
}

fn serialize_object<K>(object: K) -> Result<(String, Value)>
where
    K: kube::Resource<DynamicType = ()> + k8s_openapi::Resource + Serialize,
{
    let name = object.name_any();
    let mut doc = serde_json::to_value(&object)?;

    // Typed list items come back without their TypeMeta; reinstate it so
    // stored objects are self-describing.
    if let Some(root) = doc.as_object_mut() {
        root.insert(
            "apiVersion".to_string(),
            json!(<K as k8s_openapi::Resource>::API_VERSION),
        );
        root.insert("kind".to_string(), json!(<K as k8s_openapi::Resource>::KIND));
    }

    Ok((name, doc))
}

fn is_system_service(namespace: &str, service: &Service) -> bool {
    // The implicit apiserver Service lives in "default"; a user Service
    // that happens to share the name is backed up like any other.
    (namespace == "default" && service.metadata.name.as_deref() == Some("kubernetes"))
        || SYSTEM_NAMESPACES.contains(&namespace)
}

fn is_service_account_secret(secret: &Secret) -> bool {
    if secret.type_.as_deref() == Some("kubernetes.io/service-account-token") {
        return true;
    }
    let name = secret.metadata.name.as_deref().unwrap_or_default();
    name.starts_with("default-token-") || name.contains("token-")
}

/// Resolve the concrete namespace list for a backup run
pub async fn resolve_namespaces(client: &Client, source: &SourceSelector) -> Result<Vec<String>> {
    // Legacy single-namespace field wins when the list form is unused
    if let Some(namespace) = &source.namespace {
        if source.namespaces.is_empty() && !namespace.is_empty() {
            return Ok(vec![namespace.clone()]);
        }
    }

    // An explicit list without the wildcard is taken verbatim
    if !source.namespaces.is_empty() && !source.namespaces.iter().any(|n| n == "*") {
        return Ok(source.namespaces.clone());
    }

    let api: Api<Namespace> = Api::all(client.clone());
    let all = api
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .filter_map(|ns| ns.metadata.name)
        .collect();

    Ok(filter_namespaces(all, source))
}

/// Apply wildcard/default exclusion rules to a full namespace listing
pub fn filter_namespaces(all: Vec<String>, source: &SourceSelector) -> Vec<String> {
    let wildcard = source.namespaces.iter().any(|n| n == "*");

    all.into_iter()
        .filter(|ns| {
            if source.exclude_namespaces.contains(ns) {
                return false;
            }
            // System namespaces are only excluded for the implicit
            // everything-selection, not for an explicit "*".
            wildcard || !SYSTEM_NAMESPACES.contains(&ns.as_str())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
    use std::collections::BTreeMap;

    fn all_namespaces() -> Vec<String> {
        ["prod", "staging", "kube-system", "kube-public", "kube-node-lease"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn default_selection_drops_system_namespaces() {
        let source = SourceSelector::default();
        let selected = filter_namespaces(all_namespaces(), &source);
        assert_eq!(selected, vec!["prod", "staging"]);
    }

    #[test]
    fn default_selection_honors_excludes() {
        let source = SourceSelector {
            exclude_namespaces: vec!["staging".to_string()],
            ..Default::default()
        };
        let selected = filter_namespaces(all_namespaces(), &source);
        assert_eq!(selected, vec!["prod"]);
    }

    #[test]
    fn wildcard_keeps_system_namespaces() {
        let source = SourceSelector {
            namespaces: vec!["*".to_string()],
            exclude_namespaces: vec!["staging".to_string()],
            ..Default::default()
        };
        let selected = filter_namespaces(all_namespaces(), &source);
        assert_eq!(selected, vec!["prod", "kube-system", "kube-public", "kube-node-lease"]);
    }

    #[test]
    fn match_labels_render_as_equality() {
        let selector = LabelSelector {
            match_labels: Some(BTreeMap::from([(
                "backup".to_string(),
                "enabled".to_string(),
            )])),
            match_expressions: None,
        };
        assert_eq!(selector_string(&selector).unwrap(), "backup=enabled");
    }

    #[test]
    fn match_expressions_render_set_operators() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "tier".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["web".to_string(), "api".to_string()]),
                },
                LabelSelectorRequirement {
                    key: "legacy".to_string(),
                    operator: "DoesNotExist".to_string(),
                    values: None,
                },
            ]),
        };
        assert_eq!(
            selector_string(&selector).unwrap(),
            "tier in (web,api),!legacy"
        );
    }

    #[test]
    fn unknown_selector_operator_is_rejected() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "Near".to_string(),
                values: None,
            }]),
        };
        assert!(selector_string(&selector).is_err());
    }

    #[test]
    fn token_secrets_are_recognized() {
        let mut secret = Secret::default();
        secret.metadata.name = Some("app-credentials".to_string());
        assert!(!is_service_account_secret(&secret));

        secret.type_ = Some("kubernetes.io/service-account-token".to_string());
        assert!(is_service_account_secret(&secret));

        let mut named = Secret::default();
        named.metadata.name = Some("default-token-xyz".to_string());
        assert!(is_service_account_secret(&named));
    }

    #[test]
    fn implicit_kubernetes_service_is_recognized() {
        let mut service = Service::default();
        service.metadata.name = Some("kubernetes".to_string());
        assert!(is_system_service("default", &service));

        let mut app = Service::default();
        app.metadata.name = Some("web".to_string());
        assert!(!is_system_service("app", &app));
        assert!(is_system_service("kube-system", &app));
    }

    #[test]
    fn user_service_named_kubernetes_is_kept() {
        let mut service = Service::default();
        service.metadata.name = Some("kubernetes".to_string());
        assert!(!is_system_service("app", &service));
    }
}
