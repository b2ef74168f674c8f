//! Restore controller
//!
//! Watches Restore resources and triggers reconciliation.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{error, info, instrument};

use crate::controllers::Context;
use crate::crd::Restore;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::restore as restore_reconciler;

/// Run the Restore controller
pub async fn run(client: Client, context: Arc<Context>) {
    let api: Api<Restore> = Api::all(client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("Restore CRD not installed: {}", e);
        return;
    }

    info!("Starting Restore controller");

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled Restore"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS
                        .with_label_values(&["Restore"])
                        .inc();
                }
            }
        })
        .await;
}

/// Main reconciliation function
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<Restore>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&["Restore"])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&["Restore"]).inc();

    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    restore_reconciler::reconcile(&obj, &ctx.client, &namespace).await
}

/// Error policy for the controller
fn error_policy(obj: Arc<Restore>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    error!(
        name = %name,
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    let requeue_duration = match error {
        Error::Kube(_) => Duration::from_secs(30),
        Error::Config(_) | Error::Validation(_) => Duration::from_secs(300),
        Error::Storage(_) => Duration::from_secs(60),
        _ => Duration::from_secs(30),
    };

    Action::requeue(requeue_duration)
}
