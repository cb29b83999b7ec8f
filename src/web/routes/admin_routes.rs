//! Admin surface: provisioning, teardown, artifact download, dashboard.
//! All routes here sit behind the basic-auth middleware.

use std::sync::Arc;

use axum::{
    Form, Router,
    extract::State,
    http::header,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use tracing::{error, info};

use crate::artifacts::ArtifactCollector;
use crate::db::registry;
use crate::provisioner::ProvisionerError;
use crate::web::models::LaunchForm;
use crate::web::{AppState, error::AppError};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin", get(dashboard_handler))
        .route("/api/launch", post(launch_handler))
        .route("/destroy", post(destroy_handler))
        .route("/api/scp-client", get(scp_client_handler))
}

async fn render_dashboard(
    state: &AppState,
    tool_error: Option<String>,
) -> Result<Html<String>, AppError> {
    let rows = registry::list_rows(&state.pool).await?;
    let total = registry::count_rows(&state.pool).await?;
    let mut ctx = tera::Context::new();
    ctx.insert("vms", &rows);
    ctx.insert("vm_count", &total);
    ctx.insert("tool_error", &tool_error);
    Ok(Html(state.templates.render("dashboard.html", &ctx)?))
}

async fn dashboard_handler(State(state): State<Arc<AppState>>) -> Result<Html<String>, AppError> {
    render_dashboard(&state, None).await
}

/// Provisions N VMs. The provisioning mutex serializes apply/destroy; the
/// working directory is a process-wide singleton. An IaC tool failure
/// renders on the dashboard (ANSI already stripped) and is not retried;
/// the admin decides what to do next.
async fn launch_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LaunchForm>,
) -> Result<Html<String>, AppError> {
    if form.num_vms <= 0 {
        return Err(AppError::InvalidInput(
            "num_vms must be a positive integer".to_string(),
        ));
    }

    let _guard = state.provision_lock.lock().await;
    info!(count = form.num_vms, "Admin requested provisioning.");
    match state
        .runner
        .provision(&state.pool, &state.config, form.num_vms as u32)
        .await
    {
        Ok(()) => render_dashboard(&state, None).await,
        Err(e @ ProvisionerError::Tool { .. }) => {
            error!(error = %e, "Provisioning failed.");
            render_dashboard(&state, Some(e.to_string())).await
        }
        Err(e) => Err(e.into()),
    }
}

async fn destroy_handler(State(state): State<Arc<AppState>>) -> Result<Html<String>, AppError> {
    let _guard = state.provision_lock.lock().await;
    info!("Admin requested pool destruction.");
    match state.runner.destroy(&state.pool).await {
        Ok(()) => render_dashboard(&state, None).await,
        Err(e @ ProvisionerError::Tool { .. }) => {
            error!(error = %e, "Destroy failed; registry unchanged.");
            render_dashboard(&state, Some(e.to_string())).await
        }
        Err(e) => Err(e.into()),
    }
}

/// Harvests artifacts from every pool VM and streams them back as a single
/// zip. Runs before destruction; per-VM failures are skipped inside the
/// collector.
async fn scp_client_handler(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let ips = state.runner.get_ips().await?;
    if ips.is_empty() {
        return Err(AppError::NotFound("no VMs are provisioned".to_string()));
    }
    let key_path = state.runner.get_private_key().await?;

    let scratch = crate::artifacts::unique_scratch_dir();
    let collector = ArtifactCollector::new(key_path, &state.config.machine.extension, scratch);

    let archive_path = collector.collect(&ips).await?;
    let archive_name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "lablink_data.zip".to_string());
    let bytes = tokio::fs::read(&archive_path)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    // The archive and staging tree are gone once the bytes are in hand.
    collector.cleanup().await;

    info!(archive = %archive_name, bytes = bytes.len(), "Serving artifact archive.");
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{archive_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
