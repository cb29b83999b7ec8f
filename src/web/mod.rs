use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::Method,
    middleware as axum_middleware,
    response::Html,
    routing::get,
};
use sqlx::PgPool;
use tera::Tera;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::AllocatorConfig;
use crate::provisioner::TerraformRunner;
use crate::scheduler::DestructionScheduler;
use crate::web::error::AppError;

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;

pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AllocatorConfig>,
    pub scheduler: Arc<DestructionScheduler>,
    pub runner: Arc<TerraformRunner>,
    pub templates: Tera,
    /// Serializes apply/destroy; the IaC working directory is a
    /// process-wide singleton.
    pub provision_lock: Mutex<()>,
}

/// Templates are compiled in; there is no template directory to deploy.
pub fn build_templates() -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        ("index.html", include_str!("../../templates/index.html")),
        ("success.html", include_str!("../../templates/success.html")),
        ("error.html", include_str!("../../templates/error.html")),
        (
            "dashboard.html",
            include_str!("../../templates/dashboard.html"),
        ),
    ])?;
    Ok(tera)
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Result<Html<String>, AppError> {
    let ctx = tera::Context::new();
    Ok(Html(state.templates.render("index.html", &ctx)?))
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    let admin = routes::admin_routes::router()
        .merge(routes::schedule_routes::router())
        .route_layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            middleware::auth::admin_auth,
        ));

    Router::new()
        .route("/", get(index_handler))
        .merge(routes::vm_routes::router())
        .merge(admin)
        .with_state(app_state)
        .layer(cors)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        info!(error = %e, "Failed to listen for shutdown signal.");
        return;
    }
    info!("Shutdown signal received.");
}

pub async fn run_http_server(
    app_state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let router = create_router(app_state);
    info!(addr = %addr, "Allocator HTTP server listening.");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
