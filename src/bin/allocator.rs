//! Allocator entry point: connects the registry, resumes persisted
//! destruction schedules, and serves the HTTP surface.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use lablink::config::AllocatorConfig;
use lablink::provisioner::{ProcessEnv, TerraformRunner};
use lablink::scheduler::DestructionScheduler;
use lablink::version::VERSION;
use lablink::web::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "lablink-allocator", version = VERSION)]
struct Args {
    /// Path to the allocator configuration file.
    #[arg(long, default_value = "allocator_config.toml")]
    config: String,
}

fn init_logging() {
    let file_appender = rolling::daily("logs", "allocator.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv::dotenv().ok();
    init_logging();

    let args = Args::parse();
    let config = match AllocatorConfig::load(&args.config) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "Failed to load configuration. Exiting.");
            return Err(e.into());
        }
    };
    info!(version = VERSION, "Starting allocator...");

    let pool = lablink::db::connect(&config.database.url, config.database.max_connections).await?;
    info!("Registry connected and migrated.");

    let runner = Arc::new(TerraformRunner::new(
        config.cloud.terraform_dir.clone(),
        ProcessEnv::new(config.cloud.credential_env.clone()),
    ));

    let scheduler = DestructionScheduler::new(pool.clone(), Arc::clone(&runner));
    let armed = scheduler.resume().await?;
    info!(armed, "Destruction schedules resumed.");

    let templates = web::build_templates()?;
    let addr: SocketAddr = config.app.listen_addr.parse()?;
    let app_state = Arc::new(AppState {
        pool,
        config,
        scheduler,
        runner,
        templates,
        provision_lock: Mutex::new(()),
    });

    web::run_http_server(app_state, addr).await?;
    Ok(())
}
