//! VM agent entry point. Registers the VM, then runs the subscribe, GPU
//! health, and in-use loops until the VM is destroyed.

use std::error::Error;

use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use lablink::agent_modules::{self, config::load_config, gpu_health, inuse, subscribe};
use lablink::version::VERSION;

fn init_logging() {
    let file_appender = rolling::daily("logs", "agent.log");
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
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.contains(&"--version".to_string()) {
        println!("Agent version: {VERSION}");
        return Ok(());
    }

    init_logging();
    info!(version = VERSION, "Starting VM agent...");

    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Critical error loading configuration. Exiting.");
            return Err(e.into());
        }
    };
    info!(vm_name = %config.vm_name, allocator = %config.allocator_url, "Agent configured.");

    let report_client = agent_modules::report_client()?;

    // The row must exist (and be running) before the subscribe loop can
    // long-poll for it.
    agent_modules::register_vm(&report_client, &config).await;

    let subscribe_handle = tokio::spawn(subscribe::subscribe_loop(config.clone()));
    let health_handle = tokio::spawn(gpu_health::health_loop(
        config.clone(),
        report_client.clone(),
    ));
    let in_use_handle = tokio::spawn(inuse::in_use_loop(config, report_client));

    // The loops have no graceful shutdown; they run until the VM is
    // destroyed. The subscribe and health loops may legitimately finish
    // (bind complete, GPU not applicable); the in-use loop never does.
    futures::future::join_all([subscribe_handle, health_handle, in_use_handle]).await;
    Ok(())
}
