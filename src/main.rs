// KeyMirror controller entrypoint
//!
//! The heavy lifting (component wiring, runnables, graceful shutdown)
//! lives in dedicated modules so this file remains a thin orchestrator.

use anyhow::Result;
use keymirror::config::KeyMirrorConfig;
use keymirror::{lifecycle, logging};
use log::info;
use std::env;

const DEFAULT_CONFIG_PATH: &str = "/etc/keymirror/config.toml";

#[actix_web::main]
async fn main() -> Result<()> {
    let config_path = parse_config_path(env::args().collect());

    // Config load failures are fatal: the publisher backend cannot be
    // guessed.
    let config = KeyMirrorConfig::from_file(&config_path)?;

    // Logging before any other side effects
    logging::init_logging(
        &config.logging.level,
        &config.logging.file_path,
        config.logging.log_to_console,
    )?;

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let build_date = env!("BUILD_DATE");

    info!("KeyMirror controller v{version} (commit {commit}, built {build_date})");
    info!(
        "namespace={} publisher={} sync_period={}s rotation_overlap={}s",
        config.controller.namespace,
        config.publisher.backend,
        config.controller.sync_period_seconds,
        config.controller.rotation_overlap_seconds,
    );

    let components = lifecycle::bootstrap(&config).await?;
    lifecycle::run(&config, components).await
}

/// `--config <path>` or the default location.
fn parse_config_path(args: Vec<String>) -> String {
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            if let Some(path) = iter.next() {
                return path;
            }
        }
    }
    DEFAULT_CONFIG_PATH.to_string()
}
