use anyhow::{Context, Result};
use facematch_core::OnnxFaceRecognition;

mod config;
mod engine;
mod error;
mod logging;
mod routes;
mod server;
#[cfg(test)]
mod test_support;

use config::Config;
use logging::LogContext;
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    let log = LogContext::init(&config.log_file, &config.log_level)
        .with_context(|| format!("failed to open log file {}", config.log_file.display()))?;
    let _log_guard = tracing::dispatcher::set_default(log.dispatch());

    let result = run(&config, log.clone()).await;
    if let Err(err) = &result {
        tracing::error!("facematchd failed: {err:?}");
    }

    tracing::info!("facematchd shutting down");
    log.shutdown();
    result
}

async fn run(config: &Config, log: LogContext) -> Result<()> {
    tracing::info!(
        model_dir = %config.model_dir.display(),
        log_file = %config.log_file.display(),
        "facematchd starting"
    );

    // Load models synchronously before binding (fail-fast).
    let recognition = OnnxFaceRecognition::load(&config.model_dir, config.intra_threads)
        .with_context(|| {
            format!("failed to load face models from {}", config.model_dir.display())
        })?;
    tracing::info!("face models loaded");

    let engine = engine::spawn_engine(Box::new(recognition), config.queue_depth, log.clone())?;

    server::serve(config, AppState { engine, log }).await
}
