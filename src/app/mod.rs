mod config;
mod error;
mod logging;
mod runtime;
pub mod services;

pub use config::AppConfig;
pub use error::AppError;

/// Runs the admin API and the background sweeper in one process.
pub fn run() -> Result<(), AppError> {
    let config = bootstrap()?;
    runtime::run(config, runtime::Components::All)
}

pub fn run_api() -> Result<(), AppError> {
    let config = bootstrap()?;
    runtime::run(config, runtime::Components::ApiOnly)
}

pub fn run_service() -> Result<(), AppError> {
    let config = bootstrap()?;
    runtime::run(config, runtime::Components::SweeperOnly)
}

fn bootstrap() -> Result<AppConfig, AppError> {
    logging::init()?;

    let config = AppConfig::from_env()?;

    tracing::info!(
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        sweep_interval_secs = config.sweep_interval_secs,
        sweep_workers = config.sweep_workers,
        config_cache_ttl_secs = config.config_cache_ttl_secs,
        webhook = config.notify_webhook_url.is_some(),
        "application bootstrap initialized"
    );

    Ok(config)
}
