pub mod settings;

use tracing::info;

pub use settings::AppSettings;

/// Initialize application configuration
pub fn init_config() -> Result<settings::AppSettings, crate::error::AppError> {
    info!("Initializing application configuration from environment");
    let config = settings::AppSettings::from_env()?;
    info!(
        environment = %config.app.environment,
        store_backend = ?config.store.backend,
        marketplace_enabled = config.security.rapidapi_proxy_secret.is_some(),
        "Configuration loaded"
    );
    Ok(config)
}
