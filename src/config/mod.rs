pub mod settings;

pub use settings::AppSettings;

use tracing::info;

/// Initialize application configuration from the environment.
pub fn init_config() -> Result<AppSettings, Box<dyn std::error::Error>> {
    info!("initializing application configuration from environment");
    let config = AppSettings::from_env()?;
    Ok(config)
}
