//! Configuration management.

mod settings;

pub use settings::{ApiSettings, AppConfig, LoggingConfig, RiskSettings, WebSocketSettings};

use config::{Config, ConfigError, Environment, File};
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Load configuration from a TOML file layered with `KIS__`-prefixed
/// environment variables.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from(path).required(true))
        .add_source(
            Environment::with_prefix("KIS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    config.try_deserialize()
}

/// Setup logging with the given level.
pub fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}
