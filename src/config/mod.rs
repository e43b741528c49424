//! Configuration loading

pub mod schema;

pub use schema::{AppConfig, BundlePolicy, IceServerConfig, IceTransportPolicy, SessionConfig};

use std::path::Path;

use tracing::info;

use crate::error::{AppError, Result};

/// Load configuration from a JSON file
///
/// A missing file yields the defaults; an unreadable or invalid one is an error.
pub async fn load(path: &Path) -> Result<AppConfig> {
    if !tokio::fs::try_exists(path).await? {
        info!("Config file {} not found, using defaults", path.display());
        return Ok(AppConfig::default());
    }

    let text = tokio::fs::read_to_string(path).await?;
    let config = serde_json::from_str(&text)
        .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}
