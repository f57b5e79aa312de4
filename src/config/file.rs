//! JSON file loading.

use std::path::Path;

use super::{ConfigError, ConfigResult, FleetConfig};

pub(crate) async fn read_json(path: &Path) -> ConfigResult<FleetConfig> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            key: path.display().to_string(),
        });
    }

    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}
