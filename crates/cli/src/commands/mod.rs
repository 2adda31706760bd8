pub mod ask;
pub mod classify;
pub mod config_cmd;
pub mod serve;

use std::path::Path;

use ragdesk_config::AppConfig;

pub(crate) fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load_with(path).map_err(|e| format!("Failed to load config: {e}"))?)
}
