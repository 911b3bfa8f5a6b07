//! Local link interface control via `wg-quick`

use crate::error::LinkError;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

/// Linux interface names are limited to 15 bytes
pub const MAX_INTERFACE_NAME: usize = 15;

/// wg-quick names the interface after the config file stem
pub fn interface_name(config_path: &Path) -> Result<String, LinkError> {
    let name = config_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    if name.is_empty() || name.len() > MAX_INTERFACE_NAME {
        return Err(LinkError::InterfaceName(name.to_string()));
    }
    Ok(name.to_string())
}

/// Bring the interface described by `config_path` up.
///
/// A stale interface from an earlier run with the same name is taken down
/// first.
pub async fn link_up(config_path: &Path) -> Result<(), LinkError> {
    let name = interface_name(config_path)?;
    if let Err(e) = link_down(config_path).await {
        debug!(interface = %name, "No stale interface to remove: {}", e);
    }
    wg_quick("up", config_path).await?;
    debug!(interface = %name, "Local link interface is up");
    Ok(())
}

pub async fn link_down(config_path: &Path) -> Result<(), LinkError> {
    wg_quick("down", config_path).await
}

/// Take the interface down, treating an absent interface as success
pub async fn link_down_quiet(config_path: &Path) {
    if let Err(e) = link_down(config_path).await {
        warn!(path = %config_path.display(), "Local link interface not removed: {}", e);
    }
}

async fn wg_quick(action: &str, config_path: &Path) -> Result<(), LinkError> {
    let command = format!("wg-quick {} {}", action, config_path.display());
    let output = Command::new("wg-quick")
        .arg(action)
        .arg(config_path)
        .output()
        .await
        .map_err(|e| LinkError::InterfaceCommand {
            command: command.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(LinkError::InterfaceCommand {
            command,
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
