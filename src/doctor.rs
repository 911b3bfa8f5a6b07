//! Platform checks for `skyport doctor`

use skyport_cloud::config::TOKEN_VAR;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Tools `skyport up` shells out to. `ping` carries the wireguard heartbeat.
const REQUIRED_TOOLS: [&str; 5] = ["wg-quick", "wg", "ping", "ssh", "ssh-keygen"];

#[derive(Debug, Default)]
pub struct DoctorReport {
    missing: Vec<String>,
}

impl DoctorReport {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn missing(&self) -> &[String] {
        &self.missing
    }
}

/// Whether `program` can be found and started. `-h` keeps interactive
/// tools like `ssh-keygen` from doing any work.
async fn command_exists(program: &str) -> bool {
    Command::new(program)
        .arg("-h")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok()
}

pub async fn run() -> DoctorReport {
    let mut report = DoctorReport::default();

    for tool in REQUIRED_TOOLS {
        if command_exists(tool).await {
            info!("{} appears to be installed", tool);
        } else {
            warn!("{} does not appear to be installed", tool);
            report.missing.push(tool.to_string());
        }
    }

    if std::env::var(TOKEN_VAR).map(|t| !t.trim().is_empty()).unwrap_or(false) {
        info!("{} is set", TOKEN_VAR);
    } else {
        warn!("{} is not set", TOKEN_VAR);
        report.missing.push(TOKEN_VAR.to_string());
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_command_is_reported() {
        assert!(!command_exists("skyport-no-such-tool").await);
    }

    #[test]
    fn test_heartbeat_tool_is_checked() {
        assert!(REQUIRED_TOOLS.contains(&"ping"));
        assert!(REQUIRED_TOOLS.contains(&"wg-quick"));
    }

    #[test]
    fn test_empty_report_is_ok() {
        let report = DoctorReport::default();
        assert!(report.is_ok());
        assert!(report.missing().is_empty());
    }
}
