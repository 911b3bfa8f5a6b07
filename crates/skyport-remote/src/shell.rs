//! Authenticated command execution on the remote endpoint
//!
//! Every session is pinned to the endpoint's own generated host key through a
//! dedicated `known_hosts` file; the user's shared store is never consulted
//! or modified.

use crate::error::RemoteError;
use crate::state_dir::StateDir;
use async_trait::async_trait;
use skyport_proto::{MANAGEMENT_PORT, MANAGEMENT_USER};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

/// Seconds ssh waits for the TCP connection before giving up
pub const CONNECT_TIMEOUT_SECS: u32 = 5;

/// Command execution against the remote endpoint
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run a command and return its captured stdout
    async fn run(&self, command: &[&str]) -> Result<String, RemoteError>;

    /// Run a command discarding its output; a non-zero exit is still an error
    async fn run_quiet(&self, command: &[&str]) -> Result<(), RemoteError>;

    /// Open an interactive login session on the caller's terminal
    async fn interactive(&self) -> Result<(), RemoteError>;
}

/// `ssh`-backed [`RemoteExec`]
#[derive(Debug, Clone)]
pub struct RemoteShell {
    address: IpAddr,
    port: u16,
    user: String,
    identity: PathBuf,
    known_hosts: PathBuf,
}

impl RemoteShell {
    pub fn new(address: IpAddr, identity: &Path, known_hosts: &Path) -> Self {
        Self {
            address,
            port: MANAGEMENT_PORT,
            user: MANAGEMENT_USER.to_string(),
            identity: identity.to_path_buf(),
            known_hosts: known_hosts.to_path_buf(),
        }
    }

    /// Use the client key and `known_hosts` record of a tunnel's state directory
    pub fn for_state_dir(state: &StateDir, address: IpAddr) -> Self {
        Self::new(address, &state.client_key_path(), &state.known_hosts_path())
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = user.to_string();
        self
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Options shared by every invocation
    pub fn base_args(&self) -> Vec<String> {
        vec![
            "-l".to_string(),
            self.user.clone(),
            "-i".to_string(),
            self.identity.display().to_string(),
            "-p".to_string(),
            self.port.to_string(),
            "-o".to_string(),
            format!("UserKnownHostsFile={}", self.known_hosts.display()),
            "-o".to_string(),
            "StrictHostKeyChecking=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", CONNECT_TIMEOUT_SECS),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
        ]
    }

    /// Build an `ssh` invocation: base options, `options`, the host, then
    /// the remote command (if any)
    pub fn command(&self, options: &[String], remote: &[&str]) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.base_args())
            .args(options)
            .arg(self.address.to_string())
            .args(remote);
        cmd
    }

    async fn execute(&self, command: &[&str], capture: bool) -> Result<String, RemoteError> {
        let rendered = command.join(" ");
        trace!(host = %self.address, command = %rendered, "Running remote command");

        let mut cmd = self.command(&["-o".to_string(), "BatchMode=yes".to_string()], command);
        cmd.stdin(Stdio::null())
            .stdout(if capture { Stdio::piped() } else { Stdio::null() })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd.output().await.map_err(|source| RemoteError::Spawn {
            command: rendered.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(RemoteError::CommandFailed {
                command: rendered,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(host = %self.address, command = %rendered, "Remote command succeeded");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl RemoteExec for RemoteShell {
    async fn run(&self, command: &[&str]) -> Result<String, RemoteError> {
        self.execute(command, true).await
    }

    async fn run_quiet(&self, command: &[&str]) -> Result<(), RemoteError> {
        self.execute(command, false).await.map(|_| ())
    }

    async fn interactive(&self) -> Result<(), RemoteError> {
        let status = self
            .command(&[], &[])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| RemoteError::Spawn {
                command: "ssh".to_string(),
                source,
            })?;

        if !status.success() {
            return Err(RemoteError::CommandFailed {
                command: "ssh".to_string(),
                status: status.to_string(),
                stderr: String::new(),
            });
        }
        Ok(())
    }
}
