//! Per-tunnel persisted state
//!
//! Lives in `~/.config/skyport/<tunnel name>/` and holds the client key, the
//! pinned `known_hosts` record, the local link configuration and an
//! `endpoint.json` record. `skyport ssh` and `skyport ip` read it without a
//! running manager.

use crate::error::RemoteError;
use serde::{Deserialize, Serialize};
use skyport_proto::{Keypair, RemoteEndpoint, MANAGEMENT_PORT};
use std::fs;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CLIENT_KEY_FILE: &str = "client_id_ed25519";
pub const KNOWN_HOSTS_FILE: &str = "known_hosts";
pub const ENDPOINT_FILE: &str = "endpoint.json";

/// What `endpoint.json` records about the remote host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub name: String,
    pub id: String,
    pub address: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_address: Option<Ipv4Addr>,
}

impl EndpointRecord {
    pub fn public_address(&self) -> Ipv4Addr {
        self.floating_address.unwrap_or(self.address)
    }
}

impl From<&RemoteEndpoint> for EndpointRecord {
    fn from(endpoint: &RemoteEndpoint) -> Self {
        Self {
            name: endpoint.name.clone(),
            id: endpoint.id.clone(),
            address: endpoint.address,
            floating_address: endpoint.floating_address,
        }
    }
}

/// State directory for one tunnel
#[derive(Debug, Clone)]
pub struct StateDir {
    name: String,
    path: PathBuf,
}

impl StateDir {
    /// `~/.config/skyport/<name>`
    pub fn for_tunnel(name: &str) -> Result<Self, RemoteError> {
        let home = dirs::home_dir().ok_or(RemoteError::NoHomeDir)?;
        Ok(Self::with_base_dir(
            &home.join(".config").join("skyport"),
            name,
        ))
    }

    /// State directory under a custom base directory (used by tests)
    pub fn with_base_dir(base_dir: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: base_dir.join(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn client_key_path(&self) -> PathBuf {
        self.path.join(CLIENT_KEY_FILE)
    }

    pub fn known_hosts_path(&self) -> PathBuf {
        self.path.join(KNOWN_HOSTS_FILE)
    }

    pub fn endpoint_path(&self) -> PathBuf {
        self.path.join(ENDPOINT_FILE)
    }

    /// `<name>.conf`, so wg-quick names the interface after the tunnel
    pub fn link_config_path(&self) -> PathBuf {
        self.path.join(format!("{}.conf", self.name))
    }

    /// Create the directory with owner-only permissions
    pub fn create(&self) -> Result<(), RemoteError> {
        fs::create_dir_all(&self.path).map_err(|e| RemoteError::state_dir(&self.path, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o700))
                .map_err(|e| RemoteError::state_dir(&self.path, e))?;
        }
        Ok(())
    }

    /// Remove the directory and everything in it. A missing directory is fine.
    pub fn clean(&self) -> Result<(), RemoteError> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed state directory");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RemoteError::state_dir(&self.path, e)),
        }
    }

    /// Write the client private key (mode 0600) and its public half
    pub fn write_client_key(&self, key: &Keypair) -> Result<PathBuf, RemoteError> {
        self.create()?;
        let path = self.client_key_path();

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&path)
            .map_err(|e| RemoteError::state_dir(&path, e))?;
        file.write_all(key.private.as_bytes())
            .map_err(|e| RemoteError::state_dir(&path, e))?;

        let public_path = path.with_extension("pub");
        fs::write(&public_path, format!("{}\n", key.public))
            .map_err(|e| RemoteError::state_dir(&public_path, e))?;

        Ok(path)
    }

    /// Pin the host key for the given addresses. Entries for a port other
    /// than 22 use the `[address]:port` form ssh looks them up by.
    pub fn write_known_hosts(
        &self,
        addresses: &[IpAddr],
        port: u16,
        host_public_key: &str,
    ) -> Result<PathBuf, RemoteError> {
        self.create()?;
        let path = self.known_hosts_path();
        let hosts = addresses
            .iter()
            .map(|address| known_hosts_entry(*address, port))
            .collect::<Vec<_>>()
            .join(",");
        fs::write(&path, format!("{} {}\n", hosts, host_public_key.trim()))
            .map_err(|e| RemoteError::state_dir(&path, e))?;
        Ok(path)
    }

    pub fn read_known_hosts(&self) -> Result<String, RemoteError> {
        let path = self.known_hosts_path();
        fs::read_to_string(&path).map_err(|e| RemoteError::state_dir(&path, e))
    }

    pub fn write_endpoint(&self, endpoint: &RemoteEndpoint) -> Result<(), RemoteError> {
        self.create()?;
        let path = self.endpoint_path();
        let json = serde_json::to_string_pretty(&EndpointRecord::from(endpoint)).map_err(|e| {
            RemoteError::EndpointRecord {
                path: path.clone(),
                message: e.to_string(),
            }
        })?;
        fs::write(&path, json).map_err(|e| RemoteError::state_dir(&path, e))
    }

    pub fn read_endpoint(&self) -> Result<EndpointRecord, RemoteError> {
        let path = self.endpoint_path();
        let json = fs::read_to_string(&path).map_err(|e| RemoteError::state_dir(&path, e))?;
        serde_json::from_str(&json).map_err(|e| RemoteError::EndpointRecord {
            path,
            message: e.to_string(),
        })
    }
}

fn known_hosts_entry(address: IpAddr, port: u16) -> String {
    if port == MANAGEMENT_PORT {
        address.to_string()
    } else {
        format!("[{}]:{}", address, port)
    }
}
