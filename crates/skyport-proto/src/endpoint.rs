//! Remote endpoint record

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Lifecycle of the remote host as seen by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    Provisioning,
    Booting,
    Ready,
    Destroyed,
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndpointStatus::Provisioning => "provisioning",
            EndpointStatus::Booting => "booting",
            EndpointStatus::Ready => "ready",
            EndpointStatus::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

/// What a compute provisioner hands back after creating a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedHost {
    /// Provider-specific identifier, used for destroy and address attachment
    pub id: String,
    /// Public IPv4 address of the host
    pub address: Ipv4Addr,
}

/// The ephemeral remote host owned by a single tunnel manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub id: String,
    pub name: String,
    pub address: Ipv4Addr,
    /// Static address attached after boot, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_address: Option<Ipv4Addr>,
    pub status: EndpointStatus,
}

impl RemoteEndpoint {
    pub fn new(name: &str, host: ProvisionedHost) -> Self {
        Self {
            id: host.id,
            name: name.to_string(),
            address: host.address,
            floating_address: None,
            status: EndpointStatus::Booting,
        }
    }

    /// Address clients should use to reach exposed services
    pub fn public_address(&self) -> Ipv4Addr {
        self.floating_address.unwrap_or(self.address)
    }

    pub fn is_destroyed(&self) -> bool {
        self.status == EndpointStatus::Destroyed
    }
}
