//! Point-to-point link network
//!
//! Every tunnel owns a `/30` carved out of [`LINK_PARENT_SUBNET`]: the local
//! peer takes the first host address, the remote peer the second. Blocks
//! with an address already bound to a local interface are skipped, so
//! several tunnels (or an unrelated interface) can coexist on one machine.

use crate::error::LinkError;
use crate::peer_config::{PeerConfig, PeerRole};
use ipnetwork::Ipv4Network;
use skyport_proto::{KeyKind, Keypair, KeypairGenerator};
use std::net::Ipv4Addr;
use tracing::debug;

/// Range every link subnet is allocated from
pub const LINK_PARENT_SUBNET: Ipv4Addr = Ipv4Addr::new(10, 50, 0, 0);
pub const LINK_PARENT_PREFIX: u8 = 28;

/// Each link needs exactly two addresses
pub const LINK_PREFIX: u8 = 30;

/// UDP port the remote peer listens on
pub const REMOTE_LISTEN_PORT: u16 = 51820;

/// One side of the point-to-point network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPeer {
    pub name: String,
    /// Host address inside the link's /30
    pub address: Ipv4Addr,
    /// Public address peers dial, known only once the host exists
    pub endpoint: Option<Ipv4Addr>,
    /// 0 lets the kernel pick an ephemeral port
    pub listen_port: u16,
    pub keypair: Keypair,
}

/// The two peers of a tunnel's link
#[derive(Debug, Clone)]
pub struct LinkNetwork {
    pub name: String,
    pub subnet: Ipv4Network,
    pub local: LinkPeer,
    pub remote: LinkPeer,
}

impl LinkNetwork {
    /// Pick an unused subnet and generate both peers' link keys
    pub async fn allocate(
        tunnel_name: &str,
        keygen: &dyn KeypairGenerator,
    ) -> Result<Self, LinkError> {
        let bound = local_addresses()?;
        let subnet = allocate_subnet_with(|addr| bound.contains(&addr))?;
        Self::with_subnet(tunnel_name, subnet, keygen).await
    }

    /// Build the network on an explicit subnet
    pub async fn with_subnet(
        tunnel_name: &str,
        subnet: Ipv4Network,
        keygen: &dyn KeypairGenerator,
    ) -> Result<Self, LinkError> {
        let [local_address, remote_address] = host_addresses(subnet);

        let local_name = format!("{}-local", tunnel_name);
        let remote_name = format!("{}-remote", tunnel_name);
        let local_key = keygen.generate(KeyKind::LinkKey, &local_name).await?;
        let remote_key = keygen.generate(KeyKind::LinkKey, &remote_name).await?;

        debug!(
            subnet = %subnet,
            local = %local_address,
            remote = %remote_address,
            "Allocated link network"
        );

        Ok(Self {
            name: tunnel_name.to_string(),
            subnet,
            local: LinkPeer {
                name: local_name,
                address: local_address,
                endpoint: None,
                listen_port: 0,
                keypair: local_key,
            },
            remote: LinkPeer {
                name: remote_name,
                address: remote_address,
                endpoint: None,
                listen_port: REMOTE_LISTEN_PORT,
                keypair: remote_key,
            },
        })
    }

    /// Record the remote host's public address once it is known
    pub fn resolve_endpoint(&mut self, address: Ipv4Addr) {
        self.remote.endpoint = Some(address);
    }

    /// Configuration for the interface on this machine
    pub fn local_config(&self) -> PeerConfig {
        PeerConfig::new(PeerRole::Local, self.local.clone(), self.remote.clone())
    }

    /// Configuration for the interface on the remote host
    pub fn remote_config(&self) -> PeerConfig {
        PeerConfig::new(PeerRole::Remote, self.remote.clone(), self.local.clone())
    }
}

/// First and second host address of a /30
fn host_addresses(subnet: Ipv4Network) -> [Ipv4Addr; 2] {
    let base = u32::from(subnet.network());
    [Ipv4Addr::from(base + 1), Ipv4Addr::from(base + 2)]
}

/// Return the first /30 in the parent range whose host addresses are all free
pub fn allocate_subnet_with<F>(in_use: F) -> Result<Ipv4Network, LinkError>
where
    F: Fn(Ipv4Addr) -> bool,
{
    let parent = Ipv4Network::new(LINK_PARENT_SUBNET, LINK_PARENT_PREFIX)?;
    let base = u32::from(parent.network());
    let block = 1u32 << (32 - LINK_PREFIX);
    let blocks = 1u32 << (LINK_PREFIX - LINK_PARENT_PREFIX);

    for index in 0..blocks {
        let candidate = Ipv4Network::new(Ipv4Addr::from(base + index * block), LINK_PREFIX)?;
        if host_addresses(candidate).iter().any(|addr| in_use(*addr)) {
            debug!(subnet = %candidate, "Link subnet in use, skipping");
            continue;
        }
        return Ok(candidate);
    }

    Err(LinkError::SubnetExhausted(parent))
}

/// IPv4 addresses bound to any local interface
#[cfg(unix)]
pub fn local_addresses() -> Result<Vec<Ipv4Addr>, LinkError> {
    let addrs =
        nix::ifaddrs::getifaddrs().map_err(|e| LinkError::InterfaceLookup(e.to_string()))?;

    Ok(addrs
        .filter_map(|ifaddr| {
            ifaddr
                .address
                .as_ref()
                .and_then(|addr| addr.as_sockaddr_in().map(|sin| Ipv4Addr::from(sin.ip())))
        })
        .collect())
}

#[cfg(not(unix))]
pub fn local_addresses() -> Result<Vec<Ipv4Addr>, LinkError> {
    Ok(Vec::new())
}
