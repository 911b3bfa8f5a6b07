//! Tunnel manager configuration

use crate::error::ManagerError;
use crate::retry::RetryPolicy;
use skyport_link::interface::MAX_INTERFACE_NAME;
use skyport_proto::{tunnel_name, ServicePort, MANAGEMENT_PORT};
use skyport_relay::SessionMode;
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which tunnel mechanism carries traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkKind {
    /// WireGuard point-to-point network plus local relay workers
    #[default]
    PointToPoint,
    /// Persistent `ssh -N -R` process forwarding straight to the destination
    ReverseForward,
}

impl FromStr for LinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wireguard" | "wg" | "p2p" => Ok(LinkKind::PointToPoint),
            "ssh" | "reverse" => Ok(LinkKind::ReverseForward),
            other => Err(format!(
                "unknown link type '{}', expected 'wireguard' or 'ssh'",
                other
            )),
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::PointToPoint => f.write_str("wireguard"),
            LinkKind::ReverseForward => f.write_str("ssh"),
        }
    }
}

/// Everything a [`crate::TunnelManager`] needs to know up front
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Normalised tunnel name (`skyport-<name>`)
    pub name: String,
    pub services: Vec<ServicePort>,
    /// Address of the real local service
    pub destination: IpAddr,
    /// Pre-reserved static address to attach after boot
    pub floating_address: Option<Ipv4Addr>,
    pub link: LinkKind,
    pub session_mode: SessionMode,
    /// Heartbeat budget used by `TunnelManager::monitor`
    pub heartbeat: RetryPolicy,
    /// Budget and backoff for re-opening an exited link
    pub respawn: RetryPolicy,
    pub boot_poll_interval: Duration,
    pub management_port: u16,
    /// How long a freshly spawned forwarding process must survive
    pub forward_grace: Duration,
    /// Override for `~/.config/skyport`
    pub state_base_dir: Option<PathBuf>,
}

impl ManagerOptions {
    pub fn new(name: &str, services: Vec<ServicePort>) -> Self {
        Self {
            name: tunnel_name(name),
            services,
            ..Self::default()
        }
    }

    pub fn with_destination(mut self, destination: IpAddr) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_floating_address(mut self, address: Option<Ipv4Addr>) -> Self {
        self.floating_address = address;
        self
    }

    pub fn with_link(mut self, link: LinkKind) -> Self {
        self.link = link;
        self
    }

    pub fn with_session_mode(mut self, mode: SessionMode) -> Self {
        self.session_mode = mode;
        self
    }

    pub fn with_heartbeat(mut self, policy: RetryPolicy) -> Self {
        self.heartbeat = policy;
        self
    }

    pub fn with_respawn(mut self, policy: RetryPolicy) -> Self {
        self.respawn = policy;
        self
    }

    pub fn with_boot_poll_interval(mut self, interval: Duration) -> Self {
        self.boot_poll_interval = interval;
        self
    }

    pub fn with_management_port(mut self, port: u16) -> Self {
        self.management_port = port;
        self
    }

    pub fn with_forward_grace(mut self, grace: Duration) -> Self {
        self.forward_grace = grace;
        self
    }

    pub fn with_state_base_dir(mut self, dir: PathBuf) -> Self {
        self.state_base_dir = Some(dir);
        self
    }

    /// The service list must be non-empty and public TCP ports unique. A
    /// point-to-point link also needs a name wg-quick accepts as an
    /// interface name.
    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.link == LinkKind::PointToPoint && self.name.len() > MAX_INTERFACE_NAME {
            return Err(ManagerError::InvalidConfig(format!(
                "tunnel name '{}' is longer than the {} characters allowed for a wireguard interface",
                self.name, MAX_INTERFACE_NAME
            )));
        }


        if self.services.is_empty() {
            return Err(ManagerError::InvalidConfig(
                "at least one service port is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for service in self.services.iter().filter(|s| s.is_tcp()) {
            if !seen.insert(service.port) {
                return Err(ManagerError::InvalidConfig(format!(
                    "TCP port {} is declared more than once",
                    service.port
                )));
            }
        }

        if let SessionMode::Concurrent { limit: 0 } = self.session_mode {
            return Err(ManagerError::InvalidConfig(
                "concurrent session limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            name: tunnel_name(""),
            services: Vec::new(),
            destination: IpAddr::V4(Ipv4Addr::LOCALHOST),
            floating_address: None,
            link: LinkKind::default(),
            session_mode: SessionMode::default(),
            heartbeat: RetryPolicy::default(),
            respawn: RetryPolicy::respawn(),
            boot_poll_interval: skyport_remote::BOOT_POLL_INTERVAL,
            management_port: MANAGEMENT_PORT,
            forward_grace: Duration::from_secs(3),
            state_base_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyport_proto::parse_ports;

    #[test]
    fn test_name_is_normalised() {
        let options = ManagerOptions::new("web", parse_ports("80").unwrap());
        assert_eq!(options.name, "skyport-web");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_empty_services_rejected() {
        let err = ManagerOptions::new("web", vec![]).validate().unwrap_err();
        assert!(matches!(err, ManagerError::InvalidConfig(_)));
    }

    #[test]
    fn test_duplicate_tcp_ports_rejected() {
        let options = ManagerOptions::new("web", parse_ports("80,80:8080").unwrap());
        assert!(options.validate().is_err());

        // The same number on TCP and UDP is two different services
        let options = ManagerOptions::new("dns", parse_ports("53/TCP,53/UDP").unwrap());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_long_name_rejected_for_point_to_point() {
        // skyport-website1 is 16 bytes, one more than an interface name allows
        let options = ManagerOptions::new("website1", parse_ports("80").unwrap());
        assert_eq!(options.name.len(), 16);
        assert!(matches!(
            options.validate().unwrap_err(),
            ManagerError::InvalidConfig(_)
        ));

        let options = ManagerOptions::new("website", parse_ports("80").unwrap());
        assert!(options.validate().is_ok());

        // No interface is created for the ssh link
        let options = ManagerOptions::new("website1", parse_ports("80").unwrap())
            .with_link(LinkKind::ReverseForward);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_link_kind_parsing() {
        assert_eq!("wireguard".parse::<LinkKind>(), Ok(LinkKind::PointToPoint));
        assert_eq!("SSH".parse::<LinkKind>(), Ok(LinkKind::ReverseForward));
        assert!("carrier-pigeon".parse::<LinkKind>().is_err());
    }
}
