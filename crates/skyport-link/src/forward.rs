//! Reverse port forwarding over the management channel

use skyport_proto::ServicePort;
use std::net::{IpAddr, SocketAddr};

/// Address remote listeners bind to, so forwarded ports are public
pub const FORWARD_BIND_ADDRESS: &str = "0.0.0.0";

/// sshd drop-in letting clients choose the bind address of remote forwards
pub const SSHD_GATEWAY_PORTS: &str = "GatewayPorts clientspecified\n";
pub const SSHD_DROP_IN_PATH: &str = "/etc/ssh/sshd_config.d/skyport.conf";

/// The set of `-R` forwards a reverse-forward link asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseForwardSpec {
    destination: IpAddr,
    services: Vec<ServicePort>,
}

impl ReverseForwardSpec {
    /// Forward every TCP service to `destination`
    pub fn new(destination: IpAddr, services: &[ServicePort]) -> Self {
        Self {
            destination,
            services: services.iter().filter(|s| s.is_tcp()).copied().collect(),
        }
    }

    /// (public remote port, local target) pairs
    pub fn forwards(&self) -> Vec<(u16, SocketAddr)> {
        self.services
            .iter()
            .map(|s| (s.port, SocketAddr::new(self.destination, s.local_port)))
            .collect()
    }

    /// Arguments for `ssh`, one `-R` pair per service
    pub fn args(&self) -> Vec<String> {
        let host = match self.destination {
            IpAddr::V4(addr) => addr.to_string(),
            IpAddr::V6(addr) => format!("[{}]", addr),
        };

        self.services
            .iter()
            .flat_map(|s| {
                [
                    "-R".to_string(),
                    format!("{}:{}:{}:{}", FORWARD_BIND_ADDRESS, s.port, host, s.local_port),
                ]
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyport_proto::parse_ports;
    use std::net::Ipv4Addr;

    #[test]
    fn test_forward_args() {
        let services = parse_ports("80:8080/TCP,443/TCP").unwrap();
        let spec = ReverseForwardSpec::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)), &services);
        assert_eq!(
            spec.args(),
            vec![
                "-R",
                "0.0.0.0:80:192.168.1.20:8080",
                "-R",
                "0.0.0.0:443:192.168.1.20:443"
            ]
        );
        assert_eq!(spec.forwards()[0].1.to_string(), "192.168.1.20:8080");
    }

    #[test]
    fn test_udp_is_not_forwarded() {
        let services = parse_ports("53/UDP").unwrap();
        let spec = ReverseForwardSpec::new(IpAddr::V4(Ipv4Addr::LOCALHOST), &services);
        assert!(spec.is_empty());
        assert!(spec.args().is_empty());
    }

    #[test]
    fn test_ipv6_destination_is_bracketed() {
        let services = parse_ports("22").unwrap();
        let spec = ReverseForwardSpec::new("::1".parse().unwrap(), &services);
        assert_eq!(spec.args()[1], "0.0.0.0:22:[::1]:22");
    }
}
