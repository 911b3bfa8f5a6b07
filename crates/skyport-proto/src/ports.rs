//! Service port specifications
//!
//! A port specification is a comma-separated list of `port[:local_port][/protocol]`
//! tokens, e.g. `80/TCP,443/TCP` or `8080:30080`. The public `port` is opened on
//! the remote endpoint; `local_port` is the port of the real service traffic is
//! forwarded to, and defaults to `port`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while parsing a port specification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortSpecError {
    #[error("Port specification is empty")]
    Empty,

    #[error("Invalid port '{value}' in '{token}': expected a number between 1 and 65535")]
    InvalidPort { token: String, value: String },

    #[error("Unsupported protocol '{protocol}' in '{token}': expected TCP or UDP")]
    InvalidProtocol { token: String, protocol: String },

    #[error("Malformed port token '{0}': expected port[:local_port][/protocol]")]
    Malformed(String),
}

/// Transport protocol of a service port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }

    /// Lower-case name, as used by iptables and similar tools
    pub fn as_lower(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            other => Err(other.to_string()),
        }
    }
}

/// A single service port to expose through the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServicePort {
    /// Public port on the remote endpoint
    pub port: u16,
    /// Port of the local service traffic is forwarded to
    pub local_port: u16,
    pub protocol: Protocol,
}

impl ServicePort {
    pub fn new(port: u16, protocol: Protocol) -> Self {
        Self {
            port,
            local_port: port,
            protocol,
        }
    }

    pub fn tcp(port: u16) -> Self {
        Self::new(port, Protocol::Tcp)
    }

    pub fn udp(port: u16) -> Self {
        Self::new(port, Protocol::Udp)
    }

    /// Forward the public port to a different local port
    pub fn with_local_port(mut self, local_port: u16) -> Self {
        self.local_port = local_port;
        self
    }

    pub fn is_tcp(&self) -> bool {
        self.protocol == Protocol::Tcp
    }

    fn parse_port(token: &str, value: &str) -> Result<u16, PortSpecError> {
        match value.trim().parse::<u16>() {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(PortSpecError::InvalidPort {
                token: token.to_string(),
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for ServicePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.local_port == self.port {
            write!(f, "{}/{}", self.port, self.protocol)
        } else {
            write!(f, "{}:{}/{}", self.port, self.local_port, self.protocol)
        }
    }
}

impl FromStr for ServicePort {
    type Err = PortSpecError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let token = token.trim();
        if token.is_empty() {
            return Err(PortSpecError::Empty);
        }

        let (ports, protocol) = match token.split_once('/') {
            Some((ports, proto)) => {
                let protocol =
                    proto
                        .parse::<Protocol>()
                        .map_err(|protocol| PortSpecError::InvalidProtocol {
                            token: token.to_string(),
                            protocol,
                        })?;
                (ports, protocol)
            }
            None => (token, Protocol::Tcp),
        };

        let (port, local_port) = match ports.split_once(':') {
            Some((_, local)) if local.contains(':') => {
                return Err(PortSpecError::Malformed(token.to_string()));
            }
            Some((public, local)) => (
                Self::parse_port(token, public)?,
                Self::parse_port(token, local)?,
            ),
            None => {
                let port = Self::parse_port(token, ports)?;
                (port, port)
            }
        };

        Ok(ServicePort {
            port,
            local_port,
            protocol,
        })
    }
}

/// Parse a comma-separated port specification.
///
/// Every token must be valid: a single bad token fails the whole
/// specification and no partial list is returned.
pub fn parse_ports(spec: &str) -> Result<Vec<ServicePort>, PortSpecError> {
    if spec.trim().is_empty() {
        return Err(PortSpecError::Empty);
    }
    spec.split(',').map(str::parse).collect()
}

/// Render a list of service ports back into specification form
pub fn format_ports(ports: &[ServicePort]) -> String {
    ports
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_web_ports() {
        let ports = parse_ports("80/TCP,443/TCP").unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0], ServicePort::tcp(80));
        assert_eq!(ports[1], ServicePort::tcp(443));
    }

    #[test]
    fn test_parse_defaults_to_tcp() {
        let ports = parse_ports("80").unwrap();
        assert_eq!(ports, vec![ServicePort::tcp(80)]);
    }

    #[test]
    fn test_parse_udp() {
        let ports = parse_ports("4000/UDP").unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 4000);
        assert_eq!(ports[0].protocol, Protocol::Udp);
    }

    #[test]
    fn test_protocol_is_case_insensitive() {
        let ports = parse_ports("53/udp,22/Tcp").unwrap();
        assert_eq!(ports[0].protocol, Protocol::Udp);
        assert_eq!(ports[1].protocol, Protocol::Tcp);
    }

    #[test]
    fn test_unknown_protocol_fails_whole_spec() {
        let err = parse_ports("80/FOO").unwrap_err();
        assert!(matches!(err, PortSpecError::InvalidProtocol { .. }));

        // A valid token ahead of the bad one must not leak through
        assert!(parse_ports("443/TCP,80/FOO").is_err());
    }

    #[test]
    fn test_invalid_port_numbers() {
        assert!(matches!(
            parse_ports("0"),
            Err(PortSpecError::InvalidPort { .. })
        ));
        assert!(matches!(
            parse_ports("70000/TCP"),
            Err(PortSpecError::InvalidPort { .. })
        ));
        assert!(matches!(
            parse_ports("http"),
            Err(PortSpecError::InvalidPort { .. })
        ));
        assert_eq!(parse_ports(""), Err(PortSpecError::Empty));
        assert_eq!(parse_ports("80,,443"), Err(PortSpecError::Empty));
    }

    #[test]
    fn test_parse_local_port_split() {
        let port: ServicePort = "80:30080/TCP".parse().unwrap();
        assert_eq!(port.port, 80);
        assert_eq!(port.local_port, 30080);
        assert_eq!(port.protocol, Protocol::Tcp);

        let ports = parse_ports("80:30080,443:30443").unwrap();
        assert_eq!(ports[1].port, 443);
        assert_eq!(ports[1].local_port, 30443);
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(matches!(
            "80:81:82".parse::<ServicePort>(),
            Err(PortSpecError::Malformed(_))
        ));
        assert!(matches!(
            "80/TCP/UDP".parse::<ServicePort>(),
            Err(PortSpecError::InvalidProtocol { .. })
        ));
    }

    #[test]
    fn test_format_parse_format_is_stable() {
        for spec in ["80", "80/tcp", "4000/udp", "8080:30080/Udp", "65535/TCP", "1"] {
            let first: ServicePort = spec.parse().unwrap();
            let rendered = first.to_string();
            let second: ServicePort = rendered.parse().unwrap();
            assert_eq!(first, second);
            assert_eq!(rendered, second.to_string());
        }
    }

    #[test]
    fn test_format_ports_list() {
        let ports = parse_ports("80/tcp,53/udp,8080:9090").unwrap();
        assert_eq!(format_ports(&ports), "80/TCP,53/UDP,8080:9090/TCP");
    }

    #[test]
    fn test_serde_uses_upper_case_protocol() {
        let json = serde_json::to_string(&ServicePort::udp(53)).unwrap();
        assert!(json.contains("\"UDP\""));
        let back: ServicePort = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ServicePort::udp(53));
    }
}
