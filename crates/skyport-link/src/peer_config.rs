//! wg-quick peer configuration rendering

use crate::network::LinkPeer;
use skyport_proto::ServicePort;
use std::path::Path;

/// Keepalive interval for the side that dials its peer
pub const PERSISTENT_KEEPALIVE: u16 = 25;

/// Which end of the link a configuration is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Local,
    Remote,
}

/// An interface definition plus the single peer it talks to
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub role: PeerRole,
    pub interface: LinkPeer,
    pub peer: LinkPeer,
}

impl PeerConfig {
    pub fn new(role: PeerRole, interface: LinkPeer, peer: LinkPeer) -> Self {
        Self {
            role,
            interface,
            peer,
        }
    }

    /// Render a wg-quick INI document.
    ///
    /// The remote side forwards every public TCP service port to the local
    /// peer address; the local side carries no firewall rules.
    pub fn render(&self, services: &[ServicePort]) -> String {
        let mut lines = vec![
            "[Interface]".to_string(),
            format!("# {}", self.interface.name),
            format!("PrivateKey = {}", self.interface.keypair.private),
            format!("Address = {}/30", self.interface.address),
        ];
        if self.interface.listen_port != 0 {
            lines.push(format!("ListenPort = {}", self.interface.listen_port));
        }
        if self.role == PeerRole::Remote {
            for (up, down) in self.forwarding_rules(services) {
                lines.push(format!("PostUp = {}", up));
                lines.push(format!("PostDown = {}", down));
            }
        }

        lines.push(String::new());
        lines.push("[Peer]".to_string());
        lines.push(format!("# {}", self.peer.name));
        lines.push(format!("PublicKey = {}", self.peer.keypair.public));
        lines.push(format!("AllowedIPs = {}/32", self.peer.address));
        if let Some(endpoint) = self.peer.endpoint {
            lines.push(format!("Endpoint = {}:{}", endpoint, self.peer.listen_port));
            lines.push(format!("PersistentKeepalive = {}", PERSISTENT_KEEPALIVE));
        }

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    /// Render and write the configuration with owner-only permissions
    pub fn write_to(&self, path: &Path, services: &[ServicePort]) -> std::io::Result<()> {
        use std::io::Write;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(self.render(services).as_bytes())
    }

    /// (PostUp, PostDown) pairs routing public traffic into the link
    fn forwarding_rules(&self, services: &[ServicePort]) -> Vec<(String, String)> {
        let mut rules = vec![
            (
                "sysctl -w net.ipv4.ip_forward=1".to_string(),
                "sysctl -w net.ipv4.ip_forward=0".to_string(),
            ),
            (
                "iptables -t nat -A POSTROUTING -o %i -j MASQUERADE".to_string(),
                "iptables -t nat -D POSTROUTING -o %i -j MASQUERADE".to_string(),
            ),
        ];

        for service in services.iter().filter(|s| s.is_tcp()) {
            let rule = format!(
                "PREROUTING ! -i %i -p {} --dport {} -j DNAT --to-destination {}:{}",
                service.protocol.as_lower(),
                service.port,
                self.peer.address,
                service.port
            );
            rules.push((
                format!("iptables -t nat -A {}", rule),
                format!("iptables -t nat -D {}", rule),
            ));
        }

        rules
    }
}
