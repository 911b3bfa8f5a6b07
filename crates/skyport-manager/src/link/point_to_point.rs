use super::{BootAdditions, BootFile, LinkContext, LinkHealth, TunnelLink};
use crate::error::ManagerError;
use async_trait::async_trait;
use skyport_link::interface::{link_down_quiet, link_up};
use skyport_link::{LinkNetwork, REMOTE_LINK_CONFIG_PATH};
use skyport_proto::{RemoteEndpoint, ServicePort};
use skyport_remote::RemoteExec;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

/// Seconds a single ping waits for its reply
const PING_DEADLINE_SECS: u32 = 5;

/// WireGuard two-peer network. Traffic arriving on the remote host is
/// DNAT'ed across the link to the local peer address, where relay workers
/// pick it up.
pub struct PointToPointLink {
    network: Option<LinkNetwork>,
    services: Vec<ServicePort>,
    config_path: Option<PathBuf>,
    established: bool,
}

impl PointToPointLink {
    pub fn new() -> Self {
        Self {
            network: None,
            services: Vec::new(),
            config_path: None,
            established: false,
        }
    }

    fn network(&self) -> Result<&LinkNetwork, ManagerError> {
        self.network
            .as_ref()
            .ok_or_else(|| ManagerError::TunnelEstablish("link network not allocated".to_string()))
    }

    async fn ping(address: Ipv4Addr) -> Result<(), String> {
        let status = Command::new("ping")
            .arg("-c")
            .arg("1")
            .arg("-w")
            .arg(PING_DEADLINE_SECS.to_string())
            .arg(address.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| format!("failed to run ping: {}", e))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!("no reply from {} ({})", address, status))
        }
    }
}

impl Default for PointToPointLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TunnelLink for PointToPointLink {
    fn kind(&self) -> &'static str {
        "wireguard"
    }

    async fn prepare(&mut self, ctx: &LinkContext<'_>) -> Result<BootAdditions, ManagerError> {
        let network = LinkNetwork::allocate(ctx.name, ctx.keygen).await?;
        let remote_config = network.remote_config().render(ctx.services);

        self.services = ctx.services.to_vec();
        self.config_path = Some(ctx.state_dir.link_config_path());
        self.network = Some(network);

        Ok(BootAdditions {
            files: vec![BootFile {
                path: REMOTE_LINK_CONFIG_PATH.to_string(),
                content: remote_config,
                permissions: "0600".to_string(),
            }],
            commands: Vec::new(),
        })
    }

    async fn establish(
        &mut self,
        endpoint: &RemoteEndpoint,
        shell: Arc<dyn RemoteExec>,
    ) -> Result<(), ManagerError> {
        let config_path = self
            .config_path
            .clone()
            .ok_or_else(|| ManagerError::TunnelEstablish("link was not prepared".to_string()))?;
        let network = self
            .network
            .as_mut()
            .ok_or_else(|| ManagerError::TunnelEstablish("link network not allocated".to_string()))?;
        network.resolve_endpoint(endpoint.address);

        debug!("Bringing up remote link interface");
        shell
            .run_quiet(&["sudo", "wg-quick", "up", REMOTE_LINK_CONFIG_PATH])
            .await
            .map_err(|e| ManagerError::TunnelEstablish(format!("remote interface: {}", e)))?;

        debug!(path = %config_path.display(), "Bringing up local link interface");
        network
            .local_config()
            .write_to(&config_path, &self.services)
            .map_err(|e| ManagerError::TunnelEstablish(format!("local config: {}", e)))?;
        link_up(&config_path).await?;

        self.established = true;
        info!(
            local = %network.local.address,
            remote = %network.remote.address,
            "Point-to-point link established"
        );
        Ok(())
    }

    async fn open(&mut self) -> Result<(), ManagerError> {
        // The kernel interface persists on its own; nothing to re-spawn
        if self.established {
            Ok(())
        } else {
            Err(ManagerError::TunnelEstablish(
                "link has not been established".to_string(),
            ))
        }
    }

    async fn probe(&mut self) -> LinkHealth {
        let remote = match self.network() {
            Ok(network) => network.remote.address,
            Err(e) => return LinkHealth::Unresponsive(e.to_string()),
        };
        match Self::ping(remote).await {
            Ok(()) => LinkHealth::Healthy,
            Err(reason) => LinkHealth::Unresponsive(reason),
        }
    }

    async fn teardown(&mut self) -> Result<(), ManagerError> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                link_down_quiet(path).await;
            }
        }
        self.established = false;
        Ok(())
    }

    fn relay_address(&self) -> Option<IpAddr> {
        self.network
            .as_ref()
            .map(|network| IpAddr::V4(network.local.address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyport_proto::{KeyKind, Keypair, KeypairGenerator, ProviderError};
    use skyport_remote::StateDir;
    use tempfile::TempDir;

    struct FixedKeygen;

    #[async_trait]
    impl KeypairGenerator for FixedKeygen {
        async fn generate(&self, kind: KeyKind, label: &str) -> Result<Keypair, ProviderError> {
            Ok(Keypair::new(
                kind,
                label,
                format!("{}-private", label),
                format!("{}-public", label),
            ))
        }
    }

    #[tokio::test]
    async fn test_prepare_ships_remote_config() {
        let dir = TempDir::new().unwrap();
        let state_dir = StateDir::with_base_dir(dir.path(), "skyport-web");
        let services = skyport_proto::parse_ports("80,443").unwrap();
        let ctx = LinkContext {
            name: "skyport-web",
            services: &services,
            destination: IpAddr::V4(Ipv4Addr::LOCALHOST),
            keygen: &FixedKeygen,
            state_dir: &state_dir,
        };

        let mut link = PointToPointLink::new();
        assert!(link.relay_address().is_none());
        let additions = link.prepare(&ctx).await.unwrap();

        assert_eq!(additions.files.len(), 1);
        let file = &additions.files[0];
        assert_eq!(file.path, REMOTE_LINK_CONFIG_PATH);
        assert_eq!(file.permissions, "0600");
        assert!(file.content.contains("[Interface]"));
        assert!(file.content.contains("--dport 443"));
        assert!(file.content.contains("skyport-web-local-public"));

        // Relays listen on the local end of the link
        let relay = link.relay_address().unwrap();
        let network = link.network().unwrap();
        assert_eq!(relay, IpAddr::V4(network.local.address));
    }

    #[tokio::test]
    async fn test_open_requires_establish() {
        let mut link = PointToPointLink::new();
        assert!(link.open().await.is_err());
        assert!(matches!(link.probe().await, LinkHealth::Unresponsive(_)));
        link.teardown().await.unwrap();
    }
}
