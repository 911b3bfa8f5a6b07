use super::{BootAdditions, BootFile, LinkContext, LinkHealth, TunnelLink};
use crate::error::ManagerError;
use async_trait::async_trait;
use skyport_link::forward::{SSHD_DROP_IN_PATH, SSHD_GATEWAY_PORTS};
use skyport_link::ReverseForwardSpec;
use skyport_proto::RemoteEndpoint;
use skyport_remote::{RemoteExec, RemoteShell, StateDir};
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// A persistent `ssh -N -R` process. The remote sshd listens on every public
/// port and forwards straight to the destination, so no local relay runs.
pub struct ReverseForwardLink {
    grace: Duration,
    spec: Option<ReverseForwardSpec>,
    state_dir: Option<StateDir>,
    address: Option<IpAddr>,
    child: Option<Child>,
}

impl ReverseForwardLink {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            spec: None,
            state_dir: None,
            address: None,
            child: None,
        }
    }

    fn forward_options(spec: &ReverseForwardSpec) -> Vec<String> {
        let mut options: Vec<String> = [
            "-N",
            "-o",
            "BatchMode=yes",
            "-o",
            "ExitOnForwardFailure=yes",
            "-o",
            "ServerAliveInterval=15",
            "-o",
            "ServerAliveCountMax=3",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        options.extend(spec.args());
        options
    }

    async fn stop_child(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!("Forwarding process already gone: {}", e);
            }
        }
    }
}

#[async_trait]
impl TunnelLink for ReverseForwardLink {
    fn kind(&self) -> &'static str {
        "ssh"
    }

    async fn prepare(&mut self, ctx: &LinkContext<'_>) -> Result<BootAdditions, ManagerError> {
        let spec = ReverseForwardSpec::new(ctx.destination, ctx.services);
        if spec.is_empty() {
            return Err(ManagerError::InvalidConfig(
                "the ssh link needs at least one TCP port".to_string(),
            ));
        }
        self.spec = Some(spec);
        self.state_dir = Some(ctx.state_dir.clone());

        Ok(BootAdditions {
            files: vec![BootFile {
                path: SSHD_DROP_IN_PATH.to_string(),
                content: SSHD_GATEWAY_PORTS.to_string(),
                permissions: "0644".to_string(),
            }],
            commands: vec!["systemctl reload ssh || systemctl reload sshd".to_string()],
        })
    }

    async fn establish(
        &mut self,
        endpoint: &RemoteEndpoint,
        _shell: Arc<dyn RemoteExec>,
    ) -> Result<(), ManagerError> {
        self.address = Some(IpAddr::V4(endpoint.address));
        self.open().await
    }

    async fn open(&mut self) -> Result<(), ManagerError> {
        let (spec, state_dir, address) = match (self.spec.clone(), self.state_dir.clone(), self.address) {
            (Some(spec), Some(state_dir), Some(address)) => (spec, state_dir, address),
            _ => {
                return Err(ManagerError::TunnelEstablish(
                    "link has not been established".to_string(),
                ))
            }
        };

        let shell = RemoteShell::for_state_dir(&state_dir, address);
        let mut command = shell.command(&Self::forward_options(&spec), &[]);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        self.stop_child().await;
        let mut child = command
            .spawn()
            .map_err(|e| ManagerError::TunnelEstablish(format!("failed to spawn ssh: {}", e)))?;

        // A forward that cannot bind makes ssh exit almost immediately
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(Ok(status)) => {
                return Err(ManagerError::TunnelEstablish(format!(
                    "forwarding process exited during startup ({})",
                    status
                )));
            }
            Ok(Err(e)) => {
                return Err(ManagerError::TunnelEstablish(format!(
                    "failed to wait on forwarding process: {}",
                    e
                )));
            }
            Err(_) => {}
        }

        info!(
            host = %address,
            forwards = spec.forwards().len(),
            "Reverse forwarding process running"
        );
        self.child = Some(child);
        Ok(())
    }

    async fn probe(&mut self) -> LinkHealth {
        let child = match self.child.as_mut() {
            Some(child) => child,
            None => return LinkHealth::Exited("forwarding process not running".to_string()),
        };

        match child.try_wait() {
            Ok(None) => LinkHealth::Healthy,
            Ok(Some(status)) => {
                warn!(status = %status, "Forwarding process exited");
                self.child = None;
                LinkHealth::Exited(format!("forwarding process exited ({})", status))
            }
            Err(e) => LinkHealth::Exited(format!("failed to poll forwarding process: {}", e)),
        }
    }

    async fn teardown(&mut self) -> Result<(), ManagerError> {
        self.stop_child().await;
        Ok(())
    }

    fn relay_address(&self) -> Option<IpAddr> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use skyport_proto::{KeyKind, Keypair, KeypairGenerator, ProviderError, ServicePort};
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    struct NoKeys;

    #[async_trait]
    impl KeypairGenerator for NoKeys {
        async fn generate(&self, kind: KeyKind, _label: &str) -> Result<Keypair, ProviderError> {
            Err(ProviderError::KeyGeneration(format!("unexpected {} key request", kind)))
        }
    }

    fn context<'a>(services: &'a [ServicePort], state_dir: &'a StateDir) -> LinkContext<'a> {
        LinkContext {
            name: "skyport-web",
            services,
            destination: IpAddr::V4(Ipv4Addr::LOCALHOST),
            keygen: &NoKeys,
            state_dir,
        }
    }

    #[tokio::test]
    async fn test_prepare_enables_gateway_ports() {
        let dir = TempDir::new().unwrap();
        let state_dir = StateDir::with_base_dir(dir.path(), "skyport-web");
        let services = [ServicePort::tcp(80)];

        let mut link = ReverseForwardLink::new(Duration::from_secs(1));
        let additions = link.prepare(&context(&services, &state_dir)).await.unwrap();

        assert_eq!(additions.files[0].path, SSHD_DROP_IN_PATH);
        assert!(additions.files[0].content.contains("GatewayPorts"));
        assert_eq!(additions.commands.len(), 1);
        assert!(link.relay_address().is_none());
    }

    #[tokio::test]
    async fn test_prepare_rejects_udp_only() {
        let dir = TempDir::new().unwrap();
        let state_dir = StateDir::with_base_dir(dir.path(), "skyport-dns");
        let services = [ServicePort::udp(53)];

        let mut link = ReverseForwardLink::new(Duration::from_secs(1));
        let err = link.prepare(&context(&services, &state_dir)).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_probe_without_process_reports_exit() {
        let mut link = ReverseForwardLink::new(Duration::from_secs(1));
        assert!(matches!(link.probe().await, LinkHealth::Exited(_)));
        assert!(link.open().await.is_err());
    }

    #[test]
    fn test_forward_options() {
        let spec = ReverseForwardSpec::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            &[ServicePort::tcp(80).with_local_port(8080)],
        );
        let options = ReverseForwardLink::forward_options(&spec);
        assert_eq!(options[0], "-N");
        assert!(options.contains(&"ExitOnForwardFailure=yes".to_string()));
        assert_eq!(options.last().unwrap(), "0.0.0.0:80:127.0.0.1:8080");
    }
}
