//! In-process stand-ins for the manager's collaborators

#![allow(dead_code)]

use async_trait::async_trait;
use skyport_manager::{
    BootAdditions, BootFile, Collaborators, LinkContext, LinkHealth, ManagerError, ManagerOptions,
    ShellFactory, TunnelLink, TunnelManager,
};
use skyport_proto::{
    ComputeProvisioner, KeyKind, Keypair, KeypairGenerator, ProviderError, ProvisionedHost,
    RemoteEndpoint, ServicePort,
};
use skyport_remote::{RemoteError, RemoteExec, StateDir};
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const HOST_ID: &str = "host-1";
pub const BOOT_FILE_PATH: &str = "/etc/skyport/test.conf";

#[derive(Default)]
pub struct StubProvisioner {
    pub fail_create: bool,
    /// `wait_until_ready` reports an error
    pub fail_ready: bool,
    /// `wait_until_ready` never returns
    pub hang_ready: bool,
    pub fail_destroy: bool,
    pub boot_documents: Mutex<Vec<String>>,
    pub destroyed: Mutex<Vec<String>>,
    pub attached: Mutex<Vec<(Ipv4Addr, String)>>,
}

#[async_trait]
impl ComputeProvisioner for StubProvisioner {
    async fn create(
        &self,
        _name: &str,
        _client_key: &str,
        _services: &[ServicePort],
        boot_document: &str,
    ) -> Result<String, ProviderError> {
        if self.fail_create {
            return Err(ProviderError::Api("quota exceeded".to_string()));
        }
        self.boot_documents
            .lock()
            .unwrap()
            .push(boot_document.to_string());
        Ok(HOST_ID.to_string())
    }

    async fn wait_until_ready(&self, id: &str) -> Result<ProvisionedHost, ProviderError> {
        if self.hang_ready {
            std::future::pending::<()>().await;
        }
        if self.fail_ready {
            return Err(ProviderError::Api("droplet failed with HTTP 500".to_string()));
        }
        Ok(ProvisionedHost {
            id: id.to_string(),
            address: Ipv4Addr::LOCALHOST,
        })
    }

    async fn destroy(&self, id: &str) -> Result<(), ProviderError> {
        self.destroyed.lock().unwrap().push(id.to_string());
        if self.fail_destroy {
            return Err(ProviderError::Api("destroy rejected".to_string()));
        }
        Ok(())
    }

    async fn attach_floating_address(
        &self,
        address: Ipv4Addr,
        id: &str,
    ) -> Result<(), ProviderError> {
        self.attached
            .lock()
            .unwrap()
            .push((address, id.to_string()));
        Ok(())
    }

    async fn list_by_name(&self, _name: &str) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

pub struct StubKeygen;

#[async_trait]
impl KeypairGenerator for StubKeygen {
    async fn generate(&self, kind: KeyKind, label: &str) -> Result<Keypair, ProviderError> {
        Ok(Keypair::new(
            kind,
            label,
            format!("PRIVATE-{}", label),
            format!("ssh-ed25519 PUBLIC-{}", label),
        ))
    }
}

/// Records every command; fails them all when `fail` is set
#[derive(Default)]
pub struct RecordingShell {
    pub fail: bool,
    pub commands: Mutex<Vec<String>>,
}

#[async_trait]
impl RemoteExec for RecordingShell {
    async fn run(&self, command: &[&str]) -> Result<String, RemoteError> {
        let rendered = command.join(" ");
        self.commands.lock().unwrap().push(rendered.clone());
        if self.fail {
            return Err(RemoteError::CommandFailed {
                command: rendered,
                status: "exit status: 1".to_string(),
                stderr: "status: error".to_string(),
            });
        }
        Ok(format!("ran {}\n", rendered))
    }

    async fn run_quiet(&self, command: &[&str]) -> Result<(), RemoteError> {
        self.run(command).await.map(|_| ())
    }

    async fn interactive(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

pub struct StubShellFactory(pub Arc<RecordingShell>);

impl ShellFactory for StubShellFactory {
    fn connect(&self, _state: &StateDir, _address: IpAddr, _port: u16) -> Arc<dyn RemoteExec> {
        self.0.clone()
    }
}

/// Counters shared between a test and the link it handed to the manager
#[derive(Default)]
pub struct LinkProbe {
    pub probes: AtomicU32,
    pub opens: AtomicU32,
    pub teardowns: AtomicU32,
    pub established: AtomicU32,
}

/// A link whose probe results are scripted. Once the script runs out every
/// probe is healthy.
pub struct ScriptedLink {
    script: Arc<Mutex<VecDeque<LinkHealth>>>,
    counters: Arc<LinkProbe>,
    relay_address: Option<IpAddr>,
    fail_open: bool,
}

impl ScriptedLink {
    pub fn new(script: Vec<LinkHealth>) -> (Self, Arc<LinkProbe>) {
        let counters = Arc::new(LinkProbe::default());
        let link = Self {
            script: Arc::new(Mutex::new(script.into())),
            counters: counters.clone(),
            relay_address: None,
            fail_open: false,
        };
        (link, counters)
    }

    pub fn with_relay_address(mut self, address: IpAddr) -> Self {
        self.relay_address = Some(address);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

#[async_trait]
impl TunnelLink for ScriptedLink {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn prepare(&mut self, _ctx: &LinkContext<'_>) -> Result<BootAdditions, ManagerError> {
        Ok(BootAdditions {
            files: vec![BootFile {
                path: BOOT_FILE_PATH.to_string(),
                content: "scripted = true\n".to_string(),
                permissions: "0600".to_string(),
            }],
            commands: vec!["echo scripted".to_string()],
        })
    }

    async fn establish(
        &mut self,
        _endpoint: &RemoteEndpoint,
        _shell: Arc<dyn RemoteExec>,
    ) -> Result<(), ManagerError> {
        self.counters.established.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open(&mut self) -> Result<(), ManagerError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(ManagerError::TunnelEstablish(
                "forwarding process exited during startup".to_string(),
            ));
        }
        Ok(())
    }

    async fn probe(&mut self) -> LinkHealth {
        self.counters.probes.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(LinkHealth::Healthy)
    }

    async fn teardown(&mut self) -> Result<(), ManagerError> {
        self.counters.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn relay_address(&self) -> Option<IpAddr> {
        self.relay_address
    }
}

/// Everything a test needs to drive a manager against stubs
pub struct Harness {
    pub provisioner: Arc<StubProvisioner>,
    pub shell: Arc<RecordingShell>,
    pub state_base: TempDir,
    /// Stands in for the remote management port so boot-wait returns
    pub management: TcpListener,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_parts(StubProvisioner::default(), RecordingShell::default()).await
    }

    pub async fn with_parts(provisioner: StubProvisioner, shell: RecordingShell) -> Self {
        Self {
            provisioner: Arc::new(provisioner),
            shell: Arc::new(shell),
            state_base: TempDir::new().unwrap(),
            management: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn options(&self, services: Vec<ServicePort>) -> ManagerOptions {
        ManagerOptions::new("test", services)
            .with_management_port(self.management.local_addr().unwrap().port())
            .with_boot_poll_interval(Duration::from_millis(10))
            .with_state_base_dir(self.state_base.path().to_path_buf())
            .with_respawn(
                skyport_manager::RetryPolicy::respawn()
                    .with_backoff(Duration::from_millis(1), Duration::from_millis(5)),
            )
    }

    pub fn manager(&self, options: ManagerOptions, link: ScriptedLink) -> TunnelManager {
        let collaborators = Collaborators::new(self.provisioner.clone(), Arc::new(StubKeygen))
            .with_shell_factory(Arc::new(StubShellFactory(self.shell.clone())))
            .with_link(Box::new(link));
        TunnelManager::new(options, collaborators).unwrap()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.provisioner.destroyed.lock().unwrap().clone()
    }
}
