//! External collaborators handed to the tunnel manager

use crate::link::TunnelLink;
use skyport_link::{BundledTemplate, Templater};
use skyport_proto::{ComputeProvisioner, KeypairGenerator};
use skyport_remote::{RemoteExec, RemoteShell, StateDir};
use std::net::IpAddr;
use std::sync::Arc;

/// Opens a remote-execution channel to a booted endpoint
pub trait ShellFactory: Send + Sync {
    fn connect(&self, state: &StateDir, address: IpAddr, port: u16) -> Arc<dyn RemoteExec>;
}

/// Real `ssh`, pinned to the tunnel's own client key and `known_hosts`
#[derive(Debug, Clone, Copy, Default)]
pub struct SshShellFactory;

impl ShellFactory for SshShellFactory {
    fn connect(&self, state: &StateDir, address: IpAddr, port: u16) -> Arc<dyn RemoteExec> {
        Arc::new(RemoteShell::for_state_dir(state, address).with_port(port))
    }
}

/// Everything the manager talks to outside its own process
pub struct Collaborators {
    pub provisioner: Arc<dyn ComputeProvisioner>,
    pub keygen: Arc<dyn KeypairGenerator>,
    pub templater: Arc<dyn Templater>,
    pub shells: Arc<dyn ShellFactory>,
    /// Overrides the link selected by the options
    pub link: Option<Box<dyn TunnelLink>>,
}

impl Collaborators {
    pub fn new(
        provisioner: Arc<dyn ComputeProvisioner>,
        keygen: Arc<dyn KeypairGenerator>,
    ) -> Self {
        Self {
            provisioner,
            keygen,
            templater: Arc::new(BundledTemplate),
            shells: Arc::new(SshShellFactory),
            link: None,
        }
    }

    pub fn with_templater(mut self, templater: Arc<dyn Templater>) -> Self {
        self.templater = templater;
        self
    }

    pub fn with_shell_factory(mut self, shells: Arc<dyn ShellFactory>) -> Self {
        self.shells = shells;
        self
    }

    pub fn with_link(mut self, link: Box<dyn TunnelLink>) -> Self {
        self.link = Some(link);
        self
    }
}
