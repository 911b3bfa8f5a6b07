//! Tunnel link mechanisms
//!
//! The manager only ever holds a `Box<dyn TunnelLink>`. Each implementation
//! decides what it needs on the remote host at boot, how to bring itself up
//! once the host is reachable, how to check it is alive and how to take it
//! down again.

mod point_to_point;
mod reverse_forward;

pub use point_to_point::PointToPointLink;
pub use reverse_forward::ReverseForwardLink;

use crate::error::ManagerError;
use crate::options::{LinkKind, ManagerOptions};
use async_trait::async_trait;
use skyport_proto::{KeypairGenerator, RemoteEndpoint, ServicePort};
use skyport_remote::{RemoteExec, StateDir};
use std::net::IpAddr;
use std::sync::Arc;

/// Result of a single liveness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkHealth {
    Healthy,
    /// The link exists but the peer did not answer
    Unresponsive(String),
    /// The process carrying the link is gone and must be re-opened
    Exited(String),
}

/// What a link needs while the boot document is assembled
pub struct LinkContext<'a> {
    pub name: &'a str,
    pub services: &'a [ServicePort],
    pub destination: IpAddr,
    pub keygen: &'a dyn KeypairGenerator,
    pub state_dir: &'a StateDir,
}

/// A file the remote host must have after first boot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootFile {
    pub path: String,
    pub content: String,
    pub permissions: String,
}

/// A link's contribution to the boot document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootAdditions {
    pub files: Vec<BootFile>,
    pub commands: Vec<String>,
}

#[async_trait]
pub trait TunnelLink: Send + Sync {
    /// Short name for logs
    fn kind(&self) -> &'static str;

    /// Generate link material and report what the remote host needs at boot
    async fn prepare(&mut self, ctx: &LinkContext<'_>) -> Result<BootAdditions, ManagerError>;

    /// Bring the link up once the endpoint has finished booting
    async fn establish(
        &mut self,
        endpoint: &RemoteEndpoint,
        shell: Arc<dyn RemoteExec>,
    ) -> Result<(), ManagerError>;

    /// Re-open an established link after its carrier exited
    async fn open(&mut self) -> Result<(), ManagerError>;

    async fn probe(&mut self) -> LinkHealth;

    /// Take the local side down; a link that is already gone is not an error
    async fn teardown(&mut self) -> Result<(), ManagerError>;

    /// Address relay workers listen on, if this link needs local relays
    fn relay_address(&self) -> Option<IpAddr>;
}

/// Build the link selected in `options`
pub fn link_for(options: &ManagerOptions) -> Box<dyn TunnelLink> {
    match options.link {
        LinkKind::PointToPoint => Box::new(PointToPointLink::new()),
        LinkKind::ReverseForward => Box::new(ReverseForwardLink::new(options.forward_grace)),
    }
}
