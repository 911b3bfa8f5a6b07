//! Skyport tunnel manager
//!
//! Orchestrates the whole lifecycle of a tunnel: key generation, boot
//! document assembly, provisioning and boot-wait of the remote endpoint,
//! link establishment, relay workers, heartbeat monitoring with bounded
//! retries and idempotent cleanup.
//!
//! # Example
//! ```ignore
//! let options = ManagerOptions::new("web", parse_ports("80,443")?);
//! let collaborators = Collaborators::new(provisioner, keygen);
//! let mut manager = TunnelManager::new(options, collaborators)?;
//!
//! if let Err(e) = manager.up().await {
//!     manager.cleanup().await?;
//!     return Err(e.into());
//! }
//! manager.monitor_tunnel(Duration::from_secs(10), 3).await?;
//! ```

pub mod collaborators;
pub mod error;
pub mod link;
pub mod manager;
pub mod options;
pub mod retry;

pub use collaborators::{Collaborators, ShellFactory, SshShellFactory};
pub use error::ManagerError;
pub use link::{
    link_for, BootAdditions, BootFile, LinkContext, LinkHealth, PointToPointLink,
    ReverseForwardLink, TunnelLink,
};
pub use manager::TunnelManager;
pub use options::{LinkKind, ManagerOptions};
pub use retry::RetryPolicy;
