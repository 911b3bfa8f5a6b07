//! Skyport link model
//!
//! In-memory representation of the point-to-point network between the
//! local machine and the remote endpoint, plus everything rendered from it:
//! wg-quick peer configurations, the first-boot cloud-config document and
//! the reverse-forward argument list used by the SSH link.

pub mod boot;
pub mod error;
pub mod forward;
pub mod interface;
pub mod network;
pub mod peer_config;

pub use boot::{BootDocument, BundledTemplate, Templater, REMOTE_LINK_CONFIG_PATH};
pub use error::LinkError;
pub use forward::ReverseForwardSpec;
pub use network::{allocate_subnet_with, local_addresses, LinkNetwork, LinkPeer};
pub use peer_config::{PeerConfig, PeerRole};
