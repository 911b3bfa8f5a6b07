//! Skyport shared types
//!
//! This crate defines the data model shared by every Skyport component:
//! service port specifications, the remote endpoint record, the tunnel
//! lifecycle state machine, generated key material and the collaborator
//! traits for provisioning hosts and generating keys.

pub mod endpoint;
pub mod keys;
pub mod ports;
pub mod provider;
pub mod state;

pub use endpoint::{EndpointStatus, ProvisionedHost, RemoteEndpoint};
pub use keys::{KeyKind, Keypair};
pub use ports::{format_ports, parse_ports, PortSpecError, Protocol, ServicePort};
pub use provider::{ComputeProvisioner, KeypairGenerator, ProviderError};
pub use state::{InvalidTransition, TunnelState};

/// Port the remote host accepts management (SSH) connections on
pub const MANAGEMENT_PORT: u16 = 22;

/// Account the remote host creates for management sessions
pub const MANAGEMENT_USER: &str = "skyport";

/// Prefix applied to every tunnel name
pub const NAME_PREFIX: &str = "skyport";

/// Normalise a user-supplied tunnel name to `skyport-<name>`.
///
/// The bare prefix is kept as-is, and an existing prefix or suffix is not
/// duplicated, so `foo`, `skyport-foo` and `foo-skyport` all map to
/// `skyport-foo`.
pub fn tunnel_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() || name == NAME_PREFIX {
        return NAME_PREFIX.to_string();
    }
    let stripped = name
        .strip_prefix("skyport-")
        .or_else(|| name.strip_suffix("-skyport"))
        .unwrap_or(name);
    format!("{}-{}", NAME_PREFIX, stripped)
}
