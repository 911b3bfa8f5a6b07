//! Collaborator traits for compute provisioning and key generation
//!
//! The tunnel manager never talks to a cloud API or shells out to key tools
//! directly. It is handed implementations of these traits, which keeps the
//! lifecycle logic testable with in-process stubs.

use crate::endpoint::ProvisionedHost;
use crate::keys::{KeyKind, Keypair};
use crate::ports::ServicePort;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors reported by provisioner and key generator implementations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Provider API error: {0}")]
    Api(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),
}

/// Creates and destroys the ephemeral remote host
///
/// Creation is split in two so the caller learns the host id before the
/// potentially long wait for it to come up. Once `create` has returned an id
/// the host exists and is the caller's to destroy, whatever happens next.
///
/// # Example
/// ```ignore
/// struct FixedProvisioner;
///
/// #[async_trait]
/// impl ComputeProvisioner for FixedProvisioner {
///     async fn create(&self, name: &str, ...) -> Result<String, ProviderError> {
///         Ok("1".into())
///     }
///
///     async fn wait_until_ready(&self, id: &str) -> Result<ProvisionedHost, ProviderError> {
///         Ok(ProvisionedHost { id: id.into(), address: Ipv4Addr::LOCALHOST })
///     }
///     ...
/// }
/// ```
#[async_trait]
pub trait ComputeProvisioner: Send + Sync {
    /// Submit a host for creation and return its id.
    ///
    /// `client_key` is the public half of the management key, `services`
    /// the ports the host will expose and `boot_document` the rendered
    /// first-boot configuration.
    async fn create(
        &self,
        name: &str,
        client_key: &str,
        services: &[ServicePort],
        boot_document: &str,
    ) -> Result<String, ProviderError>;

    /// Wait until a created host has a public address
    async fn wait_until_ready(&self, id: &str) -> Result<ProvisionedHost, ProviderError>;

    /// Destroy a host and any per-host resources registered for it
    async fn destroy(&self, id: &str) -> Result<(), ProviderError>;

    /// Point a pre-reserved static address at the host
    async fn attach_floating_address(
        &self,
        address: Ipv4Addr,
        id: &str,
    ) -> Result<(), ProviderError>;

    /// Ids of every existing host carrying `name`
    async fn list_by_name(&self, name: &str) -> Result<Vec<String>, ProviderError>;
}

/// Produces SSH and link-layer keypairs
#[async_trait]
pub trait KeypairGenerator: Send + Sync {
    async fn generate(&self, kind: KeyKind, label: &str) -> Result<Keypair, ProviderError>;
}
