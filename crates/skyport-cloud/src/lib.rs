//! Skyport cloud collaborators
//!
//! The production implementations of the manager's collaborator traits: a
//! DigitalOcean [`ComputeProvisioner`](skyport_proto::ComputeProvisioner)
//! and a [`KeypairGenerator`](skyport_proto::KeypairGenerator) backed by the
//! `ssh-keygen` and `wg` command-line tools.

pub mod config;
pub mod digitalocean;
pub mod error;
pub mod keygen;

pub use config::DigitalOceanConfig;
pub use digitalocean::{DigitalOceanProvisioner, Droplet};
pub use error::CloudError;
pub use keygen::CommandKeypairGenerator;
