//! First-boot document for the remote host
//!
//! The base document is a cloud-config YAML template. Host keys, the
//! management user's authorized key and any extra files (the remote peer
//! configuration, an sshd drop-in) are merged into it before it is handed to
//! the compute provisioner.

use crate::error::LinkError;
use serde::{Deserialize, Serialize};
use skyport_proto::{Keypair, MANAGEMENT_USER};
use std::collections::BTreeMap;

/// Header cloud-init requires on the first line
pub const CLOUD_CONFIG_HEADER: &str = "#cloud-config";

/// Where the remote peer configuration lands on the host
pub const REMOTE_LINK_CONFIG_PATH: &str = "/etc/wireguard/skyport.conf";

const BUNDLED_TEMPLATE: &str = include_str!("../templates/cloud-config.yml");

/// Supplies the base boot document
pub trait Templater: Send + Sync {
    fn base_document(&self) -> Result<String, LinkError>;
}

/// The cloud-config template shipped with skyport
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledTemplate;

impl Templater for BundledTemplate {
    fn base_document(&self) -> Result<String, LinkError> {
        Ok(BUNDLED_TEMPLATE.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudConfigUser {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sudo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default)]
    pub ssh_authorized_keys: Vec<String>,
    /// Template keys skyport does not touch, passed through unchanged
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl CloudConfigUser {
    fn management() -> Self {
        Self {
            name: MANAGEMENT_USER.to_string(),
            groups: vec!["sudo".to_string()],
            sudo: Some("ALL=(ALL) NOPASSWD:ALL".to_string()),
            shell: Some("/bin/bash".to_string()),
            ssh_authorized_keys: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudConfigFile {
    pub path: String,
    pub content: String,
    pub owner: String,
    pub permissions: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub users: Vec<CloudConfigUser>,
    #[serde(default)]
    pub package_update: bool,
    #[serde(default)]
    pub package_upgrade: bool,
    #[serde(default)]
    pub ssh_keys: BTreeMap<String, String>,
    #[serde(default)]
    pub write_files: Vec<CloudConfigFile>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runcmd: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A cloud-config document being assembled for one host
#[derive(Debug, Clone)]
pub struct BootDocument {
    config: CloudConfig,
}

impl BootDocument {
    /// Parse a cloud-config template
    pub fn from_template(template: &str) -> Result<Self, LinkError> {
        let config: CloudConfig = serde_yaml::from_str(template)?;
        Ok(Self { config })
    }

    pub fn from_templater(templater: &dyn Templater) -> Result<Self, LinkError> {
        Self::from_template(&templater.base_document()?)
    }

    /// Inject the host's SSH identity so clients can pin it before first contact
    pub fn with_host_key(mut self, host_key: &Keypair) -> Self {
        self.config
            .ssh_keys
            .insert("ed25519_private".to_string(), host_key.private.clone());
        self.config
            .ssh_keys
            .insert("ed25519_public".to_string(), host_key.public.clone());
        self
    }

    /// Authorize a public key for the management user, creating the user if
    /// the template does not define it
    pub fn with_authorized_key(mut self, public_key: &str) -> Self {
        let position = self
            .config
            .users
            .iter()
            .position(|user| user.name == MANAGEMENT_USER);
        let index = match position {
            Some(index) => index,
            None => {
                self.config.users.push(CloudConfigUser::management());
                self.config.users.len() - 1
            }
        };

        let keys = &mut self.config.users[index].ssh_authorized_keys;
        let public_key = public_key.trim().to_string();
        if !keys.contains(&public_key) {
            keys.push(public_key);
        }
        self
    }

    /// Add a root-owned file
    pub fn with_file(mut self, path: &str, content: &str, permissions: &str) -> Self {
        self.config.write_files.retain(|file| file.path != path);
        self.config.write_files.push(CloudConfigFile {
            path: path.to_string(),
            content: content.to_string(),
            owner: "root:root".to_string(),
            permissions: permissions.to_string(),
        });
        self
    }

    /// Place the rendered remote peer configuration
    pub fn with_link_config(self, config: &str) -> Self {
        self.with_file(REMOTE_LINK_CONFIG_PATH, config, "0600")
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.config.runcmd.push(command.to_string());
        self
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    /// Render the document with its `#cloud-config` header
    pub fn render(&self) -> Result<String, LinkError> {
        let yaml = serde_yaml::to_string(&self.config)?;
        let body = yaml.strip_prefix("---\n").unwrap_or(&yaml);
        Ok(format!("{}\n{}", CLOUD_CONFIG_HEADER, body))
    }
}
