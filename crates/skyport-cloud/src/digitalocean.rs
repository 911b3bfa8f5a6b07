//! DigitalOcean compute provisioner
//!
//! A droplet is created per tunnel, together with an account SSH key holding
//! the tunnel's client key so the provider does not mail out a root
//! password. Both are removed again on destroy.

use crate::config::{DigitalOceanConfig, DROPLET_TAG};
use crate::error::CloudError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use skyport_proto::{ComputeProvisioner, ProviderError, ProvisionedHost, ServicePort};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Droplets listed per page when searching by name
const LIST_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct Droplet {
    pub id: u64,
    pub name: String,
    /// `new` while booting, `active` once networking is populated
    pub status: String,
    #[serde(default)]
    pub networks: Networks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<NetworkV4>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkV4 {
    pub ip_address: Ipv4Addr,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Droplet {
    pub fn public_ipv4(&self) -> Option<Ipv4Addr> {
        self.networks
            .v4
            .iter()
            .find(|n| n.kind == "public")
            .map(|n| n.ip_address)
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Debug, Deserialize)]
struct DropletList {
    droplets: Vec<Droplet>,
}

#[derive(Debug, Deserialize)]
struct AccountKey {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct AccountKeyEnvelope {
    ssh_key: AccountKey,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Debug, Serialize)]
struct CreateDroplet<'a> {
    name: &'a str,
    region: &'a str,
    size: &'a str,
    image: &'a str,
    user_data: &'a str,
    ssh_keys: Vec<u64>,
    tags: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct CreateAccountKey<'a> {
    name: &'a str,
    public_key: &'a str,
}

#[derive(Debug, Serialize)]
struct FloatingIpAction {
    #[serde(rename = "type")]
    kind: &'static str,
    droplet_id: u64,
}

pub struct DigitalOceanProvisioner {
    config: DigitalOceanConfig,
    client: Client,
    /// Account key registered for each droplet, keyed by droplet id
    account_keys: Mutex<HashMap<String, u64>>,
}

impl DigitalOceanProvisioner {
    pub fn new(config: DigitalOceanConfig) -> Result<Self, CloudError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("skyport/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            client,
            account_keys: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_env() -> Result<Self, CloudError> {
        Self::new(DigitalOceanConfig::from_env()?)
    }

    pub fn config(&self) -> &DigitalOceanConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base, path)
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> Result<reqwest::Response, CloudError> {
        let response = request.bearer_auth(&self.config.token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(CloudError::NotFound(context.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(CloudError::Api {
            context: context.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        context: &str,
    ) -> Result<T, CloudError> {
        let response = self.send(request, context).await?;
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| CloudError::UnexpectedResponse(format!("{}: {}", context, e)))
    }

    async fn register_key(&self, name: &str, public_key: &str) -> Result<u64, CloudError> {
        let body = CreateAccountKey { name, public_key };
        let envelope: AccountKeyEnvelope = self
            .send_json(
                self.client.post(self.url("/account/keys")).json(&body),
                "register ssh key",
            )
            .await?;
        debug!(key_id = envelope.ssh_key.id, "Registered account ssh key");
        Ok(envelope.ssh_key.id)
    }

    async fn delete_key(&self, key_id: u64) -> Result<(), CloudError> {
        let url = self.url(&format!("/account/keys/{}", key_id));
        match self.send(self.client.delete(url), "ssh key").await {
            Ok(_) | Err(CloudError::NotFound(_)) => {
                debug!(key_id, "Removed account ssh key");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_droplet(&self, id: u64) -> Result<Droplet, CloudError> {
        let envelope: DropletEnvelope = self
            .send_json(
                self.client.get(self.url(&format!("/droplets/{}", id))),
                "droplet",
            )
            .await?;
        Ok(envelope.droplet)
    }

    /// Poll until the droplet is active and has a public address
    async fn wait_until_active(&self, id: u64) -> Result<Ipv4Addr, CloudError> {
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            let droplet = self.get_droplet(id).await?;
            match (droplet.is_active(), droplet.public_ipv4()) {
                (true, Some(address)) => return Ok(address),
                _ => debug!(id, status = %droplet.status, "Droplet still booting"),
            }
        }
    }

    async fn create_droplet(
        &self,
        name: &str,
        key_id: u64,
        boot_document: &str,
    ) -> Result<u64, CloudError> {
        let body = CreateDroplet {
            name,
            region: &self.config.region,
            size: &self.config.size,
            image: &self.config.image,
            user_data: boot_document,
            ssh_keys: vec![key_id],
            tags: vec![DROPLET_TAG],
        };
        let envelope: DropletEnvelope = self
            .send_json(
                self.client.post(self.url("/droplets")).json(&body),
                "create droplet",
            )
            .await?;
        let id = envelope.droplet.id;
        info!(id, region = %self.config.region, size = %self.config.size, "Droplet created");
        Ok(id)
    }
}

fn droplet_id(id: &str) -> Result<u64, CloudError> {
    id.parse()
        .map_err(|_| CloudError::UnexpectedResponse(format!("'{}' is not a droplet id", id)))
}

#[async_trait]
impl ComputeProvisioner for DigitalOceanProvisioner {
    async fn create(
        &self,
        name: &str,
        client_key: &str,
        services: &[ServicePort],
        boot_document: &str,
    ) -> Result<String, ProviderError> {
        debug!(name, services = services.len(), "Creating droplet");
        let key_id = self.register_key(name, client_key).await?;

        match self.create_droplet(name, key_id, boot_document).await {
            Ok(id) => {
                let id = id.to_string();
                if let Ok(mut keys) = self.account_keys.lock() {
                    keys.insert(id.clone(), key_id);
                }
                Ok(id)
            }
            Err(e) => {
                if let Err(cleanup) = self.delete_key(key_id).await {
                    warn!(key_id, "Failed to remove account ssh key: {}", cleanup);
                }
                Err(e.into())
            }
        }
    }

    /// Poll the droplet until it is active. A droplet that never gets there
    /// is destroyed before the error is returned.
    async fn wait_until_ready(&self, id: &str) -> Result<ProvisionedHost, ProviderError> {
        let numeric = droplet_id(id)?;
        debug!(id, "Waiting for droplet networking");
        match self.wait_until_active(numeric).await {
            Ok(address) => Ok(ProvisionedHost {
                id: id.to_string(),
                address,
            }),
            Err(e) => {
                warn!(id, "Droplet did not become active: {}", e);
                if let Err(cleanup) = self.destroy(id).await {
                    warn!(id, "Failed to destroy droplet: {}", cleanup);
                }
                Err(e.into())
            }
        }
    }

    async fn destroy(&self, id: &str) -> Result<(), ProviderError> {
        let numeric = droplet_id(id)?;
        match self
            .send(
                self.client.delete(self.url(&format!("/droplets/{}", numeric))),
                "droplet",
            )
            .await
        {
            Ok(_) => info!(id, "Droplet destroyed"),
            Err(CloudError::NotFound(_)) => debug!(id, "Droplet already gone"),
            Err(e) => return Err(e.into()),
        }

        let key_id = self
            .account_keys
            .lock()
            .ok()
            .and_then(|mut keys| keys.remove(id));
        if let Some(key_id) = key_id {
            self.delete_key(key_id).await?;
        }
        Ok(())
    }

    async fn attach_floating_address(
        &self,
        address: Ipv4Addr,
        id: &str,
    ) -> Result<(), ProviderError> {
        let action = FloatingIpAction {
            kind: "assign",
            droplet_id: droplet_id(id)?,
        };
        self.send(
            self.client
                .post(self.url(&format!("/floating_ips/{}/actions", address)))
                .json(&action),
            "floating IP",
        )
        .await?;
        info!(address = %address, id, "Floating IP assigned");
        Ok(())
    }

    async fn list_by_name(&self, name: &str) -> Result<Vec<String>, ProviderError> {
        let request = self
            .client
            .get(self.url("/droplets"))
            .query(&[("tag_name", DROPLET_TAG)])
            .query(&[("per_page", LIST_PAGE_SIZE)]);
        let list: DropletList = self.send_json(request, "list droplets").await?;
        Ok(list
            .droplets
            .into_iter()
            .filter(|d| d.name == name)
            .map(|d| d.id.to_string())
            .collect())
    }
}
