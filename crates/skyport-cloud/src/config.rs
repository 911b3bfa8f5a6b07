//! DigitalOcean settings

use crate::error::CloudError;
use std::time::Duration;

pub const TOKEN_VAR: &str = "DIGITALOCEAN_API_TOKEN";
pub const REGION_VAR: &str = "SKYPORT_REGION";
pub const SIZE_VAR: &str = "SKYPORT_SIZE";
pub const IMAGE_VAR: &str = "SKYPORT_IMAGE";

pub const DEFAULT_API_BASE: &str = "https://api.digitalocean.com/v2";
pub const DEFAULT_REGION: &str = "sfo2";
pub const DEFAULT_SIZE: &str = "s-1vcpu-1gb";
pub const DEFAULT_IMAGE: &str = "debian-12-x64";

/// Every droplet skyport creates carries this tag
pub const DROPLET_TAG: &str = "skyport";

#[derive(Clone)]
pub struct DigitalOceanConfig {
    pub token: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub api_base: String,
    /// How often to poll a new droplet until it is active
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl DigitalOceanConfig {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
            region: DEFAULT_REGION.to_string(),
            size: DEFAULT_SIZE.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            poll_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Read the token and optional overrides from the environment
    pub fn from_env() -> Result<Self, CloudError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, CloudError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup(TOKEN_VAR)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CloudError::MissingCredential(TOKEN_VAR.to_string()))?;

        let mut config = Self::new(&token);
        if let Some(region) = lookup(REGION_VAR).filter(|v| !v.is_empty()) {
            config.region = region;
        }
        if let Some(size) = lookup(SIZE_VAR).filter(|v| !v.is_empty()) {
            config.size = size;
        }
        if let Some(image) = lookup(IMAGE_VAR).filter(|v| !v.is_empty()) {
            config.image = image;
        }
        Ok(config)
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl std::fmt::Debug for DigitalOceanConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitalOceanConfig")
            .field("region", &self.region)
            .field("size", &self.size)
            .field("image", &self.image)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_missing_token() {
        let err = DigitalOceanConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, CloudError::MissingCredential(ref v) if v == TOKEN_VAR));

        let err = DigitalOceanConfig::from_lookup(lookup(&[(TOKEN_VAR, "  ")])).unwrap_err();
        assert!(matches!(err, CloudError::MissingCredential(_)));
    }

    #[test]
    fn test_defaults_and_overrides() {
        let config = DigitalOceanConfig::from_lookup(lookup(&[(TOKEN_VAR, "dop_v1_abc")])).unwrap();
        assert_eq!(config.token, "dop_v1_abc");
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.image, DEFAULT_IMAGE);

        let config = DigitalOceanConfig::from_lookup(lookup(&[
            (TOKEN_VAR, "dop_v1_abc"),
            (REGION_VAR, "ams3"),
            (SIZE_VAR, "s-2vcpu-2gb"),
        ]))
        .unwrap();
        assert_eq!(config.region, "ams3");
        assert_eq!(config.size, "s-2vcpu-2gb");
        assert_eq!(config.image, DEFAULT_IMAGE);
    }

    #[test]
    fn test_debug_hides_token() {
        let config = DigitalOceanConfig::new("dop_v1_secret");
        assert!(!format!("{:?}", config).contains("secret"));
    }
}
