use crate::envelope::TaxiiVersion;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub version: TaxiiVersion,
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub poll: PollDefaults,
}

/// Everything needed to reach a TAXII server
///
/// Only `discovery_url` is required. An empty `username` disables preemptive basic
/// authentication. Proxy host and port fall back to the `<scheme>.proxyHost` and
/// `<scheme>.proxyPort` environment variables when `use_proxy` is set and they are
/// left out.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub discovery_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub use_proxy: bool,
    #[serde(default)]
    pub proxy_host: Option<String>,
    #[serde(default)]
    pub proxy_port: Option<u16>,
    #[serde(default)]
    pub key_store_file: Option<PathBuf>,
    #[serde(default)]
    pub key_store_password: Option<String>,
    #[serde(default)]
    pub trust_store_file: Option<PathBuf>,
    #[serde(default)]
    pub trust_store_password: Option<String>,
    #[serde(default)]
    pub private_key_pem: Option<String>,
    #[serde(default)]
    pub client_certificate_pem_chain: Option<Vec<String>>,
    #[serde(default)]
    pub trusted_pem_certificates: Vec<String>,
    #[serde(default = "default_trust_self_signed")]
    pub trust_self_signed: bool,
}

impl ConnectionSettings {
    /// Settings for `discovery_url` with every optional field at its default
    pub fn new(discovery_url: impl Into<String>) -> Self {
        Self {
            discovery_url: discovery_url.into(),
            username: String::new(),
            password: String::new(),
            use_proxy: false,
            proxy_host: None,
            proxy_port: None,
            key_store_file: None,
            key_store_password: None,
            trust_store_file: None,
            trust_store_password: None,
            private_key_pem: None,
            client_certificate_pem_chain: None,
            trusted_pem_certificates: Vec::new(),
            trust_self_signed: default_trust_self_signed(),
        }
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("discovery_url", &self.discovery_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("use_proxy", &self.use_proxy)
            .field("proxy_host", &self.proxy_host)
            .field("proxy_port", &self.proxy_port)
            .field("key_store_file", &self.key_store_file)
            .field("trust_store_file", &self.trust_store_file)
            .field("private_key_pem", &self.private_key_pem.as_ref().map(|_| "<redacted>"))
            .field(
                "client_certificate_pem_chain",
                &self.client_certificate_pem_chain.as_ref().map(Vec::len),
            )
            .field(
                "trusted_pem_certificates",
                &self.trusted_pem_certificates.len(),
            )
            .field("trust_self_signed", &self.trust_self_signed)
            .finish()
    }
}

fn default_trust_self_signed() -> bool {
    true
}

/// Defaults used by the command line `poll` subcommand
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PollDefaults {
    #[serde(default = "default_poll_collection")]
    pub collection: String,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
}

impl Default for PollDefaults {
    fn default() -> Self {
        Self {
            collection: default_poll_collection(),
            subscription_id: None,
            window_hours: default_window_hours(),
        }
    }
}

fn default_poll_collection() -> String {
    "system.Default".to_string()
}

fn default_window_hours() -> i64 {
    24
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        Self::from_toml(&config_str)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Write the configuration back out as TOML, secrets included
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).context("Failed to serialize config")
    }

    /// Load configuration with default path (taxii.toml)
    pub fn load() -> Result<Self> {
        Self::from_file("taxii.toml")
    }
}
