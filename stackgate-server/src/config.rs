//! Server configuration.
//!
//! Loads configuration from a TOML file. Settings that point at the
//! environment (network, URLs, API key, asset override, bypass header,
//! database path) may reference variables with `$VAR` or `${VAR}` syntax.
//! Seeded listings are taken verbatim.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8080
//! network = "stacks:2147483648"
//! public_base_url = "https://shop.example"
//!
//! [facilitator]
//! url = "https://facilitator.stacksx402.com"
//! timeout_secs = 30
//! api_key = "$FACILITATOR_API_KEY"
//!
//! [payment]
//! max_timeout_seconds = 300
//!
//! [bypass]
//! opt_in_header = "x-marketplace-bypass"
//!
//! [storage]
//! backend = "sqlite"
//! path = "stackgate.db"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG`: path to the configuration file (default: `config.toml`)
//! - `HOST`, `PORT`: override the bind address
//! - `NETWORK`: override the CAIP-2 network
//! - `FACILITATOR_URL`: override the facilitator base URL
//! - `DATABASE_PATH`: override the SQLite database path

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use stackgate::requirements::{DEFAULT_MAX_TIMEOUT_SECONDS, RequirementBuilder, RequirementError};
use stackgate::store::Listing;
use stackgate_http::constants::DEFAULT_FACILITATOR_URL;
use stackgate_http::server::{BypassPolicy, FacilitatorClient, FacilitatorClientError};
use url::Url;

/// Errors raised while loading or applying configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration is not valid TOML for [`ServerConfig`].
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// An environment override could not be parsed.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidOverride {
        /// Variable name.
        var: &'static str,
        /// Rejected value.
        value: String,
    },
    /// The payment settings are invalid.
    #[error(transparent)]
    Requirements(#[from] RequirementError),
    /// The facilitator settings are invalid.
    #[error(transparent)]
    Facilitator(#[from] FacilitatorClientError),
    /// `public_base_url` is not an absolute URL.
    #[error("Invalid public_base_url {value:?}: {source}")]
    InvalidBaseUrl {
        /// Rejected value.
        value: String,
        /// Underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// The facilitator API key cannot be sent as a header.
    #[error("Facilitator API key contains characters not allowed in a header")]
    InvalidApiKey,
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `8080`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// CAIP-2 network payments settle on (default: Stacks testnet).
    #[serde(default = "default_network")]
    pub network: String,

    /// Public origin used in challenge resource URLs. See [`ServerConfig::base_url`].
    #[serde(default)]
    pub public_base_url: Option<String>,

    /// Settlement facilitator.
    #[serde(default)]
    pub facilitator: FacilitatorSettings,

    /// Terms offered to buyers.
    #[serde(default)]
    pub payment: PaymentSettings,

    /// Seller and returning-buyer bypass.
    #[serde(default)]
    pub bypass: BypassSettings,

    /// Listing and purchase storage.
    #[serde(default)]
    pub storage: StorageSettings,

    /// Name and description advertised for discovery.
    #[serde(default)]
    pub service: ServiceSettings,

    /// Listings upserted into the store at startup.
    #[serde(default)]
    pub listings: Vec<Listing>,
}

/// Facilitator connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilitatorSettings {
    /// Base URL of the facilitator.
    #[serde(default = "default_facilitator_url")]
    pub url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_facilitator_timeout")]
    pub timeout_secs: u64,
    /// Bearer token sent with every settlement request.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for FacilitatorSettings {
    fn default() -> Self {
        Self {
            url: default_facilitator_url(),
            timeout_secs: default_facilitator_timeout(),
            api_key: None,
        }
    }
}

/// Payment terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    /// Validity window offered to buyers, in seconds.
    #[serde(default = "default_max_timeout")]
    pub max_timeout_seconds: u64,
    /// Replaces the built-in sBTC token contract.
    #[serde(default)]
    pub sbtc_asset: Option<String>,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            max_timeout_seconds: default_max_timeout(),
            sbtc_asset: None,
        }
    }
}

/// Bypass settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BypassSettings {
    /// When set, bypasses apply only to requests sending this header with `allow`.
    #[serde(default)]
    pub opt_in_header: Option<String>,
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite database file.
    #[default]
    Sqlite,
    /// Process memory; purchases are lost on restart.
    Memory,
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Backend kind.
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database file for the SQLite backend.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_database_path(),
        }
    }
}

/// Discovery document metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Service name.
    #[serde(default)]
    pub name: Option<String>,
    /// Service description.
    #[serde(default)]
    pub description: Option<String>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    8080
}

fn default_network() -> String {
    "stacks:2147483648".to_owned()
}

fn default_facilitator_url() -> String {
    DEFAULT_FACILITATOR_URL.to_owned()
}

const fn default_facilitator_timeout() -> u64 {
    30
}

const fn default_max_timeout() -> u64 {
    DEFAULT_MAX_TIMEOUT_SECONDS
}

fn default_database_path() -> PathBuf {
    PathBuf::from("stackgate.db")
}

impl ServerConfig {
    /// Loads configuration from `path`.
    ///
    /// A missing file yields the defaults. `$VAR` / `${VAR}` references in
    /// the environment-facing settings are expanded from the process
    /// environment (see [`ServerConfig::expand_env`]), then the
    /// `HOST`, `PORT`, `NETWORK`, `FACILITATOR_URL` and `DATABASE_PATH`
    /// variables override the file values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or an
    /// override is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?
        } else {
            String::new()
        };
        let lookup = |name: &str| std::env::var(name).ok();
        let mut config = Self::from_toml(&content)?;
        config.expand_env(lookup);
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    /// Parses TOML without touching the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on invalid TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Expands `$VAR` / `${VAR}` references resolved through `lookup`.
    ///
    /// Only settings that point at the deployment are expanded. Listing
    /// titles and content are left as written.
    pub fn expand_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let expand = |value: &mut String| *value = expand_vars(value, &lookup);
        expand(&mut self.network);
        expand(&mut self.facilitator.url);
        for value in [
            &mut self.public_base_url,
            &mut self.facilitator.api_key,
            &mut self.payment.sbtc_asset,
            &mut self.bypass.opt_in_header,
        ]
        .into_iter()
        .flatten()
        {
            expand(value);
        }
        let path = expand_vars(&self.storage.path.to_string_lossy(), &lookup);
        self.storage.path = PathBuf::from(path);
    }

    /// Applies variable overrides resolved through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] for an unparsable `HOST` or `PORT`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host.parse().map_err(|_| ConfigError::InvalidOverride {
                var: "HOST",
                value: host.clone(),
            })?;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port.parse().map_err(|_| ConfigError::InvalidOverride {
                var: "PORT",
                value: port.clone(),
            })?;
        }
        if let Some(network) = lookup("NETWORK") {
            self.network = network;
        }
        if let Some(url) = lookup("FACILITATOR_URL") {
            self.facilitator.url = url;
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        Ok(())
    }

    /// The parsed public base URL, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] if the value is not an absolute URL.
    pub fn base_url(&self) -> Result<Option<Url>, ConfigError> {
        let Some(value) = self.public_base_url.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if value.is_empty() {
            return Ok(None);
        }
        Url::parse(value)
            .map(Some)
            .map_err(|source| ConfigError::InvalidBaseUrl {
                value: value.to_owned(),
                source,
            })
    }

    /// Builds the requirement builder for the configured network and terms.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Requirements`] if the network is not a Stacks network.
    pub fn requirement_builder(&self) -> Result<RequirementBuilder, ConfigError> {
        let mut builder = RequirementBuilder::new(&self.network)?
            .with_max_timeout_seconds(self.payment.max_timeout_seconds);
        if let Some(asset) = &self.payment.sbtc_asset {
            builder = builder.with_sbtc_asset(asset.clone());
        }
        Ok(builder)
    }

    /// Builds the facilitator client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an invalid URL or API key.
    pub fn facilitator_client(&self) -> Result<FacilitatorClient, ConfigError> {
        let mut client = FacilitatorClient::try_from(self.facilitator.url.as_str())?
            .with_timeout(Duration::from_secs(self.facilitator.timeout_secs));
        if let Some(key) = self.facilitator.api_key.as_deref().map(str::trim) {
            if !key.is_empty() && !key.starts_with('$') {
                let value = HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|_| ConfigError::InvalidApiKey)?;
                let mut headers = HeaderMap::new();
                headers.insert(AUTHORIZATION, value);
                client = client.with_headers(headers);
            }
        }
        Ok(client)
    }

    /// The bypass policy the gate runs with.
    #[must_use]
    pub fn bypass_policy(&self) -> BypassPolicy {
        match self.bypass.opt_in_header.as_deref().map(str::trim) {
            Some(header) if !header.is_empty() => BypassPolicy::OptIn {
                header: header.to_ascii_lowercase(),
            },
            _ => BypassPolicy::Always,
        }
    }
}

/// Expands `$VAR` and `${VAR}` patterns using `lookup`.
///
/// Unresolved variables are left as-is.
fn expand_vars<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }

        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if braced {
                if c == '}' {
                    chars.next();
                    break;
                }
            } else if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            name.push(c);
            chars.next();
        }

        match lookup(&name).filter(|_| !name.is_empty()) {
            Some(value) => result.push_str(&value),
            None => {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&name);
                if braced && !name.is_empty() {
                    result.push('}');
                }
            }
        }
    }

    result
}
