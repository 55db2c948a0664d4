use reqwest::Url;
use std::time::Duration;

use crate::auth::Credentials;
use crate::error::{BsnError, Result};

pub const DEFAULT_API_URL: &str = "https://api.bsn.cloud/2022/06/REST";
pub const DEFAULT_AUTH_URL: &str =
    "https://auth.bsn.cloud/realms/bsncloud/protocol/openid-connect/token";

const MAX_RETRY_COUNT: u32 = 10;

/// Immutable client settings
///
/// Build one with [`Config::builder`] (explicit options only) or
/// [`Config::from_env`]; explicit builder options always win over the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials
    pub credentials: Credentials,
    pub default_network: Option<String>,

    // Endpoints
    pub api_base_url: Url,
    pub auth_url: Url,

    // HTTP client
    pub http_request_timeout: Duration,
    pub http_connect_timeout: Duration,
    pub http_max_connections: usize,
    pub retry_count: u32,
    pub retry_base_delay: Duration,

    // Token lifecycle
    pub token_refresh_margin: Duration,

    // Debug
    pub debug_mode: DebugMode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DebugMode {
    #[default]
    Off,
    Errors,
    All,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from `.env` and the process environment
    pub fn from_env() -> Result<Self> {
        ConfigBuilder::from_env()?.build()
    }
}

/// Builder for [`Config`]
#[derive(Clone, Default)]
pub struct ConfigBuilder {
    client_id: Option<String>,
    client_secret: Option<String>,
    default_network: Option<String>,
    api_base_url: Option<String>,
    auth_url: Option<String>,
    http_request_timeout: Option<Duration>,
    http_connect_timeout: Option<Duration>,
    http_max_connections: Option<usize>,
    retry_count: Option<u32>,
    retry_base_delay: Option<Duration>,
    token_refresh_margin: Option<Duration>,
    debug_mode: Option<DebugMode>,
}

impl ConfigBuilder {
    /// Seed a builder from `.env` and the process environment
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Seed a builder from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            client_id: get("BS_CLIENT_ID"),
            client_secret: get("BS_SECRET"),
            default_network: get("BS_NETWORK"),
            api_base_url: get("BS_API_URL"),
            auth_url: get("BS_AUTH_URL"),
            http_request_timeout: parse_var(&get, "BS_TIMEOUT")?.map(Duration::from_secs),
            http_connect_timeout: parse_var(&get, "BS_CONNECT_TIMEOUT")?
                .map(Duration::from_secs),
            http_max_connections: parse_var(&get, "BS_MAX_CONNECTIONS")?,
            retry_count: parse_var(&get, "BS_RETRY_COUNT")?,
            retry_base_delay: parse_var(&get, "BS_RETRY_BACKOFF_MS")?
                .map(Duration::from_millis),
            token_refresh_margin: parse_var(&get, "BS_TOKEN_REFRESH_MARGIN")?
                .map(Duration::from_secs),
            debug_mode: get("BS_DEBUG").map(|s| parse_debug_mode(&s)),
        })
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn default_network(mut self, name: impl Into<String>) -> Self {
        self.default_network = Some(name.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = Some(url.into());
        self
    }

    /// Per-attempt timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.http_request_timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.http_connect_timeout = Some(timeout);
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.http_max_connections = Some(max);
        self
    }

    /// Additional attempts after the first one
    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn retry_backoff(mut self, base: Duration) -> Self {
        self.retry_base_delay = Some(base);
        self
    }

    pub fn token_refresh_margin(mut self, margin: Duration) -> Self {
        self.token_refresh_margin = Some(margin);
        self
    }

    pub fn debug_mode(mut self, mode: DebugMode) -> Self {
        self.debug_mode = Some(mode);
        self
    }

    /// Validate and freeze the configuration
    pub fn build(self) -> Result<Config> {
        let credentials = Credentials::new(
            self.client_id.unwrap_or_default(),
            self.client_secret.unwrap_or_default(),
        )?;

        let api_base_url = parse_url(
            "API base URL",
            self.api_base_url.as_deref().unwrap_or(DEFAULT_API_URL),
        )?;
        let auth_url = parse_url(
            "auth URL",
            self.auth_url.as_deref().unwrap_or(DEFAULT_AUTH_URL),
        )?;

        let http_request_timeout = self.http_request_timeout.unwrap_or(Duration::from_secs(30));
        if http_request_timeout.is_zero() {
            return Err(BsnError::Configuration(
                "timeout must be greater than zero".to_string(),
            ));
        }

        let http_connect_timeout = self.http_connect_timeout.unwrap_or(Duration::from_secs(10));
        if http_connect_timeout.is_zero() {
            return Err(BsnError::Configuration(
                "connect timeout must be greater than zero".to_string(),
            ));
        }

        let retry_count = self.retry_count.unwrap_or(3);
        if retry_count > MAX_RETRY_COUNT {
            return Err(BsnError::Configuration(format!(
                "retry count {} exceeds the maximum of {}",
                retry_count, MAX_RETRY_COUNT
            )));
        }

        let default_network = self
            .default_network
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Ok(Config {
            credentials,
            default_network,
            api_base_url,
            auth_url,
            http_request_timeout,
            http_connect_timeout,
            http_max_connections: self.http_max_connections.unwrap_or(20),
            retry_count,
            retry_base_delay: self.retry_base_delay.unwrap_or(Duration::from_millis(1000)),
            token_refresh_margin: self.token_refresh_margin.unwrap_or(Duration::from_secs(60)),
            debug_mode: self.debug_mode.unwrap_or_default(),
        })
    }
}

fn parse_var<T, F>(get: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            BsnError::Configuration(format!("{} has an invalid value: {:?}", key, raw))
        }),
    }
}

fn parse_url(what: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| BsnError::Configuration(format!("invalid {} {:?}: {}", what, raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(BsnError::Configuration(format!(
            "{} must use http or https: {}",
            what, raw
        )));
    }

    Ok(url)
}

/// Parse debug mode from string
fn parse_debug_mode(s: &str) -> DebugMode {
    match s.trim().to_lowercase().as_str() {
        "errors" => DebugMode::Errors,
        "all" | "true" | "1" | "on" => DebugMode::All,
        _ => DebugMode::Off,
    }
}
