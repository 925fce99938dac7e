use crate::error::{GateError, Result};
use crate::hotreload::HotReloadConfig;
use crate::sidecar::SideHeaders;
use axum::http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Service that allowed requests are forwarded to
    pub upstream: UpstreamConfig,
    /// Feature switches
    #[serde(default)]
    pub features: FeatureConfig,
    /// Authentication provider
    pub auth: AuthProviderConfig,
    /// Hot reload of the feature switches
    #[serde(default)]
    pub hot_reload: HotReloadConfig,
    /// Logging, tracing and metrics
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Upstream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the protected service
    pub url: String,
    /// Upstream request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Feature switches consulted before every authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Whether the feature information is available at all
    #[serde(default = "default_true")]
    pub available: bool,
    /// Whether the security feature is enabled
    #[serde(default = "default_true")]
    pub security_enabled: bool,
}

/// Authentication provider selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum AuthProviderConfig {
    /// Bearer tokens listed in the configuration
    Static(StaticAuthConfig),
    /// External authentication service
    Remote(RemoteAuthConfig),
}

/// Static token table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticAuthConfig {
    /// Accepted tokens
    #[serde(default)]
    pub tokens: Vec<StaticTokenConfig>,
    /// Where browsers without credentials are sent
    #[serde(default)]
    pub login_url: Option<String>,
    /// `WWW-Authenticate` challenge attached to unauthenticated responses
    #[serde(default = "default_challenge")]
    pub challenge: String,
    /// Headers added to responses of authenticated requests
    #[serde(default)]
    pub success_headers: BTreeMap<String, String>,
}

/// One accepted token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticTokenConfig {
    /// Bearer token value
    pub token: String,
    /// User the token authenticates
    pub username: String,
    /// Roles granted to the user
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Remote authentication service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAuthConfig {
    /// Verification endpoint
    pub url: String,
    /// Request headers forwarded to the service
    #[serde(default = "default_forward_headers")]
    pub forward_headers: Vec<String>,
    /// Request timeout in seconds
    #[serde(default = "default_auth_timeout")]
    pub timeout_secs: u64,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
    /// OTLP endpoint (e.g., "http://localhost:4317"); tracing export is off when unset
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Expose Prometheus metrics on /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_auth_timeout() -> u64 {
    5
}

fn default_challenge() -> String {
    "Bearer realm=\"authgate\"".to_string()
}

fn default_forward_headers() -> Vec<String> {
    vec!["authorization".to_string(), "cookie".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            available: true,
            security_enabled: true,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            otlp_endpoint: None,
            metrics_enabled: true,
        }
    }
}

impl GateConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.timeout_secs == 0 {
            return Err(GateError::Config(
                "Server timeout must be > 0".to_string(),
            ));
        }

        validate_http_url("upstream.url", &self.upstream.url)?;
        if self.upstream.timeout_secs == 0 {
            return Err(GateError::Config(
                "Upstream timeout must be > 0".to_string(),
            ));
        }

        match &self.auth {
            AuthProviderConfig::Static(config) => config.validate()?,
            AuthProviderConfig::Remote(config) => config.validate()?,
        }

        if let Some(endpoint) = &self.observability.otlp_endpoint {
            validate_http_url("observability.otlp_endpoint", endpoint)?;
        }

        Ok(())
    }

    /// Create a default configuration for testing
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                url: "http://127.0.0.1:3000".to_string(),
                timeout_secs: default_timeout(),
            },
            features: FeatureConfig::default(),
            auth: AuthProviderConfig::Static(StaticAuthConfig {
                tokens: vec![],
                login_url: None,
                challenge: default_challenge(),
                success_headers: BTreeMap::new(),
            }),
            hot_reload: HotReloadConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl StaticAuthConfig {
    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.tokens {
            if entry.token.is_empty() {
                return Err(GateError::Config(format!(
                    "Empty token configured for user: {}",
                    entry.username
                )));
            }
            if entry.username.is_empty() {
                return Err(GateError::Config(
                    "Static token entries need a username".to_string(),
                ));
            }
            if !seen.insert(entry.token.as_str()) {
                return Err(GateError::Config(format!(
                    "Duplicate token configured for user: {}",
                    entry.username
                )));
            }
        }

        if let Some(login_url) = &self.login_url {
            if login_url.is_empty() {
                return Err(GateError::Config("login_url cannot be empty".to_string()));
            }
            HeaderValue::from_str(login_url).map_err(|_| {
                GateError::Config(format!("login_url is not a valid Location: {}", login_url))
            })?;
        }

        HeaderValue::from_str(&self.challenge).map_err(|_| {
            GateError::Config(format!("Invalid challenge header: {}", self.challenge))
        })?;

        SideHeaders::from_pairs(&self.success_headers)
            .map_err(|e| GateError::Config(format!("Invalid success header: {}", e)))?;

        Ok(())
    }
}

impl RemoteAuthConfig {
    fn validate(&self) -> Result<()> {
        validate_http_url("auth.url", &self.url)?;

        for name in &self.forward_headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                GateError::Config(format!("Invalid forwarded header name: {}", name))
            })?;
        }

        if self.timeout_secs == 0 {
            return Err(GateError::Config(
                "Authentication timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| GateError::Config(format!("Invalid URL for {}: {}", field, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(GateError::Config(format!(
            "{} must start with http:// or https://",
            field
        )));
    }

    Ok(())
}
