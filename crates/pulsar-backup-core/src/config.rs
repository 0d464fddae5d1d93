//! Configuration structures for Pulsar capture, restore and replay operations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Label identifying the capture set (generated when absent)
    #[serde(default)]
    pub capture_id: Option<String>,

    /// Cluster to capture from
    #[serde(default)]
    pub source: Option<ClusterConfig>,

    /// Cluster to restore and replay into
    #[serde(default)]
    pub target: Option<ClusterConfig>,

    /// Storage configuration for capture sets
    pub storage: crate::storage::StorageBackendConfig,

    /// Capture-specific options
    #[serde(default)]
    pub capture: CaptureOptions,

    /// Inventory restore options
    #[serde(default)]
    pub restore: RestoreOptions,

    /// Message replay options
    #[serde(default)]
    pub replay: ReplayOptions,
}

/// Operation a configuration is validated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Capture,
    Restore,
    Replay,
    Purge,
}

/// Pulsar cluster connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Broker service URL (e.g. `pulsar://localhost:6650`)
    pub service_url: String,

    /// Admin REST URL (e.g. `http://localhost:8080`)
    #[serde(default)]
    pub admin_url: Option<String>,

    /// Admin transport
    #[serde(default)]
    pub admin: AdminTransport,

    /// Static auth token
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Environment variable holding the auth token
    #[serde(default)]
    pub auth_token_env: Option<String>,

    /// Authentication provider used instead of a static token
    #[serde(default)]
    pub auth: Option<ClusterAuth>,

    /// Timeout for admin calls and client connection in milliseconds (default: 30000)
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

/// How admin operations reach the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum AdminTransport {
    /// Pulsar admin REST API
    #[default]
    Rest,
    /// pulsarctl subprocess
    Pulsarctl {
        /// Program to execute (default: `pulsarctl`)
        #[serde(default = "default_pulsarctl_program")]
        program: String,
        /// Arguments placed before every pulsarctl subcommand,
        /// e.g. `["exec", "pulsar", "pulsarctl"]` with program `docker`
        #[serde(default)]
        prefix_args: Vec<String>,
    },
}

/// Authentication providers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterAuth {
    /// OAuth2 client credentials flow
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Config),
}

/// OAuth2 client credentials settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Config {
    /// Issuer base URL; tokens are requested from `<issuer_url>/oauth/token`
    pub issuer_url: String,

    /// JSON key file holding `client_id` and `client_secret`
    pub credentials_file: PathBuf,

    /// Audience requested for the token
    #[serde(default)]
    pub audience: Option<String>,
}

fn default_pulsarctl_program() -> String {
    "pulsarctl".to_string()
}

fn default_operation_timeout_ms() -> u64 {
    30_000
}

impl ClusterConfig {
    /// Create a config for a service URL with default settings
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into(),
            admin_url: None,
            admin: AdminTransport::default(),
            auth_token: None,
            auth_token_env: None,
            auth: None,
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }

    /// Operation timeout as a Duration
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Resolve the auth token, preferring the environment variable
    pub fn resolve_token(&self) -> crate::Result<Option<String>> {
        if let Some(var) = &self.auth_token_env {
            return match std::env::var(var) {
                Ok(token) => Ok(Some(token)),
                Err(_) => Err(crate::Error::Config(format!(
                    "auth_token_env {} is not set",
                    var
                ))),
            };
        }
        Ok(self.auth_token.clone())
    }

    /// Admin URL, falling back to the service URL host on port 8080
    pub fn resolve_admin_url(&self) -> crate::Result<String> {
        if let Some(url) = &self.admin_url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        let parsed = url::Url::parse(&self.service_url)
            .map_err(|e| crate::Error::Config(format!("Invalid service_url: {}", e)))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| crate::Error::Config("service_url has no host".to_string()))?;
        let scheme = if parsed.scheme() == "pulsar+ssl" {
            "https"
        } else {
            "http"
        };
        Ok(format!("{}://{}:8080", scheme, host))
    }

    fn validate(&self, role: &str) -> crate::Result<()> {
        if !(self.service_url.starts_with("pulsar://") || self.service_url.starts_with("pulsar+ssl://"))
        {
            return Err(crate::Error::Config(format!(
                "{}.service_url must start with pulsar:// or pulsar+ssl:// (got {})",
                role, self.service_url
            )));
        }
        if self.operation_timeout_ms == 0 {
            return Err(crate::Error::Config(format!(
                "{}.operation_timeout_ms must be > 0",
                role
            )));
        }
        if let Some(ClusterAuth::OAuth2(oauth)) = &self.auth {
            if self.auth_token.is_some() || self.auth_token_env.is_some() {
                return Err(crate::Error::Config(format!(
                    "{}.auth cannot be combined with auth_token or auth_token_env",
                    role
                )));
            }
            let issuer = url::Url::parse(&oauth.issuer_url).map_err(|e| {
                crate::Error::Config(format!("{}.auth.oauth2.issuer_url is invalid: {}", role, e))
            })?;
            if !matches!(issuer.scheme(), "http" | "https") {
                return Err(crate::Error::Config(format!(
                    "{}.auth.oauth2.issuer_url must be http or https (got {})",
                    role, oauth.issuer_url
                )));
            }
            if oauth.credentials_file.as_os_str().is_empty() {
                return Err(crate::Error::Config(format!(
                    "{}.auth.oauth2.credentials_file must not be empty",
                    role
                )));
            }
        }
        if self.admin == AdminTransport::Rest {
            self.resolve_admin_url()?;
        }
        Ok(())
    }
}

/// Topic selection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicSelection {
    /// Topics to include (glob, or regex when prefixed with `~`)
    #[serde(default)]
    pub include: Vec<String>,

    /// Topics to exclude (glob, or regex when prefixed with `~`)
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Capture-specific options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureOptions {
    /// Maximum messages captured per topic (default: 100000)
    #[serde(default = "default_max_messages_per_topic")]
    pub max_messages_per_topic: u64,

    /// Backlog is considered exhausted after this long without a message (default: 5000)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Maximum topics captured in parallel (default: 4)
    #[serde(default = "default_max_concurrent_topics")]
    pub max_concurrent_topics: usize,

    /// Capture system tenants and namespaces too (default: false)
    #[serde(default)]
    pub include_system_resources: bool,

    /// Capture topics whose local name starts with `__` (default: false)
    #[serde(default)]
    pub include_system_topics: bool,

    /// Tenants treated as system resources
    #[serde(default = "default_system_tenants")]
    pub system_tenants: Vec<String>,

    /// Namespaces treated as system resources
    #[serde(default = "default_system_namespaces")]
    pub system_namespaces: Vec<String>,

    /// Topic selection
    #[serde(default)]
    pub topics: TopicSelection,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_messages_per_topic: default_max_messages_per_topic(),
            read_timeout_ms: default_read_timeout_ms(),
            max_concurrent_topics: default_max_concurrent_topics(),
            include_system_resources: false,
            include_system_topics: false,
            system_tenants: default_system_tenants(),
            system_namespaces: default_system_namespaces(),
            topics: TopicSelection::default(),
        }
    }
}

fn default_max_messages_per_topic() -> u64 {
    100_000
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

fn default_max_concurrent_topics() -> usize {
    4
}

fn default_system_tenants() -> Vec<String> {
    vec!["pulsar".to_string()]
}

fn default_system_namespaces() -> Vec<String> {
    vec!["public/functions".to_string(), "pulsar/system".to_string()]
}

impl CaptureOptions {
    /// Read timeout as a Duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Validate capture options
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_messages_per_topic == 0 {
            return Err(crate::Error::Config(
                "max_messages_per_topic must be > 0".to_string(),
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "read_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.max_concurrent_topics == 0 {
            return Err(crate::Error::Config(
                "max_concurrent_topics must be > 0".to_string(),
            ));
        }
        crate::filter::TopicFilter::new(&self.topics)?;
        Ok(())
    }
}

/// Inventory restore options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreOptions {
    /// Clusters tenants are allowed on (defaults to the target's cluster list)
    #[serde(default)]
    pub allowed_clusters: Vec<String>,
}

/// Message replay options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayOptions {
    /// Cursor name; separate names keep separate progress (default: "default")
    #[serde(default = "default_cursor_name")]
    pub cursor_name: String,

    /// Publish attempts per message before it is marked failed (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds (default: 100)
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the retry delay in milliseconds (default: 10000)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Timeout for a single publish in milliseconds (default: 30000)
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Maximum topics replayed in parallel (default: 4)
    #[serde(default = "default_max_concurrent_topics")]
    pub max_concurrent_topics: usize,

    /// Topic selection
    #[serde(default)]
    pub topics: TopicSelection,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            cursor_name: default_cursor_name(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            publish_timeout_ms: default_publish_timeout_ms(),
            max_concurrent_topics: default_max_concurrent_topics(),
            topics: TopicSelection::default(),
        }
    }
}

fn default_cursor_name() -> String {
    "default".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_publish_timeout_ms() -> u64 {
    30_000
}

impl ReplayOptions {
    /// Retry policy for publishing
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    /// Publish timeout as a Duration
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    /// Validate replay options
    pub fn validate(&self) -> crate::Result<()> {
        if self.cursor_name.is_empty()
            || self
                .cursor_name
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(crate::Error::Config(format!(
                "cursor_name must be non-empty and contain only [A-Za-z0-9_-] (got {:?})",
                self.cursor_name
            )));
        }
        if self.max_attempts == 0 {
            return Err(crate::Error::Config("max_attempts must be > 0".to_string()));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(crate::Error::Config(format!(
                "initial_backoff_ms ({}) > max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        if self.publish_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "publish_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.max_concurrent_topics == 0 {
            return Err(crate::Error::Config(
                "max_concurrent_topics must be > 0".to_string(),
            ));
        }
        crate::filter::TopicFilter::new(&self.topics)?;
        Ok(())
    }
}

impl Config {
    /// Load a YAML configuration file
    pub async fn load(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            crate::Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse a YAML configuration
    pub fn from_yaml(content: &str) -> crate::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Capture id, generating a timestamped label when none is configured
    pub fn capture_id_or_generate(&self) -> String {
        self.capture_id.clone().unwrap_or_else(|| {
            format!("capture-{}", chrono::Utc::now().format("%Y%m%dT%H%M%SZ"))
        })
    }

    /// The source cluster, required for capture
    pub fn source(&self) -> crate::Result<&ClusterConfig> {
        self.source.as_ref().ok_or_else(|| {
            crate::Error::Config("Source configuration is required for capture".to_string())
        })
    }

    /// The target cluster, required for restore and replay
    pub fn target(&self) -> crate::Result<&ClusterConfig> {
        self.target.as_ref().ok_or_else(|| {
            crate::Error::Config(
                "Target configuration is required for restore and replay".to_string(),
            )
        })
    }

    /// Validate the configuration for an operation
    pub fn validate_for(&self, operation: Operation) -> crate::Result<()> {
        if let Some(id) = &self.capture_id {
            validate_capture_id(id)?;
        }

        match operation {
            Operation::Capture => {
                self.source()?.validate("source")?;
                self.capture.validate()?;
            }
            Operation::Restore | Operation::Purge => {
                self.target()?.validate("target")?;
            }
            Operation::Replay => {
                self.target()?.validate("target")?;
                self.replay.validate()?;
            }
        }

        Ok(())
    }
}

/// Capture ids become storage key prefixes
pub fn validate_capture_id(id: &str) -> crate::Result<()> {
    if id.is_empty()
        || id.starts_with('.')
        || id
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(crate::Error::Config(format!(
            "capture_id must contain only [A-Za-z0-9._-] and not start with '.' (got {:?})",
            id
        )));
    }
    Ok(())
}
