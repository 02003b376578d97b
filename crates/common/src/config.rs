use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::GatehouseError;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub certificates: Vec<CertificateConfig>,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: Vec<ListenConfig>,
    #[serde(default)]
    pub admin: AdminConfig,
}

/// One network endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    pub addr: String,
    #[serde(default)]
    pub tls: bool,
    /// Hostname patterns this endpoint serves certificates for. `None` means
    /// every configured certificate.
    #[serde(default)]
    pub server_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_admin_listen")]
    pub listen: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_admin_listen(),
        }
    }
}

/// A certificate/key pair and the hostname patterns it is offered for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateConfig {
    pub names: Vec<String>,
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// A virtual host: hostname patterns plus the applications mounted on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub names: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub path: String,
    pub app: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: ApplicationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ApplicationKind {
    /// Fixed response body.
    Text {
        body: String,
        #[serde(default = "default_text_status")]
        status: u16,
        #[serde(default = "default_content_type")]
        content_type: String,
        /// Decline requests that leave an unconsumed path remainder.
        #[serde(default)]
        exact_only: bool,
    },
    /// Redirect to `target` with the unconsumed remainder appended.
    Redirect {
        target: String,
        #[serde(default = "default_redirect_status")]
        status: u16,
    },
    /// Describe the routing match back to the client as JSON.
    Echo,
}

/// Limits for connections, requests and outbound bytes. Absent buckets are
/// unlimited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub connections: Option<BucketConfig>,
    #[serde(default)]
    pub requests: Option<BucketConfig>,
    #[serde(default)]
    pub data: Option<BucketConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub flow_rate: FlowRate,
    pub max_burst_size: f64,
    #[serde(default)]
    pub max_queue_size: Option<usize>,
    #[serde(default)]
    pub max_queue_grant_size: Option<f64>,
    /// Defaults to `max_burst_size`.
    #[serde(default)]
    pub initial_volume: Option<f64>,
    #[serde(default)]
    pub partial_tokens: bool,
}

impl BucketConfig {
    /// Convenience constructor for a bucket that starts full.
    pub fn new(flow_rate: FlowRate, max_burst_size: f64) -> Self {
        Self {
            flow_rate,
            max_burst_size,
            max_queue_size: None,
            max_queue_grant_size: None,
            initial_volume: None,
            partial_tokens: false,
        }
    }
}

/// A sustained rate written as `<amount>/<unit>`, e.g. `10/sec` or `1.5/min`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FlowRate {
    text: String,
    per_second: f64,
}

impl FlowRate {
    /// A rate of `per_second` units per second.
    pub fn per_second(per_second: f64) -> Result<Self, GatehouseError> {
        format!("{}/sec", per_second).parse()
    }

    pub fn as_per_second(&self) -> f64 {
        self.per_second
    }
}

impl FromStr for FlowRate {
    type Err = GatehouseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| GatehouseError::FlowRate {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (amount, unit) = input
            .split_once('/')
            .ok_or_else(|| invalid("expected '<amount>/<unit>'"))?;

        let amount: f64 = amount
            .trim()
            .parse()
            .map_err(|_| invalid("amount is not a number"))?;

        let unit_secs = match unit.trim().to_ascii_lowercase().as_str() {
            "ms" | "msec" | "millisecond" => 0.001,
            "s" | "sec" | "second" => 1.0,
            "m" | "min" | "minute" => 60.0,
            "h" | "hr" | "hour" => 3_600.0,
            "d" | "day" => 86_400.0,
            _ => return Err(invalid("unknown time unit")),
        };

        let per_second = amount / unit_secs;
        if !per_second.is_finite() || per_second <= 0.0 {
            return Err(invalid("rate must be finite and greater than zero"));
        }

        Ok(Self {
            text: input.trim().to_string(),
            per_second,
        })
    }
}

impl TryFrom<String> for FlowRate {
    type Error = GatehouseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FlowRate> for String {
    fn from(rate: FlowRate) -> Self {
        rate.text
    }
}

impl fmt::Display for FlowRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// Default value helpers
fn default_admin_listen() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_true() -> bool {
    true
}
fn default_text_status() -> u16 {
    200
}
fn default_redirect_status() -> u16 {
    308
}
fn default_content_type() -> String {
    "text/plain; charset=utf-8".to_string()
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        tracing::debug!(
            listeners = config.server.listen.len(),
            hosts = config.hosts.len(),
            applications = config.applications.len(),
            "configuration parsed"
        );
        Ok(config)
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.listen.is_empty() {
            anyhow::bail!("server.listen must have at least one address");
        }

        let has_tls_listener = self.server.listen.iter().any(|l| l.tls);
        if has_tls_listener && self.certificates.is_empty() {
            anyhow::bail!("a TLS listener is configured but no certificates are");
        }

        for cert in &self.certificates {
            if cert.names.is_empty() {
                anyhow::bail!("certificate {} has no names", cert.cert.display());
            }
        }

        let mut app_names = std::collections::HashSet::new();
        for app in &self.applications {
            if !app_names.insert(app.name.as_str()) {
                anyhow::bail!("application '{}' is defined more than once", app.name);
            }
        }

        for host in &self.hosts {
            if host.names.is_empty() {
                anyhow::bail!("host entry has no names");
            }
            for mount in &host.mounts {
                if !app_names.contains(mount.app.as_str()) {
                    anyhow::bail!(
                        "mount '{}' references unknown application '{}' (hosts={:?})",
                        mount.path,
                        mount.app,
                        host.names
                    );
                }
            }
        }

        let buckets = [
            ("connections", &self.rate_limit.connections),
            ("requests", &self.rate_limit.requests),
            ("data", &self.rate_limit.data),
        ];
        for (name, bucket) in buckets {
            if let Some(bucket) = bucket {
                if !(bucket.max_burst_size.is_finite() && bucket.max_burst_size > 0.0) {
                    anyhow::bail!("rate_limit.{name}.max_burst_size must be greater than zero");
                }
            }
        }

        // Outbound writes ask for whole bytes in one step unless partial
        // tokens are enabled.
        if let Some(data) = &self.rate_limit.data {
            if !data.partial_tokens && data.max_burst_size < 1.0 {
                anyhow::bail!(
                    "rate_limit.data.max_burst_size must be at least 1 unless partial_tokens is set"
                );
            }
        }

        Ok(())
    }
}
