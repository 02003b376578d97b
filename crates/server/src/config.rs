use anyhow::Result;
use gatehouse_common::AppConfig;
use std::path::PathBuf;
use tracing::{info, warn};

/// Resolved configuration with the source path for reloading.
pub struct GatehouseConfig {
    pub config: AppConfig,
    pub config_path: PathBuf,
}

impl GatehouseConfig {
    pub fn load(path: &str) -> Result<Self> {
        info!(path = path, "loading configuration");
        let config = AppConfig::load(path)?;
        Ok(Self {
            config,
            config_path: PathBuf::from(path),
        })
    }

    /// Read the file again. The result is validated but not applied;
    /// `self` keeps describing the configuration the server started with.
    pub fn reload(&self) -> Result<AppConfig> {
        let path_str = self.config_path.to_string_lossy().to_string();
        info!(path = %path_str, "reloading configuration");
        let config = AppConfig::load(&path_str)?;

        let addrs = |c: &AppConfig| {
            c.server
                .listen
                .iter()
                .map(|l| (l.addr.clone(), l.tls))
                .collect::<Vec<_>>()
        };
        if addrs(&config) != addrs(&self.config) {
            warn!("listener changes take effect only after a restart");
        }
        if config.rate_limit.connections != self.config.rate_limit.connections
            || config.rate_limit.requests != self.config.rate_limit.requests
            || config.rate_limit.data != self.config.rate_limit.data
        {
            warn!("rate limit changes take effect only after a restart");
        }

        Ok(config)
    }
}
