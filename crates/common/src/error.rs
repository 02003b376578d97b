use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatehouseError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid flow rate '{input}': {reason}")]
    FlowRate { input: String, reason: String },

    #[error("routing error: {0}")]
    Routing(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type GatehouseResult<T> = Result<T, GatehouseError>;
