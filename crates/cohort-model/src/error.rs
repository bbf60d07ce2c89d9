use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse stored predicates: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
