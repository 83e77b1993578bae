use thiserror::Error;

use crate::codec::RECORD_LEN;

/// Error type shared by the rule model, codec, store and control channels.
#[derive(Error, Debug)]
pub enum MfwError {
    #[error("{0}")]
    Usage(String),

    #[error("Control channel ({path}) cannot be opened: {source}")]
    ChannelOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Write process is incomplete ({written} of {expected} bytes). Please try again.")]
    PartialWrite { written: usize, expected: usize },

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Rule store is full ({0} rules)")]
    StoreFull(usize),

    #[error("Engine rejected request: {0}")]
    Rejected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Policy error: {0}")]
    Policy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MfwError {
    pub fn usage(msg: impl Into<String>) -> Self {
        MfwError::Usage(msg.into())
    }

    pub(crate) fn bad_length(len: usize) -> Self {
        MfwError::MalformedRecord(format!("expected {} bytes, got {}", RECORD_LEN, len))
    }
}

pub type Result<T> = std::result::Result<T, MfwError>;
