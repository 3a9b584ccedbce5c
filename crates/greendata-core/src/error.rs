//! Error types for greendata-core

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Name must not be empty")]
    EmptyName,

    #[error("Consumption must be a non-negative integer, got {0:?}")]
    InvalidConsumption(String),

    #[error("Consumption {value} exceeds the ledger maximum of {max}")]
    ConsumptionOutOfRange { value: u64, max: u64 },

    #[error("Invalid record id: {0}")]
    InvalidRecordId(String),

    #[error("Malformed clear values: {0}")]
    MalformedClearValues(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}
