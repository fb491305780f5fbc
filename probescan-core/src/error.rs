use thiserror::Error;

use crate::probe::ProbeError;
use crate::store::schema::SchemaError;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Broadcast error in table {table}: {message}")]
    Broadcast { table: String, message: String },

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;
