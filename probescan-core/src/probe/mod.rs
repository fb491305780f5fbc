//! The per-identifier probe contract and its HTTP implementation.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::ids::Identifier;

pub use http::{HttpProbe, KeyFormat};

/// Structured data found at one identifier.
pub type Payload = serde_json::Value;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("unexpected status {status} for identifier {id}")]
    UnexpectedStatus { id: Identifier, status: u16 },

    #[error("unparseable body for identifier {id}: {message}")]
    InvalidBody { id: Identifier, message: String },

    #[error("invalid request url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("gave up on identifier {id} after {attempts} transient failures")]
    RetriesExhausted { id: Identifier, attempts: u32 },

    #[error("probe cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Looks up one identifier in the external source.
///
/// `Ok(None)` means the source holds nothing there. Transient failures are
/// retried inside the probe; anything else surfaces as an error and ends the
/// calling worker. Implementations should return [`ProbeError::Cancelled`]
/// promptly once `cancel` fires while they wait.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(
        &self,
        id: Identifier,
        cancel: &CancellationToken,
    ) -> Result<Option<Payload>, ProbeError>;
}
