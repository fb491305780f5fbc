use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::{Payload, Probe, ProbeError};
use crate::config::RetryPolicy;
use crate::error::{Result, ScanError};
use crate::ids::Identifier;
use crate::ids::codec::MixedRadixCodec;

/// Placeholder substituted with the rendered key in endpoint templates.
pub const KEY_PLACEHOLDER: &str = "{key}";

/// How an identifier is rendered into the endpoint template.
#[derive(Clone, Debug, Default)]
pub enum KeyFormat {
    #[default]
    Decimal,
    Codec(Arc<MixedRadixCodec>),
}

impl KeyFormat {
    pub fn render(&self, id: Identifier) -> Option<String> {
        match self {
            KeyFormat::Decimal => Some(id.to_string()),
            KeyFormat::Codec(codec) => codec.encode(id),
        }
    }
}

/// What a response status means for the scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseClass {
    Absent,
    Present,
    Fatal,
}

/// 404 and every 5xx mean "nothing here"; 200 carries a payload; anything
/// else is unexpected.
pub fn classify(status: StatusCode) -> ResponseClass {
    if status == StatusCode::NOT_FOUND || status.is_server_error() {
        ResponseClass::Absent
    } else if status == StatusCode::OK {
        ResponseClass::Present
    } else {
        ResponseClass::Fatal
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

/// Probe issuing one GET per identifier against a templated endpoint.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: Client,
    endpoint: String,
    key: KeyFormat,
    retry: RetryPolicy,
}

impl HttpProbe {
    pub fn new(
        endpoint: impl Into<String>,
        key: KeyFormat,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("probescan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ProbeError::from)?;
        Self::with_client(client, endpoint, key, retry)
    }

    pub fn with_client(
        client: Client,
        endpoint: impl Into<String>,
        key: KeyFormat,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        if !endpoint.contains(KEY_PLACEHOLDER) {
            return Err(ScanError::InvalidConfig(format!(
                "endpoint template {endpoint} has no {KEY_PLACEHOLDER} placeholder"
            )));
        }
        Ok(Self {
            client,
            endpoint,
            key,
            retry,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Resolve the request URL, or `None` when the identifier has no key.
    pub fn url_for(
        &self,
        id: Identifier,
    ) -> std::result::Result<Option<Url>, ProbeError> {
        let Some(key) = self.key.render(id) else {
            return Ok(None);
        };
        let raw = self.endpoint.replace(KEY_PLACEHOLDER, &key);
        Url::parse(&raw)
            .map(Some)
            .map_err(|source| ProbeError::InvalidUrl { url: raw, source })
    }

    async fn send_with_retry(
        &self,
        id: Identifier,
        url: &Url,
        cancel: &CancellationToken,
    ) -> std::result::Result<reqwest::Response, ProbeError> {
        let mut failures: u32 = 0;
        loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
                result = self.client.get(url.clone()).send() => result,
            };

            match attempt {
                Ok(response) => return Ok(response),
                Err(err) if is_transient(&err) => {
                    failures = failures.saturating_add(1);
                    if !self.retry.allows_retry(failures) {
                        return Err(ProbeError::RetriesExhausted {
                            id,
                            attempts: failures,
                        });
                    }
                    if failures == 1 {
                        warn!(id, error = %err, "transient probe failure, retrying");
                    } else {
                        debug!(id, attempt = failures, error = %err, "probe retry failed");
                    }

                    let delay = self.retry.delay_for(failures);
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(
        &self,
        id: Identifier,
        cancel: &CancellationToken,
    ) -> std::result::Result<Option<Payload>, ProbeError> {
        let Some(url) = self.url_for(id)? else {
            debug!(id, "identifier has no key; treating as absent");
            return Ok(None);
        };

        let response = self.send_with_retry(id, &url, cancel).await?;
        let status = response.status();

        match classify(status) {
            ResponseClass::Absent => {
                debug!(id, status = status.as_u16(), "nothing at identifier");
                Ok(None)
            }
            ResponseClass::Fatal => Err(ProbeError::UnexpectedStatus {
                id,
                status: status.as_u16(),
            }),
            ResponseClass::Present => {
                let body = tokio::select! {
                    _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
                    body = response.bytes() => body?,
                };
                serde_json::from_slice(&body).map(Some).map_err(|err| {
                    ProbeError::InvalidBody {
                        id,
                        message: err.to_string(),
                    }
                })
            }
        }
    }
}
