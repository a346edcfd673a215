use crate::protocol::Endpoint;
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),
    #[error("Service answered with HTTP status {0}")]
    Status(u16),
    #[error("Service unreachable: {0}")]
    Unavailable(String),
}

/// Delivers request payloads to the positioning service.
///
/// One call is one round trip; implementations do not retry.
pub trait Transport: Send + Sync + 'static {
    fn post(
        &self,
        endpoint: Endpoint,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

/// HTTPS transport to the public service.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("vps-anchor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Transport for HttpTransport {
    async fn post(&self, endpoint: Endpoint, payload: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        let url = format!("{}{}", self.base_url, endpoint.path());
        tracing::trace!(%url, bytes = payload.len(), "Posting request");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}
