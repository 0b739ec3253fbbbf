//! Best-effort fan-out of processed events to the realtime broadcast sink.
//!
//! Any 2xx response is success; every other outcome is logged by the caller
//! and ignored. Fan-out failures never fail, retry or dead-letter the
//! message that triggered them.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use event_schema::BroadcastMessage;

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("broadcast sink request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("broadcast sink returned status {0}")]
    Status(u16),
}

/// Sink seam used by the pipeline; tests drive it with an in-memory fake.
#[async_trait]
pub trait FanoutSink: Send + Sync {
    async fn publish(&self, message: &BroadcastMessage) -> Result<(), FanoutError>;
}

/// HTTP client for the broadcast sink.
pub struct BroadcastClient {
    client: reqwest::Client,
    publish_url: String,
}

impl BroadcastClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            publish_url: format!("{}/v1/realtime/publish", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl FanoutSink for BroadcastClient {
    async fn publish(&self, message: &BroadcastMessage) -> Result<(), FanoutError> {
        let response = self
            .client
            .post(&self.publish_url)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FanoutError::Status(status.as_u16()));
        }

        debug!(event_id = %message.event_id, "Broadcast fan-out delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_url_normalization() {
        let client = BroadcastClient::new("http://sink:8085/");
        assert_eq!(client.publish_url, "http://sink:8085/v1/realtime/publish");

        let client = BroadcastClient::new("http://sink:8085");
        assert_eq!(client.publish_url, "http://sink:8085/v1/realtime/publish");
    }
}
