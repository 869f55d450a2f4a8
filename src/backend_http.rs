//! HTTP implementation of the network boundary.
//!
//! Talks to the portal's REST API: a mutation-submission endpoint per
//! queued operation and a raw-bytes audio-chunk upload endpoint. Both
//! share one `reqwest` client with a 30 second timeout.

use std::time::Duration;

use reqwest::Client;

use crate::backend::{AudioUploadBackend, BackendError, MutationAck, MutationRequest, SyncBackend};
use crate::error::{ConsultError, ConsultResult};

/// Portal REST API client.
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a client for the given API base URL (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> ConsultResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConsultError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

/// Map an HTTP response status onto the transient/permanent split:
/// 4xx is a rejection of the mutation itself, everything else transient.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body)
    };

    if status.is_client_error() {
        Err(BackendError::Rejected(message))
    } else {
        Err(BackendError::Network(message))
    }
}

impl SyncBackend for HttpBackend {
    async fn submit(&self, request: &MutationRequest) -> Result<MutationAck, BackendError> {
        let response = self
            .client
            .post(format!("{}/sync/mutations", self.base_url))
            .header("Idempotency-Key", &request.idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let response = check_status(response).await?;
        response
            .json::<MutationAck>()
            .await
            .map_err(|e| BackendError::Network(format!("Failed to parse ack: {}", e)))
    }
}

impl AudioUploadBackend for HttpBackend {
    async fn upload_chunk(
        &self,
        appointment_id: &str,
        chunk_index: u32,
        bytes: &[u8],
        language: Option<&str>,
        timestamp: i64,
    ) -> Result<(), BackendError> {
        let mut url = format!(
            "{}/appointments/{}/audio-chunks?chunk_index={}&timestamp={}",
            self.base_url,
            urlencoding::encode(appointment_id),
            chunk_index,
            timestamp
        );
        if let Some(lang) = language {
            url.push_str(&format!("&language={}", urlencoding::encode(lang)));
        }

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let backend = HttpBackend::new("https://api.example.com/").unwrap();
        assert_eq!(backend.base_url, "https://api.example.com");
    }
}
