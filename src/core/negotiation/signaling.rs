//! SDP offer/answer exchange with the signaling endpoint.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use super::credential::Credential;
use crate::core::realtime::REALTIME_VERSION_HEADER;
use crate::errors::{SessionError, SessionResult, USER_MESSAGE_LIMIT, truncate_message};

/// External collaborator accepting an SDP offer and returning the answer.
#[async_trait]
pub trait SignalingClient: Send + Sync {
    async fn exchange(&self, offer_sdp: &str, credential: &Credential) -> SessionResult<String>;
}

/// Signaling endpoint reached over HTTP.
///
/// The offer is posted as `application/sdp` with the ephemeral credential as
/// bearer auth, the protocol version header and the model as query parameter.
pub struct HttpSignalingClient {
    url: String,
    model: String,
    version: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpSignalingClient {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            version: version.into(),
            timeout: Duration::from_secs(15),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Endpoint URL with the model query parameter.
    pub fn endpoint(&self) -> SessionResult<Url> {
        let mut url = Url::parse(&self.url).map_err(|e| SessionError::Signaling {
            status: 0,
            body: format!("invalid signaling URL '{}': {e}", self.url),
        })?;
        url.query_pairs_mut().append_pair("model", &self.model);
        Ok(url)
    }
}

#[async_trait]
impl SignalingClient for HttpSignalingClient {
    async fn exchange(&self, offer_sdp: &str, credential: &Credential) -> SessionResult<String> {
        let endpoint = self.endpoint()?;
        debug!(url = %endpoint, offer_len = offer_sdp.len(), "Posting SDP offer");

        let response = self
            .client
            .post(endpoint)
            .timeout(self.timeout)
            .header("Content-Type", "application/sdp")
            .header("Authorization", format!("Bearer {}", credential.secret))
            .header(REALTIME_VERSION_HEADER, &self.version)
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| SessionError::Signaling {
                status: 0,
                body: truncate_message(&e.to_string(), USER_MESSAGE_LIMIT),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Signaling endpoint rejected offer");
            return Err(SessionError::Signaling {
                status: status.as_u16(),
                body: truncate_message(&body, USER_MESSAGE_LIMIT),
            });
        }
        if body.trim().is_empty() {
            return Err(SessionError::Signaling {
                status: status.as_u16(),
                body: "empty SDP answer".to_string(),
            });
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_appends_model() {
        let client = HttpSignalingClient::new(
            "https://api.example.com/v1/realtime",
            "gpt-realtime",
            "2024-12-17",
        );
        assert_eq!(
            client.endpoint().unwrap().as_str(),
            "https://api.example.com/v1/realtime?model=gpt-realtime"
        );
    }

    #[test]
    fn test_endpoint_invalid_url() {
        let client = HttpSignalingClient::new("not a url", "m", "v");
        assert!(matches!(
            client.endpoint(),
            Err(SessionError::Signaling { status: 0, .. })
        ));
    }
}
