//! Short-lived credential acquisition.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use crate::errors::{SessionError, SessionResult, USER_MESSAGE_LIMIT, truncate_message};

/// Ephemeral credential returned by the issuer.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Opaque session identifier
    pub session_id: String,
    /// Bearer secret presented to the signaling endpoint
    pub secret: String,
    pub expires_at: OffsetDateTime,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("session_id", &self.session_id)
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    /// Remaining lifetime at `now`, zero if already expired.
    pub fn remaining(&self, now: OffsetDateTime) -> Duration {
        Duration::try_from(self.expires_at - now).unwrap_or(Duration::ZERO)
    }

    /// Reject credentials expiring within `min_ttl` of `now`.
    pub fn ensure_fresh(&self, min_ttl: Duration, now: OffsetDateTime) -> SessionResult<()> {
        let remaining = self.remaining(now);
        if remaining < min_ttl {
            return Err(SessionError::Credential(format!(
                "credential expires in {}s, need at least {}s",
                remaining.as_secs(),
                min_ttl.as_secs()
            )));
        }
        Ok(())
    }
}

/// External collaborator issuing ephemeral credentials.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self) -> SessionResult<Credential>;
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Debug, Deserialize)]
struct CredentialResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    client_secret: Option<ClientSecret>,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
    expires_at: ExpiresAt,
}

/// Expiry as epoch seconds (integer or fractional) or an ISO-8601 string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresAt {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

impl ExpiresAt {
    fn to_datetime(&self) -> SessionResult<OffsetDateTime> {
        let parsed = match self {
            ExpiresAt::Seconds(secs) => OffsetDateTime::from_unix_timestamp(*secs).ok(),
            ExpiresAt::Fractional(secs) => {
                OffsetDateTime::from_unix_timestamp_nanos((*secs * 1e9) as i128).ok()
            }
            ExpiresAt::Text(text) => match text.trim().parse::<i64>() {
                Ok(secs) => OffsetDateTime::from_unix_timestamp(secs).ok(),
                Err(_) => OffsetDateTime::parse(text.trim(), &Rfc3339).ok(),
            },
        };
        parsed.ok_or_else(|| {
            SessionError::Credential(format!("unrecognised expires_at value {:?}", self))
        })
    }
}

/// Parse an issuer response body into a [`Credential`].
pub fn parse_credential(body: &str) -> SessionResult<Credential> {
    let response: CredentialResponse = serde_json::from_str(body)
        .map_err(|e| SessionError::Credential(format!("malformed issuer response: {e}")))?;

    let session_id = response
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SessionError::Credential("issuer response has no session id".to_string()))?;
    let secret = response.client_secret.ok_or_else(|| {
        SessionError::Credential("issuer response has no client_secret".to_string())
    })?;
    if secret.value.is_empty() {
        return Err(SessionError::Credential(
            "issuer returned an empty secret".to_string(),
        ));
    }

    Ok(Credential {
        session_id,
        expires_at: secret.expires_at.to_datetime()?,
        secret: secret.value,
    })
}

// =============================================================================
// HTTP issuer
// =============================================================================

/// Credential issuer reached over HTTP (POST, no body).
pub struct HttpCredentialIssuer {
    url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpCredentialIssuer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            timeout: Duration::from_secs(15),
            client: reqwest::Client::new(),
        }
    }

    /// Present a bearer key to the issuer
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    async fn issue(&self) -> SessionResult<Credential> {
        debug!(url = %self.url, "Requesting session credential");

        let mut request = self.client.post(&self.url).timeout(self.timeout);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::Credential(format!("issuer request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SessionError::Credential(format!(
                "issuer returned HTTP {}: {}",
                status.as_u16(),
                truncate_message(&body, USER_MESSAGE_LIMIT)
            )));
        }

        parse_credential(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_epoch_seconds() {
        let credential = parse_credential(
            r#"{"id":"sess_1","client_secret":{"value":"ek_abc","expires_at":1893456000}}"#,
        )
        .unwrap();
        assert_eq!(credential.session_id, "sess_1");
        assert_eq!(credential.secret, "ek_abc");
        assert_eq!(credential.expires_at.unix_timestamp(), 1893456000);
    }

    #[test]
    fn test_parse_iso_string() {
        let credential = parse_credential(
            r#"{"id":"sess_1","client_secret":{"value":"ek","expires_at":"2030-01-01T00:00:00Z"}}"#,
        )
        .unwrap();
        assert_eq!(credential.expires_at.unix_timestamp(), 1893456000);
    }

    #[test]
    fn test_parse_numeric_string_and_fraction() {
        let text = parse_credential(
            r#"{"id":"s","client_secret":{"value":"ek","expires_at":"1893456000"}}"#,
        )
        .unwrap();
        assert_eq!(text.expires_at.unix_timestamp(), 1893456000);

        let fraction = parse_credential(
            r#"{"id":"s","client_secret":{"value":"ek","expires_at":1893456000.5}}"#,
        )
        .unwrap();
        assert_eq!(fraction.expires_at.unix_timestamp(), 1893456000);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_credential("not json"),
            Err(SessionError::Credential(_))
        ));
        assert!(matches!(
            parse_credential(r#"{"id":"s"}"#),
            Err(SessionError::Credential(_))
        ));
        assert!(matches!(
            parse_credential(r#"{"client_secret":{"value":"ek","expires_at":1}}"#),
            Err(SessionError::Credential(_))
        ));
        assert!(matches!(
            parse_credential(r#"{"id":"s","client_secret":{"value":"ek","expires_at":"tomorrow"}}"#),
            Err(SessionError::Credential(_))
        ));
    }

    #[test]
    fn test_ensure_fresh() {
        let now = OffsetDateTime::from_unix_timestamp(1_000_000).unwrap();
        let credential = Credential {
            session_id: "s".to_string(),
            secret: "ek".to_string(),
            expires_at: now + time::Duration::seconds(5),
        };
        assert!(credential.ensure_fresh(Duration::from_secs(10), now).is_err());
        assert!(credential.ensure_fresh(Duration::from_secs(5), now).is_ok());

        let expired = Credential {
            expires_at: now - time::Duration::seconds(30),
            ..credential
        };
        assert_eq!(expired.remaining(now), Duration::ZERO);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credential = Credential {
            session_id: "s".to_string(),
            secret: "ek_secret".to_string(),
            expires_at: OffsetDateTime::UNIX_EPOCH,
        };
        assert!(!format!("{:?}", credential).contains("ek_secret"));
    }
}
