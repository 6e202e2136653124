use std::sync::Arc;

use thiserror::Error;

/// Top-level error type for the `homedash-api` crate.
///
/// Covers every failure mode of the transport layer: login, session
/// expiry, plain HTTP failures, credential storage, and the broker link.
/// `homedash-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The backend rejected a username/password exchange.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The access credential expired and could not be renewed.
    ///
    /// `source` is the original 401 when no refresh was possible, or the
    /// refresh failure itself when the refresh call was attempted. The
    /// session has already been cleared, or replaced, when this is returned.
    #[error("Session expired -- login required ({source})")]
    SessionExpired {
        #[source]
        source: Arc<Error>,
    },

    /// A refresh exchange was discarded: the session changed (logout or a
    /// new login) while it was in flight, or its task was cancelled.
    #[error("Credential refresh abandoned")]
    RefreshAbandoned,

    // ── HTTP ────────────────────────────────────────────────────────
    /// Non-success HTTP status, passed through unchanged.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Credential storage backend failed (keyring unavailable, etc.)
    #[error("Credential storage error: {0}")]
    Storage(String),

    // ── Broker ──────────────────────────────────────────────────────
    /// Broker connection could not be opened.
    #[error("Broker connection failed: {0}")]
    BrokerConnect(String),

    /// Broker refused or failed a subscribe/unsubscribe/publish.
    #[error("Broker request failed: {0}")]
    BrokerRequest(String),

    /// Broker link closed before the request was acknowledged.
    #[error("Broker connection closed")]
    BrokerClosed,
}

impl Error {
    /// Returns `true` for a raw HTTP 401 response.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Returns `true` if this error means the user must log in again.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::SessionExpired { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::BrokerConnect(_) => true,
            Self::Http { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    /// The HTTP status code behind this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Read a failed response into an [`Error::Http`], keeping a short body preview.
    pub(crate) async fn from_response(resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        let body = body.chars().take(200).collect();
        Self::Http { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_expired_keeps_its_cause() {
        let original = Arc::new(Error::Http {
            status: 401,
            body: "token_not_valid".into(),
        });
        let err = Error::SessionExpired {
            source: Arc::clone(&original),
        };

        assert!(err.is_auth_expired());
        assert!(!err.is_unauthorized());
        assert!(err.to_string().contains("token_not_valid"));
        assert!(original.is_unauthorized());
    }

    #[test]
    fn gateway_errors_are_transient() {
        assert!(Error::Http { status: 503, body: String::new() }.is_transient());
        assert!(!Error::Http { status: 404, body: String::new() }.is_transient());
        assert!(Error::Timeout { timeout_secs: 8 }.is_transient());
        assert!(!Error::BrokerClosed.is_transient());
    }
}
