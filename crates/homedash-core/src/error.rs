// ── Core error types ──
//
// User-facing errors from homedash-core. Consumers never see raw reqwest
// errors or JSON parse failures; the `From<homedash_api::Error>` impl
// translates transport-layer errors into these variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Session errors ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Session expired -- please log in again")]
    SessionExpired,

    #[error("Not logged in")]
    NotLoggedIn,

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach backend at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code, if the backend answered.
        status: Option<u16>,
    },

    // ── Broker errors ────────────────────────────────────────────────
    #[error("Broker error: {message}")]
    Broker { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<homedash_api::Error> for CoreError {
    fn from(err: homedash_api::Error) -> Self {
        use homedash_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::SessionExpired { .. } | Api::RefreshAbandoned => CoreError::SessionExpired,
            Api::Http { status, body } => CoreError::Api {
                message: format!("HTTP {status}: {body}"),
                status: Some(status),
            },
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            Api::Storage(msg) => CoreError::Internal(format!("Credential storage error: {msg}")),
            Api::BrokerConnect(message) | Api::BrokerRequest(message) => {
                CoreError::Broker { message }
            }
            Api::BrokerClosed => CoreError::Broker {
                message: "connection closed".into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn session_expiry_is_not_an_api_error() {
        let err = CoreError::from(homedash_api::Error::SessionExpired {
            source: Arc::new(homedash_api::Error::Http {
                status: 401,
                body: String::new(),
            }),
        });
        assert!(matches!(err, CoreError::SessionExpired));
    }

    #[test]
    fn http_status_survives_translation() {
        let err = CoreError::from(homedash_api::Error::Http {
            status: 404,
            body: "Not found.".into(),
        });
        assert!(matches!(err, CoreError::Api { status: Some(404), .. }));
        assert_eq!(err.to_string(), "API error: HTTP 404: Not found.");
    }
}
