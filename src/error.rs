use thiserror::Error;

/// Failure talking to the remote spreadsheet store
///
/// Produced by every [`crate::sheets::SheetStore`] implementation. The
/// variants are coarse on purpose: callers only need to tell transient
/// failures (worth retrying) from everything else.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport-level failure from the HTTP client
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The per-call deadline elapsed
    #[error("request timed out")]
    Timeout,

    /// The API answered with a non-success status
    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Credentials could not be turned into an access token
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The response body did not have the expected shape
    #[error("unexpected response: {0}")]
    Decode(String),

    /// A sheet or range the request refers to does not exist
    #[error("{0}")]
    Sheet(String),
}

impl StoreError {
    /// Whether retrying the same request may succeed
    ///
    /// Timeouts, connection failures, throttling (429) and server-side
    /// errors (5xx) are transient. Everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout => true,
            StoreError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            StoreError::Api { status, .. } => *status == 429 || *status >= 500,
            StoreError::Auth(_) | StoreError::Decode(_) | StoreError::Sheet(_) => false,
        }
    }
}

/// Top-level error of the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Missing or malformed request field
    #[error("{0}")]
    Validation(String),

    /// An employee or a day is absent from the sheet's expected bands
    #[error("{what} '{value}' not found. Available: [{}]", available.join(", "))]
    NotFound {
        what: &'static str,
        value: String,
        available: Vec<String>,
    },

    /// A remote call failed; `context` names the step that was running
    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },

    /// Startup configuration is unusable
    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        BridgeError::Store {
            context: context.into(),
            source,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, BridgeError::Validation(_))
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_lists_alternatives() {
        let err = BridgeError::NotFound {
            what: "full name",
            value: "Петров".to_string(),
            available: vec!["Иванов".to_string(), "Бурлаков".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "full name 'Петров' not found. Available: [Иванов, Бурлаков]"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(StoreError::Timeout.is_transient());
        assert!(
            StoreError::Api {
                status: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(
            StoreError::Api {
                status: 429,
                message: "quota".into()
            }
            .is_transient()
        );
        assert!(
            !StoreError::Api {
                status: 400,
                message: "bad range".into()
            }
            .is_transient()
        );
        assert!(!StoreError::Auth("expired".into()).is_transient());
    }

    #[test]
    fn store_error_keeps_context() {
        let err = BridgeError::store("failed to update sheet", StoreError::Timeout);
        assert_eq!(err.to_string(), "failed to update sheet: request timed out");
        assert!(!err.is_validation());
    }
}
