use reqwest::StatusCode;
use thiserror::Error;

/// Longest response body kept in an error, in bytes
const BODY_SUMMARY_LEN: usize = 200;

/// A failed request against one provider endpoint (`venues`, `blobs/<key>`, ...).
///
/// Authentication failures are not singled out: the cache has no way to
/// refresh a token, so a 401 is as final as any other rejection.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{endpoint}: not found")]
    NotFound { endpoint: String },

    #[error("{endpoint}: rejected with status {status}: {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{endpoint}: still rate limited after {retries} retries")]
    RateLimited { endpoint: String, retries: u32 },

    #[error("{endpoint}: server error {status}: {body}")]
    Unavailable {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{endpoint}: request failed")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint}: unexpected response: {reason}")]
    Malformed { endpoint: String, reason: String },
}

impl ProviderError {
    /// Classify a non-success, non-429 response.
    pub fn from_response(endpoint: &str, status: StatusCode, body: &str) -> Self {
        let endpoint = endpoint.to_string();
        let body = summarize_body(body);
        match status.as_u16() {
            404 => ProviderError::NotFound { endpoint },
            code @ 500..=599 => ProviderError::Unavailable {
                endpoint,
                status: code,
                body,
            },
            code => ProviderError::Rejected {
                endpoint,
                status: code,
                body,
            },
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            ProviderError::NotFound { endpoint }
            | ProviderError::Rejected { endpoint, .. }
            | ProviderError::RateLimited { endpoint, .. }
            | ProviderError::Unavailable { endpoint, .. }
            | ProviderError::Transport { endpoint, .. }
            | ProviderError::Malformed { endpoint, .. } => endpoint,
        }
    }

    /// Whether the next scheduled sync may succeed with nothing changed locally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Unavailable { .. }
                | ProviderError::Transport { .. }
        )
    }
}

/// First line of an error body, capped at `BODY_SUMMARY_LEN` bytes.
fn summarize_body(body: &str) -> String {
    let line = body.trim().lines().next().unwrap_or_default();
    if line.len() <= BODY_SUMMARY_LEN {
        return line.to_string();
    }
    let mut end = BODY_SUMMARY_LEN;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}
