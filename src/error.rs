use crate::transport::TransportError;

/// Error type returned by this crate.
///
/// Only terminal outcomes reach callers. Retryable failures
/// ([`RestError::Transport`], [`RestError::ServerFailure`]) never reach
/// callers on their own: once the retry budget is spent they arrive wrapped
/// in [`RestError::RetriesExhausted`].
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// Bad constructor or configuration arguments. Never retried.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Network error, timeout or DNS failure reported by the transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Retryable HTTP status (5xx by default) with raw response body.
    #[error("server failure {status}: {body}")]
    ServerFailure { status: u16, body: String },
    /// Terminal HTTP status (4xx by default) with raw response body.
    #[error("client failure {status}: {body}")]
    ClientFailure { status: u16, body: String },
    /// The retry budget was spent; wraps the last retryable failure.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<RestError> },
    /// The caller aborted the request.
    #[error("request aborted")]
    Aborted,
    /// Response body could not be decoded into the requested type.
    #[error("decode error: {0}")]
    Decode(String),
}

impl RestError {
    /// True for caller-initiated cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// HTTP status of the failure, looking through [`RestError::RetriesExhausted`].
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ServerFailure { status, .. } | Self::ClientFailure { status, .. } => {
                Some(*status)
            }
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// True for failures the executor retries while budget remains.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ServerFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::RestError;
    use crate::transport::{TransportError, TransportErrorKind};

    #[test]
    fn status_looks_through_exhaustion() {
        let err = RestError::RetriesExhausted {
            attempts: 3,
            last: Box::new(RestError::ServerFailure {
                status: 503,
                body: String::new(),
            }),
        };
        assert_eq!(err.status(), Some(503));
        assert!(!err.is_aborted());
    }

    #[test]
    fn only_transport_and_server_failures_are_retryable() {
        let transport = RestError::from(TransportError::new(TransportErrorKind::Timeout, "slow"));
        assert!(transport.is_retryable());
        assert!(RestError::ServerFailure {
            status: 500,
            body: String::new()
        }
        .is_retryable());
        assert!(!RestError::ClientFailure {
            status: 404,
            body: String::new()
        }
        .is_retryable());
        assert!(!RestError::Aborted.is_retryable());
    }
}
