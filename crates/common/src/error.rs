use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every component. HTTP failures are decoded into
/// one of these kinds from the response status plus the server-supplied
/// `code` field; connection-level failures map to `Network`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Network,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    InvalidApiKey,
    SiteNotFound,
    InvalidOrigin,
    Validation,
    Unknown,
}

impl ErrorKind {
    /// Fatal kinds leave a store stuck in `error` after a fetch; everything
    /// else is recoverable by retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidApiKey | ErrorKind::SiteNotFound | ErrorKind::InvalidOrigin
        )
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "SITE_NOT_FOUND" => Some(ErrorKind::SiteNotFound),
            "INVALID_API_KEY" => Some(ErrorKind::InvalidApiKey),
            "INVALID_ORIGIN" => Some(ErrorKind::InvalidOrigin),
            "RATE_LIMITED" => Some(ErrorKind::RateLimited),
            "UNAUTHORIZED" => Some(ErrorKind::Unauthorized),
            "FORBIDDEN" => Some(ErrorKind::Forbidden),
            "NOT_FOUND" => Some(ErrorKind::NotFound),
            "VALIDATION" => Some(ErrorKind::Validation),
            _ => None,
        }
    }

    fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorKind::Unauthorized,
            403 => ErrorKind::Forbidden,
            404 => ErrorKind::NotFound,
            400 | 422 => ErrorKind::Validation,
            429 => ErrorKind::RateLimited,
            _ => ErrorKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Decode a non-2xx response into a typed error. The server-supplied
    /// `code` wins over the bare status code when both are present.
    pub fn from_response(status: u16, code: Option<&str>, message: impl Into<String>) -> Self {
        let kind = code
            .and_then(ErrorKind::from_code)
            .unwrap_or_else(|| ErrorKind::from_status(status));
        Self::new(kind, message)
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

/// Error body shape the server uses: `{ "error": "...", "code": "..." }`.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_overrides_status() {
        let err = Error::from_response(404, Some("SITE_NOT_FOUND"), "no such site");
        assert_eq!(err.kind, ErrorKind::SiteNotFound);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_status_fallback() {
        assert_eq!(
            Error::from_response(429, None, "slow down").kind,
            ErrorKind::RateLimited
        );
        assert_eq!(
            Error::from_response(500, None, "boom").kind,
            ErrorKind::Unknown
        );
        assert_eq!(
            Error::from_response(422, Some("bogus"), "bad").kind,
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(ErrorKind::InvalidApiKey.is_fatal());
        assert!(ErrorKind::InvalidOrigin.is_fatal());
        assert!(!ErrorKind::RateLimited.is_fatal());
        assert!(!ErrorKind::Network.is_fatal());
    }
}
