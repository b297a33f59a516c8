//! Authorization server error types.
//!
//! Every failure the protocol engine can produce is an [`AuthError`]. The
//! HTTP layer maps each variant to an OAuth 2.0 / OpenID Connect error code
//! and decides whether it is redirected to the client or rendered inline.

use std::fmt;

/// Errors that can occur while processing authorization and token requests.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request is missing a parameter or is otherwise malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The client is unknown, failed authentication, or used an unregistered redirect URI.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// The requested scope is invalid, unknown, or exceeds what the client may request.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of why the scope is invalid.
        message: String,
    },

    /// The authorization code or refresh token is invalid, expired, used, or mismatched.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The client is not permitted to use the requested grant type.
    #[error("Unauthorized client: {message}")]
    UnauthorizedClient {
        /// Description of why the client is not authorized.
        message: String,
    },

    /// The resource owner or the login UI denied the request.
    #[error("Access denied: {message}")]
    AccessDenied {
        /// Description of why access was denied.
        message: String,
    },

    /// The authorization server does not support the requested response type.
    #[error("Unsupported response type: {response_type}")]
    UnsupportedResponseType {
        /// The unsupported response type.
        response_type: String,
    },

    /// The authorization server does not support the requested grant type.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// The `request` parameter was sent but request objects are disabled.
    #[error("Request objects are not supported")]
    RequestNotSupported,

    /// The `request_uri` parameter was sent.
    #[error("request_uri is not supported")]
    RequestUriNotSupported,

    /// A storage operation failed permanently.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The storage backend is temporarily unavailable. The operation was not
    /// applied and may be retried.
    #[error("Storage unavailable: {message}")]
    StorageUnavailable {
        /// Description of the outage.
        message: String,
    },

    /// A storage operation did not complete within its deadline.
    #[error("Storage operation timed out: {operation}")]
    StorageTimeout {
        /// The storage operation that timed out.
        operation: String,
    },

    /// The provider configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedResponseType` error.
    #[must_use]
    pub fn unsupported_response_type(response_type: impl Into<String>) -> Self {
        Self::UnsupportedResponseType {
            response_type: response_type.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `StorageUnavailable` error.
    #[must_use]
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `StorageTimeout` error.
    #[must_use]
    pub fn storage_timeout(operation: impl Into<String>) -> Self {
        Self::StorageTimeout {
            operation: operation.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. }
                | Self::StorageUnavailable { .. }
                | Self::StorageTimeout { .. }
                | Self::Configuration { .. }
                | Self::Internal { .. }
        )
    }

    /// Returns `true` if the failed operation was not applied and may be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. })
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidClient { .. } => ErrorCategory::Authentication,
            Self::InvalidGrant { .. } => ErrorCategory::Grant,
            Self::InvalidScope { .. }
            | Self::UnauthorizedClient { .. }
            | Self::AccessDenied { .. } => ErrorCategory::Authorization,
            Self::InvalidRequest { .. }
            | Self::UnsupportedResponseType { .. }
            | Self::UnsupportedGrantType { .. }
            | Self::RequestNotSupported
            | Self::RequestUriNotSupported => ErrorCategory::Validation,
            Self::Storage { .. } | Self::StorageUnavailable { .. } | Self::StorageTimeout { .. } => {
                ErrorCategory::Infrastructure
            }
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidClient { .. } => "invalid_client",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::AccessDenied { .. } => "access_denied",
            Self::UnsupportedResponseType { .. } => "unsupported_response_type",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::RequestNotSupported => "request_not_supported",
            Self::RequestUriNotSupported => "request_uri_not_supported",
            Self::Storage { .. }
            | Self::StorageUnavailable { .. }
            | Self::StorageTimeout { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => "server_error",
        }
    }

    /// Returns a description safe to send to clients.
    ///
    /// Server-side failures are summarised so that backend details never
    /// reach the browser or the client application.
    #[must_use]
    pub fn public_description(&self) -> String {
        if self.is_server_error() {
            "The authorization server encountered an unexpected condition".to_string()
        } else {
            match self {
                Self::InvalidRequest { message }
                | Self::InvalidClient { message }
                | Self::InvalidScope { message }
                | Self::InvalidGrant { message }
                | Self::UnauthorizedClient { message }
                | Self::AccessDenied { message } => message.clone(),
                other => other.to_string(),
            }
        }
    }
}

/// Categories of errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Client authentication failures.
    Authentication,
    /// Scope and permission failures.
    Authorization,
    /// Code and refresh token failures.
    Grant,
    /// Malformed or unsupported requests.
    Validation,
    /// Storage failures.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Grant => write!(f, "grant"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_client("client not found");
        assert_eq!(err.to_string(), "Invalid client: client not found");

        let err = AuthError::invalid_grant("authorization code expired");
        assert_eq!(err.to_string(), "Invalid grant: authorization code expired");

        let err = AuthError::storage_timeout("redeem_code");
        assert_eq!(err.to_string(), "Storage operation timed out: redeem_code");
    }

    #[test]
    fn test_error_predicates() {
        let err = AuthError::invalid_client("test");
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
        assert!(!err.is_transient());

        let err = AuthError::storage_unavailable("connection reset");
        assert!(err.is_server_error());
        assert!(err.is_transient());

        let err = AuthError::storage("constraint violated");
        assert!(err.is_server_error());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            AuthError::invalid_client("test").category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            AuthError::invalid_grant("test").category(),
            ErrorCategory::Grant
        );
        assert_eq!(
            AuthError::invalid_scope("test").category(),
            ErrorCategory::Authorization
        );
        assert_eq!(
            AuthError::storage_timeout("test").category(),
            ErrorCategory::Infrastructure
        );
    }

    #[test]
    fn test_oauth_error_code() {
        assert_eq!(
            AuthError::invalid_request("test").oauth_error_code(),
            "invalid_request"
        );
        assert_eq!(
            AuthError::unauthorized_client("test").oauth_error_code(),
            "unauthorized_client"
        );
        assert_eq!(
            AuthError::RequestUriNotSupported.oauth_error_code(),
            "request_uri_not_supported"
        );
        assert_eq!(
            AuthError::storage_unavailable("down").oauth_error_code(),
            "server_error"
        );
        assert_eq!(
            AuthError::internal("boom").oauth_error_code(),
            "server_error"
        );
    }

    #[test]
    fn test_public_description_hides_server_details() {
        let err = AuthError::storage("table oauth_codes is locked by pid 4711");
        assert!(!err.public_description().contains("4711"));

        let err = AuthError::invalid_scope("scope 'admin' is not allowed");
        assert_eq!(err.public_description(), "scope 'admin' is not allowed");
    }
}
