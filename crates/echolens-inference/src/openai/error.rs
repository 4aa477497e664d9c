//! Mapping of OpenAI HTTP failures onto the pipeline's error classes.

use echolens_core::Error;

use super::types::OpenAIErrorResponse;

/// OpenAI-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    /// Invalid or unauthorized credentials (401/403).
    AuthenticationError,
    /// Rate limit exceeded.
    RateLimitExceeded,
    /// Model not found or not available.
    ModelNotFound,
    /// Request too large.
    ContextLengthExceeded,
    /// Any other rejected request (4xx).
    BadRequest,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine error code from HTTP status and error type/code.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401 | 403, _) => Self::AuthenticationError,
            (429, _) => Self::RateLimitExceeded,
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, _) if error_type.contains("context_length") => Self::ContextLengthExceeded,
            (400..=499, _) => Self::BadRequest,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::ServerError)
    }
}

/// Convert an OpenAI error to the core error type.
pub fn to_core_error(code: OpenAIErrorCode, service: &str, message: &str) -> Error {
    match code {
        OpenAIErrorCode::AuthenticationError => {
            Error::Config(format!("{} authentication failed: {}", service, message))
        }
        OpenAIErrorCode::RateLimitExceeded => {
            Error::Transient(format!("{} rate limit exceeded: {}", service, message))
        }
        OpenAIErrorCode::ModelNotFound => {
            Error::Config(format!("{} model not found: {}", service, message))
        }
        OpenAIErrorCode::ContextLengthExceeded => {
            Error::InvalidInput(format!("{} context too long: {}", service, message))
        }
        OpenAIErrorCode::BadRequest => {
            Error::InvalidInput(format!("{} rejected request: {}", service, message))
        }
        OpenAIErrorCode::ServerError => {
            Error::Transient(format!("{} server error: {}", service, message))
        }
        OpenAIErrorCode::Unknown => Error::Adapter(format!("{}: {}", service, message)),
    }
}

/// Consume a non-success response and classify it.
pub async fn error_from_response(response: reqwest::Response, service: &str) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let (error_type, message) = match serde_json::from_str::<OpenAIErrorResponse>(&body) {
        Ok(parsed) => (
            parsed
                .error
                .code
                .or(parsed.error.error_type)
                .unwrap_or_default(),
            parsed.error.message,
        ),
        Err(_) if body.is_empty() => (String::new(), status.to_string()),
        Err(_) => (String::new(), format!("{}: {}", status, body)),
    };

    let code = OpenAIErrorCode::from_response(status.as_u16(), &error_type);
    to_core_error(code, service, &message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_401_and_403() {
        assert_eq!(
            OpenAIErrorCode::from_response(401, "invalid_api_key"),
            OpenAIErrorCode::AuthenticationError
        );
        assert_eq!(
            OpenAIErrorCode::from_response(403, ""),
            OpenAIErrorCode::AuthenticationError
        );
    }

    #[test]
    fn test_error_code_from_429() {
        let code = OpenAIErrorCode::from_response(429, "rate_limit_exceeded");
        assert_eq!(code, OpenAIErrorCode::RateLimitExceeded);
        assert!(code.is_retryable());
    }

    #[test]
    fn test_error_code_from_5xx() {
        for status in [500, 502, 503] {
            let code = OpenAIErrorCode::from_response(status, "server_error");
            assert_eq!(code, OpenAIErrorCode::ServerError);
            assert!(code.is_retryable());
        }
    }

    #[test]
    fn test_error_code_from_other_4xx() {
        assert_eq!(
            OpenAIErrorCode::from_response(400, "invalid_request_error"),
            OpenAIErrorCode::BadRequest
        );
        assert_eq!(
            OpenAIErrorCode::from_response(400, "context_length_exceeded"),
            OpenAIErrorCode::ContextLengthExceeded
        );
        assert_eq!(
            OpenAIErrorCode::from_response(418, "im_a_teapot"),
            OpenAIErrorCode::BadRequest
        );
        assert!(!OpenAIErrorCode::BadRequest.is_retryable());
    }

    #[test]
    fn test_to_core_error_classes() {
        let err = to_core_error(OpenAIErrorCode::AuthenticationError, "chat", "Invalid key");
        assert!(matches!(err, Error::Config(_)));
        assert!(!err.is_retryable());

        let err = to_core_error(OpenAIErrorCode::ServerError, "embedding", "boom");
        assert!(err.is_retryable());

        let err = to_core_error(OpenAIErrorCode::BadRequest, "speech", "bad voice");
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
