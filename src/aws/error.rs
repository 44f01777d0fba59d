//! Classification of AWS SDK failures by error code.

use aws_sdk_rds::error::{DisplayErrorContext, ProvideErrorMetadata};
use thiserror::Error;

/// AWS API failure, classified for retry and escalation decisions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded: {0}")]
    Throttled(String),

    /// Credentials missing, expired or rejected
    #[error("AWS credentials error: {0}")]
    Credentials(String),

    /// Any other SDK failure
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "RequestThrottled",
    "RequestThrottledException",
];

const CREDENTIALS_CODES: &[&str] = &[
    "ExpiredToken",
    "ExpiredTokenException",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
    "AccessDenied",
    "AccessDeniedException",
    "AuthFailure",
    "SignatureDoesNotMatch",
];

// Dispatch failures carry no error code, so credential problems raised by the
// credentials chain (SSO token cache, AssumeRole) are recognised by message.
const CREDENTIALS_MESSAGES: &[&str] = &[
    "no credentials",
    "failed to load credentials",
    "credentials provider",
    "sso session",
    "token has expired",
    "expired token",
];

impl ApiError {
    /// Classify an SDK error from its error code and rendered message.
    pub fn classify(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();

        match code {
            Some(c) if THROTTLING_CODES.contains(&c) => Self::Throttled(message),
            Some(c) if CREDENTIALS_CODES.contains(&c) => Self::Credentials(message),
            Some(c) => Self::Sdk {
                code: Some(c.to_string()),
                message,
            },
            None => {
                let lower = message.to_lowercase();
                if CREDENTIALS_MESSAGES.iter().any(|m| lower.contains(m)) {
                    Self::Credentials(message)
                } else {
                    Self::Sdk {
                        code: None,
                        message,
                    }
                }
            }
        }
    }

    /// Classify any SDK error that exposes error metadata.
    pub fn from_sdk<E>(err: &E) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error,
    {
        Self::classify(err.code(), DisplayErrorContext(err).to_string())
    }

    /// Only throttling is worth retrying; everything else fails the same way twice.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }

    pub fn is_credentials(&self) -> bool {
        matches!(self, Self::Credentials(_))
    }
}
