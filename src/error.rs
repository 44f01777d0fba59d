//! Error types for the collection pipeline.

use thiserror::Error;

/// Failures of the collection pipeline, each scoped to the smallest unit of
/// work it affects (region, account, run).
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("[{account_id}] authentication failed: {message}")]
    Authentication { account_id: String, message: String },

    #[error("[{account_id}/{region}] collection failed: {message}")]
    Collection {
        account_id: String,
        region: String,
        message: String,
    },

    #[error("[{account_id}] failed to persist snapshot: {message}")]
    Store { account_id: String, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CollectorError {
    pub fn authentication(account_id: &str, message: impl Into<String>) -> Self {
        Self::Authentication {
            account_id: account_id.to_string(),
            message: message.into(),
        }
    }

    pub fn collection(account_id: &str, region: &str, message: impl Into<String>) -> Self {
        Self::Collection {
            account_id: account_id.to_string(),
            region: region.to_string(),
            message: message.into(),
        }
    }

    pub fn store(account_id: &str, message: impl Into<String>) -> Self {
        Self::Store {
            account_id: account_id.to_string(),
            message: message.into(),
        }
    }

    /// Short machine-friendly label used in structured logs and run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "authentication",
            Self::Collection { .. } => "collection",
            Self::Store { .. } => "store",
            Self::Config(_) => "config",
        }
    }
}
