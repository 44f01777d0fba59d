use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_sts::Client as StsClient;
use aws_sdk_sts::error::DisplayErrorContext;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use super::ApiError;
use crate::error::CollectorError;

/// Credentials are treated as expired this long before their real expiry so
/// a call started just before the deadline does not fail mid-flight.
const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Lifetime assumed for credentials that do not report an expiry (static keys).
const DEFAULT_SESSION_TTL_HOURS: i64 = 1;

/// Credentials scoped to one account, valid until `expires_at`.
#[derive(Debug)]
pub struct Session {
    account_id: String,
    sdk_config: SdkConfig,
    expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        account_id: impl Into<String>,
        sdk_config: SdkConfig,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            sdk_config,
            expires_at,
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn sdk_config(&self) -> &SdkConfig {
        &self.sdk_config
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now + TimeDelta::seconds(EXPIRY_SKEW_SECONDS) < self.expires_at
    }

    /// Fails with an authentication error once the session is past its expiry.
    pub fn ensure_valid(&self, now: DateTime<Utc>) -> Result<(), CollectorError> {
        if self.is_valid_at(now) {
            return Ok(());
        }

        Err(CollectorError::authentication(
            &self.account_id,
            format!("session expired at {}", self.expires_at.to_rfc3339()),
        ))
    }
}

/// How per-account credentials are obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Named profiles backed by the local SSO token cache
    Sso {
        base_profile: String,
        profile_prefix: String,
    },
    /// STS AssumeRole from the default credential chain
    AssumeRole { role_name: String },
}

impl AuthStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sso { .. } => "sso",
            Self::AssumeRole { .. } => "iam-role",
        }
    }

    pub fn profile_for(&self, account_id: &str) -> Option<String> {
        match self {
            Self::Sso { profile_prefix, .. } => Some(format!("{}{}", profile_prefix, account_id)),
            Self::AssumeRole { .. } => None,
        }
    }

    pub fn role_arn_for(&self, account_id: &str) -> Option<String> {
        match self {
            Self::Sso { .. } => None,
            Self::AssumeRole { role_name } => {
                Some(format!("arn:aws:iam::{}:role/{}", account_id, role_name))
            }
        }
    }
}

#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Establish a fresh session for one configured account.
    async fn acquire(&self, account_id: &str) -> Result<Session, CollectorError>;
}

/// Builds per-account sessions with the AWS SDK and verifies them with STS.
pub struct AwsSessionManager {
    strategy: AuthStrategy,
    default_region: String,
    accounts: HashSet<String>,
}

impl AwsSessionManager {
    pub fn new(
        strategy: AuthStrategy,
        default_region: impl Into<String>,
        accounts: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            strategy,
            default_region: default_region.into(),
            accounts: accounts.into_iter().collect(),
        }
    }

    pub fn strategy(&self) -> &AuthStrategy {
        &self.strategy
    }

    /// Check that the base identity works before any account is attempted.
    ///
    /// Returns the caller ARN of the base profile (SSO) or of the default
    /// credential chain (AssumeRole).
    pub async fn validate_access(&self) -> Result<String> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(self.region());
        if let AuthStrategy::Sso { base_profile, .. } = &self.strategy {
            loader = loader.profile_name(base_profile);
        }
        let sdk_config = loader.load().await;

        let identity = StsClient::new(&sdk_config)
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(&e))
            .context("Base identity check (STS GetCallerIdentity) failed")?;

        let arn = identity.arn().unwrap_or("unknown").to_string();
        info!(
            auth_type = self.strategy.name(),
            caller_arn = %arn,
            "AWS access validated"
        );
        Ok(arn)
    }

    fn region(&self) -> Region {
        Region::new(self.default_region.clone())
    }

    async fn load_config(&self, account_id: &str) -> SdkConfig {
        if let Some(profile) = self.strategy.profile_for(account_id) {
            debug!(account_id, profile = %profile, "Loading SSO profile");
            return aws_config::defaults(BehaviorVersion::latest())
                .profile_name(&profile)
                .region(self.region())
                .load()
                .await;
        }

        let role_arn = self.strategy.role_arn_for(account_id).unwrap_or_default();
        debug!(account_id, role_arn = %role_arn, "Configuring AssumeRole provider");

        // Base credentials come from the default chain (instance profile, IRSA, env)
        let base_config = aws_config::defaults(BehaviorVersion::latest())
            .region(self.region())
            .load()
            .await;

        let provider = aws_config::sts::AssumeRoleProvider::builder(role_arn)
            .configure(&base_config)
            .region(self.region())
            .session_name(format!("rds-inventory-{}", account_id))
            .build()
            .await;

        aws_config::defaults(BehaviorVersion::latest())
            .region(self.region())
            .credentials_provider(provider)
            .load()
            .await
    }

    async fn resolve_expiry(
        &self,
        account_id: &str,
        sdk_config: &SdkConfig,
    ) -> Result<DateTime<Utc>, CollectorError> {
        let provider = sdk_config.credentials_provider().ok_or_else(|| {
            CollectorError::authentication(account_id, "no credentials provider configured")
        })?;

        let credentials = provider.provide_credentials().await.map_err(|e| {
            CollectorError::authentication(account_id, DisplayErrorContext(&e).to_string())
        })?;

        Ok(credentials
            .expiry()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|| Utc::now() + TimeDelta::hours(DEFAULT_SESSION_TTL_HOURS)))
    }

    async fn verify_identity(
        &self,
        account_id: &str,
        sdk_config: &SdkConfig,
    ) -> Result<String, CollectorError> {
        let identity = StsClient::new(sdk_config)
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| {
                CollectorError::authentication(account_id, ApiError::from_sdk(&e).to_string())
            })?;

        let resolved_account = identity.account().unwrap_or("unknown");
        if resolved_account != account_id {
            return Err(CollectorError::authentication(
                account_id,
                format!("credentials resolved to account {}", resolved_account),
            ));
        }

        Ok(identity.arn().unwrap_or("unknown").to_string())
    }
}

#[async_trait]
impl SessionProvider for AwsSessionManager {
    async fn acquire(&self, account_id: &str) -> Result<Session, CollectorError> {
        if !self.accounts.contains(account_id) {
            return Err(CollectorError::authentication(
                account_id,
                "account is not in the configured account list",
            ));
        }

        let sdk_config = self.load_config(account_id).await;
        let expires_at = self.resolve_expiry(account_id, &sdk_config).await?;
        let caller_arn = self.verify_identity(account_id, &sdk_config).await?;

        info!(
            account_id,
            auth_type = self.strategy.name(),
            caller_arn = %caller_arn,
            expires_at = %expires_at.to_rfc3339(),
            "Session established"
        );

        Ok(Session::new(account_id, sdk_config, expires_at))
    }
}
