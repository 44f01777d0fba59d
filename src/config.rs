use std::collections::HashSet;
use std::time::Duration;

use chrono_tz::Tz;
use clap::{Parser, Subcommand, ValueEnum};

use crate::aws::AuthStrategy;
use crate::error::CollectorError;
use crate::models::AccountContext;
use crate::retry::RetryPolicy;
use crate::scheduler::{DailySchedule, RunMode};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rds-inventory-collector",
    version,
    about = "Daily RDS instance inventory snapshots across AWS accounts and regions"
)]
pub struct Config {
    /// AWS account IDs to collect (comma separated or JSON array)
    #[arg(long, env = "AWS_ACCOUNTS", default_value = "")]
    pub accounts: String,

    /// Regions collected for every account (comma separated or JSON array)
    #[arg(long, env = "AWS_REGIONS", default_value = "")]
    pub regions: String,

    /// Credential strategy [default: sso in development, iam-role in production]
    #[arg(long, env = "AUTH_TYPE", value_enum)]
    pub auth_type: Option<AuthType>,

    /// Base SSO profile used for the startup access check
    #[arg(long, env = "SSO_PROFILE", default_value = "default")]
    pub sso_profile: String,

    /// Per-account SSO profile name prefix, followed by the account ID
    #[arg(long, env = "ACCOUNT_PROFILE_PREFIX", default_value = "AdministratorAccess-")]
    pub account_profile_prefix: String,

    /// IAM role assumed in every account (iam-role auth)
    #[arg(long, env = "AWS_ROLE_NAME", default_value = "mgmt-db-monitoring-assumerole")]
    pub role_name: String,

    /// production waits for the daily trigger; development also runs at startup
    #[arg(long, env = "ENVIRONMENT", value_enum, default_value_t = Environment::Production)]
    pub environment: Environment,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB_NAME")]
    pub mongodb_db_name: String,

    /// MongoDB collection for snapshots
    #[arg(long, env = "MONGODB_COLLECTION", default_value = "aws_rds_instance_daily_info")]
    pub mongodb_collection: String,

    /// Daily local trigger time (HH:MM)
    #[arg(long, env = "SCHEDULE_TIME", default_value = "08:00")]
    pub schedule_time: String,

    /// IANA time zone for the trigger and snapshot timestamps
    #[arg(long, env = "TIMEZONE", default_value = "Asia/Seoul")]
    pub timezone: String,

    /// Attempts per AWS API call when throttled
    #[arg(long, env = "API_MAX_ATTEMPTS", default_value = "5")]
    pub api_max_attempts: u32,

    /// Initial backoff after a throttled call, in milliseconds
    #[arg(long, env = "API_RETRY_BASE_DELAY_MS", default_value = "500")]
    pub api_retry_base_delay_ms: u64,

    /// Backoff cap, in milliseconds
    #[arg(long, env = "API_RETRY_MAX_DELAY_MS", default_value = "20000")]
    pub api_retry_max_delay_ms: u64,

    /// Health check server port
    #[arg(long, env = "HEALTH_PORT", default_value = "8080")]
    pub health_port: u16,

    /// Log format: json or pretty
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run one collection across all accounts and exit
    Once,

    /// Print stored snapshots of one account as JSON
    History {
        /// Account ID to query
        #[arg(long)]
        account_id: String,

        /// Look-back window in days
        #[arg(long, default_value = "30")]
        days: u32,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    Sso,
    #[value(alias = "iam_role")]
    IamRole,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    #[value(aliases = ["compact", "text"])]
    Pretty,
}

impl Config {
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Reject configurations that would make every run meaningless.
    pub fn validate(&self) -> Result<(), CollectorError> {
        let accounts = self.account_ids();
        if accounts.is_empty() {
            return Err(CollectorError::Config("AWS_ACCOUNTS is empty".to_string()));
        }
        if let Some(bad) = accounts.iter().find(|id| !is_account_id(id)) {
            return Err(CollectorError::Config(format!(
                "account ID '{}' must be 12 digits",
                bad
            )));
        }
        if self.region_codes().is_empty() {
            return Err(CollectorError::Config("AWS_REGIONS is empty".to_string()));
        }
        if self.api_max_attempts == 0 {
            return Err(CollectorError::Config(
                "API_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        self.daily_schedule()?;
        Ok(())
    }

    /// False for read-only commands that never touch AWS.
    pub fn collects(&self) -> bool {
        !matches!(self.command, Some(Command::History { .. }))
    }

    pub fn account_ids(&self) -> Vec<String> {
        normalize_list(&self.accounts)
    }

    pub fn region_codes(&self) -> Vec<String> {
        normalize_list(&self.regions)
    }

    pub fn account_contexts(&self) -> Vec<AccountContext> {
        let regions = self.region_codes();
        self.account_ids()
            .into_iter()
            .map(|id| AccountContext::new(id, regions.clone()))
            .collect()
    }

    pub fn effective_auth_type(&self) -> AuthType {
        self.auth_type.unwrap_or(match self.environment {
            Environment::Development => AuthType::Sso,
            Environment::Production => AuthType::IamRole,
        })
    }

    pub fn auth_strategy(&self) -> AuthStrategy {
        match self.effective_auth_type() {
            AuthType::Sso => AuthStrategy::Sso {
                base_profile: self.sso_profile.clone(),
                profile_prefix: self.account_profile_prefix.clone(),
            },
            AuthType::IamRole => AuthStrategy::AssumeRole {
                role_name: self.role_name.clone(),
            },
        }
    }

    pub fn run_mode(&self) -> RunMode {
        match self.environment {
            Environment::Production => RunMode::ScheduledOnly,
            Environment::Development => RunMode::ImmediateThenScheduled,
        }
    }

    pub fn daily_schedule(&self) -> Result<DailySchedule, CollectorError> {
        DailySchedule::parse(&self.schedule_time, &self.timezone)
    }

    pub fn tz(&self) -> Result<Tz, CollectorError> {
        self.daily_schedule().map(|schedule| schedule.timezone())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.api_max_attempts,
            initial_delay: Duration::from_millis(self.api_retry_base_delay_ms),
            max_delay: Duration::from_millis(self.api_retry_max_delay_ms),
        }
    }

    pub fn display(&self) {
        tracing::info!(
            accounts = ?self.account_ids(),
            regions = ?self.region_codes(),
            environment = ?self.environment,
            auth_type = self.auth_strategy().name(),
            mongodb_db_name = %self.mongodb_db_name,
            mongodb_collection = %self.mongodb_collection,
            schedule_time = %self.schedule_time,
            timezone = %self.timezone,
            api_max_attempts = self.api_max_attempts,
            health_port = self.health_port,
            log_level = %self.log_level,
            "Configuration initialized"
        );

        if self.environment == Environment::Development {
            tracing::warn!("DEVELOPMENT MODE - collection runs immediately at startup");
        }
    }
}

/// Split a comma separated list, also accepting JSON array syntax such as
/// `["111111111111", "222222222222"]`. Duplicates are dropped, order kept.
pub fn normalize_list(raw: &str) -> Vec<String> {
    let inner = raw.trim().trim_start_matches('[').trim_end_matches(']');

    let mut seen = HashSet::new();
    inner
        .split(',')
        .map(|item| item.trim().trim_matches(|c| c == '"' || c == '\'').trim())
        .filter(|item| !item.is_empty())
        .filter(|item| seen.insert(item.to_string()))
        .map(str::to_string)
        .collect()
}

fn is_account_id(id: &str) -> bool {
    id.len() == 12 && id.chars().all(|c| c.is_ascii_digit())
}
