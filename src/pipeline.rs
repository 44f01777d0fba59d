//! One collection run across every configured account.
//!
//! Accounts are processed one after another. The regions of an account are
//! collected concurrently and reassembled in configured order. Failures stay
//! at the smallest scope they affect: an instance's tags, a region, an
//! account. Snapshots are written sequentially from the run's own task.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::aws::SessionProvider;
use crate::collector::InstanceCollector;
use crate::error::CollectorError;
use crate::health::{HealthServer, RunSummary};
use crate::models::AccountContext;
use crate::scheduler::CollectionJob;
use crate::snapshot::{DocumentBuilder, RegionRecords};
use crate::store::SnapshotStore;

#[derive(Debug)]
pub enum AccountStatus {
    Persisted {
        document_id: String,
        total_instances: i64,
    },
    Failed(CollectorError),
}

#[derive(Debug)]
pub struct AccountOutcome {
    pub account_id: String,
    pub status: AccountStatus,
    /// Regions skipped for this account; the snapshot (if any) excludes them
    pub region_failures: Vec<CollectorError>,
}

impl AccountOutcome {
    fn failed(account_id: &str, error: CollectorError, region_failures: Vec<CollectorError>) -> Self {
        Self {
            account_id: account_id.to_string(),
            status: AccountStatus::Failed(error),
            region_failures,
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self.status, AccountStatus::Persisted { .. })
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<AccountOutcome>,
}

impl RunReport {
    pub fn persisted_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_persisted()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.persisted_count()
    }

    pub fn region_failure_count(&self) -> usize {
        self.outcomes.iter().map(|o| o.region_failures.len()).sum()
    }

    pub fn instances_collected(&self) -> i64 {
        self.outcomes
            .iter()
            .filter_map(|o| match o.status {
                AccountStatus::Persisted {
                    total_instances, ..
                } => Some(total_instances),
                AccountStatus::Failed(_) => None,
            })
            .sum()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0 || self.region_failure_count() > 0
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            started_at: self.started_at,
            finished_at: self.finished_at,
            accounts_total: self.outcomes.len(),
            accounts_persisted: self.persisted_count(),
            accounts_failed: self.failed_count(),
            region_failures: self.region_failure_count(),
            instances_collected: self.instances_collected(),
        }
    }

    fn log(&self) {
        let failed_accounts: Vec<&str> = self
            .outcomes
            .iter()
            .filter(|o| !o.is_persisted())
            .map(|o| o.account_id.as_str())
            .collect();

        let duration_seconds = (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0;

        if self.has_failures() {
            warn!(
                accounts_total = self.outcomes.len(),
                accounts_persisted = self.persisted_count(),
                accounts_failed = self.failed_count(),
                failed_accounts = ?failed_accounts,
                region_failures = self.region_failure_count(),
                instances_collected = self.instances_collected(),
                duration_seconds = format!("{:.2}", duration_seconds),
                "Collection run completed with failures"
            );
        } else {
            info!(
                accounts_total = self.outcomes.len(),
                accounts_persisted = self.persisted_count(),
                instances_collected = self.instances_collected(),
                duration_seconds = format!("{:.2}", duration_seconds),
                "Collection run completed"
            );
        }
    }
}

pub struct CollectionPipeline {
    accounts: Vec<AccountContext>,
    sessions: Arc<dyn SessionProvider>,
    collector: InstanceCollector,
    builder: DocumentBuilder,
    store: Arc<dyn SnapshotStore>,
    health: Option<HealthServer>,
}

impl CollectionPipeline {
    /// Fails fast when the run would be meaningless (no accounts or regions).
    pub fn new(
        accounts: Vec<AccountContext>,
        sessions: Arc<dyn SessionProvider>,
        collector: InstanceCollector,
        builder: DocumentBuilder,
        store: Arc<dyn SnapshotStore>,
    ) -> Result<Self, CollectorError> {
        if accounts.is_empty() {
            return Err(CollectorError::Config("no accounts configured".to_string()));
        }
        if let Some(account) = accounts.iter().find(|a| a.regions.is_empty()) {
            return Err(CollectorError::Config(format!(
                "no regions configured for account {}",
                account.account_id
            )));
        }

        Ok(Self {
            accounts,
            sessions,
            collector,
            builder,
            store,
            health: None,
        })
    }

    /// Publish each run's summary on the health server's `/status` endpoint.
    pub fn with_health(mut self, health: HealthServer) -> Self {
        self.health = Some(health);
        self
    }

    pub async fn run(&self) -> RunReport {
        let started_at = Utc::now();
        info!(
            accounts = self.accounts.len(),
            "Starting collection run"
        );

        let mut outcomes = Vec::with_capacity(self.accounts.len());
        for account in &self.accounts {
            outcomes.push(self.run_account(account).await);
        }

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        report.log();

        if let Some(health) = &self.health {
            health.record_run(report.summary());
        }

        report
    }

    async fn run_account(&self, account: &AccountContext) -> AccountOutcome {
        let account_id = account.account_id.as_str();
        let start_time = Instant::now();

        let session = match self.sessions.acquire(account_id).await {
            Ok(session) => session,
            Err(e) => {
                error!(
                    account_id,
                    error = %e,
                    "Failed to acquire session, skipping account"
                );
                return AccountOutcome::failed(account_id, e, Vec::new());
            }
        };

        let results = join_all(
            account
                .regions
                .iter()
                .map(|region| self.collector.collect(&session, region)),
        )
        .await;

        let mut per_region = Vec::with_capacity(results.len());
        let mut region_failures = Vec::new();
        for (region, result) in account.regions.iter().zip(results) {
            match result {
                Ok(records) => per_region.push(RegionRecords::new(region.as_str(), records)),
                Err(e) => {
                    warn!(
                        account_id,
                        region = %region,
                        error_kind = e.kind(),
                        error = %e,
                        "Region collection failed, excluding region from snapshot"
                    );
                    region_failures.push(e);
                }
            }
        }

        if per_region.is_empty() {
            let message = format!("all {} configured regions failed", account.regions.len());
            let all_rejected = !region_failures.is_empty()
                && region_failures
                    .iter()
                    .all(|e| matches!(e, CollectorError::Authentication { .. }));
            let error = if all_rejected {
                CollectorError::authentication(account_id, message)
            } else {
                CollectorError::collection(account_id, &account.regions.join(","), message)
            };
            error!(account_id, error = %error, "No region succeeded, no snapshot written");
            return AccountOutcome::failed(account_id, error, region_failures);
        }

        let snapshot = self.builder.build(account_id, Utc::now(), per_region);
        let total_instances = snapshot.total_instances;

        match self.store.persist(&snapshot).await {
            Ok(document_id) => {
                info!(
                    account_id,
                    document_id = %document_id,
                    total_instances,
                    timestamp = %snapshot.timestamp,
                    skipped_regions = region_failures.len(),
                    duration_seconds = format!("{:.2}", start_time.elapsed().as_secs_f64()),
                    "Snapshot persisted"
                );
                AccountOutcome {
                    account_id: account_id.to_string(),
                    status: AccountStatus::Persisted {
                        document_id,
                        total_instances,
                    },
                    region_failures,
                }
            }
            Err(e) => {
                error!(
                    account_id,
                    total_instances,
                    error = %e,
                    "Failed to persist snapshot"
                );
                AccountOutcome::failed(account_id, e, region_failures)
            }
        }
    }
}

#[async_trait]
impl CollectionJob for CollectionPipeline {
    async fn run_once(&self) {
        self.run().await;
    }
}
