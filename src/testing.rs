//! In-memory fakes for the AWS and MongoDB seams.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use aws_config::SdkConfig;
use chrono::{TimeDelta, Utc};

use crate::aws::{
    ApiError, ClusterPage, ClusterScaling, InstancePage, RdsApi, RdsClientFactory, Session,
    SessionProvider,
};
use crate::error::CollectorError;
use crate::models::{DbInstanceRecord, Snapshot};
use crate::store::SnapshotStore;

pub fn arn_for(account_id: &str, region: &str, identifier: &str) -> String {
    format!("arn:aws:rds:{}:{}:db:{}", region, account_id, identifier)
}

/// Canned RDS behaviour for one region.
#[derive(Debug, Clone, Default)]
pub struct FakeRegion {
    /// Instance identifiers per DescribeDBInstances page
    pub pages: Vec<Vec<String>>,
    /// Returned by every DescribeDBInstances call when set
    pub list_error: Option<ApiError>,
    /// Identifiers whose ListTagsForResource call fails
    pub tag_failures: HashSet<String>,
    /// Returned by every ListTagsForResource call when set
    pub tag_error: Option<ApiError>,
    /// Number of initial DescribeDBInstances calls answered with throttling
    pub throttled_calls: u32,
    /// Serverless v2 clusters and their member instances
    pub clusters: Vec<FakeCluster>,
    /// Returned by every DescribeDBClusters call when set
    pub cluster_error: Option<ApiError>,
}

#[derive(Debug, Clone)]
pub struct FakeCluster {
    pub scaling: ClusterScaling,
    pub members: Vec<String>,
}

impl FakeRegion {
    pub fn with_pages(pages: &[&[&str]]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|page| page.iter().map(|id| id.to_string()).collect())
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing(error: ApiError) -> Self {
        Self {
            list_error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_tag_failure(mut self, identifier: &str) -> Self {
        self.tag_failures.insert(identifier.to_string());
        self
    }

    pub fn with_tag_error(mut self, error: ApiError) -> Self {
        self.tag_error = Some(error);
        self
    }

    pub fn with_serverless_cluster(
        mut self,
        cluster_identifier: &str,
        members: &[&str],
        min_capacity: f64,
        max_capacity: f64,
    ) -> Self {
        self.clusters.push(FakeCluster {
            scaling: ClusterScaling {
                cluster_identifier: cluster_identifier.to_string(),
                min_capacity: Some(min_capacity),
                max_capacity: Some(max_capacity),
            },
            members: members.iter().map(|m| m.to_string()).collect(),
        });
        self
    }

    pub fn with_cluster_error(mut self, error: ApiError) -> Self {
        self.cluster_error = Some(error);
        self
    }

    fn cluster_of(&self, identifier: &str) -> Option<String> {
        self.clusters
            .iter()
            .find(|c| c.members.iter().any(|m| m == identifier))
            .map(|c| c.scaling.cluster_identifier.clone())
    }
}

pub struct FakeRdsApi {
    account_id: String,
    region: String,
    behaviour: FakeRegion,
    throttles_left: AtomicU32,
    describe_calls: AtomicU32,
    cluster_calls: AtomicU32,
}

impl FakeRdsApi {
    pub fn new(account_id: &str, region: &str, behaviour: FakeRegion) -> Self {
        let throttles_left = AtomicU32::new(behaviour.throttled_calls);
        Self {
            account_id: account_id.to_string(),
            region: region.to_string(),
            behaviour,
            throttles_left,
            describe_calls: AtomicU32::new(0),
            cluster_calls: AtomicU32::new(0),
        }
    }

    pub fn describe_calls(&self) -> u32 {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub fn cluster_calls(&self) -> u32 {
        self.cluster_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RdsApi for FakeRdsApi {
    async fn describe_db_instances(
        &self,
        marker: Option<String>,
    ) -> Result<InstancePage, ApiError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);

        if self
            .throttles_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ApiError::Throttled("Rate exceeded".to_string()));
        }

        if let Some(error) = &self.behaviour.list_error {
            return Err(error.clone());
        }

        let index = marker
            .as_deref()
            .and_then(|m| m.strip_prefix("page-"))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);

        let instances = self
            .behaviour
            .pages
            .get(index)
            .map(|ids| {
                ids.iter()
                    .map(|id| {
                        let mut record = DbInstanceRecord::new(&self.account_id, &self.region, id);
                        record.arn = Some(arn_for(&self.account_id, &self.region, id));
                        record.engine = Some("aurora-mysql".to_string());
                        record.cluster_identifier = self.behaviour.cluster_of(id);
                        record
                    })
                    .collect()
            })
            .unwrap_or_default();

        let marker = (index + 1 < self.behaviour.pages.len()).then(|| format!("page-{}", index + 1));

        Ok(InstancePage { instances, marker })
    }

    async fn describe_db_clusters(&self, _marker: Option<String>) -> Result<ClusterPage, ApiError> {
        self.cluster_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = &self.behaviour.cluster_error {
            return Err(error.clone());
        }

        Ok(ClusterPage {
            clusters: self
                .behaviour
                .clusters
                .iter()
                .map(|c| c.scaling.clone())
                .collect(),
            marker: None,
        })
    }

    async fn list_tags(&self, resource_arn: &str) -> Result<BTreeMap<String, String>, ApiError> {
        if let Some(error) = &self.behaviour.tag_error {
            return Err(error.clone());
        }

        let identifier = resource_arn.rsplit(':').next().unwrap_or_default();
        if self.behaviour.tag_failures.contains(identifier) {
            return Err(ApiError::Sdk {
                code: Some("InternalFailure".to_string()),
                message: "tag service unavailable".to_string(),
            });
        }

        Ok(BTreeMap::from([
            ("Name".to_string(), identifier.to_string()),
            ("team".to_string(), "dba".to_string()),
        ]))
    }
}

/// Hands out `FakeRdsApi` clients and records every (account, region) it serves.
#[derive(Default)]
pub struct FakeRdsFactory {
    regions: HashMap<(String, String), FakeRegion>,
    pub requests: Mutex<Vec<(String, String)>>,
}

impl FakeRdsFactory {
    pub fn with_region(mut self, account_id: &str, region: &str, behaviour: FakeRegion) -> Self {
        self.regions
            .insert((account_id.to_string(), region.to_string()), behaviour);
        self
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        let mut requests = self.requests.lock().unwrap().clone();
        requests.sort();
        requests
    }
}

impl RdsClientFactory for FakeRdsFactory {
    fn client(&self, session: &Session, region: &str) -> Box<dyn RdsApi> {
        let key = (session.account_id().to_string(), region.to_string());
        self.requests.lock().unwrap().push(key.clone());
        let behaviour = self.regions.get(&key).cloned().unwrap_or_default();
        Box::new(FakeRdsApi::new(session.account_id(), region, behaviour))
    }
}

pub fn session_for(account_id: &str, valid_for: TimeDelta) -> Session {
    Session::new(account_id, SdkConfig::builder().build(), Utc::now() + valid_for)
}

#[derive(Default)]
pub struct FakeSessionProvider {
    failing: HashSet<String>,
    expired: HashSet<String>,
    pub attempts: Mutex<Vec<String>>,
}

impl FakeSessionProvider {
    pub fn failing_for(mut self, account_id: &str) -> Self {
        self.failing.insert(account_id.to_string());
        self
    }

    pub fn expired_for(mut self, account_id: &str) -> Self {
        self.expired.insert(account_id.to_string());
        self
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionProvider for FakeSessionProvider {
    async fn acquire(&self, account_id: &str) -> Result<Session, CollectorError> {
        self.attempts.lock().unwrap().push(account_id.to_string());

        if self.failing.contains(account_id) {
            return Err(CollectorError::authentication(
                account_id,
                "the SSO session associated with this profile has expired",
            ));
        }

        let valid_for = if self.expired.contains(account_id) {
            TimeDelta::minutes(-5)
        } else {
            TimeDelta::hours(1)
        };
        Ok(session_for(account_id, valid_for))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    failing: HashSet<String>,
    pub snapshots: Mutex<Vec<Snapshot>>,
    pub attempts: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn failing_for(mut self, account_id: &str) -> Self {
        self.failing.insert(account_id.to_string());
        self
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn persist(&self, snapshot: &Snapshot) -> Result<String, CollectorError> {
        self.attempts
            .lock()
            .unwrap()
            .push(snapshot.account_id.clone());

        if self.failing.contains(&snapshot.account_id) {
            return Err(CollectorError::store(
                &snapshot.account_id,
                "server selection timeout",
            ));
        }

        let mut snapshots = self.snapshots.lock().unwrap();
        snapshots.push(snapshot.clone());
        Ok(format!("snapshot-{}", snapshots.len()))
    }
}
