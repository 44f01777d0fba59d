use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_rds::Client;
use aws_sdk_rds::types::{DbCluster, DbInstance, Tag};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{ApiError, Session};
use crate::models::{BackupConfig, DbInstanceRecord, StorageInfo};

/// DescribeDBInstances / DescribeDBClusters page size (API maximum is 100)
const PAGE_SIZE: i32 = 100;

/// A Marker-paginated response split into its items and continuation marker.
pub trait Paged {
    type Item;

    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

/// One page of DescribeDBInstances, already mapped to records without tags.
#[derive(Debug, Clone, Default)]
pub struct InstancePage {
    pub instances: Vec<DbInstanceRecord>,
    /// Continuation marker; `None` on the last page
    pub marker: Option<String>,
}

impl Paged for InstancePage {
    type Item = DbInstanceRecord;

    fn into_parts(self) -> (Vec<DbInstanceRecord>, Option<String>) {
        (self.instances, self.marker)
    }
}

/// Serverless v2 capacity range configured on one DB cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterScaling {
    pub cluster_identifier: String,
    pub min_capacity: Option<f64>,
    pub max_capacity: Option<f64>,
}

/// One page of DescribeDBClusters, reduced to clusters with a scaling configuration.
#[derive(Debug, Clone, Default)]
pub struct ClusterPage {
    pub clusters: Vec<ClusterScaling>,
    pub marker: Option<String>,
}

impl Paged for ClusterPage {
    type Item = ClusterScaling;

    fn into_parts(self) -> (Vec<ClusterScaling>, Option<String>) {
        (self.clusters, self.marker)
    }
}

/// The RDS calls the collector needs, scoped to one account and region.
#[async_trait]
pub trait RdsApi: Send + Sync {
    async fn describe_db_instances(&self, marker: Option<String>)
    -> Result<InstancePage, ApiError>;

    async fn describe_db_clusters(&self, marker: Option<String>) -> Result<ClusterPage, ApiError>;

    async fn list_tags(&self, resource_arn: &str) -> Result<BTreeMap<String, String>, ApiError>;
}

/// Creates region-scoped RDS clients from a session.
pub trait RdsClientFactory: Send + Sync {
    fn client(&self, session: &Session, region: &str) -> Box<dyn RdsApi>;
}

pub struct SdkRdsClientFactory;

impl RdsClientFactory for SdkRdsClientFactory {
    fn client(&self, session: &Session, region: &str) -> Box<dyn RdsApi> {
        Box::new(RdsClient::new(session, region))
    }
}

pub struct RdsClient {
    client: Client,
    account_id: String,
    region: String,
}

impl RdsClient {
    pub fn new(session: &Session, region: &str) -> Self {
        let config = aws_sdk_rds::config::Builder::from(session.sdk_config())
            .region(Region::new(region.to_string()))
            .build();

        Self {
            client: Client::from_conf(config),
            account_id: session.account_id().to_string(),
            region: region.to_string(),
        }
    }
}

#[async_trait]
impl RdsApi for RdsClient {
    async fn describe_db_instances(
        &self,
        marker: Option<String>,
    ) -> Result<InstancePage, ApiError> {
        debug!(
            account_id = %self.account_id,
            region = %self.region,
            marker = ?marker,
            "Sending DescribeDBInstances request"
        );

        let output = self
            .client
            .describe_db_instances()
            .set_marker(marker)
            .max_records(PAGE_SIZE)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(&e))?;

        let instances = output
            .db_instances()
            .iter()
            .map(|instance| record_from_sdk(&self.account_id, &self.region, instance))
            .collect();

        Ok(InstancePage {
            instances,
            marker: output.marker().map(str::to_string),
        })
    }

    async fn describe_db_clusters(&self, marker: Option<String>) -> Result<ClusterPage, ApiError> {
        debug!(
            account_id = %self.account_id,
            region = %self.region,
            marker = ?marker,
            "Sending DescribeDBClusters request"
        );

        let output = self
            .client
            .describe_db_clusters()
            .set_marker(marker)
            .max_records(PAGE_SIZE)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(&e))?;

        Ok(ClusterPage {
            clusters: output
                .db_clusters()
                .iter()
                .filter_map(cluster_scaling_from_sdk)
                .collect(),
            marker: output.marker().map(str::to_string),
        })
    }

    async fn list_tags(&self, resource_arn: &str) -> Result<BTreeMap<String, String>, ApiError> {
        let output = self
            .client
            .list_tags_for_resource()
            .resource_name(resource_arn)
            .send()
            .await
            .map_err(|e| ApiError::from_sdk(&e))?;

        Ok(tags_to_map(output.tag_list()))
    }
}

fn tags_to_map(tags: &[Tag]) -> BTreeMap<String, String> {
    tags.iter()
        .filter_map(|tag| {
            let key = tag.key()?;
            Some((key.to_string(), tag.value().unwrap_or_default().to_string()))
        })
        .collect()
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

/// Scaling range of a cluster, if it has a Serverless v2 configuration.
pub(crate) fn cluster_scaling_from_sdk(cluster: &DbCluster) -> Option<ClusterScaling> {
    let scaling = cluster.serverless_v2_scaling_configuration()?;

    Some(ClusterScaling {
        cluster_identifier: cluster.db_cluster_identifier()?.to_string(),
        min_capacity: scaling.min_capacity(),
        max_capacity: scaling.max_capacity(),
    })
}

/// Map an SDK instance description to a record. Tags and the Serverless v2
/// range (a cluster attribute) are filled in later.
pub(crate) fn record_from_sdk(
    account_id: &str,
    region: &str,
    instance: &DbInstance,
) -> DbInstanceRecord {

    DbInstanceRecord {
        account_id: account_id.to_string(),
        region: region.to_string(),
        identifier: instance
            .db_instance_identifier()
            .unwrap_or("unknown")
            .to_string(),
        arn: owned(instance.db_instance_arn()),
        status: owned(instance.db_instance_status()),
        engine: owned(instance.engine()),
        engine_version: owned(instance.engine_version()),
        instance_class: owned(instance.db_instance_class()),
        cluster_identifier: owned(instance.db_cluster_identifier()),
        multi_az: instance.multi_az(),
        storage: StorageInfo {
            storage_type: owned(instance.storage_type()),
            allocated_storage_gib: instance.allocated_storage(),
            encrypted: instance.storage_encrypted(),
            iops: instance.iops(),
        },
        backup: BackupConfig {
            window: owned(instance.preferred_backup_window()),
            retention_days: instance.backup_retention_period(),
        },
        maintenance_window: owned(instance.preferred_maintenance_window()),
        auto_minor_version_upgrade: instance.auto_minor_version_upgrade(),
        latest_restorable_time: instance
            .latest_restorable_time()
            .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
            .map(|t| t.to_rfc3339()),
        serverless_v2_config: None,
        tags: BTreeMap::new(),
    }
}
