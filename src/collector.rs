use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::aws::{ApiError, ClusterPage, InstancePage, Paged, RdsApi, RdsClientFactory, Session};
use crate::error::CollectorError;
use crate::models::{DbInstanceRecord, ServerlessV2Config};
use crate::retry::RetryPolicy;

/// Concurrent ListTagsForResource calls per region
const TAG_FETCH_CONCURRENCY: usize = 4;

/// Retrieves every RDS instance of one region and enriches it with tags.
pub struct InstanceCollector {
    clients: Arc<dyn RdsClientFactory>,
    retry: RetryPolicy,
}

impl InstanceCollector {
    pub fn new(clients: Arc<dyn RdsClientFactory>, retry: RetryPolicy) -> Self {
        Self { clients, retry }
    }

    /// Collect all instances visible to `session` in `region`, in pagination order.
    pub async fn collect(
        &self,
        session: &Session,
        region: &str,
    ) -> Result<Vec<DbInstanceRecord>, CollectorError> {
        session.ensure_valid(Utc::now())?;

        let api = self.clients.client(session, region);
        self.collect_from(api.as_ref(), session.account_id(), region)
            .await
    }

    async fn collect_from(
        &self,
        api: &dyn RdsApi,
        account_id: &str,
        region: &str,
    ) -> Result<Vec<DbInstanceRecord>, CollectorError> {
        let start_time = Instant::now();

        let mut records = self
            .paginate::<InstancePage, _, _>("DescribeDBInstances", account_id, region, |marker| {
                api.describe_db_instances(marker)
            })
            .await?;
        let serverless = self
            .attach_serverless_config(api, account_id, region, &mut records)
            .await?;
        let untagged = self
            .attach_tags(api, account_id, region, &mut records)
            .await?;

        info!(
            account_id,
            region,
            instance_count = records.len(),
            serverless_count = serverless,
            untagged_count = untagged,
            duration_seconds = format!("{:.2}", start_time.elapsed().as_secs_f64()),
            "Collected RDS instances"
        );

        Ok(records)
    }

    /// Follow Marker continuation until the service stops returning one.
    /// A marker seen before means the listing would never end.
    async fn paginate<P, F, Fut>(
        &self,
        operation: &'static str,
        account_id: &str,
        region: &str,
        mut fetch: F,
    ) -> Result<Vec<P::Item>, CollectorError>
    where
        P: Paged,
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = Result<P, ApiError>>,
    {
        let mut items = Vec::new();
        let mut marker: Option<String> = None;
        let mut seen = HashSet::new();
        let mut pages = 0u32;

        loop {
            let page = self
                .retry
                .run(operation, || fetch(marker.clone()))
                .await
                .map_err(|e| escalate(account_id, region, e))?;

            let (page_items, next) = page.into_parts();
            pages += 1;
            debug!(
                account_id,
                region,
                operation,
                page = pages,
                page_items = page_items.len(),
                has_more = next.is_some(),
                "Received page"
            );
            items.extend(page_items);

            match next {
                Some(next) if !seen.insert(next.clone()) => {
                    return Err(CollectorError::collection(
                        account_id,
                        region,
                        format!(
                            "{} pagination marker repeated after page {}",
                            operation, pages
                        ),
                    ));
                }
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(items)
    }

    /// Fill in Serverless v2 capacity for Aurora cluster members. Scaling
    /// lives on the cluster, so this costs one DescribeDBClusters listing and
    /// is skipped when no instance belongs to a cluster. A failed listing
    /// leaves the config unset unless the credentials were rejected.
    async fn attach_serverless_config(
        &self,
        api: &dyn RdsApi,
        account_id: &str,
        region: &str,
        records: &mut [DbInstanceRecord],
    ) -> Result<usize, CollectorError> {
        if records.iter().all(|r| r.cluster_identifier.is_none()) {
            return Ok(0);
        }

        let clusters = match self
            .paginate::<ClusterPage, _, _>("DescribeDBClusters", account_id, region, |marker| {
                api.describe_db_clusters(marker)
            })
            .await
        {
            Ok(clusters) => clusters,
            Err(e @ CollectorError::Authentication { .. }) => return Err(e),
            Err(e) => {
                warn!(
                    account_id,
                    region,
                    error = %e,
                    "Failed to list DB clusters, recording instances without serverless config"
                );
                return Ok(0);
            }
        };

        let scaling: HashMap<String, (Option<f64>, Option<f64>)> = clusters
            .into_iter()
            .map(|c| (c.cluster_identifier, (c.min_capacity, c.max_capacity)))
            .collect();

        let mut attached = 0;
        for record in records.iter_mut() {
            let Some((min, max)) = record
                .cluster_identifier
                .as_ref()
                .and_then(|id| scaling.get(id))
            else {
                continue;
            };
            record.serverless_v2_config =
                ServerlessV2Config::for_engine(record.engine.as_deref(), *min, *max);
            if record.serverless_v2_config.is_some() {
                attached += 1;
            }
        }

        Ok(attached)
    }

    /// Merge each instance's tag set into its record. A failed lookup leaves
    /// the record with empty tags, except a credential rejection which fails
    /// the region. Returns the number of untagged records.
    async fn attach_tags(
        &self,
        api: &dyn RdsApi,
        account_id: &str,
        region: &str,
        records: &mut [DbInstanceRecord],
    ) -> Result<usize, CollectorError> {
        let arns: Vec<Option<String>> = records.iter().map(|r| r.arn.clone()).collect();

        let lookups: Vec<Option<Result<_, ApiError>>> = stream::iter(arns)
            .map(|arn| async move {
                match arn {
                    Some(arn) => Some(
                        self.retry
                            .run("ListTagsForResource", || api.list_tags(&arn))
                            .await,
                    ),
                    None => None,
                }
            })
            .buffered(TAG_FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut untagged = 0;
        for (record, lookup) in records.iter_mut().zip(lookups) {
            match lookup {
                Some(Ok(tags)) => record.tags = tags,
                Some(Err(e)) if e.is_credentials() => {
                    return Err(escalate(account_id, region, e));
                }
                Some(Err(e)) => {
                    untagged += 1;
                    warn!(
                        account_id,
                        region,
                        db_instance_identifier = %record.identifier,
                        error = %e,
                        "Failed to fetch instance tags, recording instance without tags"
                    );
                }
                None => {
                    untagged += 1;
                    warn!(
                        account_id,
                        region,
                        db_instance_identifier = %record.identifier,
                        "Instance has no ARN, recording instance without tags"
                    );
                }
            }
        }

        Ok(untagged)
    }
}

/// Credential rejections mean the session is unusable; anything else fails
/// only this region.
fn escalate(account_id: &str, region: &str, error: ApiError) -> CollectorError {
    if error.is_credentials() {
        CollectorError::authentication(account_id, format!("{} ({})", error, region))
    } else {
        CollectorError::collection(account_id, region, error.to_string())
    }
}
