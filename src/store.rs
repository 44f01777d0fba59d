//! Snapshot persistence backed by a MongoDB time-series collection.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::TryStreamExt;
use mongodb::bson::{DateTime as BsonDateTime, Document, doc};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, TimeseriesGranularity, TimeseriesOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::{debug, info};

use crate::error::CollectorError;
use crate::models::Snapshot;

const APP_NAME: &str = "rds-inventory-collector";

/// Server error code for "collection already exists"
const NAMESPACE_EXISTS: i32 = 48;

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert one snapshot as a new point. Returns the stored document id.
    async fn persist(&self, snapshot: &Snapshot) -> Result<String, CollectorError>;
}

pub struct MongoSnapshotStore {
    collection: Collection<Snapshot>,
}

impl MongoSnapshotStore {
    /// Connect, verify the server is reachable and prepare the collection.
    pub async fn connect(uri: &str, db_name: &str, collection_name: &str) -> Result<Self> {
        let mut options = ClientOptions::parse(uri)
            .await
            .context("Failed to parse MongoDB connection URI")?;
        options.app_name = Some(APP_NAME.to_string());
        options.retry_writes = Some(true);

        let client = Client::with_options(options).context("Failed to create MongoDB client")?;
        let database = client.database(db_name);

        database
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        debug!(database = db_name, "MongoDB ping succeeded");

        ensure_timeseries_collection(&database, collection_name).await?;

        let collection = database.collection::<Snapshot>(collection_name);
        collection
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "account_id": 1, "collected_at": -1 })
                    .build(),
                IndexModel::builder().keys(doc! { "timestamp": 1 }).build(),
            ])
            .await
            .context("Failed to create snapshot indexes")?;

        info!(
            database = db_name,
            collection = collection_name,
            "Connected to MongoDB"
        );

        Ok(Self { collection })
    }

    /// Snapshots of one account collected in the last `days` days, newest first.
    pub async fn history(&self, account_id: &str, days: u32) -> Result<Vec<Snapshot>> {
        let filter = history_filter(account_id, Utc::now(), days)?;

        let snapshots: Vec<Snapshot> = self
            .collection
            .find(filter)
            .sort(doc! { "collected_at": -1 })
            .await
            .context("Failed to query snapshot history")?
            .try_collect()
            .await
            .context("Failed to read snapshot history")?;

        debug!(
            account_id,
            days,
            snapshot_count = snapshots.len(),
            "Loaded snapshot history"
        );

        Ok(snapshots)
    }
}

#[async_trait]
impl SnapshotStore for MongoSnapshotStore {
    async fn persist(&self, snapshot: &Snapshot) -> Result<String, CollectorError> {
        let result = self
            .collection
            .insert_one(snapshot)
            .await
            .map_err(|e| CollectorError::store(&snapshot.account_id, e.to_string()))?;

        Ok(result
            .inserted_id
            .as_object_id()
            .map(|id| id.to_hex())
            .unwrap_or_else(|| result.inserted_id.to_string()))
    }
}

async fn ensure_timeseries_collection(database: &Database, name: &str) -> Result<()> {
    let timeseries = TimeseriesOptions::builder()
        .time_field("collected_at".to_string())
        .meta_field(Some("account_id".to_string()))
        .granularity(Some(TimeseriesGranularity::Hours))
        .build();

    match database.create_collection(name).timeseries(timeseries).await {
        Ok(()) => {
            info!(collection = name, "Created time-series collection");
            Ok(())
        }
        Err(e) if matches!(e.kind.as_ref(), ErrorKind::Command(cmd) if cmd.code == NAMESPACE_EXISTS) => {
            debug!(collection = name, "Collection already exists");
            Ok(())
        }
        Err(e) => Err(e).context("Failed to create time-series collection"),
    }
}

fn history_filter(account_id: &str, now: DateTime<Utc>, days: u32) -> Result<Document> {
    let since = TimeDelta::try_days(i64::from(days))
        .and_then(|window| now.checked_sub_signed(window))
        .with_context(|| format!("History window of {} days is out of range", days))?;

    Ok(doc! {
        "account_id": account_id,
        "collected_at": { "$gte": BsonDateTime::from_chrono(since) },
    })
}
