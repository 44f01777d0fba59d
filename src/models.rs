use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One configured account and the regions collected for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContext {
    pub account_id: String,
    pub regions: Vec<String>,
}

impl AccountContext {
    pub fn new(account_id: impl Into<String>, regions: Vec<String>) -> Self {
        Self {
            account_id: account_id.into(),
            regions,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    #[serde(rename = "StorageType")]
    pub storage_type: Option<String>,
    #[serde(rename = "AllocatedStorage")]
    pub allocated_storage_gib: Option<i32>,
    #[serde(rename = "StorageEncrypted")]
    pub encrypted: Option<bool>,
    #[serde(rename = "Iops")]
    pub iops: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(rename = "BackupWindow")]
    pub window: Option<String>,
    #[serde(rename = "BackupRetentionPeriod")]
    pub retention_days: Option<i32>,
}

/// Aurora Serverless v2 capacity range in ACUs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerlessV2Config {
    #[serde(rename = "MinCapacity")]
    pub min_capacity: Option<f64>,
    #[serde(rename = "MaxCapacity")]
    pub max_capacity: Option<f64>,
}

impl ServerlessV2Config {
    /// Scaling configuration is only meaningful for Aurora engines that report one.
    pub fn for_engine(
        engine: Option<&str>,
        min_capacity: Option<f64>,
        max_capacity: Option<f64>,
    ) -> Option<Self> {
        let is_aurora = engine.is_some_and(|e| e.starts_with("aurora"));
        if !is_aurora || (min_capacity.is_none() && max_capacity.is_none()) {
            return None;
        }

        Some(Self {
            min_capacity,
            max_capacity,
        })
    }
}

/// One RDS instance observed in one region of one account.
///
/// Carries its own `AccountId` and `Region` so an entry stays meaningful when
/// pulled out of its snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbInstanceRecord {
    #[serde(rename = "AccountId")]
    pub account_id: String,
    #[serde(rename = "Region")]
    pub region: String,
    #[serde(rename = "DBInstanceIdentifier")]
    pub identifier: String,
    #[serde(rename = "DBInstanceArn")]
    pub arn: Option<String>,
    #[serde(rename = "DBInstanceStatus")]
    pub status: Option<String>,
    #[serde(rename = "Engine")]
    pub engine: Option<String>,
    #[serde(rename = "EngineVersion")]
    pub engine_version: Option<String>,
    #[serde(rename = "DBInstanceClass")]
    pub instance_class: Option<String>,
    #[serde(rename = "DBClusterIdentifier")]
    pub cluster_identifier: Option<String>,
    #[serde(rename = "MultiAZ")]
    pub multi_az: Option<bool>,
    #[serde(flatten)]
    pub storage: StorageInfo,
    #[serde(flatten)]
    pub backup: BackupConfig,
    #[serde(rename = "MaintenanceWindow")]
    pub maintenance_window: Option<String>,
    #[serde(rename = "AutoMinorVersionUpgrade")]
    pub auto_minor_version_upgrade: Option<bool>,
    #[serde(rename = "LatestRestorableTime")]
    pub latest_restorable_time: Option<String>,
    #[serde(rename = "ServerlessConfig")]
    pub serverless_v2_config: Option<ServerlessV2Config>,
    #[serde(rename = "Tags")]
    pub tags: BTreeMap<String, String>,
}

impl DbInstanceRecord {
    /// Minimal record with every optional attribute unset.
    pub fn new(account_id: &str, region: &str, identifier: impl Into<String>) -> Self {
        Self {
            account_id: account_id.to_string(),
            region: region.to_string(),
            identifier: identifier.into(),
            arn: None,
            status: None,
            engine: None,
            engine_version: None,
            instance_class: None,
            cluster_identifier: None,
            multi_az: None,
            storage: StorageInfo::default(),
            backup: BackupConfig::default(),
            maintenance_window: None,
            auto_minor_version_upgrade: None,
            latest_restorable_time: None,
            serverless_v2_config: None,
            tags: BTreeMap::new(),
        }
    }
}

/// Per-account point-in-time inventory document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Localized display time, e.g. `2026-10-19 08:00:00 KST`
    pub timestamp: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub collected_at: DateTime<Utc>,
    pub account_id: String,
    pub total_instances: i64,
    pub instances: Vec<DbInstanceRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serverless_config_only_for_aurora() {
        assert!(ServerlessV2Config::for_engine(Some("mysql"), Some(0.5), Some(4.0)).is_none());
        assert!(ServerlessV2Config::for_engine(None, Some(0.5), Some(4.0)).is_none());

        let config = ServerlessV2Config::for_engine(Some("aurora-postgresql"), Some(0.5), Some(4.0))
            .expect("aurora engine with capacity should produce config");
        assert_eq!(config.min_capacity, Some(0.5));
        assert_eq!(config.max_capacity, Some(4.0));
    }

    #[test]
    fn test_serverless_config_requires_capacity() {
        assert!(ServerlessV2Config::for_engine(Some("aurora-mysql"), None, None).is_none());
    }

    #[test]
    fn test_record_document_field_names() {
        let mut record = DbInstanceRecord::new("111111111111", "ap-northeast-2", "orders-db");
        record.engine = Some("aurora-mysql".to_string());
        record.storage.storage_type = Some("aurora".to_string());
        record.backup.retention_days = Some(7);
        record
            .tags
            .insert("team".to_string(), "payments".to_string());

        let value = serde_json::to_value(&record).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object["AccountId"], "111111111111");
        assert_eq!(object["Region"], "ap-northeast-2");
        assert_eq!(object["DBInstanceIdentifier"], "orders-db");
        assert_eq!(object["Engine"], "aurora-mysql");
        // storage and backup settings are flattened into the instance entry
        assert_eq!(object["StorageType"], "aurora");
        assert_eq!(object["BackupRetentionPeriod"], 7);
        assert_eq!(object["Tags"]["team"], "payments");
        assert!(object["ServerlessConfig"].is_null());
        assert!(!object.contains_key("storage"));
    }

    #[test]
    fn test_snapshot_document_shape() {
        let snapshot = Snapshot {
            timestamp: "2026-10-19 08:00:00 KST".to_string(),
            collected_at: DateTime::from_timestamp(1_792_364_400, 0).unwrap(),
            account_id: "111111111111".to_string(),
            total_instances: 0,
            instances: vec![],
        };

        let document = bson::to_document(&snapshot).unwrap();
        assert_eq!(document.get_str("account_id").unwrap(), "111111111111");
        assert_eq!(document.get_i64("total_instances").unwrap(), 0);
        assert!(document.get_datetime("collected_at").is_ok());
        assert!(document.get_array("instances").unwrap().is_empty());
    }
}
