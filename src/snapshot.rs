use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::models::{DbInstanceRecord, Snapshot};

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// Records collected from one region of an account.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionRecords {
    pub region: String,
    pub records: Vec<DbInstanceRecord>,
}

impl RegionRecords {
    pub fn new(region: impl Into<String>, records: Vec<DbInstanceRecord>) -> Self {
        Self {
            region: region.into(),
            records,
        }
    }
}

/// Assembles per-account snapshots. No I/O; output depends only on inputs.
#[derive(Debug, Clone, Copy)]
pub struct DocumentBuilder {
    timezone: Tz,
}

impl DocumentBuilder {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    /// Human-readable local time, e.g. `2026-10-19 08:00:00 KST`.
    pub fn display_time(&self, instant: DateTime<Utc>) -> String {
        instant
            .with_timezone(&self.timezone)
            .format(DISPLAY_FORMAT)
            .to_string()
    }

    /// Flatten region results in the given order into one snapshot.
    pub fn build(
        &self,
        account_id: &str,
        collected_at: DateTime<Utc>,
        per_region: Vec<RegionRecords>,
    ) -> Snapshot {
        let instances: Vec<DbInstanceRecord> = per_region
            .into_iter()
            .flat_map(|region| region.records)
            .collect();

        Snapshot {
            timestamp: self.display_time(collected_at),
            collected_at,
            account_id: account_id.to_string(),
            total_instances: instances.len() as i64,
            instances,
        }
    }
}
