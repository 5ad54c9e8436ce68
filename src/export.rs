use std::collections::BTreeMap;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::{AggregationStore, TabTable};

/// What the presentation layer reads: one tab's records in table order
/// (most recently added endpoint first) with the derived average size.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabSnapshot {
    pub tab_id: i64,
    pub rows: Vec<EndpointRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointRow {
    pub key: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_status: Option<String>,
    pub status_counts: BTreeMap<String, u64>,
    pub average_size: Option<f64>,
    pub last_size: Option<u64>,
}

impl TabSnapshot {
    pub fn from_table(tab_id: i64, table: &TabTable) -> Self {
        let rows = table
            .order
            .iter()
            .filter_map(|key| {
                let record = table.items.get(key)?;
                Some(EndpointRow {
                    key: key.clone(),
                    count: record.count,
                    first_seen: record.first_seen,
                    last_seen: record.last_seen,
                    last_status: record.last_status.clone(),
                    status_counts: record
                        .status_counts
                        .iter()
                        .map(|(label, count)| (label.clone(), *count))
                        .collect(),
                    average_size: record.average_size(),
                    last_size: record.last_size,
                })
            })
            .collect();
        Self { tab_id, rows }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self)
            .with_context(|| format!("serialize snapshot for tab {}", self.tab_id))
    }
}

pub async fn snapshot(store: &AggregationStore, tab_id: i64) -> anyhow::Result<TabSnapshot> {
    let table = store.table(tab_id).await?;
    Ok(TabSnapshot::from_table(tab_id, &table))
}
