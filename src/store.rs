use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Sentinel recorded when a request failed at the network level and never
/// produced an HTTP status.
pub const ERROR_STATUS_LABEL: &str = "ERR";

/// Outcome label of a terminal event. `None` upstream means the outcome is
/// unknown and is recorded as such.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalStatus {
    Code(u16),
    NetworkError,
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::NetworkError => f.write_str(ERROR_STATUS_LABEL),
        }
    }
}

/// Rolling statistics for one (method, endpoint) pair within a tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Stringified HTTP status or `"ERR"`; stays `None` until a terminal
    /// event with a known outcome arrives.
    pub last_status: Option<String>,
    pub status_counts: HashMap<String, u64>,
    pub size_known_count: u64,
    pub size_sum: u64,
    pub last_size: Option<u64>,
}

impl EndpointRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            first_seen: now,
            last_seen: now,
            last_status: None,
            status_counts: HashMap::new(),
            size_known_count: 0,
            size_sum: 0,
            last_size: None,
        }
    }

    /// Average of the known response sizes. Derived on demand, never stored.
    pub fn average_size(&self) -> Option<f64> {
        if self.size_known_count == 0 {
            return None;
        }
        Some(self.size_sum as f64 / self.size_known_count as f64)
    }
}

/// One tab's aggregation table: records by key plus the insertion order of
/// those keys, most-recent-first. `order` drives eviction; updating an
/// existing key does not move it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabTable {
    pub items: HashMap<String, EndpointRecord>,
    pub order: Vec<String>,
}

impl TabTable {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub fn record_key(method: &str, endpoint: &str) -> String {
    format!("{method} {endpoint}")
}

/// Session-lifetime key-value persistence for tab tables, keyed
/// `"tab:<tabId>"`. Get/set/remove is all the aggregation layer needs.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn get(&self, tab_id: i64) -> anyhow::Result<Option<TabTable>>;
    async fn set(&self, tab_id: i64, table: &TabTable) -> anyhow::Result<()>;
    async fn remove(&self, tab_id: i64) -> anyhow::Result<()>;
}

fn storage_key(tab_id: i64) -> String {
    format!("tab:{tab_id}")
}

/// In-memory store holding serialized tables, mirroring the host's
/// session-scoped storage area. Values round-trip through JSON so the tables
/// stay serialization-clean.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryTableStore {
    /// Tab ids currently holding a table. Diagnostic surface for the CLI;
    /// not part of the store contract.
    pub fn tab_ids(&self) -> Vec<i64> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut ids: Vec<i64> = entries
            .keys()
            .filter_map(|key| key.strip_prefix("tab:"))
            .filter_map(|raw| raw.parse().ok())
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn get(&self, tab_id: i64) -> anyhow::Result<Option<TabTable>> {
        let serialized = {
            let entries = self
                .entries
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries.get(&storage_key(tab_id)).cloned()
        };
        let Some(serialized) = serialized else {
            return Ok(None);
        };
        let table = serde_json::from_str(&serialized)
            .with_context(|| format!("deserialize stored table for tab {tab_id}"))?;
        Ok(Some(table))
    }

    async fn set(&self, tab_id: i64, table: &TabTable) -> anyhow::Result<()> {
        let serialized = serde_json::to_string(table)
            .with_context(|| format!("serialize table for tab {tab_id}"))?;
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(storage_key(tab_id), serialized);
        Ok(())
    }

    async fn remove(&self, tab_id: i64) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.remove(&storage_key(tab_id));
        Ok(())
    }
}

/// Upsert pipeline over a [`TableStore`].
///
/// Store reads and writes suspend, so a tab's read-mutate-write sequence runs
/// under that tab's async mutex; two terminal events for the same tab
/// serialize instead of losing an update. Different tabs never contend.
pub struct AggregationStore {
    store: Arc<dyn TableStore>,
    tab_locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl AggregationStore {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self {
            store,
            tab_locks: Mutex::new(HashMap::new()),
        }
    }

    fn tab_lock(&self, tab_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .tab_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(tab_id).or_default())
    }

    /// Folds one terminal event into the tab's table and persists it.
    pub async fn upsert(
        &self,
        tab_id: i64,
        method: &str,
        endpoint: &str,
        status: Option<TerminalStatus>,
        size_bytes: Option<u64>,
        max_records_per_tab: usize,
    ) -> anyhow::Result<()> {
        let lock = self.tab_lock(tab_id);
        let _guard = lock.lock().await;

        let mut table = self.store.get(tab_id).await?.unwrap_or_default();
        let key = record_key(method, endpoint);
        let now = Utc::now();

        let record = match table.items.entry(key.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                table.order.insert(0, key.clone());
                entry.insert(EndpointRecord::new(now))
            }
        };

        record.count += 1;
        record.last_seen = now;
        if let Some(status) = status {
            let label = status.to_string();
            record.last_status = Some(label.clone());
            *record.status_counts.entry(label).or_insert(0) += 1;
        }
        if let Some(size) = size_bytes {
            record.last_size = Some(size);
            record.size_known_count += 1;
            record.size_sum += size;
        }

        // Insertion-order eviction from the tail of `order`; a busy old key
        // goes just as readily as a stale one.
        while table.order.len() > max_records_per_tab {
            if let Some(evicted) = table.order.pop() {
                table.items.remove(&evicted);
                debug!(tab_id, key = %evicted, "evicted oldest endpoint record");
            }
        }

        self.store.set(tab_id, &table).await
    }

    /// The tab's current table; unknown tabs read as empty, not as an error.
    pub async fn table(&self, tab_id: i64) -> anyhow::Result<TabTable> {
        Ok(self.store.get(tab_id).await?.unwrap_or_default())
    }

    /// Replaces the tab's table with an empty one.
    pub async fn clear(&self, tab_id: i64) -> anyhow::Result<()> {
        let lock = self.tab_lock(tab_id);
        let _guard = lock.lock().await;
        self.store.set(tab_id, &TabTable::default()).await
    }

    /// Drops the tab's table entirely; invoked on tab closure. The tab's
    /// mutex stays in the lock map so a straggling upsert still serializes
    /// against the removal.
    pub async fn remove(&self, tab_id: i64) -> anyhow::Result<()> {
        let lock = self.tab_lock(tab_id);
        let _guard = lock.lock().await;
        self.store.remove(tab_id).await
    }
}
