//! Process-wide partition name cache.
//!
//! Partitions are discovered lazily from the database's live collection list
//! and cached in-process with a daily refresh. The refresh day is an atomic
//! generation stamp: readers race-check it without locking, and queued
//! refresh waiters re-check it after acquiring the refresh mutex so only one
//! of them enumerates collections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{Datelike, Utc};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::error::DataStoreResult;
use crate::store::{DocumentStore, HISTORY_SUFFIX};

use super::strategy::PartitionSettings;

const NEVER_REFRESHED: i64 = i64::MIN;

/// Cached map from resource type to its ordered partition name list.
pub struct PartitionCache {
    partitions: RwLock<HashMap<String, Vec<String>>>,
    refresh_lock: Mutex<()>,
    last_refresh_day: AtomicI64,
}

impl PartitionCache {
    /// Creates an empty, never-refreshed cache.
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            refresh_lock: Mutex::new(()),
            last_refresh_day: AtomicI64::new(NEVER_REFRESHED),
        }
    }

    /// Reloads the cache from the store's collection list at most once per
    /// UTC calendar day.
    pub async fn ensure_fresh(
        &self,
        store: &dyn DocumentStore,
        settings: &PartitionSettings,
    ) -> DataStoreResult<()> {
        let today = utc_day_stamp();
        if self.last_refresh_day.load(Ordering::Acquire) == today {
            return Ok(());
        }

        let _guard = self.refresh_lock.lock().await;
        // A queued waiter may find the refresh already done.
        if self.last_refresh_day.load(Ordering::Acquire) == today {
            return Ok(());
        }

        let names = store.list_collection_names().await?;
        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for name in names {
            if name.ends_with(HISTORY_SUFFIX) {
                continue;
            }
            let resource_type = match name.split('_').next() {
                Some(prefix) if !prefix.is_empty() => prefix.to_string(),
                _ => continue,
            };
            grouped.entry(resource_type).or_default().push(name);
        }
        for (resource_type, partitions) in &mut grouped {
            settings.sort_partitions(resource_type, partitions);
        }

        *self.partitions.write() = grouped;
        self.last_refresh_day.store(today, Ordering::Release);
        tracing::debug!("partition cache refreshed");
        Ok(())
    }

    /// Returns the cached partitions for a resource type, most recent first
    /// for time-partitioned types.
    pub fn partitions_for(&self, resource_type: &str) -> Vec<String> {
        self.partitions
            .read()
            .get(resource_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Registers newly observed partitions. Idempotent; re-sorts with the
    /// resource type's comparator after insertion.
    pub fn add_partitions(
        &self,
        resource_type: &str,
        names: impl IntoIterator<Item = String>,
        settings: &PartitionSettings,
    ) {
        let mut partitions = self.partitions.write();
        let entry = partitions.entry(resource_type.to_string()).or_default();
        let mut changed = false;
        for name in names {
            if !entry.contains(&name) {
                entry.push(name);
                changed = true;
            }
        }
        if changed {
            settings.sort_partitions(resource_type, entry);
        }
    }

    /// Forces the next `ensure_fresh` to reload.
    pub fn mark_stale(&self) {
        self.last_refresh_day
            .store(NEVER_REFRESHED, Ordering::Release);
    }
}

impl Default for PartitionCache {
    fn default() -> Self {
        Self::new()
    }
}

fn utc_day_stamp() -> i64 {
    i64::from(Utc::now().date_naive().num_days_from_ce())
}
