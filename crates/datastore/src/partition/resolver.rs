//! Resource- and query-level partition resolution.

use std::sync::Arc;

use bson::{Bson, Document};
use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::error::{ConfigError, DataStoreResult};
use crate::store::{DocumentStore, HISTORY_SUFFIX};

use super::cache::PartitionCache;
use super::strategy::{PartitionSettings, PartitionStrategy};

// Bounds for the month walk when a query range is open on one side.
const RANGE_FLOOR: (i32, u32) = (2010, 1);
const RANGE_CEILING: (i32, u32) = (2030, 1);

/// Maps resources and query filters to physical collection names.
pub struct PartitionResolver {
    store: Arc<dyn DocumentStore>,
    settings: Arc<PartitionSettings>,
    cache: Arc<PartitionCache>,
    base_version: String,
}

impl PartitionResolver {
    /// Creates a resolver with a fresh cache.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        settings: Arc<PartitionSettings>,
        base_version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            settings,
            cache: Arc::new(PartitionCache::new()),
            base_version: base_version.into(),
        }
    }

    /// Shares an existing cache (process-wide across resolvers).
    pub fn with_cache(mut self, cache: Arc<PartitionCache>) -> Self {
        self.cache = cache;
        self
    }

    /// The FHIR base version partition names are derived from.
    pub fn base_version(&self) -> &str {
        &self.base_version
    }

    /// The partition cache backing this resolver.
    pub fn cache(&self) -> &Arc<PartitionCache> {
        &self.cache
    }

    fn base_name(&self, resource_type: &str) -> String {
        format!("{resource_type}_{}", self.base_version)
    }

    /// Resolves the partition a resource document belongs to.
    ///
    /// Unpartitioned types and partitioned resources missing the configured
    /// field both land in the plain `{type}_{version}` collection. A newly
    /// computed time-bucket name is registered into the cache.
    pub fn partition_for_resource(&self, resource: &Document) -> DataStoreResult<String> {
        let resource_type =
            resource
                .get_str("resourceType")
                .map_err(|_| ConfigError::InvalidValue {
                    name: "resourceType".to_string(),
                    message: "resource document has no resourceType".to_string(),
                })?;
        let base = self.base_name(resource_type);

        let Some(PartitionStrategy::MonthlyTimeBucket { field }) =
            self.settings.strategy_for(resource_type)
        else {
            return Ok(base);
        };
        let Some(timestamp) = extract_datetime(resource, field) else {
            return Ok(base);
        };

        let name = format!("{base}_{:04}_{:02}", timestamp.year(), timestamp.month());
        self.cache
            .add_partitions(resource_type, [name.clone()], &self.settings);
        Ok(name)
    }

    /// Resolves the set of partitions a query must visit, most recent first.
    ///
    /// Unpartitioned types always resolve to the single base collection.
    /// Time-partitioned types resolve to every cached partition, narrowed to
    /// the query's month range when the filter carries `$gt`/`$lt` clauses on
    /// the partition field.
    pub async fn partitions_for_query(
        &self,
        resource_type: &str,
        query: &Document,
    ) -> DataStoreResult<Vec<String>> {
        let base = self.base_name(resource_type);
        let Some(PartitionStrategy::MonthlyTimeBucket { field }) =
            self.settings.strategy_for(resource_type)
        else {
            return Ok(vec![base]);
        };

        self.cache
            .ensure_fresh(self.store.as_ref(), &self.settings)
            .await?;
        let cached = self.cache.partitions_for(resource_type);

        let Some((lower, upper)) = month_range_from_query(query, field) else {
            return Ok(cached);
        };

        let mut selected = Vec::new();
        let (mut year, mut month) = upper;
        while (year, month) >= lower {
            let name = format!("{base}_{year:04}_{month:02}");
            if cached.iter().any(|p| p == &name) {
                selected.push(name);
            }
            if month == 1 {
                year -= 1;
                month = 12;
            } else {
                month -= 1;
            }
        }
        Ok(selected)
    }

    /// Resolves the history partitions for a query.
    pub async fn history_partitions_for_query(
        &self,
        resource_type: &str,
        query: &Document,
    ) -> DataStoreResult<Vec<String>> {
        Ok(self
            .partitions_for_query(resource_type, query)
            .await?
            .into_iter()
            .map(|name| format!("{name}{HISTORY_SUFFIX}"))
            .collect())
    }
}

// Walks a dotted path (first value, no array fan-out) and coerces the value
// to a UTC timestamp.
fn extract_datetime(document: &Document, field: &str) -> Option<DateTime<Utc>> {
    let mut current = document;
    let mut segments = field.split('.').peekable();
    while let Some(segment) = segments.next() {
        let value = current.get(segment)?;
        if segments.peek().is_none() {
            return coerce_datetime(value);
        }
        current = value.as_document()?;
    }
    None
}

fn coerce_datetime(value: &Bson) -> Option<DateTime<Utc>> {
    match value {
        Bson::DateTime(dt) => Some(dt.to_chrono()),
        Bson::String(s) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                return Some(parsed.with_timezone(&Utc));
            }
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
            Some(DateTime::from_naive_utc_and_offset(
                date.and_hms_opt(0, 0, 0)?,
                Utc,
            ))
        }
        _ => None,
    }
}

// Extracts the [greaterThan, lessThan] month range from `$and` clauses on
// the partition field. Returns `None` when the query carries no range, which
// means every cached partition is in play.
fn month_range_from_query(
    query: &Document,
    field: &str,
) -> Option<((i32, u32), (i32, u32))> {
    let clauses = query.get_array("$and").ok()?;
    let mut lower = None;
    let mut upper = None;

    for clause in clauses {
        let Bson::Document(clause) = clause else {
            continue;
        };
        let Some(Bson::Document(condition)) = clause.get(field) else {
            continue;
        };
        for (operator, value) in condition {
            let Some(timestamp) = coerce_datetime(value) else {
                continue;
            };
            let key = (timestamp.year(), timestamp.month());
            match operator.as_str() {
                "$gt" | "$gte" => lower = Some(key),
                "$lt" | "$lte" => upper = Some(key),
                _ => {}
            }
        }
    }

    if lower.is_none() && upper.is_none() {
        return None;
    }
    Some((
        lower.unwrap_or(RANGE_FLOOR),
        upper.unwrap_or(RANGE_CEILING),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryDocumentStore;
    use bson::doc;

    fn resolver(store: Arc<MemoryDocumentStore>) -> PartitionResolver {
        let settings =
            Arc::new(PartitionSettings::new().with_time_bucket("AuditEvent", "recordedDate"));
        PartitionResolver::new(store, settings, "4_0_0")
    }

    #[test]
    fn test_partition_name_is_deterministic() {
        let store = Arc::new(MemoryDocumentStore::new("fhir"));
        let resolver = resolver(store);
        let resource = doc! {
            "resourceType": "AuditEvent",
            "id": "a1",
            "recordedDate": "2024-03-15T10:30:00Z",
        };

        let first = resolver.partition_for_resource(&resource).unwrap();
        let second = resolver.partition_for_resource(&resource).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "AuditEvent_4_0_0_2024_03");
    }

    #[test]
    fn test_unpartitioned_and_missing_field() {
        let store = Arc::new(MemoryDocumentStore::new("fhir"));
        let resolver = resolver(store);

        let patient = doc! { "resourceType": "Patient", "id": "p1" };
        assert_eq!(
            resolver.partition_for_resource(&patient).unwrap(),
            "Patient_4_0_0"
        );

        // Configured for partitioning but the field is absent.
        let audit = doc! { "resourceType": "AuditEvent", "id": "a1" };
        assert_eq!(
            resolver.partition_for_resource(&audit).unwrap(),
            "AuditEvent_4_0_0"
        );
    }

    #[test]
    fn test_new_partition_registered_in_cache() {
        let store = Arc::new(MemoryDocumentStore::new("fhir"));
        let resolver = resolver(store);
        let resource = doc! {
            "resourceType": "AuditEvent",
            "recordedDate": "2023-12-01T00:00:00Z",
        };
        resolver.partition_for_resource(&resource).unwrap();
        assert_eq!(
            resolver.cache().partitions_for("AuditEvent"),
            vec!["AuditEvent_4_0_0_2023_12"]
        );
    }

    #[tokio::test]
    async fn test_query_without_range_returns_all_cached() {
        let store = Arc::new(MemoryDocumentStore::new("fhir"));
        store.open("AuditEvent_4_0_0_2024_01");
        store.open("AuditEvent_4_0_0_2024_03");
        let resolver = resolver(store);

        let partitions = resolver
            .partitions_for_query("AuditEvent", &doc! {})
            .await
            .unwrap();
        assert_eq!(
            partitions,
            vec!["AuditEvent_4_0_0_2024_03", "AuditEvent_4_0_0_2024_01"]
        );
    }

    #[tokio::test]
    async fn test_query_range_narrows_partitions() {
        let store = Arc::new(MemoryDocumentStore::new("fhir"));
        for month in ["2024_01", "2024_02", "2024_03", "2024_04"] {
            store.open(&format!("AuditEvent_4_0_0_{month}"));
        }
        let resolver = resolver(store);

        let query = doc! { "$and": [
            { "recordedDate": { "$gt": "2024-02-10T00:00:00Z" } },
            { "recordedDate": { "$lt": "2024-03-20T00:00:00Z" } },
        ]};
        let partitions = resolver
            .partitions_for_query("AuditEvent", &query)
            .await
            .unwrap();
        assert_eq!(
            partitions,
            vec!["AuditEvent_4_0_0_2024_03", "AuditEvent_4_0_0_2024_02"]
        );
    }

    #[tokio::test]
    async fn test_query_range_outside_cache_is_empty() {
        let store = Arc::new(MemoryDocumentStore::new("fhir"));
        store.open("AuditEvent_4_0_0_2024_01");
        let resolver = resolver(store);

        let query = doc! { "$and": [
            { "recordedDate": { "$gt": "2020-01-01T00:00:00Z" } },
            { "recordedDate": { "$lt": "2020-06-01T00:00:00Z" } },
        ]};
        let partitions = resolver
            .partitions_for_query("AuditEvent", &query)
            .await
            .unwrap();
        assert!(partitions.is_empty());
    }

    #[tokio::test]
    async fn test_unpartitioned_query_resolution() {
        let store = Arc::new(MemoryDocumentStore::new("fhir"));
        let resolver = resolver(store);
        let partitions = resolver
            .partitions_for_query("Patient", &doc! { "id": "p1" })
            .await
            .unwrap();
        assert_eq!(partitions, vec!["Patient_4_0_0"]);
    }

    #[tokio::test]
    async fn test_history_partitions() {
        let store = Arc::new(MemoryDocumentStore::new("fhir"));
        let resolver = resolver(store);
        let partitions = resolver
            .history_partitions_for_query("Patient", &doc! {})
            .await
            .unwrap();
        assert_eq!(partitions, vec!["Patient_4_0_0_History"]);
    }
}
