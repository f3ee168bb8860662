//! Document store abstraction.
//!
//! The query core talks to the database through three object-safe traits:
//! [`DocumentStore`] (database handle), [`DocumentCollection`] (one physical
//! collection), and [`DocumentCursor`] (a live result cursor). The MongoDB
//! driver backend lives in [`mongo`] behind the `mongodb` feature; an
//! embedded in-memory backend with a query-time filter evaluator lives in
//! [`memory`] and serves tests and development.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::Document;

use crate::error::StoreResult;

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

/// Suffix of history collections.
pub const HISTORY_SUFFIX: &str = "_History";

/// Explain verbosity levels understood by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplainVerbosity {
    /// Plan selection only. Cheap; available even for archived data.
    QueryPlanner,
    /// Full execution statistics for all candidate plans.
    AllPlansExecution,
}

impl ExplainVerbosity {
    /// The wire name of this verbosity level.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplainVerbosity::QueryPlanner => "queryPlanner",
            ExplainVerbosity::AllPlansExecution => "allPlansExecution",
        }
    }
}

/// Typed find options built immutably stage by stage.
///
/// This replaces the loosely-typed mutable `options` document of a dynamic
/// driver binding: each pipeline stage returns a new value, and the final
/// shape is checkable at compile time. `sort` and `projection` remain BSON
/// documents because field order is significant to the database.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Field projection (include-style).
    pub projection: Option<Document>,
    /// Ordered sort specification (`1` ascending, `-1` descending).
    pub sort: Option<Document>,
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<i64>,
    /// Driver cursor batch size.
    pub batch_size: Option<u32>,
    /// Name of an index to hint.
    pub hint: Option<String>,
    /// Server-side execution time budget.
    pub max_time: Option<Duration>,
}

impl QueryOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the projection.
    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Sets the sort specification.
    pub fn with_sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Sets the skip count.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sets the result limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the cursor batch size.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Sets the index hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Sets the server-side time budget.
    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    /// Returns `true` if the sort specification names the field.
    pub fn sort_contains(&self, field: &str) -> bool {
        self.sort
            .as_ref()
            .map(|s| s.contains_key(field))
            .unwrap_or(false)
    }
}

/// A database handle exposing collections by name.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// The logical database name (for diagnostics).
    fn database_name(&self) -> &str;

    /// Returns a handle to the named collection.
    ///
    /// Collections are created lazily on first write; obtaining a handle is
    /// always cheap and never fails.
    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection>;

    /// Lists the names of all existing collections.
    async fn list_collection_names(&self) -> StoreResult<Vec<String>>;
}

/// One physical collection.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    /// The collection name.
    fn name(&self) -> &str;

    /// The owning database name.
    fn database_name(&self) -> &str;

    /// Issues a find and returns a live cursor.
    async fn find(
        &self,
        filter: Document,
        options: QueryOptions,
    ) -> StoreResult<Box<dyn DocumentCursor>>;

    /// Exact count of documents matching the filter.
    async fn count_documents(&self, filter: Document) -> StoreResult<u64>;

    /// Fast estimated count from collection metadata.
    async fn estimated_document_count(&self) -> StoreResult<u64>;

    /// Runs the query through the server's explain machinery.
    async fn explain(
        &self,
        filter: Document,
        options: QueryOptions,
        verbosity: ExplainVerbosity,
    ) -> StoreResult<Document>;
}

/// A live result cursor.
#[async_trait]
pub trait DocumentCursor: Send {
    /// Moves to the next document. Returns `false` when exhausted.
    async fn advance(&mut self) -> StoreResult<bool>;

    /// The document at the current position.
    ///
    /// Only valid after `advance` returned `true`.
    fn current(&self) -> StoreResult<Document>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_query_options_builder() {
        let options = QueryOptions::new()
            .with_sort(doc! { "meta.lastUpdated": -1, "id": 1 })
            .with_limit(10)
            .with_skip(20)
            .with_max_time(Duration::from_secs(30));

        assert!(options.sort_contains("id"));
        assert!(!options.sort_contains("name"));
        assert_eq!(options.limit, Some(10));
        assert_eq!(options.skip, Some(20));
    }

    #[test]
    fn test_explain_verbosity_names() {
        assert_eq!(ExplainVerbosity::QueryPlanner.as_str(), "queryPlanner");
        assert_eq!(
            ExplainVerbosity::AllPlansExecution.as_str(),
            "allPlansExecution"
        );
    }
}
