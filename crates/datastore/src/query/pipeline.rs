//! Cursor pipeline builder.
//!
//! [`SearchPipeline`] composes every query-shaping concern into one
//! executable cursor: `_elements` projection, `_sort`, `_count` and
//! `_getpagesoffset` paging, the mandatory `id` sort tiebreaker, the
//! opt-in two-step id-then-document optimization, bounded retry, batch
//! sizing, index hinting, and `_total` counting. [`SearchExecutor`] layers
//! partition resolution on top, issuing one pipeline per target collection.

use std::collections::BTreeSet;
use std::sync::Arc;

use bson::{Document, doc};

use crate::config::DataLayerConfig;
use crate::error::DataStoreResult;
use crate::mapper::{BsonResourceMapper, ResourceMapper};
use crate::ops::{AlertChannel, NullAlertChannel};
use crate::partition::PartitionResolver;
use crate::query::cursor::{RETRY_ATTEMPTS, ResourceCursor, find_with_retry};
use crate::query::hints::IndexHintConfig;
use crate::store::{DocumentCollection, DocumentStore, QueryOptions};

/// `_total` counting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TotalMode {
    /// No total requested.
    #[default]
    None,
    /// Exact count against the query filter.
    Accurate,
    /// Fast estimated count from collection metadata.
    Estimate,
}

impl TotalMode {
    /// Parses the `_total` argument value; unknown values count as none.
    pub fn parse(value: &str) -> TotalMode {
        match value {
            "accurate" => TotalMode::Accurate,
            "estimate" => TotalMode::Estimate,
            _ => TotalMode::None,
        }
    }
}

/// Caller-facing search arguments consumed by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    /// `_elements`: restrict the projection to these fields.
    pub elements: Option<Vec<String>>,
    /// `_sort`: sort fields, `-` prefix for descending.
    pub sort: Option<Vec<String>>,
    /// `_count`: page size.
    pub count: Option<u32>,
    /// `_getpagesoffset`: page number (skip = offset * count).
    pub page_offset: Option<u64>,
    /// `id` search values, when the caller filters by logical id.
    pub id: Option<Vec<String>>,
    /// `_total`: total counting mode.
    pub total: TotalMode,
    /// `_useTwoStepOptimization`: explicit two-step override.
    pub two_step: Option<bool>,
    /// `_cursorBatchSize`: explicit driver batch size.
    pub cursor_batch_size: Option<u32>,
    /// Explicit index-hint override.
    pub use_index_hints: Option<bool>,
}

impl SearchArgs {
    /// Creates empty arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `_elements`.
    pub fn with_elements<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements = Some(elements.into_iter().map(Into::into).collect());
        self
    }

    /// Sets `_sort`.
    pub fn with_sort<I, S>(mut self, sort: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sort = Some(sort.into_iter().map(Into::into).collect());
        self
    }

    /// Sets `_count`.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets `_getpagesoffset`.
    pub fn with_page_offset(mut self, offset: u64) -> Self {
        self.page_offset = Some(offset);
        self
    }

    /// Sets the `_total` mode.
    pub fn with_total(mut self, total: TotalMode) -> Self {
        self.total = total;
        self
    }

    /// Sets the two-step override.
    pub fn with_two_step(mut self, enabled: bool) -> Self {
        self.two_step = Some(enabled);
        self
    }
}

/// Per-collection execution context for one pipeline run.
pub struct SearchContext {
    /// The target collection.
    pub collection: Arc<dyn DocumentCollection>,
    /// The resource type being searched.
    pub resource_type: String,
    /// The FHIR base version.
    pub base_version: String,
    /// `true` when the caller streams results (no default limit applied).
    pub streaming: bool,
    /// `true` when the collection's `_access` index may be used.
    pub use_access_index: bool,
    /// Runtime configuration.
    pub config: Arc<DataLayerConfig>,
    /// Static index-hint table.
    pub hints: Arc<IndexHintConfig>,
    /// Raw-document mapper for typed accessors.
    pub mapper: Arc<dyn ResourceMapper>,
    /// Operational alert channel.
    pub alerts: Arc<dyn AlertChannel>,
}

/// The composite result of a pipeline run.
///
/// Carries the final and original (pre-mutation) query/options pairs for
/// diagnostic echoing.
pub struct QueryPlan {
    /// The executable cursor, or `None` when the two-step optimization
    /// proved the result empty upfront.
    pub cursor: Option<ResourceCursor>,
    /// The resolved index hint, if any.
    pub index_hint: Option<String>,
    /// Whether the two-step optimization ran.
    pub used_two_step: bool,
    /// The columns touched by sort and projection.
    pub columns: BTreeSet<String>,
    /// The total count, when `_total` requested one.
    pub total: Option<u64>,
    /// The final filter issued to the store.
    pub query: Document,
    /// The final options issued to the store.
    pub options: QueryOptions,
    /// The filter as received, before pipeline mutation.
    pub original_query: Document,
    /// The options as received, before pipeline mutation.
    pub original_options: QueryOptions,
}

/// Builds executable cursors for one collection.
pub struct SearchPipeline {
    context: SearchContext,
}

impl SearchPipeline {
    /// Creates a pipeline over the given execution context.
    pub fn new(context: SearchContext) -> Self {
        Self { context }
    }

    /// Composes the query plan and executes the find.
    pub async fn build(
        &self,
        args: &SearchArgs,
        query: Document,
        options: QueryOptions,
    ) -> DataStoreResult<QueryPlan> {
        let context = &self.context;
        let original_query = query.clone();
        let original_options = options.clone();
        let mut columns: BTreeSet<String> = BTreeSet::new();
        let mut options = options;

        // 1. _elements projection. meta.security.system/code are always
        // carried for post-fetch security checks, except in the single-`id`
        // covering case where their presence would defeat index-only
        // satisfaction.
        if let Some(elements) = &args.elements {
            let covering = context.use_access_index
                && context.resource_type != "Library"
                && elements.len() == 1
                && elements[0] == "id";
            let mut projection = Document::new();
            for field in elements {
                projection.insert(field.clone(), 1);
                columns.insert(field.clone());
            }
            // Library consumers require id and url present regardless.
            if context.resource_type == "Library" {
                for field in ["id", "url"] {
                    if !projection.contains_key(field) {
                        projection.insert(field, 1);
                        columns.insert(field.to_string());
                    }
                }
            }
            if !covering {
                projection.insert("meta.security.system", 1);
                projection.insert("meta.security.code", 1);
            }
            options = options.with_projection(projection);
        }

        // 2. _sort.
        if let Some(sort_args) = &args.sort {
            let mut sort = Document::new();
            for entry in sort_args {
                match entry.strip_prefix('-') {
                    Some(field) => {
                        sort.insert(field, -1);
                        columns.insert(field.to_string());
                    }
                    None => {
                        sort.insert(entry.clone(), 1);
                        columns.insert(entry.clone());
                    }
                }
            }
            options = options.with_sort(sort);
        }

        // 3. _count / _getpagesoffset. Absent _count on a non-streaming
        // request still gets a default limit to bound memory.
        if let Some(count) = args.count {
            options = options.with_limit(i64::from(count.min(context.config.max_page_size)));
            if let Some(offset) = args.page_offset {
                options = options.with_skip(offset * u64::from(count));
            }
        } else if !context.streaming {
            options = options.with_limit(i64::from(context.config.default_page_size));
        }

        // 4. Deterministic tiebreaker: the store does not guarantee stable
        // ordering for ties, which breaks repeated page requests.
        let mut sort = options.sort.clone().unwrap_or_default();
        if !sort.contains_key("id") {
            sort.insert("id", 1);
        }
        options = options.with_sort(sort);
        columns.insert("id".to_string());

        if options.max_time.is_none() {
            options = options.with_max_time(context.config.query_time_budget);
        }

        // 5. Two-step id-then-document optimization.
        let two_step = args
            .two_step
            .unwrap_or(context.config.enable_two_step_optimization)
            && args.elements.is_none()
            && args.id.is_none();
        let mut query = query;
        let mut used_two_step = false;
        let mut known_empty = false;
        if two_step {
            used_two_step = true;
            let ids = self.fetch_matching_ids(&query, &options, args).await?;
            if ids.is_empty() {
                known_empty = true;
            } else {
                query = if ids.len() == 1 {
                    doc! { "id": &ids[0] }
                } else {
                    doc! { "id": { "$in": ids } }
                };
                // Skip was consumed by the id pass. The second pass re-sorts
                // with the options sort when one is present, falling back to
                // the caller's original sort.
                options.skip = None;
                if options.sort.is_none() {
                    options.sort = original_options.sort.clone();
                }
            }
        }

        // 8. Index hint over the tracked column set.
        let hints_enabled = args
            .use_index_hints
            .unwrap_or(context.config.enable_index_hints);
        let index_hint = if hints_enabled {
            context
                .hints
                .find_index_for_fields(context.collection.name(), &columns)
        } else {
            None
        };

        // 9. _total against the pre-two-step filter.
        let total = match args.total {
            TotalMode::None => None,
            TotalMode::Accurate => Some(
                context
                    .collection
                    .count_documents(original_query.clone())
                    .await?,
            ),
            TotalMode::Estimate => Some(context.collection.estimated_document_count().await?),
        };

        let mut cursor = ResourceCursor::new(
            Arc::clone(&context.collection),
            query.clone(),
            options.clone(),
            context.resource_type.clone(),
            context.base_version.clone(),
            Arc::clone(&context.mapper),
            Arc::clone(&context.alerts),
        )
        .with_diagnostics(format!("{args:?}"))
        .with_retry_attempts(RETRY_ATTEMPTS);

        // 7. Batch size, post-construction.
        if let Some(batch_size) = args.cursor_batch_size.or(context.config.default_batch_size) {
            cursor = cursor.batch_size(batch_size);
        }
        if let Some(hint) = &index_hint {
            cursor = cursor.hint(hint.clone());
        }

        // 6. Execute with bounded retry, unless the id pass already proved
        // the result empty.
        let cursor = if known_empty {
            None
        } else {
            cursor.execute().await?;
            Some(cursor)
        };

        let options = cursor
            .as_ref()
            .map(|c| c.options().clone())
            .unwrap_or(options);

        Ok(QueryPlan {
            cursor,
            index_hint,
            used_two_step,
            columns,
            total,
            query,
            options,
            original_query,
            original_options,
        })
    }

    // First pass of the two-step optimization: same filter/sort/limit,
    // projected to id only.
    async fn fetch_matching_ids(
        &self,
        query: &Document,
        options: &QueryOptions,
        args: &SearchArgs,
    ) -> DataStoreResult<Vec<String>> {
        let id_options = options.clone().with_projection(doc! { "id": 1 });
        let mut cursor = find_with_retry(
            self.context.collection.as_ref(),
            query,
            &id_options,
            RETRY_ATTEMPTS,
            self.context.alerts.as_ref(),
            &self.context.resource_type,
            &format!("{args:?}"),
        )
        .await?;

        let mut ids = Vec::new();
        while cursor.advance().await? {
            let document = cursor.current()?;
            if let Ok(id) = document.get_str("id") {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }
}

/// Partition-aware search runner: one pipeline per target collection.
pub struct SearchExecutor {
    store: Arc<dyn DocumentStore>,
    partitions: Arc<PartitionResolver>,
    config: Arc<DataLayerConfig>,
    hints: Arc<IndexHintConfig>,
    mapper: Arc<dyn ResourceMapper>,
    alerts: Arc<dyn AlertChannel>,
}

impl SearchExecutor {
    /// Creates an executor with default mapper, hints, and alerting.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        partitions: Arc<PartitionResolver>,
        config: Arc<DataLayerConfig>,
    ) -> Self {
        Self {
            store,
            partitions,
            config,
            hints: Arc::new(IndexHintConfig::new()),
            mapper: Arc::new(BsonResourceMapper),
            alerts: Arc::new(NullAlertChannel),
        }
    }

    /// Sets the static index-hint table.
    pub fn with_hints(mut self, hints: Arc<IndexHintConfig>) -> Self {
        self.hints = hints;
        self
    }

    /// Sets the resource mapper.
    pub fn with_mapper(mut self, mapper: Arc<dyn ResourceMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    /// Sets the alert channel.
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertChannel>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Resolves the partition set for the query and runs one pipeline per
    /// partition, most recent first.
    pub async fn execute(
        &self,
        resource_type: &str,
        args: &SearchArgs,
        query: Document,
        options: QueryOptions,
        streaming: bool,
        use_access_index: bool,
    ) -> DataStoreResult<Vec<QueryPlan>> {
        let partition_names = self
            .partitions
            .partitions_for_query(resource_type, &query)
            .await?;

        let mut plans = Vec::with_capacity(partition_names.len());
        for name in partition_names {
            let context = SearchContext {
                collection: self.store.collection(&name),
                resource_type: resource_type.to_string(),
                base_version: self.partitions.base_version().to_string(),
                streaming,
                use_access_index,
                config: Arc::clone(&self.config),
                hints: Arc::clone(&self.hints),
                mapper: Arc::clone(&self.mapper),
                alerts: Arc::clone(&self.alerts),
            };
            let plan = SearchPipeline::new(context)
                .build(args, query.clone(), options.clone())
                .await?;
            plans.push(plan);
        }
        Ok(plans)
    }

    /// Convenience: executes and drains every partition cursor.
    ///
    /// Runs in streaming mode so the default page limit does not truncate
    /// the result set.
    pub async fn fetch_all(
        &self,
        resource_type: &str,
        args: &SearchArgs,
        query: Document,
        options: QueryOptions,
    ) -> DataStoreResult<Vec<Document>> {
        let plans = self
            .execute(resource_type, args, query, options, true, false)
            .await?;
        let mut documents = Vec::new();
        for mut plan in plans {
            if let Some(cursor) = plan.cursor.as_mut() {
                documents.extend(cursor.to_array().await?);
            }
        }
        Ok(documents)
    }
}
