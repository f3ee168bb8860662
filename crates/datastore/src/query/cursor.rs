//! Uniform cursor wrapper.
//!
//! [`ResourceCursor`] wraps a collection handle plus the originating query
//! for diagnostics, executing the find lazily on first use with a bounded
//! retry against transient driver failures. Configuration passthroughs
//! (`project`, `sort`, `batch_size`, `hint`, `limit`, `max_time`) mutate the
//! pending options and return the wrapper for chaining, so they must be
//! applied before the first document is read.

use std::sync::Arc;
use std::time::Duration;

use bson::Document;

use crate::error::{DataStoreResult, StoreError, StoreResult};
use crate::mapper::{ResourceMapper, ResourceObject};
use crate::ops::AlertChannel;
use crate::store::{DocumentCollection, DocumentCursor, ExplainVerbosity, QueryOptions};

/// Number of attempts for the find call, including the first.
pub const RETRY_ATTEMPTS: u32 = 5;

enum CursorState {
    Pending,
    Active(Box<dyn DocumentCursor>),
    Empty,
}

/// An async iteration/mapping interface over a database cursor.
pub struct ResourceCursor {
    collection: Arc<dyn DocumentCollection>,
    filter: Document,
    options: QueryOptions,
    resource_type: String,
    base_version: String,
    mapper: Arc<dyn ResourceMapper>,
    alerts: Arc<dyn AlertChannel>,
    retry_attempts: u32,
    diagnostics: String,
    state: CursorState,
    buffered: Option<Document>,
}

impl ResourceCursor {
    /// Creates a lazy cursor over the given collection and filter.
    pub fn new(
        collection: Arc<dyn DocumentCollection>,
        filter: Document,
        options: QueryOptions,
        resource_type: impl Into<String>,
        base_version: impl Into<String>,
        mapper: Arc<dyn ResourceMapper>,
        alerts: Arc<dyn AlertChannel>,
    ) -> Self {
        Self {
            collection,
            filter,
            options,
            resource_type: resource_type.into(),
            base_version: base_version.into(),
            mapper,
            alerts,
            retry_attempts: RETRY_ATTEMPTS,
            diagnostics: String::new(),
            state: CursorState::Pending,
            buffered: None,
        }
    }

    /// The resource type this cursor was issued for.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// The FHIR base version this cursor was issued for.
    pub fn base_version(&self) -> &str {
        &self.base_version
    }

    /// The filter this cursor will execute.
    pub fn query(&self) -> &Document {
        &self.filter
    }

    /// The pending find options.
    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Attaches a caller-args description used in retry alerts.
    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = diagnostics.into();
        self
    }

    /// Overrides the retry budget.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Sets the field projection.
    pub fn project(mut self, projection: Document) -> Self {
        self.options = self.options.with_projection(projection);
        self
    }

    /// Sets the sort specification.
    pub fn sort(mut self, sort: Document) -> Self {
        self.options = self.options.with_sort(sort);
        self
    }

    /// Sets the cursor batch size.
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.options = self.options.with_batch_size(batch_size);
        self
    }

    /// Sets the index hint.
    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.options = self.options.with_hint(hint);
        self
    }

    /// Sets the result limit.
    pub fn limit(mut self, limit: i64) -> Self {
        self.options = self.options.with_limit(limit);
        self
    }

    /// Sets the server-side time budget.
    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.options = self.options.with_max_time(max_time);
        self
    }

    /// Marks the cursor as known-empty.
    ///
    /// Used when the pipeline has already determined there is nothing to
    /// return (the two-step optimization's zero-id case): `has_next` reports
    /// `false` without a round trip.
    pub fn set_empty(&mut self) {
        self.state = CursorState::Empty;
        self.buffered = None;
    }

    /// Issues the find if it has not run yet, applying the retry policy.
    pub async fn execute(&mut self) -> DataStoreResult<()> {
        if matches!(self.state, CursorState::Pending) {
            let cursor = find_with_retry(
                self.collection.as_ref(),
                &self.filter,
                &self.options,
                self.retry_attempts,
                self.alerts.as_ref(),
                &self.resource_type,
                &self.diagnostics,
            )
            .await
            .map_err(|e| self.wrap(e))?;
            self.state = CursorState::Active(cursor);
        }
        Ok(())
    }

    /// Returns `true` if another document is available.
    pub async fn has_next(&mut self) -> DataStoreResult<bool> {
        if self.buffered.is_some() {
            return Ok(true);
        }
        if matches!(self.state, CursorState::Empty) {
            return Ok(false);
        }
        self.execute().await?;
        let CursorState::Active(cursor) = &mut self.state else {
            return Ok(false);
        };
        if cursor.advance().await.map_err(wrap_with(&self.filter))? {
            self.buffered = Some(cursor.current().map_err(wrap_with(&self.filter))?);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Returns the next raw document.
    ///
    /// Documents that lack both `resourceType` and `resource` keys (partials
    /// produced by an `_elements` projection) get `resourceType` assigned
    /// from the cursor's own resource type.
    pub async fn next(&mut self) -> DataStoreResult<Option<Document>> {
        if !self.has_next().await? {
            return Ok(None);
        }
        let Some(mut document) = self.buffered.take() else {
            return Ok(None);
        };
        if !document.contains_key("resourceType") && !document.contains_key("resource") {
            document.insert("resourceType", self.resource_type.clone());
        }
        Ok(Some(document))
    }

    /// Returns the next document mapped to a typed resource object.
    pub async fn next_object(&mut self) -> DataStoreResult<Option<ResourceObject>> {
        Ok(self
            .next()
            .await?
            .map(|d| self.mapper.map_document(&d, &self.resource_type)))
    }

    /// Drains the cursor into a vector of raw documents.
    pub async fn to_array(&mut self) -> DataStoreResult<Vec<Document>> {
        let mut results = Vec::new();
        while let Some(document) = self.next().await? {
            results.push(document);
        }
        Ok(results)
    }

    /// Drains the cursor into a vector of typed resource objects.
    pub async fn to_object_array(&mut self) -> DataStoreResult<Vec<ResourceObject>> {
        let mut results = Vec::new();
        while let Some(object) = self.next_object().await? {
            results.push(object);
        }
        Ok(results)
    }

    /// Runs this query through the server's explain machinery.
    ///
    /// AuditEvent queries request plan-selection verbosity only: archived
    /// AuditEvent data cannot produce execution statistics at full verbosity.
    pub async fn explain(&self) -> DataStoreResult<Document> {
        let verbosity = if self.resource_type == "AuditEvent" {
            ExplainVerbosity::QueryPlanner
        } else {
            ExplainVerbosity::AllPlansExecution
        };
        self.collection
            .explain(self.filter.clone(), self.options.clone(), verbosity)
            .await
            .map_err(|e| self.wrap(e))
    }

    fn wrap(&self, error: StoreError) -> crate::error::DataStoreError {
        error.with_query(self.filter.to_string()).into()
    }
}

fn wrap_with<'a>(
    filter: &'a Document,
) -> impl Fn(StoreError) -> crate::error::DataStoreError + 'a {
    move |e| e.with_query(filter.to_string()).into()
}

/// Issues a find with a bounded retry against transient driver failures.
///
/// Each failed attempt is logged and forwarded to the alert channel,
/// annotated with the attempt number and the resource name/args.
pub(crate) async fn find_with_retry(
    collection: &dyn DocumentCollection,
    filter: &Document,
    options: &QueryOptions,
    attempts: u32,
    alerts: &dyn AlertChannel,
    resource_type: &str,
    diagnostics: &str,
) -> StoreResult<Box<dyn DocumentCursor>> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match collection.find(filter.clone(), options.clone()).await {
            Ok(cursor) => return Ok(cursor),
            Err(error) if error.is_transient() && attempt < attempts => {
                tracing::warn!(
                    resource_type,
                    collection = collection.name(),
                    attempt,
                    attempts,
                    error = %error,
                    "transient store error, retrying"
                );
                alerts
                    .notify(&format!(
                        "query retry {attempt}/{attempts} for {resource_type} ({diagnostics}): {error}"
                    ))
                    .await;
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
            Err(error) if error.is_transient() => {
                return Err(StoreError::RetriesExhausted {
                    collection: collection.name().to_string(),
                    attempts,
                    source: Box::new(error),
                });
            }
            Err(error) => return Err(error),
        }
    }
}
