//! MongoDB document store backend.
//!
//! Thin adapters from the [`DocumentStore`]/[`DocumentCollection`]/
//! [`DocumentCursor`] traits onto the official `mongodb` driver. Driver
//! errors are classified as transient (retryable) or not and annotated with
//! database/collection context before crossing the trait boundary.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Document, doc};
use mongodb::error::ErrorKind;
use mongodb::options::{FindOptions, Hint};
use mongodb::{Client, Cursor, Database};

use crate::error::{StoreError, StoreResult};

use super::{DocumentCollection, DocumentCursor, DocumentStore, ExplainVerbosity, QueryOptions};

// Server error codes worth retrying: host unreachable/not found, network
// timeout, shutdown in progress, stepdown, socket exception, not-primary
// variants, interrupted at shutdown / due to repl state change.
const RETRYABLE_COMMAND_CODES: &[i32] = &[
    6, 7, 89, 91, 189, 9001, 10107, 11600, 11602, 13435, 13436,
];

/// A MongoDB-backed document store.
pub struct MongoDocumentStore {
    database: Database,
}

impl MongoDocumentStore {
    /// Wraps an existing driver database handle.
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Connects to the given URI and opens the named database.
    pub async fn connect(uri: &str, database: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| driver_error(database, "", String::new(), e))?;
        Ok(Self::new(client.database(database)))
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    fn database_name(&self) -> &str {
        self.database.name()
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        Arc::new(MongoCollection {
            inner: self.database.collection::<Document>(name),
            database: self.database.clone(),
        })
    }

    async fn list_collection_names(&self) -> StoreResult<Vec<String>> {
        self.database
            .list_collection_names()
            .await
            .map_err(|e| driver_error(self.database.name(), "", String::new(), e))
    }
}

struct MongoCollection {
    inner: mongodb::Collection<Document>,
    database: Database,
}

impl MongoCollection {
    fn error(&self, query: &Document, err: mongodb::error::Error) -> StoreError {
        driver_error(
            self.database.name(),
            self.inner.name(),
            query.to_string(),
            err,
        )
    }
}

#[async_trait]
impl DocumentCollection for MongoCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn database_name(&self) -> &str {
        self.database.name()
    }

    async fn find(
        &self,
        filter: Document,
        options: QueryOptions,
    ) -> StoreResult<Box<dyn DocumentCursor>> {
        let find_options = to_find_options(&options);
        let cursor = self
            .inner
            .find(filter.clone())
            .with_options(find_options)
            .await
            .map_err(|e| self.error(&filter, e))?;
        Ok(Box::new(MongoDocumentCursor {
            inner: cursor,
            database: self.database.name().to_string(),
            collection: self.inner.name().to_string(),
        }))
    }

    async fn count_documents(&self, filter: Document) -> StoreResult<u64> {
        self.inner
            .count_documents(filter.clone())
            .await
            .map_err(|e| self.error(&filter, e))
    }

    async fn estimated_document_count(&self) -> StoreResult<u64> {
        self.inner
            .estimated_document_count()
            .await
            .map_err(|e| self.error(&Document::new(), e))
    }

    async fn explain(
        &self,
        filter: Document,
        options: QueryOptions,
        verbosity: ExplainVerbosity,
    ) -> StoreResult<Document> {
        let mut find = doc! {
            "find": self.inner.name(),
            "filter": filter.clone(),
        };
        if let Some(projection) = &options.projection {
            find.insert("projection", projection.clone());
        }
        if let Some(sort) = &options.sort {
            find.insert("sort", sort.clone());
        }
        if let Some(limit) = options.limit {
            find.insert("limit", limit);
        }
        if let Some(skip) = options.skip {
            find.insert("skip", skip as i64);
        }
        if let Some(hint) = &options.hint {
            find.insert("hint", hint.clone());
        }

        self.database
            .run_command(doc! {
                "explain": find,
                "verbosity": verbosity.as_str(),
            })
            .await
            .map_err(|e| self.error(&filter, e))
    }
}

struct MongoDocumentCursor {
    inner: Cursor<Document>,
    database: String,
    collection: String,
}

#[async_trait]
impl DocumentCursor for MongoDocumentCursor {
    async fn advance(&mut self) -> StoreResult<bool> {
        self.inner
            .advance()
            .await
            .map_err(|e| driver_error(&self.database, &self.collection, String::new(), e))
    }

    fn current(&self) -> StoreResult<Document> {
        self.inner
            .deserialize_current()
            .map_err(|e| driver_error(&self.database, &self.collection, String::new(), e))
    }
}

fn to_find_options(options: &QueryOptions) -> FindOptions {
    let mut find_options = FindOptions::default();
    find_options.projection = options.projection.clone();
    find_options.sort = options.sort.clone();
    find_options.skip = options.skip;
    find_options.limit = options.limit;
    find_options.batch_size = options.batch_size;
    find_options.hint = options.hint.clone().map(Hint::Name);
    find_options.max_time = options.max_time;
    find_options
}

fn driver_error(
    database: &str,
    collection: &str,
    query: String,
    err: mongodb::error::Error,
) -> StoreError {
    StoreError::Query {
        database: database.to_string(),
        collection: collection.to_string(),
        query,
        message: err.to_string(),
        transient: is_transient(&err),
        source: Some(Box::new(err)),
    }
}

// Network blips and replica failover are worth retrying; everything else
// surfaces immediately.
fn is_transient(err: &mongodb::error::Error) -> bool {
    match &*err.kind {
        ErrorKind::Io(_) => true,
        ErrorKind::ServerSelection { .. } => true,
        ErrorKind::ConnectionPoolCleared { .. } => true,
        ErrorKind::Command(command) => {
            RETRYABLE_COMMAND_CODES.contains(&command.code)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Bson;

    #[test]
    fn test_find_options_mapping() {
        let options = QueryOptions::new()
            .with_sort(doc! { "id": 1 })
            .with_limit(25)
            .with_batch_size(500)
            .with_hint("id_1");
        let find_options = to_find_options(&options);

        assert_eq!(find_options.limit, Some(25));
        assert_eq!(find_options.batch_size, Some(500));
        assert!(matches!(find_options.hint, Some(Hint::Name(ref n)) if n == "id_1"));
        assert_eq!(find_options.sort.unwrap().get("id"), Some(&Bson::Int32(1)));
    }
}
