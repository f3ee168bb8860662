//! Embedded in-memory document store.
//!
//! A query-time evaluator over a vector of BSON documents, implementing the
//! filter operators the query core generates (`$and`, `$or`, `$nor`, `$in`,
//! `$gt`/`$gte`/`$lt`/`$lte`, `$ne`, `$eq`, `$exists`, `$elemMatch`) with
//! MongoDB array semantics, plus include-style projection and ordered sort.
//! This backend serves tests and development; production deployments use the
//! [`mongo`](super::mongo) backend.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};

use super::{DocumentCollection, DocumentCursor, DocumentStore, ExplainVerbosity, QueryOptions};

/// An in-memory database of named collections.
pub struct MemoryDocumentStore {
    name: String,
    collections: RwLock<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryDocumentStore {
    /// Creates an empty store with the given database name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the concrete collection handle, creating it if absent.
    ///
    /// Tests use this to seed documents directly.
    pub fn open(&self, name: &str) -> Arc<MemoryCollection> {
        let mut collections = self.collections.write();
        Arc::clone(collections.entry(name.to_string()).or_insert_with(|| {
            Arc::new(MemoryCollection {
                name: name.to_string(),
                database: self.name.clone(),
                documents: RwLock::new(Vec::new()),
            })
        }))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn database_name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        self.open(name)
    }

    async fn list_collection_names(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// One in-memory collection.
pub struct MemoryCollection {
    name: String,
    database: String,
    documents: RwLock<Vec<Document>>,
}

impl MemoryCollection {
    /// Appends a document.
    pub fn insert(&self, document: Document) {
        self.documents.write().push(document);
    }

    /// Appends several documents.
    pub fn insert_many(&self, documents: impl IntoIterator<Item = Document>) {
        self.documents.write().extend(documents);
    }

    /// Removes all documents.
    pub fn clear(&self) {
        self.documents.write().clear();
    }

    fn evaluate(&self, filter: &Document, options: &QueryOptions) -> Vec<Document> {
        let documents = self.documents.read();
        let mut matched: Vec<&Document> =
            documents.iter().filter(|d| matches(d, filter)).collect();

        if let Some(sort) = &options.sort {
            matched.sort_by(|a, b| compare_by_sort(a, b, sort));
        }

        let skip = options.skip.unwrap_or(0) as usize;
        let limit = options
            .limit
            .filter(|l| *l > 0)
            .map(|l| l as usize)
            .unwrap_or(usize::MAX);

        matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|d| match &options.projection {
                Some(projection) => project(d, projection),
                None => d.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn find(
        &self,
        filter: Document,
        options: QueryOptions,
    ) -> StoreResult<Box<dyn DocumentCursor>> {
        let results = self.evaluate(&filter, &options);
        Ok(Box::new(MemoryCursor {
            collection: self.name.clone(),
            database: self.database.clone(),
            documents: results.into(),
            current: None,
        }))
    }

    async fn count_documents(&self, filter: Document) -> StoreResult<u64> {
        Ok(self
            .documents
            .read()
            .iter()
            .filter(|d| matches(d, &filter))
            .count() as u64)
    }

    async fn estimated_document_count(&self) -> StoreResult<u64> {
        Ok(self.documents.read().len() as u64)
    }

    async fn explain(
        &self,
        filter: Document,
        _options: QueryOptions,
        verbosity: ExplainVerbosity,
    ) -> StoreResult<Document> {
        Ok(doc! {
            "queryPlanner": {
                "namespace": format!("{}.{}", self.database, self.name),
                "parsedQuery": filter,
                "winningPlan": { "stage": "COLLSCAN" },
            },
            "verbosity": verbosity.as_str(),
        })
    }
}

struct MemoryCursor {
    collection: String,
    database: String,
    documents: VecDeque<Document>,
    current: Option<Document>,
}

#[async_trait]
impl DocumentCursor for MemoryCursor {
    async fn advance(&mut self) -> StoreResult<bool> {
        self.current = self.documents.pop_front();
        Ok(self.current.is_some())
    }

    fn current(&self) -> StoreResult<Document> {
        self.current
            .clone()
            .ok_or_else(|| StoreError::Query {
                database: self.database.clone(),
                collection: self.collection.clone(),
                query: String::new(),
                message: "cursor has no current document".to_string(),
                transient: false,
                source: None,
            })
    }
}

/// Evaluates a filter document against a resource document.
pub fn matches(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => as_documents(condition)
            .iter()
            .all(|sub| matches(document, sub)),
        "$or" => as_documents(condition)
            .iter()
            .any(|sub| matches(document, sub)),
        "$nor" => !as_documents(condition)
            .iter()
            .any(|sub| matches(document, sub)),
        field => field_matches(document, field, condition),
    })
}

fn as_documents(value: &Bson) -> Vec<&Document> {
    match value {
        Bson::Array(items) => items
            .iter()
            .filter_map(|i| match i {
                Bson::Document(d) => Some(d),
                _ => None,
            })
            .collect(),
        Bson::Document(d) => vec![d],
        _ => Vec::new(),
    }
}

fn field_matches(document: &Document, field: &str, condition: &Bson) -> bool {
    let segments: Vec<&str> = field.split('.').collect();
    let mut candidates = Vec::new();
    resolve(&Bson::Document(document.clone()), &segments, &mut candidates);

    if let Bson::Document(operators) = condition {
        if operators.keys().all(|k| k.starts_with('$')) && !operators.is_empty() {
            return operators
                .iter()
                .all(|(op, value)| operator_matches(&candidates, op, value));
        }
    }
    any_equals(&candidates, condition)
}

// Walks a dotted path, descending into intermediate arrays. Terminal array
// values are kept whole so operators can see them.
fn resolve(value: &Bson, segments: &[&str], out: &mut Vec<Bson>) {
    if segments.is_empty() {
        out.push(value.clone());
        return;
    }
    match value {
        Bson::Document(d) => {
            if let Some(next) = d.get(segments[0]) {
                resolve(next, &segments[1..], out);
            }
        }
        Bson::Array(items) => {
            for item in items {
                resolve(item, segments, out);
            }
        }
        _ => {}
    }
}

fn any_equals(candidates: &[Bson], value: &Bson) -> bool {
    candidates.iter().any(|c| {
        c == value
            || matches!(c, Bson::Array(items) if items.iter().any(|i| i == value))
    })
}

fn operator_matches(candidates: &[Bson], op: &str, value: &Bson) -> bool {
    match op {
        "$eq" => any_equals(candidates, value),
        "$ne" => !any_equals(candidates, value),
        "$in" => match value {
            Bson::Array(items) => items.iter().any(|i| any_equals(candidates, i)),
            _ => false,
        },
        "$gt" => any_compares(candidates, value, |o| o == Ordering::Greater),
        "$gte" => any_compares(candidates, value, |o| o != Ordering::Less),
        "$lt" => any_compares(candidates, value, |o| o == Ordering::Less),
        "$lte" => any_compares(candidates, value, |o| o != Ordering::Greater),
        "$exists" => {
            let expected = matches!(value, Bson::Boolean(true));
            candidates.is_empty() != expected
        }
        "$elemMatch" => match value {
            Bson::Document(sub) => candidates.iter().any(|c| match c {
                Bson::Array(items) => items.iter().any(|i| match i {
                    Bson::Document(element) => matches(element, sub),
                    _ => false,
                }),
                _ => false,
            }),
            _ => false,
        },
        _ => false,
    }
}

fn any_compares(candidates: &[Bson], value: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    candidates.iter().any(|c| match c {
        Bson::Array(items) => items
            .iter()
            .any(|i| compare_values(i, value).map(&accept).unwrap_or(false)),
        other => compare_values(other, value).map(&accept).unwrap_or(false),
    })
}

/// Compares two BSON values of compatible types.
fn compare_values(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        // Stored timestamps may be ISO-8601 strings while filters carry BSON
        // datetimes (and vice versa).
        (Bson::String(x), Bson::DateTime(y)) => {
            let parsed = chrono::DateTime::parse_from_rfc3339(x).ok()?;
            Some(parsed.with_timezone(&chrono::Utc).cmp(&y.to_chrono()))
        }
        (Bson::DateTime(x), Bson::String(y)) => {
            let parsed = chrono::DateTime::parse_from_rfc3339(y).ok()?;
            Some(x.to_chrono().cmp(&parsed.with_timezone(&chrono::Utc)))
        }
        _ => {
            let x = numeric(a)?;
            let y = numeric(b)?;
            x.partial_cmp(&y)
        }
    }
}

fn numeric(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

// Orders documents by a sort specification, ranking mismatched types the way
// the database does (missing/null first ascending, then numbers, strings,
// dates).
fn compare_by_sort(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (field, direction) in sort {
        let direction = match direction {
            Bson::Int32(n) => *n as i64,
            Bson::Int64(n) => *n,
            Bson::Double(n) => *n as i64,
            _ => 1,
        };
        let x = first_value(a, field);
        let y = first_value(b, field);
        let ordering = match (type_rank(&x), type_rank(&y)) {
            (rx, ry) if rx != ry => rx.cmp(&ry),
            _ => compare_values(&x, &y).unwrap_or(Ordering::Equal),
        };
        let ordering = if direction < 0 {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn first_value(document: &Document, field: &str) -> Bson {
    let segments: Vec<&str> = field.split('.').collect();
    let mut candidates = Vec::new();
    resolve(&Bson::Document(document.clone()), &segments, &mut candidates);
    candidates.into_iter().next().unwrap_or(Bson::Null)
}

fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::Null => 0,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => 1,
        Bson::String(_) => 2,
        Bson::Document(_) => 3,
        Bson::Array(_) => 4,
        Bson::Boolean(_) => 5,
        Bson::DateTime(_) => 6,
        _ => 7,
    }
}

/// Applies an include-style projection.
fn project(document: &Document, projection: &Document) -> Document {
    let mut out = Document::new();
    for (path, include) in projection {
        let included = match include {
            Bson::Int32(n) => *n != 0,
            Bson::Int64(n) => *n != 0,
            Bson::Boolean(b) => *b,
            _ => true,
        };
        if included {
            let segments: Vec<&str> = path.split('.').collect();
            copy_path(document, &mut out, &segments);
        }
    }
    out
}

fn copy_path(src: &Document, dst: &mut Document, segments: &[&str]) {
    let key = segments[0];
    let Some(value) = src.get(key) else {
        return;
    };
    if segments.len() == 1 {
        dst.insert(key, value.clone());
        return;
    }
    match value {
        Bson::Document(inner) => {
            if !matches!(dst.get(key), Some(Bson::Document(_))) {
                dst.insert(key, Document::new());
            }
            if let Some(Bson::Document(nested)) = dst.get_mut(key) {
                copy_path(inner, nested, &segments[1..]);
            }
        }
        Bson::Array(items) => {
            if !matches!(dst.get(key), Some(Bson::Array(_))) {
                let placeholders: Vec<Bson> = items
                    .iter()
                    .map(|_| Bson::Document(Document::new()))
                    .collect();
                dst.insert(key, Bson::Array(placeholders));
            }
            if let Some(Bson::Array(targets)) = dst.get_mut(key) {
                for (target, item) in targets.iter_mut().zip(items) {
                    if let (Bson::Document(target), Bson::Document(item)) = (target, item) {
                        copy_path(item, target, &segments[1..]);
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(id: &str, family: &str) -> Document {
        doc! {
            "resourceType": "Patient",
            "id": id,
            "name": [{ "family": family, "given": ["A"] }],
            "meta": {
                "security": [
                    { "system": "https://fhir.meridian.health/CodeSystem/access", "code": "acme" }
                ]
            },
        }
    }

    #[test]
    fn test_equality_and_dotted_paths() {
        let doc = patient("p1", "Smith");
        assert!(matches(&doc, &doc! { "id": "p1" }));
        assert!(matches(&doc, &doc! { "name.family": "Smith" }));
        assert!(!matches(&doc, &doc! { "name.family": "Jones" }));
    }

    #[test]
    fn test_logical_operators() {
        let doc = patient("p1", "Smith");
        assert!(matches(
            &doc,
            &doc! { "$and": [{ "id": "p1" }, { "name.family": "Smith" }] }
        ));
        assert!(matches(
            &doc,
            &doc! { "$or": [{ "id": "other" }, { "name.family": "Smith" }] }
        ));
        assert!(!matches(&doc, &doc! { "$nor": [{ "id": "p1" }] }));
    }

    #[test]
    fn test_in_and_comparisons() {
        let doc = doc! { "id": "p1", "count": 5 };
        assert!(matches(&doc, &doc! { "id": { "$in": ["p0", "p1"] } }));
        assert!(matches(&doc, &doc! { "count": { "$gt": 4 } }));
        assert!(matches(&doc, &doc! { "count": { "$lte": 5 } }));
        assert!(!matches(&doc, &doc! { "count": { "$lt": 5 } }));
    }

    #[test]
    fn test_elem_match() {
        let doc = patient("p1", "Smith");
        assert!(matches(
            &doc,
            &doc! { "meta.security": { "$elemMatch": {
                "system": "https://fhir.meridian.health/CodeSystem/access",
                "code": "acme",
            } } }
        ));
        assert!(!matches(
            &doc,
            &doc! { "meta.security": { "$elemMatch": {
                "system": "https://fhir.meridian.health/CodeSystem/access",
                "code": "other",
            } } }
        ));
    }

    #[test]
    fn test_date_string_comparison() {
        let doc = doc! { "recordedDate": "2024-03-10T12:00:00Z" };
        let after = bson::DateTime::from_chrono(
            chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
        );
        assert!(matches(&doc, &doc! { "recordedDate": { "$gt": after } }));
    }

    #[tokio::test]
    async fn test_find_sort_skip_limit() {
        let store = MemoryDocumentStore::new("fhir");
        let collection = store.open("Patient_4_0_0");
        collection.insert_many([
            patient("p3", "Cole"),
            patient("p1", "Avery"),
            patient("p2", "Banks"),
        ]);

        let options = QueryOptions::new()
            .with_sort(doc! { "id": 1 })
            .with_skip(1)
            .with_limit(1);
        let mut cursor = collection.find(doc! {}, options).await.unwrap();
        assert!(cursor.advance().await.unwrap());
        assert_eq!(cursor.current().unwrap().get_str("id").unwrap(), "p2");
        assert!(!cursor.advance().await.unwrap());
    }

    #[tokio::test]
    async fn test_projection() {
        let store = MemoryDocumentStore::new("fhir");
        let collection = store.open("Patient_4_0_0");
        collection.insert(patient("p1", "Smith"));

        let options = QueryOptions::new().with_projection(doc! {
            "id": 1,
            "meta.security.system": 1,
            "meta.security.code": 1,
        });
        let mut cursor = collection.find(doc! {}, options).await.unwrap();
        cursor.advance().await.unwrap();
        let projected = cursor.current().unwrap();
        assert_eq!(projected.get_str("id").unwrap(), "p1");
        assert!(projected.get_document("meta").is_ok());
        assert!(projected.get("name").is_none());
        let security = projected
            .get_document("meta")
            .unwrap()
            .get_array("security")
            .unwrap();
        let tag = security[0].as_document().unwrap();
        assert!(tag.get_str("code").is_ok());
        assert!(tag.get_str("system").is_ok());
    }

    #[tokio::test]
    async fn test_counts() {
        let store = MemoryDocumentStore::new("fhir");
        let collection = store.open("Patient_4_0_0");
        collection.insert_many([patient("p1", "Smith"), patient("p2", "Jones")]);

        assert_eq!(
            collection.count_documents(doc! { "id": "p1" }).await.unwrap(),
            1
        );
        assert_eq!(collection.estimated_document_count().await.unwrap(), 2);
    }
}
