//! Filter document combination.

use bson::{Bson, Document, doc};

/// Merges a new clause into an existing filter as a conjunction.
///
/// The rule never drops existing top-level clauses:
/// - a query that already has a top-level `$and` gets the clause appended,
/// - an empty query becomes `{$and: [clause]}`,
/// - anything else is wrapped together with the clause in a new `$and`.
///
/// Repeated application is associative: applying twice never produces
/// duplicate top-level keys, only a longer nested `$and` array.
pub fn and_combine(mut query: Document, clause: Document) -> Document {
    if let Some(Bson::Array(clauses)) = query.get_mut("$and") {
        clauses.push(Bson::Document(clause));
        return query;
    }
    if query.is_empty() {
        return doc! { "$and": [clause] };
    }
    doc! { "$and": [query, clause] }
}
