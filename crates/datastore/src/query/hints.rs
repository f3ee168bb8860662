//! Static index-hint resolution.
//!
//! Deployments declare their database indexes once; the pipeline asks this
//! table for an index whose key set exactly matches the columns a query
//! touches, and hints the database engine with its name. Resolution is a
//! pure function over the static configuration with no I/O, so it is safe to
//! call per request.

use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;

use crate::store::HISTORY_SUFFIX;

/// One configured database index.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexDefinition {
    /// The index name passed to the engine as a hint.
    pub name: String,
    /// The indexed fields, in index key order.
    pub keys: Vec<String>,
    /// Base collection names this index is absent from.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl IndexDefinition {
    /// Creates a definition with the given name and key fields.
    pub fn new<I, S>(name: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            keys: keys.into_iter().map(Into::into).collect(),
            exclude: Vec::new(),
        }
    }

    /// Excludes a base collection from this index.
    pub fn with_exclude(mut self, collection: impl Into<String>) -> Self {
        self.exclude.push(collection.into());
        self
    }

    fn key_set(&self) -> BTreeSet<&str> {
        self.keys.iter().map(String::as_str).collect()
    }
}

/// The static index table, keyed by base collection name or the `*` wildcard.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexHintConfig {
    #[serde(flatten)]
    indexes: HashMap<String, Vec<IndexDefinition>>,
}

impl IndexHintConfig {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers index definitions for a base collection name (or `*`).
    pub fn with_indexes(
        mut self,
        collection: impl Into<String>,
        definitions: Vec<IndexDefinition>,
    ) -> Self {
        self.indexes
            .entry(collection.into())
            .or_default()
            .extend(definitions);
        self
    }

    /// Finds a configured index whose key set exactly equals `fields`.
    ///
    /// Returns `None` for empty field sets and for history collections, which
    /// are never hinted. Candidates under the specific base collection name
    /// are considered before the wildcard entry; the first match wins with no
    /// attempt to rank by selectivity.
    pub fn find_index_for_fields(
        &self,
        collection_name: &str,
        fields: &BTreeSet<String>,
    ) -> Option<String> {
        if fields.is_empty() || collection_name.ends_with(HISTORY_SUFFIX) {
            return None;
        }
        let base = base_collection_name(collection_name);
        let requested: BTreeSet<&str> = fields.iter().map(String::as_str).collect();

        for key in [base, "*"] {
            let Some(definitions) = self.indexes.get(key) else {
                continue;
            };
            for definition in definitions {
                if definition.exclude.iter().any(|e| e == base) {
                    continue;
                }
                if definition.key_set() == requested {
                    return Some(definition.name.clone());
                }
            }
        }
        None
    }
}

/// Strips a trailing `_{YYYY}_{MM}` time-bucket suffix, yielding the base
/// (unpartitioned) collection name.
pub(crate) fn base_collection_name(name: &str) -> &str {
    let segments: Vec<&str> = name.split('_').collect();
    if segments.len() >= 3 {
        let month = segments[segments.len() - 1];
        let year = segments[segments.len() - 2];
        if month.len() == 2
            && year.len() == 4
            && month.chars().all(|c| c.is_ascii_digit())
            && year.chars().all(|c| c.is_ascii_digit())
        {
            return &name[..name.len() - year.len() - month.len() - 2];
        }
    }
    name
}
