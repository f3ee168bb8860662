//! Search-parameter mapping boundary.
//!
//! The full FHIR search-parameter grammar lives outside this crate. The
//! graph engine's reverse-link resolution needs two narrow services from it:
//! translating a search-parameter name/value pair into a store filter, and
//! mapping a search-parameter name to the document field holding the
//! backreference. [`StaticSearchParamResolver`] implements both over a
//! startup-resolved table, the closed-table counterpart of a runtime
//! string-keyed registry.

use std::collections::HashMap;

use bson::{Document, doc};

use crate::error::{ConfigError, DataStoreResult};

/// Search-parameter services consumed by reverse-link resolution.
pub trait SearchParamResolver: Send + Sync {
    /// Maps a search-parameter name to its document field path, or `None`
    /// when the parameter is not known for the resource type.
    fn field_name_for_search_parameter(
        &self,
        resource_type: &str,
        parameter: &str,
    ) -> Option<String>;

    /// Translates a single search-parameter name/value pair into a store
    /// filter for the resource type.
    fn build_search_query(
        &self,
        resource_type: &str,
        parameter: &str,
        value: &str,
    ) -> DataStoreResult<Document>;
}

/// A startup-resolved table of reference search parameters.
#[derive(Debug, Clone, Default)]
pub struct StaticSearchParamResolver {
    // (resource_type, parameter) -> field path
    fields: HashMap<(String, String), String>,
}

impl StaticSearchParamResolver {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the field path for one (resource type, parameter) pair.
    pub fn with_field(
        mut self,
        resource_type: impl Into<String>,
        parameter: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.fields
            .insert((resource_type.into(), parameter.into()), field.into());
        self
    }
}

impl SearchParamResolver for StaticSearchParamResolver {
    fn field_name_for_search_parameter(
        &self,
        resource_type: &str,
        parameter: &str,
    ) -> Option<String> {
        self.fields
            .get(&(resource_type.to_string(), parameter.to_string()))
            .cloned()
    }

    fn build_search_query(
        &self,
        resource_type: &str,
        parameter: &str,
        value: &str,
    ) -> DataStoreResult<Document> {
        let field = self
            .field_name_for_search_parameter(resource_type, parameter)
            .ok_or_else(|| ConfigError::UnmappedSearchParameter {
                resource_type: resource_type.to_string(),
                parameter: parameter.to_string(),
            })?;

        let values: Vec<&str> = value.split(',').filter(|v| !v.is_empty()).collect();
        let query = if let [single] = values.as_slice() {
            doc! { format!("{field}.reference"): *single }
        } else {
            doc! { format!("{field}.reference"): { "$in": values } }
        };
        Ok(query)
    }
}
