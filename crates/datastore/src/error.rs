//! Error types for the datastore layer.
//!
//! This module defines all error types used throughout the query, partition,
//! and access-control layers, following a hierarchy that separates
//! authorization errors, configuration errors, graph-traversal errors, and
//! store errors.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all datastore operations.
///
/// Each category is a distinct, identifiable kind so calling layers can map
/// errors to appropriate transport-level responses (403 vs. 500 equivalents)
/// without string-matching messages.
#[derive(Error, Debug)]
pub enum DataStoreError {
    /// Authorization errors. Never retried.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Deployment or link-specification defects. Never retried.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Internal-consistency errors raised during graph traversal.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Errors from the underlying document store.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DataStoreError {
    /// Returns `true` if this error maps to a caller-rejected (403-equivalent)
    /// response rather than an internal failure.
    pub fn is_authorization(&self) -> bool {
        matches!(self, DataStoreError::Access(_))
    }
}

/// Errors related to caller authorization.
#[derive(Error, Debug)]
pub enum AccessError {
    /// The caller's scope yields no access codes and no patient scope is active.
    #[error("no access scopes for user {user} (scope: {scope})")]
    MissingAccessScopes { user: String, scope: String },

    /// Patient-scoped filtering was requested for a resource type that has no
    /// configured patient-reference property.
    #[error("patient-scoped access is not supported for resource type {resource_type}")]
    PatientFilterUnsupported { resource_type: String },

    /// The caller's scope does not permit the requested resource type.
    #[error("user {user} may not access resource type {resource_type}")]
    Denied { user: String, resource_type: String },
}

/// Errors caused by a deployment or link-specification defect.
///
/// These are fatal and indicate misconfiguration, not a transient condition.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A partition strategy name in configuration is not recognized.
    #[error("unsupported partition strategy '{strategy}' for resource type {resource_type}")]
    UnsupportedPartitionStrategy {
        resource_type: String,
        strategy: String,
    },

    /// A reverse-link search parameter has no configured field mapping.
    #[error("no field mapping for search parameter '{parameter}' on {resource_type}")]
    UnmappedSearchParameter {
        resource_type: String,
        parameter: String,
    },

    /// A reverse link was processed without a parent resource type context.
    #[error("reverse link processing requires a parent resource type")]
    MissingParentResourceType,

    /// A configuration value failed to parse.
    #[error("invalid configuration value for {name}: {message}")]
    InvalidValue { name: String, message: String },
}

/// Internal-consistency errors raised by the graph traversal engine.
///
/// These indicate a malformed link specification or an engine bug and carry
/// full context to aid diagnosis.
#[derive(Error, Debug)]
pub enum GraphError {
    /// A forward-link fetch returned a document no parent entity references.
    #[error(
        "fetched {child_type}/{child_id} via path '{path}' matches no parent among {parent_type} [{parent_ids}]"
    )]
    OrphanedForwardMatch {
        parent_type: String,
        parent_ids: String,
        path: String,
        child_type: String,
        child_id: String,
    },

    /// A reverse-link fetch returned a document whose backreference field
    /// points at none of the parent entities.
    #[error(
        "fetched {target_type}/{target_id} via parameter '{parameter}' references no parent entity"
    )]
    OrphanedReverseMatch {
        target_type: String,
        target_id: String,
        parameter: String,
    },

    /// A reverse-link params template did not reduce to a single
    /// search-parameter name/value pair.
    #[error("reverse link params must contain exactly one name=value pair: {params}")]
    MalformedLinkParams { params: String },
}

/// Errors originating from the document store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A driver-level failure, annotated with collection, database, and query
    /// context. `transient` marks errors worth retrying (network blips,
    /// replica failover).
    #[error("store error on {database}.{collection}: {message}")]
    Query {
        database: String,
        collection: String,
        query: String,
        message: String,
        transient: bool,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A transient failure persisted through the full retry budget.
    #[error("retries exhausted after {attempts} attempts on {collection}")]
    RetriesExhausted {
        collection: String,
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Returns `true` if retrying the operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Query { transient, .. } => *transient,
            StoreError::RetriesExhausted { .. } => false,
        }
    }

    /// Fills in the originating query when the lower layer did not have it.
    pub fn with_query(self, query_text: impl Into<String>) -> StoreError {
        match self {
            StoreError::Query {
                database,
                collection,
                query,
                message,
                transient,
                source,
            } => StoreError::Query {
                database,
                collection,
                query: if query.is_empty() {
                    query_text.into()
                } else {
                    query
                },
                message,
                transient,
                source,
            },
            other => other,
        }
    }
}

/// Result type alias for datastore operations.
pub type DataStoreResult<T> = Result<T, DataStoreError>;

/// Result type alias for store-level operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_error_display() {
        let err = AccessError::MissingAccessScopes {
            user: "user-1".to_string(),
            scope: "launch/patient".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "no access scopes for user user-1 (scope: launch/patient)"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::UnsupportedPartitionStrategy {
            resource_type: "AuditEvent".to_string(),
            strategy: "weekly".to_string(),
        };
        assert!(err.to_string().contains("unsupported partition strategy"));
        assert!(err.to_string().contains("weekly"));
    }

    #[test]
    fn test_graph_error_display() {
        let err = GraphError::OrphanedForwardMatch {
            parent_type: "PractitionerRole".to_string(),
            parent_ids: "role-1,role-2".to_string(),
            path: "practitioner".to_string(),
            child_type: "Practitioner".to_string(),
            child_id: "p-9".to_string(),
        };
        assert!(err.to_string().contains("Practitioner/p-9"));
        assert!(err.to_string().contains("practitioner"));
    }

    #[test]
    fn test_store_error_transient() {
        let err = StoreError::Query {
            database: "fhir".to_string(),
            collection: "Patient_4_0_0".to_string(),
            query: "{}".to_string(),
            message: "connection reset".to_string(),
            transient: true,
            source: None,
        };
        assert!(err.is_transient());

        let exhausted = StoreError::RetriesExhausted {
            collection: "Patient_4_0_0".to_string(),
            attempts: 5,
            source: Box::new(err),
        };
        assert!(!exhausted.is_transient());
        assert!(exhausted.to_string().contains("5 attempts"));
    }

    #[test]
    fn test_store_error_with_query() {
        let err = StoreError::Query {
            database: "fhir".to_string(),
            collection: "Patient_4_0_0".to_string(),
            query: String::new(),
            message: "boom".to_string(),
            transient: false,
            source: None,
        };
        let err = err.with_query("{\"id\":\"1\"}");
        match err {
            StoreError::Query { query, .. } => assert_eq!(query, "{\"id\":\"1\"}"),
            _ => panic!("expected query variant"),
        }
    }

    #[test]
    fn test_authorization_classification() {
        let err: DataStoreError = AccessError::Denied {
            user: "u".to_string(),
            resource_type: "Patient".to_string(),
        }
        .into();
        assert!(err.is_authorization());

        let err: DataStoreError = ConfigError::MissingParentResourceType.into();
        assert!(!err.is_authorization());
    }
}
