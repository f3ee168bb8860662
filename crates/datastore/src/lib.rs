//! Meridian FHIR Server Data Layer
//!
//! This crate is the query, partition, and access-control composition layer
//! of the Meridian FHIR Server. It takes a caller's search request, resource
//! type, and authorization scopes and produces a correct, efficient,
//! security-filtered query plan over a MongoDB-style document database,
//! spanning multiple physical collections (time-based partitions), multiple
//! optimization passes (two-step id-then-document fetch, index hints, field
//! projection), and a recursive graph-traversal engine for resolving linked
//! resources (`$everything`, GraphDefinition processing).
//!
//! # Architecture
//!
//! - [`store`] - the document store boundary (MongoDB backend behind the
//!   `mongodb` feature, plus an embedded in-memory backend)
//! - [`partition`] - time-based collection sharding and the partition cache
//! - [`access`] - scope extraction and security/patient filter composition
//! - [`query`] - the cursor pipeline builder, index hints, and the cursor
//!   wrapper
//! - [`graph`] - the graph traversal engine
//! - [`config`] - runtime knobs and static access-control tables
//! - [`error`] - error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use bson::doc;
//! use meridian_datastore::access::{CallerContext, SecurityTagComposer, StandardScopeResolver};
//! use meridian_datastore::config::{AccessControlSettings, DEFAULT_ACCESS_TAG_SYSTEM};
//!
//! // Compose a row-level security filter from a caller's scope string.
//! let composer = SecurityTagComposer::new(
//!     Arc::new(StandardScopeResolver::new(DEFAULT_ACCESS_TAG_SYSTEM)),
//!     Arc::new(AccessControlSettings::new()),
//!     DEFAULT_ACCESS_TAG_SYSTEM,
//! );
//! let caller = CallerContext::new("clinician-1", "access/acme.read");
//! let tags = composer
//!     .security_tags_from_scope(&caller, false, "read")
//!     .unwrap();
//! let query = composer.apply_security_filter("Patient", &tags, doc! {}, false, false);
//! assert!(query.contains_key("$and"));
//! ```
//!
//! # Concurrency
//!
//! Requests execute as independent interleaved tasks; the only cross-request
//! mutable state is the partition cache, which refreshes from the live
//! collection list at most once per UTC day behind a single refresh mutex.
//! Every query carries a server-side time budget; there is no client-side
//! cancellation token.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod access;
pub mod config;
pub mod error;
pub mod graph;
pub mod mapper;
pub mod ops;
pub mod partition;
pub mod query;
pub mod search_params;
pub mod store;

// Re-export commonly used types at crate root
pub use access::{CallerContext, SecurityTagComposer};
pub use config::DataLayerConfig;
pub use error::{DataStoreError, DataStoreResult};
pub use graph::{GraphDefinition, GraphRequest, GraphTraversalEngine};
pub use mapper::{ResourceMapper, ResourceObject};
pub use partition::{PartitionCache, PartitionResolver, PartitionSettings};
pub use query::{IndexHintConfig, QueryPlan, ResourceCursor, SearchArgs, SearchExecutor};
pub use store::{DocumentCollection, DocumentCursor, DocumentStore, QueryOptions};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
