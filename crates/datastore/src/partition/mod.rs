//! Time-based collection partitioning.
//!
//! Resource types may be configured to shard their documents into physical
//! collections by UTC year-month of a configured field
//! (`{type}_{version}_{YYYY}_{MM}`). This module resolves resources to their
//! target partition, resolves query date ranges to the set of existing
//! partitions, and maintains the process-wide partition cache.
//!
//! - [`strategy`] - the closed per-resource-type strategy table
//! - [`cache`] - the daily-refreshed partition name cache
//! - [`resolver`] - resource- and query-level partition resolution

pub mod cache;
pub mod resolver;
pub mod strategy;

pub use cache::PartitionCache;
pub use resolver::PartitionResolver;
pub use strategy::{PartitionSettings, PartitionStrategy, RawPartitionSpec};
