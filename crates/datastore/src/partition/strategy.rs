//! Partition strategy configuration.
//!
//! Strategies are declared in deployment configuration as raw name/field
//! pairs and resolved once at startup into a closed strategy table, so an
//! unsupported strategy name fails fast instead of surfacing mid-request.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::ConfigError;

/// A resolved partitioning strategy for one resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionStrategy {
    /// Shard into `{base}_{YYYY}_{MM}` collections by the UTC year-month of
    /// the named field.
    MonthlyTimeBucket {
        /// Dotted path of the timestamp field, e.g. `recordedDate`.
        field: String,
    },
}

/// A strategy declaration as it appears in deployment configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPartitionSpec {
    /// The strategy name. Only `time-bucket` is recognized.
    pub strategy: String,
    /// The timestamp field for time-based strategies.
    pub field: Option<String>,
}

/// The closed per-resource-type strategy table.
///
/// A resource type absent from the table is not partitioned and lives in a
/// single `{type}_{version}` collection.
#[derive(Debug, Clone, Default)]
pub struct PartitionSettings {
    strategies: HashMap<String, PartitionStrategy>,
}

impl PartitionSettings {
    /// Creates an empty table (nothing partitioned).
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a monthly time-bucket strategy for a resource type.
    pub fn with_time_bucket(
        mut self,
        resource_type: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.strategies.insert(
            resource_type.into(),
            PartitionStrategy::MonthlyTimeBucket {
                field: field.into(),
            },
        );
        self
    }

    /// Resolves raw configuration declarations into the closed table.
    ///
    /// # Errors
    ///
    /// `ConfigError::UnsupportedPartitionStrategy` for an unrecognized
    /// strategy name. This is a fatal configuration error.
    pub fn from_specs(
        specs: HashMap<String, RawPartitionSpec>,
    ) -> Result<Self, ConfigError> {
        let mut settings = Self::new();
        for (resource_type, spec) in specs {
            match spec.strategy.as_str() {
                "time-bucket" => {
                    let field = spec.field.ok_or_else(|| ConfigError::InvalidValue {
                        name: format!("partition.{resource_type}.field"),
                        message: "time-bucket partitioning requires a field".to_string(),
                    })?;
                    settings = settings.with_time_bucket(resource_type, field);
                }
                other => {
                    return Err(ConfigError::UnsupportedPartitionStrategy {
                        resource_type,
                        strategy: other.to_string(),
                    });
                }
            }
        }
        Ok(settings)
    }

    /// Returns the strategy for a resource type, or `None` when it is not
    /// partitioned.
    pub fn strategy_for(&self, resource_type: &str) -> Option<&PartitionStrategy> {
        self.strategies.get(resource_type)
    }

    /// Returns `true` if the resource type is time-partitioned.
    pub fn is_partitioned(&self, resource_type: &str) -> bool {
        self.strategies.contains_key(resource_type)
    }

    /// Orders a partition list with the resource type's comparator:
    /// descending lexicographic (most recent first) for time-partitioned
    /// types, ascending otherwise.
    pub fn sort_partitions(&self, resource_type: &str, partitions: &mut [String]) {
        if self.is_partitioned(resource_type) {
            partitions.sort_by(|a, b| b.cmp(a));
        } else {
            partitions.sort();
        }
    }
}
