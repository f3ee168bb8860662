//! Runtime and access-control configuration.
//!
//! [`DataLayerConfig`] carries the env-sourced knobs consumed by the cursor
//! pipeline and graph engine. [`AccessControlSettings`] is the static table
//! resolved once at startup that drives the security tag composer: which
//! collections carry the denormalized `_access` index, and which property
//! path(s) hold the patient reference for each resource type.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default time budget enforced server-side on every query.
pub const DEFAULT_QUERY_TIME_BUDGET: Duration = Duration::from_secs(30);

/// Default page size applied when a non-streaming request omits `_count`.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// System-wide maximum page size; `_count` is clamped to this.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Default system URL for access security tags.
pub const DEFAULT_ACCESS_TAG_SYSTEM: &str = "https://fhir.meridian.health/CodeSystem/access";

/// Env-sourced configuration for the data layer.
///
/// All fields have conservative defaults; `from_env` overrides them from the
/// process environment:
///
/// | Field | Variable |
/// |---|---|
/// | `default_page_size` | `MERIDIAN_SEARCH_DEFAULT_PAGE_SIZE` |
/// | `max_page_size` | `MERIDIAN_SEARCH_MAX_PAGE_SIZE` |
/// | `default_batch_size` | `MERIDIAN_CURSOR_BATCH_SIZE` |
/// | `query_time_budget` | `MERIDIAN_QUERY_TIME_BUDGET` (humantime, e.g. `30s`) |
/// | `enable_two_step_optimization` | `MERIDIAN_TWO_STEP_OPTIMIZATION` |
/// | `enable_index_hints` | `MERIDIAN_INDEX_HINTS` |
/// | `hash_references` | `MERIDIAN_HASH_REFERENCES` |
/// | `access_tag_system` | `MERIDIAN_ACCESS_TAG_SYSTEM` |
#[derive(Debug, Clone)]
pub struct DataLayerConfig {
    /// Limit applied to non-streaming requests without `_count`.
    pub default_page_size: u32,
    /// Upper bound for `_count`.
    pub max_page_size: u32,
    /// Cursor batch size applied when the caller does not pass
    /// `_cursorBatchSize`.
    pub default_batch_size: Option<u32>,
    /// `maxTimeMS` budget for every issued query.
    pub query_time_budget: Duration,
    /// Enables the two-step id-then-document optimization globally.
    pub enable_two_step_optimization: bool,
    /// Enables index hinting globally.
    pub enable_index_hints: bool,
    /// Rewrites self-references to `#id` contained form during graph
    /// assembly.
    pub hash_references: bool,
    /// The `system` of access security tags on `meta.security`.
    pub access_tag_system: String,
}

impl Default for DataLayerConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            default_batch_size: None,
            query_time_budget: DEFAULT_QUERY_TIME_BUDGET,
            enable_two_step_optimization: false,
            enable_index_hints: false,
            hash_references: false,
            access_tag_system: DEFAULT_ACCESS_TAG_SYSTEM.to_string(),
        }
    }
}

impl DataLayerConfig {
    /// Builds a configuration from the process environment, falling back to
    /// defaults for unset variables.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` if a set variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = read_env("MERIDIAN_SEARCH_DEFAULT_PAGE_SIZE") {
            config.default_page_size = parse_number("MERIDIAN_SEARCH_DEFAULT_PAGE_SIZE", &v)?;
        }
        if let Some(v) = read_env("MERIDIAN_SEARCH_MAX_PAGE_SIZE") {
            config.max_page_size = parse_number("MERIDIAN_SEARCH_MAX_PAGE_SIZE", &v)?;
        }
        if let Some(v) = read_env("MERIDIAN_CURSOR_BATCH_SIZE") {
            config.default_batch_size = Some(parse_number("MERIDIAN_CURSOR_BATCH_SIZE", &v)?);
        }
        if let Some(v) = read_env("MERIDIAN_QUERY_TIME_BUDGET") {
            config.query_time_budget =
                humantime::parse_duration(&v).map_err(|e| ConfigError::InvalidValue {
                    name: "MERIDIAN_QUERY_TIME_BUDGET".to_string(),
                    message: e.to_string(),
                })?;
        }
        if let Some(v) = read_env("MERIDIAN_TWO_STEP_OPTIMIZATION") {
            config.enable_two_step_optimization = parse_bool("MERIDIAN_TWO_STEP_OPTIMIZATION", &v)?;
        }
        if let Some(v) = read_env("MERIDIAN_INDEX_HINTS") {
            config.enable_index_hints = parse_bool("MERIDIAN_INDEX_HINTS", &v)?;
        }
        if let Some(v) = read_env("MERIDIAN_HASH_REFERENCES") {
            config.hash_references = parse_bool("MERIDIAN_HASH_REFERENCES", &v)?;
        }
        if let Some(v) = read_env("MERIDIAN_ACCESS_TAG_SYSTEM") {
            config.access_tag_system = v;
        }

        Ok(config)
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        name: name.to_string(),
        message: e.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

/// Configured patient-reference property path(s) for one resource type.
///
/// The special path `"id"` means the resource *is* the patient: the filter
/// matches the resource's own `_uuid`/`_sourceId` instead of a reference
/// sub-field.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PatientReferencePaths {
    /// A single property path, e.g. `"subject.reference"`.
    Single(String),
    /// Multiple alternative paths, unioned with `$or`.
    Multiple(Vec<String>),
}

impl PatientReferencePaths {
    /// Returns the paths as a slice-like iterator.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            PatientReferencePaths::Single(p) => vec![p.as_str()],
            PatientReferencePaths::Multiple(ps) => ps.iter().map(String::as_str).collect(),
        }
    }
}

/// Static access-control table resolved once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessControlSettings {
    /// Resource types whose collections carry the denormalized `_access`
    /// index, enabling the fast-path security filter.
    #[serde(default)]
    access_index_resource_types: HashSet<String>,

    /// Patient-reference property paths keyed by resource type. A resource
    /// type absent from this table is not patient-filterable.
    #[serde(default)]
    patient_filters: HashMap<String, PatientReferencePaths>,
}

impl AccessControlSettings {
    /// Creates an empty table (no access indexes, nothing patient-filterable).
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that a resource type's collections carry the `_access` index.
    pub fn with_access_index(mut self, resource_type: impl Into<String>) -> Self {
        self.access_index_resource_types.insert(resource_type.into());
        self
    }

    /// Declares the patient-reference path(s) for a resource type.
    pub fn with_patient_filter(
        mut self,
        resource_type: impl Into<String>,
        paths: PatientReferencePaths,
    ) -> Self {
        self.patient_filters.insert(resource_type.into(), paths);
        self
    }

    /// Returns `true` if the resource type's collections carry the `_access`
    /// index.
    pub fn has_access_index(&self, resource_type: &str) -> bool {
        self.access_index_resource_types.contains(resource_type)
    }

    /// Returns the configured patient-reference paths, or `None` when the
    /// resource type is not patient-filterable.
    pub fn patient_filter_paths(&self, resource_type: &str) -> Option<&PatientReferencePaths> {
        self.patient_filters.get(resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DataLayerConfig::default();
        assert_eq!(config.default_page_size, 10);
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.query_time_budget, Duration::from_secs(30));
        assert!(!config.enable_two_step_optimization);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("X", "true").unwrap());
        assert!(!parse_bool("X", "0").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }

    #[test]
    fn test_access_settings_lookup() {
        let settings = AccessControlSettings::new()
            .with_access_index("Patient")
            .with_patient_filter(
                "Observation",
                PatientReferencePaths::Multiple(vec![
                    "subject.reference".to_string(),
                    "patient.reference".to_string(),
                ]),
            );

        assert!(settings.has_access_index("Patient"));
        assert!(!settings.has_access_index("Observation"));
        assert!(settings.patient_filter_paths("Observation").is_some());
        assert!(settings.patient_filter_paths("AuditEvent").is_none());
    }

    #[test]
    fn test_settings_deserialize() {
        let json = serde_json::json!({
            "access_index_resource_types": ["Patient"],
            "patient_filters": {
                "Patient": "id",
                "Encounter": "subject.reference",
                "Observation": ["subject.reference", "patient.reference"]
            }
        });
        let settings: AccessControlSettings = serde_json::from_value(json).unwrap();
        assert!(settings.has_access_index("Patient"));
        let paths = settings.patient_filter_paths("Observation").unwrap();
        assert_eq!(paths.paths().len(), 2);
    }
}
