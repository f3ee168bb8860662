//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use bson::{Document, doc};
use meridian_datastore::access::{SecurityTagComposer, StandardScopeResolver};
use meridian_datastore::config::{
    AccessControlSettings, DEFAULT_ACCESS_TAG_SYSTEM, DataLayerConfig, PatientReferencePaths,
};
use meridian_datastore::partition::{PartitionResolver, PartitionSettings};
use meridian_datastore::query::SearchExecutor;
use meridian_datastore::store::memory::MemoryDocumentStore;

/// The security tag system used by all fixtures.
pub const ACCESS_SYSTEM: &str = DEFAULT_ACCESS_TAG_SYSTEM;

/// A resource document carrying one access security tag.
pub fn tagged(resource_type: &str, id: &str, code: &str) -> Document {
    doc! {
        "resourceType": resource_type,
        "id": id,
        "meta": {
            "security": [ { "system": ACCESS_SYSTEM, "code": code } ],
        },
    }
}

/// Store, partition resolver, and executor wired over the in-memory backend.
pub struct TestHarness {
    pub store: Arc<MemoryDocumentStore>,
    pub partitions: Arc<PartitionResolver>,
    pub executor: Arc<SearchExecutor>,
    pub composer: Arc<SecurityTagComposer>,
    pub config: Arc<DataLayerConfig>,
}

impl TestHarness {
    /// Builds a harness with the given partition strategy table.
    pub fn with_partitions(partition_settings: PartitionSettings) -> Self {
        let store = Arc::new(MemoryDocumentStore::new("fhir"));
        let config = Arc::new(DataLayerConfig::default());
        let partitions = Arc::new(PartitionResolver::new(
            store.clone(),
            Arc::new(partition_settings),
            "4_0_0",
        ));
        let executor = Arc::new(SearchExecutor::new(
            store.clone(),
            partitions.clone(),
            config.clone(),
        ));

        let access_settings = AccessControlSettings::new()
            .with_access_index("Patient")
            .with_patient_filter(
                "Patient",
                PatientReferencePaths::Single("id".to_string()),
            )
            .with_patient_filter(
                "Observation",
                PatientReferencePaths::Multiple(vec![
                    "subject.reference".to_string(),
                    "patient.reference".to_string(),
                ]),
            );
        let composer = Arc::new(SecurityTagComposer::new(
            Arc::new(StandardScopeResolver::new(ACCESS_SYSTEM)),
            Arc::new(access_settings),
            ACCESS_SYSTEM,
        ));

        Self {
            store,
            partitions,
            executor,
            composer,
            config,
        }
    }

    /// Builds a harness with no partitioned resource types.
    pub fn new() -> Self {
        Self::with_partitions(PartitionSettings::new())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
