//! Partition-aware query execution across time-bucketed collections.

mod common;

use bson::doc;
use common::{TestHarness, tagged};
use meridian_datastore::partition::PartitionSettings;
use meridian_datastore::query::SearchArgs;
use meridian_datastore::store::QueryOptions;

fn audit_harness() -> TestHarness {
    TestHarness::with_partitions(
        PartitionSettings::new().with_time_bucket("AuditEvent", "recordedDate"),
    )
}

fn seed_audit_months(harness: &TestHarness) {
    for (month, id) in [("2024_01", "jan"), ("2024_02", "feb"), ("2024_03", "mar")] {
        let mut event = tagged("AuditEvent", id, "acme");
        event.insert(
            "recordedDate",
            format!("2024-{}-15T00:00:00Z", &month[5..]),
        );
        harness
            .store
            .open(&format!("AuditEvent_4_0_0_{month}"))
            .insert(event);
    }
}

#[tokio::test]
async fn unconstrained_query_spans_all_partitions_most_recent_first() {
    let harness = audit_harness();
    seed_audit_months(&harness);

    let plans = harness
        .executor
        .execute(
            "AuditEvent",
            &SearchArgs::new(),
            doc! {},
            QueryOptions::new(),
            false,
            false,
        )
        .await
        .unwrap();
    assert_eq!(plans.len(), 3);

    let mut ids = Vec::new();
    for mut plan in plans {
        for document in plan.cursor.as_mut().unwrap().to_array().await.unwrap() {
            ids.push(document.get_str("id").unwrap().to_string());
        }
    }
    assert_eq!(ids, ["mar", "feb", "jan"]);
}

#[tokio::test]
async fn date_range_narrows_the_partition_set() {
    let harness = audit_harness();
    seed_audit_months(&harness);

    let query = doc! { "$and": [
        { "recordedDate": { "$gt": "2024-02-01T00:00:00Z" } },
        { "recordedDate": { "$lt": "2024-02-28T00:00:00Z" } },
    ]};
    let documents = harness
        .executor
        .fetch_all("AuditEvent", &SearchArgs::new(), query, QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].get_str("id").unwrap(), "feb");
}

#[tokio::test]
async fn write_side_resolution_registers_new_partitions() {
    let harness = audit_harness();

    let mut event = tagged("AuditEvent", "new", "acme");
    event.insert("recordedDate", "2024-06-02T08:00:00Z");
    let partition = harness.partitions.partition_for_resource(&event).unwrap();
    assert_eq!(partition, "AuditEvent_4_0_0_2024_06");

    // Registered without waiting for the daily collection-list refresh.
    assert!(
        harness
            .partitions
            .cache()
            .partitions_for("AuditEvent")
            .contains(&partition)
    );
}

#[tokio::test]
async fn unpartitioned_types_resolve_to_the_single_base_collection() {
    let harness = audit_harness();
    harness
        .store
        .open("Patient_4_0_0")
        .insert(tagged("Patient", "p1", "acme"));

    let plans = harness
        .executor
        .execute(
            "Patient",
            &SearchArgs::new(),
            doc! {},
            QueryOptions::new(),
            false,
            false,
        )
        .await
        .unwrap();
    assert_eq!(plans.len(), 1);

    let history = harness
        .partitions
        .history_partitions_for_query("Patient", &doc! {})
        .await
        .unwrap();
    assert_eq!(history, ["Patient_4_0_0_History"]);
}
