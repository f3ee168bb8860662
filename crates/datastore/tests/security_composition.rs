//! Security and patient filter composition evaluated against the in-memory
//! backend.

mod common;

use bson::doc;
use common::{TestHarness, tagged};
use meridian_datastore::access::CallerContext;
use meridian_datastore::query::SearchArgs;
use meridian_datastore::store::QueryOptions;

fn seed_mixed_tags(harness: &TestHarness) {
    let collection = harness.store.open("Patient_4_0_0");
    collection.insert_many([
        tagged("Patient", "p1", "acme"),
        tagged("Patient", "p2", "acme"),
        tagged("Patient", "p3", "northwind"),
    ]);
}

async fn visible_ids(harness: &TestHarness, query: bson::Document) -> Vec<String> {
    harness
        .executor
        .fetch_all("Patient", &SearchArgs::new(), query, QueryOptions::new())
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.get_str("id").unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn security_filter_restricts_visibility() {
    let harness = TestHarness::new();
    seed_mixed_tags(&harness);

    let caller = CallerContext::new("clinician", "access/acme.read");
    let tags = harness
        .composer
        .security_tags_from_scope(&caller, false, "read")
        .unwrap();
    let query = harness
        .composer
        .apply_security_filter("Patient", &tags, doc! {}, false, false);

    assert_eq!(visible_ids(&harness, query).await, ["p1", "p2"]);
}

#[tokio::test]
async fn wildcard_scope_sees_everything() {
    let harness = TestHarness::new();
    seed_mixed_tags(&harness);

    let caller = CallerContext::new("admin", "access/*.read");
    let tags = harness
        .composer
        .security_tags_from_scope(&caller, false, "read")
        .unwrap();
    let query = harness
        .composer
        .apply_security_filter("Patient", &tags, doc! {}, false, false);

    assert_eq!(visible_ids(&harness, query).await.len(), 3);
}

// The combined filter behaves as the conjunction of the original query and
// the security clause, whatever shape the original query had.
#[tokio::test]
async fn security_filter_conjunction_over_query_shapes() {
    let harness = TestHarness::new();
    seed_mixed_tags(&harness);
    let tags = vec!["acme".to_string()];

    let shapes = [
        doc! {},
        doc! { "id": "p1" },
        doc! { "$and": [ { "id": { "$in": ["p1", "p3"] } } ] },
    ];
    let expected: [&[&str]; 3] = [&["p1", "p2"], &["p1"], &["p1"]];

    for (shape, expected) in shapes.into_iter().zip(expected) {
        let query = harness
            .composer
            .apply_security_filter("Patient", &tags, shape, false, false);
        assert_eq!(visible_ids(&harness, query).await, *expected);
    }
}

#[tokio::test]
async fn access_index_fast_path_matches_denormalized_field() {
    let harness = TestHarness::new();
    let collection = harness.store.open("Patient_4_0_0");
    let mut patient = tagged("Patient", "p1", "acme");
    patient.insert("_access", doc! { "acme": 1 });
    collection.insert(patient);
    collection.insert(tagged("Patient", "p2", "northwind"));

    // Patient is configured with the access index in the harness.
    let query = harness.composer.apply_security_filter(
        "Patient",
        &["acme".to_string()],
        doc! {},
        true,
        false,
    );
    assert_eq!(
        query,
        doc! { "$and": [ { "_access.acme": 1 } ] }
    );
    assert_eq!(visible_ids(&harness, query).await, ["p1"]);
}

#[tokio::test]
async fn patient_filter_restricts_to_linked_resources() {
    let harness = TestHarness::new();
    let collection = harness.store.open("Observation_4_0_0");
    let mut mine = tagged("Observation", "o1", "acme");
    mine.insert("subject", doc! { "reference": "Patient/p1", "_sourceId": "Patient/p1" });
    let mut other = tagged("Observation", "o2", "acme");
    other.insert("subject", doc! { "reference": "Patient/p9", "_sourceId": "Patient/p9" });
    collection.insert_many([mine, other]);

    let query = harness
        .composer
        .apply_patient_filter(&["p1".to_string()], doc! {}, "Observation", false)
        .unwrap();
    let ids: Vec<String> = harness
        .executor
        .fetch_all("Observation", &SearchArgs::new(), query, QueryOptions::new())
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.get_str("id").unwrap().to_string())
        .collect();
    assert_eq!(ids, ["o1"]);
}

#[tokio::test]
async fn security_and_patient_filters_compose() {
    let harness = TestHarness::new();
    let collection = harness.store.open("Observation_4_0_0");
    let mut visible = tagged("Observation", "o1", "acme");
    visible.insert("subject", doc! { "reference": "Patient/p1", "_sourceId": "Patient/p1" });
    let mut wrong_tenant = tagged("Observation", "o2", "northwind");
    wrong_tenant.insert(
        "subject",
        doc! { "reference": "Patient/p1", "_sourceId": "Patient/p1" },
    );
    collection.insert_many([visible, wrong_tenant]);

    let tags = vec!["acme".to_string()];
    let query = harness
        .composer
        .apply_security_filter("Observation", &tags, doc! {}, false, false);
    let query = harness
        .composer
        .apply_patient_filter(&["p1".to_string()], query, "Observation", false)
        .unwrap();

    // Both clauses live in one flat $and.
    assert_eq!(query.get_array("$and").unwrap().len(), 2);

    let ids: Vec<String> = harness
        .executor
        .fetch_all("Observation", &SearchArgs::new(), query, QueryOptions::new())
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.get_str("id").unwrap().to_string())
        .collect();
    assert_eq!(ids, ["o1"]);
}
