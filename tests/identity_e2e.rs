use clinmerge::{
    derive_global_id, CallerContext, DocumentStore, InMemoryDocumentStore, MergeConfig,
    MergeEngine, MergeRequest, SecurityTagSystem,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn setup() -> (MergeEngine, Arc<InMemoryDocumentStore>) {
    let store = Arc::new(InMemoryDocumentStore::new());
    let engine = MergeEngine::new(store.clone(), MergeConfig::default()).unwrap();
    (engine, store)
}

fn merge(engine: &MergeEngine, resources: Value) -> clinmerge::MergeResponse {
    let caller = CallerContext::new("client-1").with_scope_string("user/*.* access/*.*");
    engine.merge(MergeRequest::new(resources, caller)).unwrap()
}

fn tag(system: &str, code: &str) -> Value {
    json!({"system": system, "code": code})
}

#[test]
fn owner_code_becomes_the_authority() {
    let (engine, store) = setup();
    let response = merge(
        &engine,
        json!({
            "resourceType": "Patient",
            "id": "p1",
            "meta": {"security": [tag(SecurityTagSystem::OWNER, "orgA")]}
        }),
    );

    let entry = &response.entries[0];
    let expected = derive_global_id("p1", "orgA").to_string();
    assert_eq!(entry.source_assigning_authority.as_deref(), Some("orgA"));
    assert_eq!(entry.uuid.as_deref(), Some(expected.as_str()));

    let stored = store.find_by_key("Patient_4_0_0", "p1").unwrap().unwrap();
    assert_eq!(stored["_uuid"], json!(expected));
    let security = stored["meta"]["security"].as_array().unwrap();
    assert!(security.contains(&tag(SecurityTagSystem::SOURCE_ASSIGNING_AUTHORITY, "orgA")));
}

#[test]
fn explicit_authority_wins_over_owner() {
    let (engine, _store) = setup();
    let response = merge(
        &engine,
        json!({
            "resourceType": "Patient",
            "id": "p1",
            "meta": {"security": [
                tag(SecurityTagSystem::OWNER, "orgA"),
                tag(SecurityTagSystem::SOURCE_ASSIGNING_AUTHORITY, "ehrB")
            ]}
        }),
    );

    let entry = &response.entries[0];
    assert_eq!(entry.source_assigning_authority.as_deref(), Some("ehrB"));
    let expected = derive_global_id("p1", "ehrB").to_string();
    assert_eq!(entry.uuid.as_deref(), Some(expected.as_str()));
}

#[test]
fn global_id_is_a_function_of_id_and_authority() {
    assert_ne!(derive_global_id("p1", "orgA"), derive_global_id("p1", "orgB"));
    assert_eq!(derive_global_id("p1", "orgA"), derive_global_id("p1", "orgA"));
}

#[test]
fn same_local_id_from_another_authority_is_not_merged() {
    let (engine, store) = setup();
    let owned_by = |org: &str, gender: &str| {
        json!({
            "resourceType": "Patient",
            "id": "p1",
            "meta": {"security": [tag(SecurityTagSystem::OWNER, org)]},
            "gender": gender
        })
    };
    assert!(merge(&engine, owned_by("orgA", "female")).entries[0].created);

    let response = merge(&engine, owned_by("orgB", "male"));
    let entry = &response.entries[0];
    assert!(!entry.created && !entry.updated);
    let issue = entry.issue.as_ref().unwrap();
    assert_eq!(issue.code, "conflict");
    assert!(issue.diagnostics.as_deref().unwrap().contains("orgB"));

    let stored = store.find_by_key("Patient_4_0_0", "p1").unwrap().unwrap();
    assert_eq!(stored["gender"], json!("female"));
    assert_eq!(stored["meta"]["versionId"], json!("1"));
    assert_eq!(stored["_uuid"], json!(derive_global_id("p1", "orgA").to_string()));
    let security = stored["meta"]["security"].as_array().unwrap();
    assert!(security.contains(&tag(SecurityTagSystem::SOURCE_ASSIGNING_AUTHORITY, "orgA")));
    assert!(!security.contains(&tag(SecurityTagSystem::OWNER, "orgB")));
    assert_eq!(store.count("Patient_4_0_0_History").unwrap(), 1);
}

#[test]
fn global_id_survives_updates() {
    let (engine, store) = setup();
    let doc = |gender: &str| {
        json!({
            "resourceType": "Patient",
            "id": "p1",
            "meta": {"security": [tag(SecurityTagSystem::OWNER, "orgA")]},
            "gender": gender
        })
    };
    let created = merge(&engine, doc("female"));
    let updated = merge(&engine, doc("male"));
    assert!(updated.entries[0].updated);
    assert_eq!(created.entries[0].uuid, updated.entries[0].uuid);

    let stored = store.find_by_key("Patient_4_0_0", "p1").unwrap().unwrap();
    assert_eq!(stored["_uuid"].as_str(), created.entries[0].uuid.as_deref());
}

#[test]
fn client_supplied_internal_ids_are_ignored() {
    let (engine, store) = setup();
    let response = merge(
        &engine,
        json!({
            "resourceType": "Patient",
            "id": "p1",
            "_id": "forged-row",
            "_uuid": "00000000-0000-0000-0000-000000000000",
            "meta": {"security": [tag(SecurityTagSystem::OWNER, "orgA")]}
        }),
    );
    assert!(response.entries[0].created);

    let stored = store.find_by_key("Patient_4_0_0", "p1").unwrap().unwrap();
    assert_ne!(stored["_id"], json!("forged-row"));
    assert_eq!(stored["_uuid"], json!(derive_global_id("p1", "orgA").to_string()));
}

#[test]
fn references_get_global_identity() {
    let (engine, store) = setup();
    let response = merge(
        &engine,
        json!({
            "resourceType": "Observation",
            "id": "o1",
            "meta": {"security": [tag(SecurityTagSystem::OWNER, "orgA")]},
            "status": "final",
            "subject": {"reference": "Patient/p1", "display": "Jane Doe"},
            "performer": [
                {"reference": "Practitioner/dr1|npi"},
                {"reference": "#contained-1"},
                {"reference": "https://other.example.org/Practitioner/9"}
            ]
        }),
    );
    assert!(response.entries[0].created);

    let stored = store.find_by_key("Observation_4_0_0", "o1").unwrap().unwrap();

    let subject = &stored["subject"];
    assert_eq!(subject["reference"], json!("Patient/p1"));
    assert_eq!(subject["display"], json!("Jane Doe"));
    assert_eq!(
        subject["globalIdentity"],
        json!({
            "sourceId": "Patient/p1",
            "globalUuid": format!("Patient/{}", derive_global_id("p1", "orgA")),
            "authorityCode": "orgA"
        })
    );

    let performer = stored["performer"].as_array().unwrap();
    assert_eq!(performer[0]["reference"], json!("Practitioner/dr1|npi"));
    assert_eq!(performer[0]["globalIdentity"]["sourceId"], json!("Practitioner/dr1"));
    assert_eq!(performer[0]["globalIdentity"]["authorityCode"], json!("npi"));
    assert!(performer[1].get("globalIdentity").is_none());
    assert!(performer[2].get("globalIdentity").is_none());
}

#[test]
fn malformed_reference_rejects_the_resource() {
    let (engine, store) = setup();
    let response = merge(
        &engine,
        json!({
            "resourceType": "Observation",
            "id": "o1",
            "meta": {"security": [tag(SecurityTagSystem::OWNER, "orgA")]},
            "subject": {"reference": "Patient/"}
        }),
    );
    let issue = response.entries[0].issue.as_ref().unwrap();
    assert_eq!(issue.code, "invalid");
    assert!(store.find_by_key("Observation_4_0_0", "o1").unwrap().is_none());
}

#[test]
fn resaving_with_references_is_unchanged() {
    let (engine, _store) = setup();
    let doc = json!({
        "resourceType": "Observation",
        "id": "o1",
        "meta": {"security": [tag(SecurityTagSystem::OWNER, "orgA")]},
        "subject": {"reference": "Patient/p1"}
    });
    assert!(merge(&engine, doc.clone()).entries[0].created);

    let again = merge(&engine, doc);
    let entry = &again.entries[0];
    assert!(!entry.created && !entry.updated && entry.issue.is_none());
    assert_eq!(entry.resource_version.as_deref(), Some("1"));
}

#[test]
fn retargeting_a_reference_outside_the_graph_clears_its_identity() {
    let (engine, store) = setup();
    let doc = |subject: &str| {
        json!({
            "resourceType": "Observation",
            "id": "o1",
            "meta": {"security": [tag(SecurityTagSystem::OWNER, "orgA")]},
            "subject": {"reference": subject}
        })
    };
    merge(&engine, doc("Patient/p1"));

    for (version, target) in [("2", "http://ext.org/Patient/9"), ("3", "#contained-1")] {
        let response = merge(&engine, doc(target));
        assert!(response.entries[0].updated);
        assert_eq!(response.entries[0].resource_version.as_deref(), Some(version));

        let stored = store.find_by_key("Observation_4_0_0", "o1").unwrap().unwrap();
        assert_eq!(stored["subject"], json!({"reference": target}));
    }
}

#[test]
fn reference_with_unreadable_members_is_invalid() {
    let (engine, store) = setup();
    let response = merge(
        &engine,
        json!({
            "resourceType": "Observation",
            "id": "o1",
            "meta": {"security": [tag(SecurityTagSystem::OWNER, "orgA")]},
            "subject": {"reference": "Patient/p1", "display": 5}
        }),
    );
    let issue = response.entries[0].issue.as_ref().unwrap();
    assert_eq!(issue.code, "invalid");
    assert!(issue.diagnostics.as_deref().unwrap().contains("Patient/p1"));
    assert!(store.find_by_key("Observation_4_0_0", "o1").unwrap().is_none());
}
