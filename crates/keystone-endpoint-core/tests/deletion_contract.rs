//! Contract Test: Delete Paths
//!
//! Verifies cleanup when a `KeystoneEndpoint` is being deleted.
//!
//! Constraints verified:
//! - A full delete removes remote endpoints and every marker, then the object
//! - Nothing recorded and no identity API: marker-only cleanup, zero remote calls
//! - Identity API being deleted too: marker-only cleanup, remote state untouched
//! - Recorded endpoints without an identity API: wait, keep the object
//! - Markers of other instances on shared dependencies survive

mod common;

use common::*;
use keystone_endpoint_core::availability::Availability;
use keystone_endpoint_core::reconciler::dependency_finalizer;
use keystone_endpoint_core::{Action, Phase};
use std::time::Duration;

#[tokio::test]
async fn full_delete_removes_remote_endpoints_and_markers() {
    let fixture = Fixture::new();
    fixture.seed_ready_api().await;
    fixture.seed_service("nova", true).await;
    let instance = fixture
        .seed_endpoint("nova", &[("public", "http://a"), ("internal", "http://i")])
        .await;
    fixture.reconcile_past_init("nova").await.unwrap();
    assert_eq!(fixture.admin.total_registered(), 2);

    fixture.endpoints().delete("nova").await.unwrap();
    let terminating = fixture.endpoint("nova").await.unwrap();
    assert!(terminating.metadata.is_terminating());

    let outcome = fixture.reconcile("nova").await.unwrap();

    assert_eq!(outcome.phase, Phase::Deleting);
    assert_eq!(outcome.action, Action::Done);
    assert_eq!(fixture.admin.delete_call_count(), 2);
    assert_eq!(fixture.admin.total_registered(), 0);
    assert!(fixture.endpoint("nova").await.is_none());

    let marker = dependency_finalizer(&instance);
    let api = fixture.apis().get("keystone").await.unwrap().unwrap();
    assert!(!api.metadata.finalizers.contains(&marker));
    let service = fixture.services().get("nova").await.unwrap().unwrap();
    assert!(!service.metadata.finalizers.contains(&marker));
}

#[tokio::test]
async fn delete_without_records_or_api_makes_no_remote_calls() {
    let fixture = Fixture::new();
    fixture.seed_endpoint("nova", &[("public", "http://a")]).await;
    let waiting = fixture.reconcile_past_init("nova").await.unwrap();
    assert_eq!(waiting.phase, Phase::AwaitingDependency);

    fixture.endpoints().delete("nova").await.unwrap();
    let outcome = fixture.reconcile("nova").await.unwrap();

    assert_eq!(outcome.phase, Phase::Deleting);
    assert_eq!(fixture.connector.connect_call_count(), 0);
    assert_eq!(fixture.admin.list_call_count(), 0);
    assert_eq!(fixture.admin.mutation_count(), 0);
    assert!(fixture.endpoint("nova").await.is_none());
}

#[tokio::test]
async fn delete_without_records_skips_the_identity_service() {
    let fixture = Fixture::new();
    fixture.seed_ready_api().await;
    fixture.seed_endpoint("nova", &[("public", "http://a")]).await;
    let waiting = fixture.reconcile_past_init("nova").await.unwrap();
    assert_eq!(waiting.phase, Phase::AwaitingDependency);
    let connects = fixture.connector.connect_call_count();

    fixture.endpoints().delete("nova").await.unwrap();
    let outcome = fixture.reconcile("nova").await.unwrap();

    assert_eq!(outcome.phase, Phase::Deleting);
    assert_eq!(fixture.connector.connect_call_count(), connects);
    assert_eq!(fixture.admin.mutation_count(), 0);
    assert!(fixture.endpoint("nova").await.is_none());
}

#[tokio::test]
async fn delete_with_terminating_api_only_releases_markers() {
    let fixture = Fixture::new();
    fixture.seed_ready_api().await;
    fixture.seed_service("nova", true).await;
    fixture.seed_endpoint("nova", &[("public", "http://a")]).await;
    fixture.reconcile_past_init("nova").await.unwrap();
    let mutations = fixture.admin.mutation_count();

    // The API carries this instance's marker, so it only starts terminating
    fixture.apis().delete("keystone").await.unwrap();
    let api = fixture.apis().get("keystone").await.unwrap().unwrap();
    assert!(api.metadata.is_terminating());

    fixture.endpoints().delete("nova").await.unwrap();
    let outcome = fixture.reconcile("nova").await.unwrap();

    assert_eq!(outcome.phase, Phase::Deleting);
    assert_eq!(fixture.admin.mutation_count(), mutations);
    assert_eq!(
        fixture.admin.registered(SERVICE_ID, Availability::Public).len(),
        1,
        "Remote endpoints go away with the identity service itself"
    );
    assert!(fixture.endpoint("nova").await.is_none());
    assert!(
        fixture.apis().get("keystone").await.unwrap().is_none(),
        "Releasing the last marker lets the API deletion finish"
    );
}

#[tokio::test]
async fn delete_with_records_waits_for_the_api() {
    let fixture = Fixture::new();
    fixture.seed_ready_api().await;
    fixture.seed_service("nova", true).await;
    let instance = fixture.seed_endpoint("nova", &[("public", "http://a")]).await;
    fixture.reconcile_past_init("nova").await.unwrap();

    // Drop the API out from under the instance, markers and all
    let mut api = fixture.apis().get("keystone").await.unwrap().unwrap();
    api.metadata.finalizers.remove(&dependency_finalizer(&instance));
    fixture.apis().update(&api).await.unwrap();
    fixture.apis().delete("keystone").await.unwrap();
    assert!(fixture.apis().get("keystone").await.unwrap().is_none());

    fixture.endpoints().delete("nova").await.unwrap();
    let outcome = fixture.reconcile("nova").await.unwrap();

    assert_eq!(outcome.phase, Phase::AwaitingDependency);
    assert_eq!(outcome.action, Action::RequeueAfter(Duration::from_secs(5)));
    let instance = fixture.endpoint("nova").await.unwrap();
    assert!(instance.metadata.is_terminating());
    assert!(!instance.status.endpoint_ids.is_empty());
}

#[tokio::test]
async fn markers_of_other_instances_survive() {
    let fixture = Fixture::new();
    fixture.seed_ready_api().await;
    fixture.seed_service("nova", true).await;
    fixture.seed_service("placement", true).await;
    fixture.seed_endpoint("nova", &[("public", "http://nova")]).await;
    let placement = fixture
        .seed_endpoint("placement", &[("public", "http://placement")])
        .await;
    fixture.reconcile_past_init("nova").await.unwrap();
    fixture.reconcile_past_init("placement").await.unwrap();

    fixture.endpoints().delete("nova").await.unwrap();
    fixture.reconcile("nova").await.unwrap();

    let api = fixture.apis().get("keystone").await.unwrap().unwrap();
    assert_eq!(api.metadata.finalizers.len(), 1);
    assert!(api.metadata.finalizers.contains(&dependency_finalizer(&placement)));
    assert!(fixture.endpoint("placement").await.is_some());
}

#[tokio::test]
async fn repeated_delete_pass_is_harmless() {
    let fixture = Fixture::new();
    fixture.seed_ready_api().await;
    fixture.seed_service("nova", true).await;
    fixture.seed_endpoint("nova", &[("public", "http://a")]).await;
    fixture.reconcile_past_init("nova").await.unwrap();

    fixture.endpoints().delete("nova").await.unwrap();
    fixture.reconcile("nova").await.unwrap();
    let outcome = fixture.reconcile("nova").await.unwrap();

    assert_eq!(outcome.phase, Phase::Absent);
    assert_eq!(fixture.admin.delete_call_count(), 1);
}
