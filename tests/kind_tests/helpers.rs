//! Shared fixtures for cluster-backed tests

use std::time::Duration;

use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;

use coach_common::kube_utils::poll_until;
use coach_job::manifest::instance_selector;

/// Namespace every test job runs in
pub const TEST_NAMESPACE: &str = "coach-e2e";

/// Client for the current context, with the test namespace in place
pub async fn ensure_test_namespace() -> Client {
    let client = Client::try_default()
        .await
        .expect("a kubeconfig pointing at a test cluster");

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match namespaces.create(&PostParams::default(), &namespace).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 409 => {}
        Err(e) => panic!("failed to create namespace {}: {}", TEST_NAMESPACE, e),
    }
    client
}

/// Wait until the ReplicaSet controller has created a pod for `deployment`
pub async fn wait_for_pod(client: &Client, deployment: &str) {
    let pods: Api<Pod> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let selector = instance_selector(deployment);
    poll_until(
        Duration::from_secs(120),
        Duration::from_secs(2),
        format!("no pod for {} after 120s", deployment),
        || {
            let pods = pods.clone();
            let params = ListParams::default().labels(&selector);
            async move { Ok(!pods.list(&params).await?.items.is_empty()) }
        },
    )
    .await
    .expect("workload pod should be scheduled");
}

/// Best-effort removal of the test namespace
#[allow(dead_code)]
pub async fn delete_test_namespace(client: &Client) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let _ = namespaces
        .delete(TEST_NAMESPACE, &DeleteParams::background())
        .await;
}
