//! Stories about running a training job end to end on a real cluster

use std::sync::{Arc, Mutex};
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::Api;

use coach_common::credentials::StoreCredentials;
use coach_job::{
    JobConfig, JobController, JobError, KubeClusterClient, LifecyclePhase, LogSink,
    MonitorConfig, Role, RunSpec, TailOutcome,
};
use coach_store::{
    data_store_for, memory_backend_for, DataStoreParams, MemoryBackendParams, RedisParams,
    S3Params,
};

use super::helpers::{ensure_test_namespace, wait_for_pod, TEST_NAMESPACE};

fn s3_store() -> DataStoreParams {
    DataStoreParams::S3(S3Params {
        end_point: "s3.amazonaws.com".to_string(),
        bucket_name: "coach-e2e".to_string(),
        creds_file: None,
        checkpoint_dir: "/checkpoint".to_string(),
    })
}

fn busybox(role: Role, script: &str) -> RunSpec {
    RunSpec::new(
        role,
        "busybox:1.36",
        vec!["sh".to_string(), "-c".to_string(), script.to_string()],
    )
}

async fn controller(runs: Vec<RunSpec>) -> JobController {
    let client = ensure_test_namespace().await;
    let config = JobConfig::new(
        runs,
        MemoryBackendParams::RedisPubSub(RedisParams::default()),
        s3_store(),
    )
    .unwrap();

    let memory_backend = memory_backend_for(&config.memory_backend, TEST_NAMESPACE, client.clone());
    let data_store = data_store_for(&config.data_store, TEST_NAMESPACE, client.clone());
    JobController::from_parts(
        config,
        TEST_NAMESPACE,
        Arc::new(KubeClusterClient::new(client)),
        memory_backend,
        data_store,
        StoreCredentials::default(),
    )
    .with_monitor_config(
        MonitorConfig::default()
            .with_poll_interval(Duration::from_secs(2))
            .with_timeout(Duration::from_secs(300)),
    )
}

/// Story: an operator runs a short trainer and watches it finish
///
/// The trainer echoes a line and exits; its output reaches the log sink, the
/// tail loop stops once the container is done, and teardown removes the
/// Deployment by its generated name.
#[tokio::test]
#[ignore]
async fn story_trainer_runs_to_completion_and_is_removed() {
    let mut ctl = controller(vec![busybox(Role::Trainer, "echo training-done; sleep 5")]).await;
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let captured = lines.clone();
    let sink: LogSink = Arc::new(move |line: &str| captured.lock().unwrap().push(line.to_string()));
    ctl = ctl.with_log_sink(sink);

    ctl.setup().await.expect("stores should come up");
    let handle = ctl.deploy_trainer().await.expect("trainer should be accepted");
    assert!(handle.name.starts_with("trainer-"));

    // Pods appear asynchronously after the Deployment is accepted
    let client = ensure_test_namespace().await;
    wait_for_pod(&client, &handle.name).await;

    let outcome = ctl
        .monitor_trainer()
        .await
        .expect("monitor should run")
        .expect("trainer pod was listed before monitoring");
    // Deployments restart exited containers, so a finished trainer shows up
    // either as terminated or as backing off
    assert!(
        matches!(
            outcome,
            TailOutcome::Terminated { .. } | TailOutcome::Failed { .. }
        ),
        "unexpected outcome: {}",
        outcome
    );
    assert!(lines
        .lock()
        .unwrap()
        .iter()
        .any(|l| l.contains("training-done")));

    let report = ctl.undeploy().await;
    assert!(report.is_clean(), "teardown report: {:?}", report);
    assert_eq!(ctl.phase(), LifecyclePhase::TornDown);

    let deployments: Api<Deployment> = Api::namespaced(client, TEST_NAMESPACE);
    let gone = deployments.get_opt(&handle.name).await.unwrap();
    assert!(
        gone.is_none() || gone.and_then(|d| d.metadata.deletion_timestamp).is_some(),
        "trainer Deployment should be deleted"
    );
}

/// Story: a job file without workers cannot deploy a worker pool
#[tokio::test]
#[ignore]
async fn story_missing_worker_role_is_a_caller_error() {
    let mut ctl = controller(vec![busybox(Role::Trainer, "sleep 1")]).await;
    ctl.setup().await.unwrap();

    let err = ctl.deploy_workers().await.unwrap_err();
    assert!(matches!(err, JobError::MissingRole(Role::Worker)));

    assert!(ctl.undeploy().await.is_clean());
}

/// Story: teardown is repeated after a flaky exit
///
/// The second pass finds nothing to delete; the workload deletes report
/// NotFound while the stores stay quiet.
#[tokio::test]
#[ignore]
async fn story_undeploy_twice_is_safe() {
    let mut ctl = controller(vec![
        busybox(Role::Trainer, "sleep 600"),
        busybox(Role::Worker, "sleep 600").with_replicas(2),
    ])
    .await;
    ctl.setup().await.unwrap();
    ctl.deploy_trainer().await.unwrap();
    ctl.deploy_workers().await.unwrap();

    let first = ctl.undeploy().await;
    assert_eq!(first.deleted.len(), 2);

    let second = ctl.undeploy().await;
    assert_eq!(second.failed.len(), 2);
    assert!(second.deleted.is_empty());
}
