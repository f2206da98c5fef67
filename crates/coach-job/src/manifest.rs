//! Manifest builder: RunSpec + store wiring → apps/v1 Deployment
//!
//! Everything here is pure. Trainer and worker manifests go through the same
//! `build_workload`, differing only in the extra launch arguments.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use uuid::Uuid;

use coach_common::credentials::{StoreCredentials, ACCESS_KEY_ID_ENV, SECRET_ACCESS_KEY_ENV};
use coach_common::{Error, APP_LABEL, LABEL_MANAGED_BY, MANAGED_BY_COACH, ROLE_LABEL};

use crate::config::{Role, RunSpec};

/// Name of the pod volume backed by the shared checkpoint claim
pub const CHECKPOINT_VOLUME: &str = "nfs-pvc";
/// Every workload pulls its image on each start
pub const IMAGE_PULL_POLICY: &str = "Always";

const MEMORY_BACKEND_FLAG: &str = "--memory-backend-params";
const DATA_STORE_FLAG: &str = "--data-store-params";
const NUM_WORKERS_FLAG: &str = "--num-workers";

/// How a workload reaches the data store
#[derive(Clone, Copy, Debug)]
pub enum StoreWiring<'a> {
    /// Checkpoint claim mounted read-write at the run's checkpoint dir
    FilesystemShared(&'a PersistentVolumeClaimVolumeSource),
    /// Access keys injected as environment variables
    KeyBased(&'a StoreCredentials),
}

/// Fresh `{role}-{uuid}` resource name
pub fn generate_name(role: Role) -> String {
    format!("{}-{}", role, Uuid::new_v4())
}

/// Base command followed by the serialized backend and store parameters, then `extra`
pub fn build_launch_command(
    base: &[String],
    memory_backend_params: &str,
    data_store_params: &str,
    extra: &[String],
) -> Vec<String> {
    let mut command = Vec::with_capacity(base.len() + 4 + extra.len());
    command.extend_from_slice(base);
    command.push(MEMORY_BACKEND_FLAG.to_string());
    command.push(memory_backend_params.to_string());
    command.push(DATA_STORE_FLAG.to_string());
    command.push(data_store_params.to_string());
    command.extend_from_slice(extra);
    command
}

/// Extra launch arguments telling each worker the pool size
pub fn worker_args(replica_count: u32) -> Vec<String> {
    vec![NUM_WORKERS_FLAG.to_string(), replica_count.to_string()]
}

/// Build the Deployment for `run` under `name`
///
/// `command` is the fully assembled launch command; `run.command` is not read.
pub fn build_workload(
    name: &str,
    run: &RunSpec,
    command: Vec<String>,
    wiring: StoreWiring<'_>,
) -> Result<Deployment, Error> {
    if run.image.trim().is_empty() {
        return Err(Error::validation_for_field("image", "image must not be empty"));
    }
    let replicas = i32::try_from(run.replica_count)
        .ok()
        .filter(|r| *r > 0)
        .ok_or_else(|| {
            Error::validation_for_field(
                "replicaCount",
                format!("invalid replica count {}", run.replica_count),
            )
        })?;

    let mut container = Container {
        name: name.to_string(),
        image: Some(run.image.clone()),
        command: Some(command),
        args: Some(run.arguments.clone()),
        image_pull_policy: Some(IMAGE_PULL_POLICY.to_string()),
        ..Default::default()
    };
    let mut volumes = None;

    match wiring {
        StoreWiring::FilesystemShared(claim) => {
            container.volume_mounts = Some(vec![VolumeMount {
                name: CHECKPOINT_VOLUME.to_string(),
                mount_path: run.checkpoint_dir.clone(),
                read_only: Some(false),
                ..Default::default()
            }]);
            volumes = Some(vec![Volume {
                name: CHECKPOINT_VOLUME.to_string(),
                persistent_volume_claim: Some(claim.clone()),
                ..Default::default()
            }]);
        }
        StoreWiring::KeyBased(credentials) => {
            container.env = Some(vec![
                env_var(ACCESS_KEY_ID_ENV, &credentials.access_key_id),
                env_var(SECRET_ACCESS_KEY_ENV, &credentials.secret_access_key),
            ]);
        }
    }

    let labels = workload_labels(name, run.role);
    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(APP_LABEL.to_string(), name.to_string())])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Label selector matching the pods of the Deployment called `name`
pub fn instance_selector(name: &str) -> String {
    format!("{}={}", APP_LABEL, name)
}

fn workload_labels(name: &str, role: Role) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), name.to_string()),
        (ROLE_LABEL.to_string(), role.to_string()),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY_COACH.to_string()),
    ])
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}
