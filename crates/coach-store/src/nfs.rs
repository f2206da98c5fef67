//! NFS data store
//!
//! Checkpoints live on an NFS export mounted into every training pod through a
//! PersistentVolumeClaim. When the job provisions the store, a static
//! PersistentVolume pointing at the export is created together with a claim
//! pinned to it; otherwise an existing claim is verified.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    NFSVolumeSource, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PersistentVolumeSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::Api;
use kube::Client;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use coach_common::kube_utils::poll_until;
use coach_common::retry::{retry_with_backoff, RetryConfig};
use coach_common::{Error, LABEL_MANAGED_BY, MANAGED_BY_COACH};

use crate::api::{create_or_adopt, delete_if_present};
use crate::params::NfsParams;
use crate::traits::{DataStore, StoreKind};
use crate::ORCHESTRATOR_TYPE;

const STORE_TYPE: &str = "nfs";
const ACCESS_MODE: &str = "ReadWriteMany";
const BIND_TIMEOUT: Duration = Duration::from_secs(120);
const BIND_POLL_INTERVAL: Duration = Duration::from_secs(2);
const PHASE_BOUND: &str = "Bound";

/// Parameters handed to workloads via `--data-store-params`
#[derive(Serialize)]
struct NfsConnectionParams<'a> {
    store_type: &'static str,
    orchestrator_type: &'static str,
    orchestrator_params: BTreeMap<&'static str, &'a str>,
    deployed: bool,
    server: Option<&'a str>,
    path: Option<&'a str>,
    checkpoint_dir: &'a str,
}

/// NFS-backed data store
pub struct NfsDataStore {
    params: NfsParams,
    namespace: String,
    client: Client,
    claim_name: String,
    volume_name: String,
    created: AtomicBool,
}

impl NfsDataStore {
    /// Resolve claim and volume names for a store in `namespace`
    pub fn new(params: NfsParams, namespace: &str, client: Client) -> Self {
        let id = Uuid::new_v4();
        let claim_name = params
            .claim_name
            .clone()
            .unwrap_or_else(|| format!("nfs-checkpoint-{}", id));
        Self {
            params,
            namespace: namespace.to_string(),
            client,
            claim_name,
            volume_name: format!("nfs-pv-{}", id),
            created: AtomicBool::new(false),
        }
    }

    async fn verify_claim(&self) -> Result<(), Error> {
        let claims: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &self.namespace);
        let claim_name = self.claim_name.as_str();
        let claims = &claims;
        retry_with_backoff(&RetryConfig::with_max_attempts(5), "get_claim", || async move {
            match claims.get(claim_name).await {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(ae)) if ae.code == 404 => Err(Error::store_permanent(
                    STORE_TYPE,
                    format!("claim {} not found", claim_name),
                )),
                Err(e) => Err(Error::from(e)),
            }
        })
        .await
    }

    async fn provision(&self) -> Result<(), Error> {
        let (server, path) = match (&self.params.server, &self.params.path) {
            (Some(server), Some(path)) => (server.as_str(), path.as_str()),
            _ => {
                return Err(Error::validation_for_field(
                    "dataStore.server",
                    "nfs server and path are required to provision the store",
                ))
            }
        };

        let volumes: Api<PersistentVolume> = Api::all(self.client.clone());
        let volume = nfs_volume(&self.volume_name, server, path, &self.params.capacity);
        create_or_adopt(&volumes, &volume, "PersistentVolume", &self.volume_name).await?;
        self.created.store(true, Ordering::SeqCst);

        let claims: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &self.namespace);
        let claim = nfs_claim(&self.claim_name, &self.volume_name, &self.params.capacity);
        create_or_adopt(&claims, &claim, "PersistentVolumeClaim", &self.claim_name).await?;

        let claim_name = self.claim_name.clone();
        poll_until(
            BIND_TIMEOUT,
            BIND_POLL_INTERVAL,
            format!("timeout waiting for claim {} to bind", self.claim_name),
            || {
                let claims = claims.clone();
                let claim_name = claim_name.clone();
                async move {
                    let claim = claims.get(&claim_name).await?;
                    let phase = claim.status.as_ref().and_then(|s| s.phase.as_deref());
                    debug!(claim = %claim_name, phase = ?phase, "waiting for claim to bind");
                    Ok(phase == Some(PHASE_BOUND))
                }
            },
        )
        .await
    }
}

#[async_trait]
impl DataStore for NfsDataStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Nfs
    }

    async fn deploy(&self) -> Result<(), Error> {
        if self.params.deployed {
            self.verify_claim().await?;
            info!(claim = %self.claim_name, "using existing nfs claim");
            return Ok(());
        }

        self.provision().await?;
        info!(
            claim = %self.claim_name,
            volume = %self.volume_name,
            namespace = %self.namespace,
            "nfs data store deployed"
        );
        Ok(())
    }

    async fn undeploy(&self) -> Result<(), Error> {
        if !self.created.load(Ordering::SeqCst) {
            return Ok(());
        }

        let claims: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &self.namespace);
        let claim_result =
            delete_if_present(&claims, STORE_TYPE, "PersistentVolumeClaim", &self.claim_name).await;
        if let Err(e) = &claim_result {
            warn!(claim = %self.claim_name, error = %e, "failed to delete nfs claim");
        }

        let volumes: Api<PersistentVolume> = Api::all(self.client.clone());
        let volume_result =
            delete_if_present(&volumes, STORE_TYPE, "PersistentVolume", &self.volume_name).await;
        if let Err(e) = &volume_result {
            warn!(volume = %self.volume_name, error = %e, "failed to delete nfs volume");
        }

        claim_result.and(volume_result)?;
        info!(claim = %self.claim_name, "nfs data store removed");
        Ok(())
    }

    fn get_info(&self) -> Option<PersistentVolumeClaimVolumeSource> {
        Some(PersistentVolumeClaimVolumeSource {
            claim_name: self.claim_name.clone(),
            read_only: Some(false),
        })
    }

    fn connection_params(&self) -> Result<String, Error> {
        nfs_connection_params(&self.namespace, &self.params)
    }
}

fn nfs_connection_params(namespace: &str, params: &NfsParams) -> Result<String, Error> {
    let wire = NfsConnectionParams {
        store_type: STORE_TYPE,
        orchestrator_type: ORCHESTRATOR_TYPE,
        orchestrator_params: BTreeMap::from([("namespace", namespace)]),
        deployed: true,
        server: params.server.as_deref(),
        path: params.path.as_deref(),
        checkpoint_dir: &params.checkpoint_dir,
    };
    serde_json::to_string(&wire)
        .map_err(|e| Error::serialization_for_kind("data-store-params", e.to_string()))
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_MANAGED_BY.to_string(), MANAGED_BY_COACH.to_string())])
}

fn storage(capacity: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([("storage".to_string(), Quantity(capacity.to_string()))])
}

fn nfs_volume(name: &str, server: &str, path: &str, capacity: &str) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            access_modes: Some(vec![ACCESS_MODE.to_string()]),
            capacity: Some(storage(capacity)),
            nfs: Some(NFSVolumeSource {
                server: server.to_string(),
                path: path.to_string(),
                read_only: Some(false),
            }),
            persistent_volume_reclaim_policy: Some("Retain".to_string()),
            storage_class_name: Some(String::new()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn nfs_claim(name: &str, volume_name: &str, capacity: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![ACCESS_MODE.to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(storage(capacity)),
                ..Default::default()
            }),
            // Empty class disables dynamic provisioning so the claim binds to our volume
            storage_class_name: Some(String::new()),
            volume_name: Some(volume_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
