//! Job lifecycle controller
//!
//! Drives one training job through
//! `Uninitialized → StoresReady → TrainerDeployed → WorkersDeployed → Monitoring → TornDown`.
//! The caller chains the steps; a step that fails leaves the phase where it
//! was, except submission faults which move the job to `Failed`.
//!
//! The generated Deployment name is written into the role's RunSpec at the
//! moment the create call succeeds. It is the only link between what was
//! submitted and what `undeploy` deletes.

use std::sync::Arc;

use k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use coach_common::credentials::StoreCredentials;
use coach_common::kube_utils::ClusterConnection;
use coach_store::{data_store_for, memory_backend_for, DataStore, MemoryBackend};

use crate::client::{stdout_sink, ClusterClient, KubeClusterClient, LogSink};
use crate::config::{DeploymentHandle, JobConfig, Role, RunSpec, DEPLOYMENT_NAME_KEY};
use crate::error::JobError;
use crate::manifest::{
    build_launch_command, build_workload, generate_name, instance_selector, worker_args,
    StoreWiring,
};
use crate::monitor::{tail, MonitorConfig, TailOutcome};

/// Where the job is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Nothing provisioned yet
    Uninitialized,
    /// Memory backend and data store are up
    StoresReady,
    /// Trainer Deployment submitted
    TrainerDeployed,
    /// Worker Deployment submitted
    WorkersDeployed,
    /// Tailing the trainer
    Monitoring,
    /// Teardown ran
    TornDown,
    /// A submission was rejected; only teardown is allowed
    Failed,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecyclePhase::Uninitialized => "uninitialized",
            LifecyclePhase::StoresReady => "stores-ready",
            LifecyclePhase::TrainerDeployed => "trainer-deployed",
            LifecyclePhase::WorkersDeployed => "workers-deployed",
            LifecyclePhase::Monitoring => "monitoring",
            LifecyclePhase::TornDown => "torn-down",
            LifecyclePhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What `undeploy` managed to remove
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Workloads deleted
    pub deleted: Vec<DeploymentHandle>,
    /// Workloads whose delete failed, with the error
    pub failed: Vec<(DeploymentHandle, String)>,
    /// Memory backend / data store undeploy errors
    pub store_errors: Vec<String>,
}

impl TeardownReport {
    /// True when every delete and store undeploy succeeded
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.store_errors.is_empty()
    }
}

/// Lifecycle controller for one trainer plus one worker pool
pub struct JobController {
    config: JobConfig,
    namespace: String,
    cluster: Arc<dyn ClusterClient>,
    memory_backend: Arc<dyn MemoryBackend>,
    data_store: Arc<dyn DataStore>,
    credentials: StoreCredentials,
    mount: Option<PersistentVolumeClaimVolumeSource>,
    phase: LifecyclePhase,
    monitor: MonitorConfig,
    cancel: CancellationToken,
    sink: LogSink,
}

impl JobController {
    /// Resolve the cluster connection once and build every collaborator from it
    pub async fn connect(config: JobConfig) -> Result<Self, JobError> {
        let connection = ClusterConnection::resolve(config.connection.clone()).await?;
        let client = connection.client()?;
        let namespace = connection.namespace().to_string();

        let memory_backend = memory_backend_for(&config.memory_backend, &namespace, client.clone());
        let data_store = data_store_for(&config.data_store, &namespace, client.clone());
        let credentials = if config.data_store.is_filesystem_shared() {
            StoreCredentials::default()
        } else {
            StoreCredentials::resolve(config.data_store.creds_file().map(|p| p.as_path()))
        };

        Ok(Self::from_parts(
            config,
            namespace,
            Arc::new(KubeClusterClient::new(client)),
            memory_backend,
            data_store,
            credentials,
        ))
    }

    /// Assemble a controller from already-built collaborators
    pub fn from_parts(
        config: JobConfig,
        namespace: impl Into<String>,
        cluster: Arc<dyn ClusterClient>,
        memory_backend: Arc<dyn MemoryBackend>,
        data_store: Arc<dyn DataStore>,
        credentials: StoreCredentials,
    ) -> Self {
        Self {
            config,
            namespace: namespace.into(),
            cluster,
            memory_backend,
            data_store,
            credentials,
            mount: None,
            phase: LifecyclePhase::Uninitialized,
            monitor: MonitorConfig::default(),
            cancel: CancellationToken::new(),
            sink: stdout_sink(),
        }
    }

    /// Tune the trainer tail loop
    pub fn with_monitor_config(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    /// Send trainer log lines somewhere other than stdout
    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.sink = sink;
        self
    }

    /// Token that interrupts monitoring when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    /// Namespace every job resource lives in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// RunSpec for `role`, including its orchestration state
    pub fn run_spec(&self, role: Role) -> Option<&RunSpec> {
        self.config.run(role)
    }

    /// Bring up the memory backend, then the data store
    ///
    /// Memory backend faults are logged only. A data store fault fails setup
    /// and leaves the job uninitialized.
    pub async fn setup(&mut self) -> Result<(), JobError> {
        self.require(&[LifecyclePhase::Uninitialized], "set up")?;

        if let Err(e) = self.memory_backend.deploy().await {
            warn!(error = %e, "memory backend deploy failed");
        }

        self.data_store.deploy().await.map_err(|e| {
            error!(store = %self.data_store.kind(), error = %e, "data store deploy failed");
            JobError::StoreDeploy(e)
        })?;

        if self.data_store.kind().is_filesystem_shared() {
            let mount = self.data_store.get_info().ok_or(JobError::MissingMount)?;
            debug!(claim = %mount.claim_name, "caching checkpoint claim");
            self.mount = Some(mount);
        }

        self.phase = LifecyclePhase::StoresReady;
        info!(namespace = %self.namespace, "stores ready");
        Ok(())
    }

    /// Submit the trainer Deployment
    ///
    /// Succeeds once per controller; a second call fails with `InvalidPhase`.
    pub async fn deploy_trainer(&mut self) -> Result<DeploymentHandle, JobError> {
        self.deploy_role(
            Role::Trainer,
            LifecyclePhase::StoresReady,
            LifecyclePhase::TrainerDeployed,
            "deploy trainer",
        )
        .await
    }

    /// Submit the worker Deployment, telling each worker the pool size
    pub async fn deploy_workers(&mut self) -> Result<DeploymentHandle, JobError> {
        self.deploy_role(
            Role::Worker,
            LifecyclePhase::TrainerDeployed,
            LifecyclePhase::WorkersDeployed,
            "deploy workers",
        )
        .await
    }

    async fn deploy_role(
        &mut self,
        role: Role,
        required: LifecyclePhase,
        next: LifecyclePhase,
        operation: &'static str,
    ) -> Result<DeploymentHandle, JobError> {
        let run = self.config.run(role).ok_or(JobError::MissingRole(role))?;
        if self.phase != required {
            return Err(JobError::InvalidPhase {
                operation,
                phase: self.phase,
            });
        }

        let extra = match role {
            Role::Worker => worker_args(run.replica_count),
            Role::Trainer => Vec::new(),
        };
        let command = build_launch_command(
            &run.command,
            &self.memory_backend.connection_params()?,
            &self.data_store.connection_params()?,
            &extra,
        );
        let wiring = match &self.mount {
            Some(mount) => StoreWiring::FilesystemShared(mount),
            None => StoreWiring::KeyBased(&self.credentials),
        };

        let name = generate_name(role);
        let deployment = build_workload(&name, run, command, wiring)?;

        if let Err(source) = self
            .cluster
            .create_workload(&self.namespace, &deployment)
            .await
        {
            error!(role = %role, name = %name, error = %source, "workload submission failed");
            self.phase = LifecyclePhase::Failed;
            return Err(JobError::Submission { role, name, source });
        }

        if let Some(run) = self.config.run_mut(role) {
            run.orchestration_state
                .insert(DEPLOYMENT_NAME_KEY.to_string(), name.clone());
        }
        self.phase = next;
        info!(role = %role, name = %name, namespace = %self.namespace, "workload submitted");
        Ok(DeploymentHandle { name, role })
    }

    /// Tail the trainer's first pod until it finishes
    ///
    /// Returns `Ok(None)` without waiting when no trainer pod exists yet.
    pub async fn monitor_trainer(&mut self) -> Result<Option<TailOutcome>, JobError> {
        let run = self
            .config
            .run(Role::Trainer)
            .ok_or(JobError::MissingRole(Role::Trainer))?;
        self.require(
            &[
                LifecyclePhase::TrainerDeployed,
                LifecyclePhase::WorkersDeployed,
                LifecyclePhase::Monitoring,
            ],
            "monitor trainer",
        )?;
        let Some(name) = run.deployment_name() else {
            return Ok(None);
        };

        let pods = self
            .cluster
            .list_instances(&self.namespace, &instance_selector(name))
            .await?;
        let Some(instance) = pods.into_iter().find_map(|pod| pod.metadata.name) else {
            info!(deployment = %name, "no trainer pod to monitor");
            return Ok(None);
        };

        self.phase = LifecyclePhase::Monitoring;
        let outcome = tail(
            self.cluster.as_ref(),
            &self.namespace,
            &instance,
            &self.monitor,
            &self.cancel,
            &self.sink,
        )
        .await;
        Ok(Some(outcome))
    }

    /// Worker output is not tailed
    pub async fn monitor_workers(&self) -> Result<(), JobError> {
        debug!("worker monitoring is not implemented");
        Ok(())
    }

    /// Best-effort teardown of everything the job created
    ///
    /// Safe from any phase and safe to repeat. Each delete is attempted
    /// independently; the stores are always undeployed afterwards.
    pub async fn undeploy(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        for role in Role::ALL {
            let Some(handle) = self.config.run(role).and_then(RunSpec::deployment_handle) else {
                continue;
            };
            match self
                .cluster
                .delete_workload(&self.namespace, &handle.name)
                .await
            {
                Ok(()) => {
                    info!(role = %role, name = %handle.name, "workload deleted");
                    report.deleted.push(handle);
                }
                Err(e) => {
                    warn!(role = %role, name = %handle.name, error = %e, "workload delete failed");
                    report.failed.push((handle, e.to_string()));
                }
            }
        }

        if let Err(e) = self.memory_backend.undeploy().await {
            warn!(error = %e, "memory backend undeploy failed");
            report.store_errors.push(format!("memory backend: {}", e));
        }
        if let Err(e) = self.data_store.undeploy().await {
            warn!(error = %e, "data store undeploy failed");
            report.store_errors.push(format!("data store: {}", e));
        }

        if self.phase != LifecyclePhase::Failed {
            self.phase = LifecyclePhase::TornDown;
        }
        report
    }

    fn require(
        &self,
        allowed: &[LifecyclePhase],
        operation: &'static str,
    ) -> Result<(), JobError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(JobError::InvalidPhase {
                operation,
                phase: self.phase,
            })
        }
    }
}
