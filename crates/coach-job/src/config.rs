//! Job configuration: per-role run specs and store wiring
//!
//! A job file is YAML with camelCase keys:
//!
//! ```yaml
//! namespace: rl
//! runs:
//!   - role: trainer
//!     image: coach:latest
//!     command: [python3, rl_coach/training_worker.py]
//!   - role: worker
//!     image: coach:latest
//!     command: [python3, rl_coach/rollout_worker.py]
//!     replicaCount: 4
//! memoryBackend:
//!   kind: redispubsub
//! dataStore:
//!   kind: nfs
//!   server: 10.0.0.5
//!   path: /exports/coach
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use coach_common::kube_utils::{ConfigSource, ConnectionOptions};
use coach_common::Error;
use coach_store::params::DEFAULT_CHECKPOINT_DIR;
use coach_store::{DataStoreParams, MemoryBackendParams, RedisParams};

/// Orchestration-state key holding the generated Deployment name
pub const DEPLOYMENT_NAME_KEY: &str = "deployment_name";

/// Logical participant in a training job
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Consumes experience and publishes checkpoints
    Trainer,
    /// Produces experience from the latest checkpoint
    Worker,
}

impl Role {
    /// Every role, in deployment order
    pub const ALL: [Role; 2] = [Role::Trainer, Role::Worker];

    /// Lowercase name used in resource names and labels
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Trainer => "trainer",
            Role::Worker => "worker",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment intent for one role
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSpec {
    /// Which role this spec describes
    pub role: Role,
    /// Container image reference
    pub image: String,
    /// Entrypoint argument vector; connection parameters are appended at submit time
    pub command: Vec<String>,
    /// Container args
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Where the shared checkpoint volume is mounted
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
    /// Number of pods
    #[serde(default = "default_replica_count")]
    pub replica_count: u32,
    /// Filled in by the controller after a successful submission
    #[serde(skip)]
    pub orchestration_state: BTreeMap<String, String>,
}

impl RunSpec {
    /// A single-replica spec with no extra arguments
    pub fn new(role: Role, image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            role,
            image: image.into(),
            command,
            arguments: Vec::new(),
            checkpoint_dir: default_checkpoint_dir(),
            replica_count: default_replica_count(),
            orchestration_state: BTreeMap::new(),
        }
    }

    /// Set the container args
    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Set the replica count
    pub fn with_replicas(mut self, replica_count: u32) -> Self {
        self.replica_count = replica_count;
        self
    }

    /// Name of the submitted Deployment, once there is one
    pub fn deployment_name(&self) -> Option<&str> {
        self.orchestration_state
            .get(DEPLOYMENT_NAME_KEY)
            .map(String::as_str)
    }

    /// Handle to the submitted Deployment, once there is one
    pub fn deployment_handle(&self) -> Option<DeploymentHandle> {
        self.deployment_name().map(|name| DeploymentHandle {
            name: name.to_string(),
            role: self.role,
        })
    }

    fn validate(&self, index: usize) -> Result<(), Error> {
        if self.image.trim().is_empty() {
            return Err(Error::validation_for_field(
                format!("runs[{}].image", index),
                "image must not be empty",
            ));
        }
        if self.replica_count == 0 {
            return Err(Error::validation_for_field(
                format!("runs[{}].replicaCount", index),
                "replicaCount must be at least 1",
            ));
        }
        Ok(())
    }
}

/// The submitted Deployment for one role
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentHandle {
    /// Generated resource name (`{role}-{uuid}`)
    pub name: String,
    /// Role the Deployment runs
    pub role: Role,
}

/// Everything the controller needs to run one job
#[derive(Clone, Debug)]
pub struct JobConfig {
    runs: BTreeMap<Role, RunSpec>,
    /// Cluster connection selector, resolved once by the controller
    pub connection: ConnectionOptions,
    /// Memory backend wiring
    pub memory_backend: MemoryBackendParams,
    /// Data store wiring
    pub data_store: DataStoreParams,
}

impl JobConfig {
    /// Build a config; at most one run spec per role
    pub fn new(
        runs: Vec<RunSpec>,
        memory_backend: MemoryBackendParams,
        data_store: DataStoreParams,
    ) -> Result<Self, Error> {
        let mut by_role = BTreeMap::new();
        for (index, run) in runs.into_iter().enumerate() {
            run.validate(index)?;
            let role = run.role;
            if by_role.insert(role, run).is_some() {
                return Err(Error::validation_for_field(
                    format!("runs[{}].role", index),
                    format!("more than one {} run spec", role),
                ));
            }
        }

        Ok(Self {
            runs: by_role,
            connection: ConnectionOptions::default(),
            memory_backend,
            data_store,
        })
    }

    /// Set the cluster connection selector
    pub fn with_connection(mut self, connection: ConnectionOptions) -> Self {
        self.connection = connection;
        self
    }

    /// Run spec for `role`, if configured
    pub fn run(&self, role: Role) -> Option<&RunSpec> {
        self.runs.get(&role)
    }

    pub(crate) fn run_mut(&mut self, role: Role) -> Option<&mut RunSpec> {
        self.runs.get_mut(&role)
    }
}

/// On-disk job description
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFile {
    /// kubeconfig to use instead of kube's inference chain
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    /// Use the pod's service account
    #[serde(default)]
    pub in_cluster: bool,
    /// Target namespace; defaults to the active context's
    #[serde(default)]
    pub namespace: Option<String>,
    /// Trainer and worker run specs
    pub runs: Vec<RunSpec>,
    /// Memory backend wiring
    #[serde(default = "default_memory_backend")]
    pub memory_backend: MemoryBackendParams,
    /// Data store wiring
    pub data_store: DataStoreParams,
}

impl JobFile {
    /// Parse a job file from YAML text
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        serde_yaml::from_str(contents)
            .map_err(|e| Error::config("job-file", format!("invalid job file: {}", e)))
    }

    /// Read and parse a job file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                "job-file",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        Self::from_yaml(&contents)
    }

    /// Where cluster credentials come from
    pub fn config_source(&self) -> ConfigSource {
        match (&self.kubeconfig, self.in_cluster) {
            (Some(path), _) => ConfigSource::Kubeconfig(path.clone()),
            (None, true) => ConfigSource::InCluster,
            (None, false) => ConfigSource::Infer,
        }
    }

    /// Validate and convert into a [`JobConfig`]
    pub fn into_job_config(self) -> Result<JobConfig, Error> {
        let connection = ConnectionOptions {
            source: self.config_source(),
            namespace: self.namespace.clone(),
            ..Default::default()
        };
        Ok(JobConfig::new(self.runs, self.memory_backend, self.data_store)?
            .with_connection(connection))
    }
}

fn default_checkpoint_dir() -> String {
    DEFAULT_CHECKPOINT_DIR.to_string()
}

fn default_replica_count() -> u32 {
    1
}

fn default_memory_backend() -> MemoryBackendParams {
    MemoryBackendParams::RedisPubSub(RedisParams::default())
}
