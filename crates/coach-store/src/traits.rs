//! Store adapter traits
//!
//! The lifecycle controller only sees these traits, so tests can swap in mocks
//! while production code talks to the cluster.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource;

#[cfg(test)]
use mockall::automock;

use coach_common::Error;

/// How a data store reaches the workloads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    /// Shared filesystem mounted into every pod
    Nfs,
    /// Object store reached with access keys
    S3,
}

impl StoreKind {
    /// True for stores that are mounted as a volume
    pub fn is_filesystem_shared(self) -> bool {
        matches!(self, StoreKind::Nfs)
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Nfs => write!(f, "nfs"),
            StoreKind::S3 => write!(f, "s3"),
        }
    }
}

/// Memory backend lifecycle (experience transport between workers and trainer)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Provision or verify the backend
    async fn deploy(&self) -> Result<(), Error>;

    /// Remove whatever `deploy` created
    async fn undeploy(&self) -> Result<(), Error>;

    /// Connection parameters as JSON, appended to workload launch commands
    fn connection_params(&self) -> Result<String, Error>;
}

/// Artifact store lifecycle (checkpoints and shared data)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Which wiring the store needs
    fn kind(&self) -> StoreKind;

    /// Provision or verify the store. Workloads must not be submitted unless
    /// this succeeded.
    async fn deploy(&self) -> Result<(), Error>;

    /// Remove whatever `deploy` created
    async fn undeploy(&self) -> Result<(), Error>;

    /// Volume source for filesystem-shared stores; `None` for key-based stores
    fn get_info(&self) -> Option<PersistentVolumeClaimVolumeSource>;

    /// Connection parameters as JSON, appended to workload launch commands
    fn connection_params(&self) -> Result<String, Error>;
}
