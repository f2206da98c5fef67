//! Store parameters as they appear in the job file

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default Redis port
pub const DEFAULT_REDIS_PORT: u16 = 6379;
/// Default mount point for checkpoints inside workloads
pub const DEFAULT_CHECKPOINT_DIR: &str = "/checkpoint";
/// Default capacity requested for a provisioned NFS volume
pub const DEFAULT_NFS_CAPACITY: &str = "10Gi";

/// Memory backend selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MemoryBackendParams {
    /// Redis pub/sub channel
    #[serde(rename = "redispubsub")]
    RedisPubSub(RedisParams),
}

/// Redis pub/sub backend parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisParams {
    /// Address of an existing Redis; ignored when this job provisions its own
    #[serde(default)]
    pub redis_address: String,
    /// Redis port
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,
    /// Pub/sub channel; a unique one is generated when unset
    #[serde(default)]
    pub channel: Option<String>,
    /// True when Redis already runs and must not be provisioned
    #[serde(default)]
    pub deployed: bool,
}

impl Default for RedisParams {
    fn default() -> Self {
        Self {
            redis_address: String::new(),
            redis_port: DEFAULT_REDIS_PORT,
            channel: None,
            deployed: false,
        }
    }
}

/// Data store selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DataStoreParams {
    /// NFS export mounted through a PersistentVolumeClaim
    Nfs(NfsParams),
    /// S3-compatible bucket reached with access keys
    S3(S3Params),
}

impl DataStoreParams {
    /// Credentials file for key-based stores
    pub fn creds_file(&self) -> Option<&PathBuf> {
        match self {
            DataStoreParams::S3(s3) => s3.creds_file.as_ref(),
            DataStoreParams::Nfs(_) => None,
        }
    }

    /// True for stores mounted as a shared filesystem
    pub fn is_filesystem_shared(&self) -> bool {
        matches!(self, DataStoreParams::Nfs(_))
    }
}

/// NFS store parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfsParams {
    /// NFS server host; required unless `deployed`
    #[serde(default)]
    pub server: Option<String>,
    /// Exported path on the server
    #[serde(default)]
    pub path: Option<String>,
    /// Claim to mount; generated when provisioning and unset
    #[serde(default)]
    pub claim_name: Option<String>,
    /// True when the claim already exists and only needs verifying
    #[serde(default)]
    pub deployed: bool,
    /// Capacity requested for the provisioned volume
    #[serde(default = "default_nfs_capacity")]
    pub capacity: String,
    /// Checkpoint directory as seen by the workloads
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
}

impl Default for NfsParams {
    fn default() -> Self {
        Self {
            server: None,
            path: None,
            claim_name: None,
            deployed: false,
            capacity: default_nfs_capacity(),
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

/// S3 store parameters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Params {
    /// Endpoint of the S3-compatible service
    pub end_point: String,
    /// Bucket holding checkpoints
    pub bucket_name: String,
    /// ini credentials file; env vars are used when unset
    #[serde(default)]
    pub creds_file: Option<PathBuf>,
    /// Local checkpoint directory used by the workloads
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
}

fn default_redis_port() -> u16 {
    DEFAULT_REDIS_PORT
}

fn default_checkpoint_dir() -> String {
    DEFAULT_CHECKPOINT_DIR.to_string()
}

fn default_nfs_capacity() -> String {
    DEFAULT_NFS_CAPACITY.to_string()
}
