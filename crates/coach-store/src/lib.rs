//! Store adapters for coach-deploy
//!
//! A training job talks to two shared services:
//! - a memory backend (Redis pub/sub) carrying experience from workers to the trainer
//! - a data store (NFS claim or S3 bucket) carrying checkpoints back to workers
//!
//! Each adapter provisions or verifies its service, serializes the connection
//! parameters handed to workloads, and cleans up after itself.

mod api;
pub mod nfs;
pub mod params;
pub mod redis;
pub mod s3;
pub mod traits;

use std::sync::Arc;

use kube::Client;

pub use nfs::NfsDataStore;
pub use params::{DataStoreParams, MemoryBackendParams, NfsParams, RedisParams, S3Params};
pub use redis::RedisPubSubBackend;
pub use s3::S3DataStore;
pub use traits::{DataStore, MemoryBackend, StoreKind};

/// Orchestrator identifier embedded in every connection parameter set
pub const ORCHESTRATOR_TYPE: &str = "kubernetes";

/// Build the memory backend described by `params` in `namespace`
pub fn memory_backend_for(
    params: &MemoryBackendParams,
    namespace: &str,
    client: Client,
) -> Arc<dyn MemoryBackend> {
    match params {
        MemoryBackendParams::RedisPubSub(redis) => {
            Arc::new(RedisPubSubBackend::new(redis.clone(), namespace, client))
        }
    }
}

/// Build the data store described by `params` in `namespace`
pub fn data_store_for(
    params: &DataStoreParams,
    namespace: &str,
    client: Client,
) -> Arc<dyn DataStore> {
    match params {
        DataStoreParams::Nfs(nfs) => Arc::new(NfsDataStore::new(nfs.clone(), namespace, client)),
        DataStoreParams::S3(s3) => Arc::new(S3DataStore::new(s3.clone(), namespace)),
    }
}
