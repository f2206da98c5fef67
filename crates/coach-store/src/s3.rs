//! S3 data store
//!
//! The bucket lives outside the cluster, so there is nothing to provision;
//! workloads reach it with the access keys injected into their environment.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource;
use serde::Serialize;
use tracing::info;

use coach_common::Error;

use crate::params::S3Params;
use crate::traits::{DataStore, StoreKind};
use crate::ORCHESTRATOR_TYPE;

const STORE_TYPE: &str = "s3";

#[derive(Serialize)]
struct S3ConnectionParams<'a> {
    store_type: &'static str,
    orchestrator_type: &'static str,
    orchestrator_params: BTreeMap<&'static str, &'a str>,
    end_point: &'a str,
    bucket_name: &'a str,
    creds_file: Option<String>,
    checkpoint_dir: &'a str,
}

/// S3-compatible bucket store
pub struct S3DataStore {
    params: S3Params,
    namespace: String,
}

impl S3DataStore {
    /// Create a store for `params`; workloads run in `namespace`
    pub fn new(params: S3Params, namespace: &str) -> Self {
        Self {
            params,
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl DataStore for S3DataStore {
    fn kind(&self) -> StoreKind {
        StoreKind::S3
    }

    async fn deploy(&self) -> Result<(), Error> {
        if self.params.bucket_name.is_empty() {
            return Err(Error::validation_for_field(
                "dataStore.bucketName",
                "s3 bucket name must not be empty",
            ));
        }
        info!(
            end_point = %self.params.end_point,
            bucket = %self.params.bucket_name,
            "using external s3 bucket"
        );
        Ok(())
    }

    async fn undeploy(&self) -> Result<(), Error> {
        Ok(())
    }

    fn get_info(&self) -> Option<PersistentVolumeClaimVolumeSource> {
        None
    }

    fn connection_params(&self) -> Result<String, Error> {
        let wire = S3ConnectionParams {
            store_type: STORE_TYPE,
            orchestrator_type: ORCHESTRATOR_TYPE,
            orchestrator_params: BTreeMap::from([("namespace", self.namespace.as_str())]),
            end_point: &self.params.end_point,
            bucket_name: &self.params.bucket_name,
            creds_file: self
                .params
                .creds_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            checkpoint_dir: &self.params.checkpoint_dir,
        };
        serde_json::to_string(&wire)
            .map_err(|e| Error::serialization_for_kind("data-store-params", e.to_string()))
    }
}
