//! Cluster operations used by the job controller
//!
//! The controller only ever needs five calls against the API server, so they
//! sit behind [`ClusterClient`] and can be mocked in tests.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use coach_common::Error;

/// Receives log lines streamed from a workload pod
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Sink that prints every line to stdout
pub fn stdout_sink() -> LogSink {
    Arc::new(|line: &str| println!("{}", line))
}

/// Trait abstracting the cluster API for the job controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Submit a workload Deployment
    async fn create_workload(&self, namespace: &str, deployment: &Deployment)
        -> Result<(), Error>;

    /// List pods matching a label selector
    async fn list_instances(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error>;

    /// Fetch a single pod
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Pod, Error>;

    /// Follow a pod's log, feeding each line to `sink` until the stream closes
    async fn stream_instance_log(
        &self,
        namespace: &str,
        name: &str,
        sink: LogSink,
    ) -> Result<(), Error>;

    /// Delete a workload Deployment and its pods
    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// [`ClusterClient`] backed by a kube `Client`
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap an already-configured client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_workload(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), deployment).await?;
        Ok(())
    }

    async fn list_instances(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(selector)).await?;
        Ok(pods.items)
    }

    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Pod, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn stream_instance_log(
        &self,
        namespace: &str,
        name: &str,
        sink: LogSink,
    ) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            follow: true,
            ..Default::default()
        };
        let stream = api.log_stream(name, &params).await?;
        let mut lines = std::pin::pin!(stream.lines());
        while let Some(line) = lines
            .try_next()
            .await
            .map_err(|e| Error::internal_with_context("log_stream", e.to_string()))?
        {
            sink(&line);
        }
        debug!(pod = %name, "log stream closed");
        Ok(())
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }
}
