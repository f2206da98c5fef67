//! Redis pub/sub memory backend
//!
//! When the job file does not point at an existing Redis, a single-replica
//! `redis-server-<uuid>` Deployment and matching `redis-service-<uuid>` Service
//! are created in the job namespace and removed again on undeploy.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::Api;
use kube::Client;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use coach_common::{Error, APP_LABEL, LABEL_MANAGED_BY, MANAGED_BY_COACH};

use crate::api::{create_or_adopt, delete_if_present};
use crate::params::RedisParams;
use crate::traits::MemoryBackend;
use crate::ORCHESTRATOR_TYPE;

const STORE_TYPE: &str = "redispubsub";
const REDIS_IMAGE: &str = "redis:4-alpine";

/// Parameters handed to workloads via `--memory-backend-params`
#[derive(Serialize)]
struct RedisConnectionParams<'a> {
    store_type: &'static str,
    orchestrator_type: &'static str,
    orchestrator_params: BTreeMap<&'static str, &'a str>,
    redis_address: &'a str,
    redis_port: u16,
    channel: &'a str,
    deployed: bool,
}

/// Redis pub/sub memory backend
pub struct RedisPubSubBackend {
    params: RedisParams,
    namespace: String,
    client: Client,
    server_name: String,
    service_name: String,
    address: String,
    channel: String,
    created: AtomicBool,
}

impl RedisPubSubBackend {
    /// Resolve names, address and channel for a backend in `namespace`
    pub fn new(params: RedisParams, namespace: &str, client: Client) -> Self {
        let server_name = format!("redis-server-{}", Uuid::new_v4());
        let service_name = format!("redis-service-{}", Uuid::new_v4());
        let address = if params.deployed {
            params.redis_address.clone()
        } else {
            service_name.clone()
        };
        let channel = params
            .channel
            .clone()
            .unwrap_or_else(|| format!("channel-{}", Uuid::new_v4()));

        Self {
            params,
            namespace: namespace.to_string(),
            client,
            server_name,
            service_name,
            address,
            channel,
            created: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MemoryBackend for RedisPubSubBackend {
    async fn deploy(&self) -> Result<(), Error> {
        if self.params.deployed {
            info!(address = %self.address, port = self.params.redis_port, "using existing redis");
            return Ok(());
        }

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let deployment = redis_deployment(&self.server_name, self.params.redis_port);
        create_or_adopt(&deployments, &deployment, "Deployment", &self.server_name).await?;
        // Undeploy must remove the Deployment even if the Service create fails
        self.created.store(true, Ordering::SeqCst);

        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        let service = redis_service(&self.service_name, &self.server_name, self.params.redis_port);
        create_or_adopt(&services, &service, "Service", &self.service_name).await?;

        info!(
            server = %self.server_name,
            service = %self.service_name,
            namespace = %self.namespace,
            "redis memory backend deployed"
        );
        Ok(())
    }

    async fn undeploy(&self) -> Result<(), Error> {
        if !self.created.load(Ordering::SeqCst) {
            return Ok(());
        }

        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
        let service_result =
            delete_if_present(&services, STORE_TYPE, "Service", &self.service_name).await;

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
        let deployment_result =
            delete_if_present(&deployments, STORE_TYPE, "Deployment", &self.server_name).await;

        service_result.and(deployment_result)?;
        info!(server = %self.server_name, "redis memory backend removed");
        Ok(())
    }

    fn connection_params(&self) -> Result<String, Error> {
        redis_connection_params(
            &self.namespace,
            &self.address,
            self.params.redis_port,
            &self.channel,
        )
    }
}

fn redis_connection_params(
    namespace: &str,
    address: &str,
    port: u16,
    channel: &str,
) -> Result<String, Error> {
    let params = RedisConnectionParams {
        store_type: STORE_TYPE,
        orchestrator_type: ORCHESTRATOR_TYPE,
        orchestrator_params: BTreeMap::from([("namespace", namespace)]),
        redis_address: address,
        redis_port: port,
        channel,
        // Workloads never provision the backend themselves
        deployed: true,
    };
    serde_json::to_string(&params)
        .map_err(|e| Error::serialization_for_kind("memory-backend-params", e.to_string()))
}

fn redis_labels(server_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), server_name.to_string()),
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY_COACH.to_string()),
    ])
}

fn redis_deployment(server_name: &str, port: u16) -> Deployment {
    let labels = redis_labels(server_name);
    Deployment {
        metadata: ObjectMeta {
            name: Some(server_name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    APP_LABEL.to_string(),
                    server_name.to_string(),
                )])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: server_name.to_string(),
                        image: Some(REDIS_IMAGE.to_string()),
                        ports: Some(vec![ContainerPort {
                            container_port: i32::from(port),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn redis_service(service_name: &str, server_name: &str, port: u16) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(service_name.to_string()),
            labels: Some(redis_labels(server_name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                APP_LABEL.to_string(),
                server_name.to_string(),
            )])),
            ports: Some(vec![ServicePort {
                port: i32::from(port),
                target_port: Some(IntOrString::Int(i32::from(port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
