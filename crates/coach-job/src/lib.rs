//! Training job lifecycle for coach-deploy
//!
//! Deploys one trainer and one worker pool as Kubernetes Deployments wired to a
//! shared memory backend and data store:
//! - `config`: job file, per-role run specs and orchestration state
//! - `manifest`: pure Deployment construction and launch-command assembly
//! - `client`: the cluster operations the controller needs, behind a trait
//! - `monitor`: log tail and health poll for a running trainer pod
//! - `controller`: setup → deploy trainer → deploy workers → monitor → undeploy

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod manifest;
pub mod monitor;

pub use client::{ClusterClient, KubeClusterClient, LogSink};
pub use config::{DeploymentHandle, JobConfig, JobFile, Role, RunSpec, DEPLOYMENT_NAME_KEY};
pub use controller::{JobController, LifecyclePhase, TeardownReport};
pub use error::JobError;
pub use monitor::{MonitorConfig, TailOutcome};
