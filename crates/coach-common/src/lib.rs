//! Common types for coach-deploy: errors, cluster connection, credentials and telemetry

#![deny(missing_docs)]

pub mod credentials;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label key used to select the pods of a generated workload
pub const APP_LABEL: &str = "app";

/// Label key for the role a workload plays in the training job
pub const ROLE_LABEL: &str = "coach.io/role";

/// Standard Kubernetes label for the managing tool
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] for resources created here
pub const MANAGED_BY_COACH: &str = "coach-deploy";
