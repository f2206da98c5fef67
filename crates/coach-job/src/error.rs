//! Job-specific error types

use crate::config::Role;
use crate::controller::LifecyclePhase;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("no {0} run spec configured")]
    MissingRole(Role),

    #[error("cannot {operation} while the job is {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: LifecyclePhase,
    },

    #[error("data store deploy failed: {0}")]
    StoreDeploy(#[source] coach_common::Error),

    #[error("filesystem-shared data store returned no mount")]
    MissingMount,

    #[error("submitting {role} workload {name} failed: {source}")]
    Submission {
        role: Role,
        name: String,
        source: coach_common::Error,
    },

    #[error("{0}")]
    Common(#[from] coach_common::Error),
}
