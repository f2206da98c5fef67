//! Cluster-backed stories for the training job lifecycle
//!
//! - `job_lifecycle`: a trainer is deployed against real stores, tailed to
//!   completion and torn down again

mod helpers;
mod job_lifecycle;
