//! Log tail and health poll for a running trainer pod
//!
//! Each cycle waits the poll interval, follows the pod's log into the sink,
//! then fetches the pod to decide whether it has reached a terminal state.
//! Streaming is best-effort; only the observed container state ends the loop.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ClusterClient, LogSink};

/// Delay before every tail cycle
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Waiting reasons that will not resolve on their own
pub const PERMANENT_WAITING_REASONS: [&str; 4] =
    ["Error", "CrashLoopBackOff", "ImagePullBackOff", "ErrImagePull"];

/// Tail loop tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Delay before each cycle
    pub poll_interval: Duration,
    /// Give up after this long; `None` tails until the pod finishes or the token is cancelled
    pub timeout: Option<Duration>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

impl MonitorConfig {
    /// Set the poll interval
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Bound the whole tail
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Why the tail loop stopped
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TailOutcome {
    /// A container exited
    Terminated {
        /// Container name
        container: String,
        /// Process exit code
        exit_code: i32,
        /// Kubelet-reported reason, e.g. `Completed` or `OOMKilled`
        reason: Option<String>,
    },
    /// A container is stuck waiting on a permanent failure
    Failed {
        /// Container name
        container: String,
        /// One of [`PERMANENT_WAITING_REASONS`]
        reason: String,
    },
    /// The pod could no longer be fetched
    Aborted {
        /// Last fetch error
        error: String,
    },
    /// The configured timeout elapsed
    TimedOut,
    /// The cancellation token fired
    Cancelled,
}

impl TailOutcome {
    /// True only for a zero exit code
    pub fn is_success(&self) -> bool {
        matches!(self, TailOutcome::Terminated { exit_code: 0, .. })
    }
}

impl std::fmt::Display for TailOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TailOutcome::Terminated {
                container,
                exit_code,
                reason,
            } => write!(
                f,
                "container {} terminated with exit code {} ({})",
                container,
                exit_code,
                reason.as_deref().unwrap_or("no reason")
            ),
            TailOutcome::Failed { container, reason } => {
                write!(f, "container {} failed: {}", container, reason)
            }
            TailOutcome::Aborted { error } => write!(f, "monitoring aborted: {}", error),
            TailOutcome::TimedOut => f.write_str("monitoring timed out"),
            TailOutcome::Cancelled => f.write_str("monitoring cancelled"),
        }
    }
}

/// Terminal outcome for `pod`, if any container has reached one
pub fn terminal_state(pod: &Pod) -> Option<TailOutcome> {
    let statuses = pod.status.as_ref()?.container_statuses.as_ref()?;

    statuses.iter().find_map(|status| {
        let state = status.state.as_ref()?;
        if let Some(terminated) = &state.terminated {
            return Some(TailOutcome::Terminated {
                container: status.name.clone(),
                exit_code: terminated.exit_code,
                reason: terminated.reason.clone(),
            });
        }
        let reason = state.waiting.as_ref()?.reason.as_deref()?;
        PERMANENT_WAITING_REASONS
            .contains(&reason)
            .then(|| TailOutcome::Failed {
                container: status.name.clone(),
                reason: reason.to_string(),
            })
    })
}

/// Tail `instance` until it reaches a terminal state
///
/// Transient fetch errors restart the cycle; a permanent one (e.g. the pod was
/// deleted) ends it with [`TailOutcome::Aborted`].
pub async fn tail(
    client: &dyn ClusterClient,
    namespace: &str,
    instance: &str,
    config: &MonitorConfig,
    cancel: &CancellationToken,
    sink: &LogSink,
) -> TailOutcome {
    let deadline = config.timeout.map(|timeout| Instant::now() + timeout);
    info!(pod = %instance, namespace = %namespace, "tailing pod");

    loop {
        if let Err(stop) = guarded(cancel, deadline, tokio::time::sleep(config.poll_interval)).await
        {
            return stop;
        }

        match guarded(
            cancel,
            deadline,
            client.stream_instance_log(namespace, instance, sink.clone()),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(pod = %instance, error = %e, "log stream failed"),
            Err(stop) => return stop,
        }

        let pod = match guarded(cancel, deadline, client.get_instance(namespace, instance)).await {
            Ok(Ok(pod)) => pod,
            Ok(Err(e)) if e.is_retryable() => {
                debug!(pod = %instance, error = %e, "pod fetch failed, retrying");
                continue;
            }
            Ok(Err(e)) => {
                warn!(pod = %instance, error = %e, "pod fetch failed permanently");
                return TailOutcome::Aborted {
                    error: e.to_string(),
                };
            }
            Err(stop) => return stop,
        };

        if let Some(outcome) = terminal_state(&pod) {
            info!(pod = %instance, outcome = %outcome, "pod reached terminal state");
            return outcome;
        }
    }
}

/// Run `fut` unless the token fires or the deadline passes first
async fn guarded<F: Future>(
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    fut: F,
) -> Result<F::Output, TailOutcome> {
    let expiry = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TailOutcome::Cancelled),
        _ = expiry => Err(TailOutcome::TimedOut),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use coach_common::Error;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStateWaiting,
        ContainerStatus, PodStatus,
    };
    use std::sync::{Arc, Mutex};

    fn pod_with(state: ContainerState) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: "trainer-x".into(),
                    state: Some(state),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn waiting(reason: &str) -> Pod {
        pod_with(ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.into()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn terminated(exit_code: i32) -> Pod {
        pod_with(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code,
                reason: Some("Completed".into()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn fast() -> MonitorConfig {
        MonitorConfig::default().with_poll_interval(Duration::ZERO)
    }

    fn null_sink() -> LogSink {
        Arc::new(|_: &str| {})
    }

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".into(),
            message: "test".into(),
            reason: "Test".into(),
            code,
        }))
    }

    fn quiet_logs(client: &mut MockClusterClient) {
        client
            .expect_stream_instance_log()
            .returning(|_, _, _| Ok(()));
    }

    async fn run(client: &MockClusterClient, config: &MonitorConfig) -> TailOutcome {
        tail(
            client,
            "rl",
            "trainer-x-abc",
            config,
            &CancellationToken::new(),
            &null_sink(),
        )
        .await
    }

    #[test]
    fn running_and_creating_are_not_terminal() {
        assert!(terminal_state(&waiting("ContainerCreating")).is_none());
        assert!(terminal_state(&pod_with(ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }))
        .is_none());
        assert!(terminal_state(&Pod::default()).is_none());
    }

    #[test]
    fn every_permanent_reason_is_terminal() {
        for reason in PERMANENT_WAITING_REASONS {
            assert_eq!(
                terminal_state(&waiting(reason)),
                Some(TailOutcome::Failed {
                    container: "trainer-x".into(),
                    reason: reason.into(),
                })
            );
        }
    }

    #[tokio::test]
    async fn stops_on_first_terminated_observation() {
        let mut client = MockClusterClient::new();
        quiet_logs(&mut client);
        client
            .expect_get_instance()
            .times(1)
            .returning(|_, _| Ok(terminated(0)));

        let outcome = run(&client, &fast()).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn stops_on_image_pull_backoff() {
        let mut client = MockClusterClient::new();
        quiet_logs(&mut client);
        client
            .expect_get_instance()
            .times(1)
            .returning(|_, _| Ok(waiting("ImagePullBackOff")));

        let outcome = run(&client, &fast()).await;
        assert!(matches!(outcome, TailOutcome::Failed { ref reason, .. } if reason == "ImagePullBackOff"));
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn keeps_going_through_container_creating() {
        let mut client = MockClusterClient::new();
        quiet_logs(&mut client);
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        client.expect_get_instance().times(3).returning(move |_, _| {
            let mut n = counter.lock().unwrap();
            *n += 1;
            match *n {
                1 => Ok(waiting("ContainerCreating")),
                2 => Ok(Pod::default()),
                _ => Ok(terminated(1)),
            }
        });

        let outcome = run(&client, &fast()).await;
        assert_eq!(
            outcome,
            TailOutcome::Terminated {
                container: "trainer-x".into(),
                exit_code: 1,
                reason: Some("Completed".into()),
            }
        );
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn transient_errors_are_swallowed() {
        let mut client = MockClusterClient::new();
        client
            .expect_stream_instance_log()
            .returning(|_, _, _| Err(Error::internal_with_context("log_stream", "reset")));
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        client.expect_get_instance().returning(move |_, _| {
            let mut n = counter.lock().unwrap();
            *n += 1;
            if *n == 1 {
                Err(api_error(503))
            } else {
                Ok(terminated(0))
            }
        });

        assert!(run(&client, &fast()).await.is_success());
    }

    #[tokio::test]
    async fn permanent_fetch_error_aborts() {
        let mut client = MockClusterClient::new();
        quiet_logs(&mut client);
        client
            .expect_get_instance()
            .times(1)
            .returning(|_, _| Err(api_error(404)));

        let outcome = run(&client, &fast()).await;
        assert!(matches!(outcome, TailOutcome::Aborted { .. }));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_any_call() {
        // No expectations: any cluster call would panic
        let client = MockClusterClient::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = tail(&client, "rl", "p", &fast(), &cancel, &null_sink()).await;
        assert_eq!(outcome, TailOutcome::Cancelled);
    }

    #[tokio::test]
    async fn elapsed_timeout_stops_the_loop() {
        let client = MockClusterClient::new();
        let config = MonitorConfig::default()
            .with_poll_interval(Duration::from_secs(60))
            .with_timeout(Duration::ZERO);

        assert_eq!(run(&client, &config).await, TailOutcome::TimedOut);
    }

    #[tokio::test]
    async fn log_lines_reach_the_sink() {
        let mut client = MockClusterClient::new();
        client
            .expect_stream_instance_log()
            .returning(|_, _, sink| {
                sink("episode 1 reward 10");
                sink("episode 2 reward 12");
                Ok(())
            });
        client
            .expect_get_instance()
            .returning(|_, _| Ok(terminated(0)));

        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let sink: LogSink = Arc::new(move |line: &str| captured.lock().unwrap().push(line.to_string()));

        let outcome = tail(
            &client,
            "rl",
            "p",
            &fast(),
            &CancellationToken::new(),
            &sink,
        )
        .await;
        assert!(outcome.is_success());
        assert_eq!(
            *lines.lock().unwrap(),
            vec!["episode 1 reward 10", "episode 2 reward 12"]
        );
    }
}
