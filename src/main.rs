//! coach-deploy - run a distributed RL training job on Kubernetes

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use coach_common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use coach_job::{JobConfig, JobController, JobFile, MonitorConfig, TailOutcome};

/// coach-deploy - deploy a trainer and worker pool, tail the trainer, tear it all down
#[derive(Parser, Debug)]
#[command(name = "coach-deploy", version, about, long_about = None)]
struct Cli {
    /// Path to the job YAML file
    #[arg(short = 'f', long = "config")]
    config_file: PathBuf,

    /// kubeconfig to use instead of the default inference chain
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Namespace for every job resource (defaults to the context's)
    #[arg(short, long)]
    namespace: Option<String>,

    /// Use the pod's service account
    #[arg(long)]
    in_cluster: bool,

    /// Proxy for API server traffic
    #[arg(long, env = "http_proxy")]
    http_proxy: Option<String>,

    /// Seconds between trainer tail cycles
    #[arg(long, default_value = "10")]
    poll_interval_secs: u64,

    /// Stop tailing the trainer after this many seconds
    #[arg(long)]
    monitor_timeout_secs: Option<u64>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Leave the job running when the command exits
    #[arg(long)]
    keep_on_exit: bool,
}

impl Cli {
    /// Command-line flags win over the job file
    fn apply_overrides(&self, file: &mut JobFile) {
        if let Some(kubeconfig) = &self.kubeconfig {
            file.kubeconfig = Some(kubeconfig.clone());
        }
        if self.in_cluster {
            file.in_cluster = true;
        }
        if let Some(namespace) = &self.namespace {
            file.namespace = Some(namespace.clone());
        }
    }

    fn job_config(&self) -> anyhow::Result<JobConfig> {
        let mut file = JobFile::load(&self.config_file)?;
        self.apply_overrides(&mut file);
        let mut config = file.into_job_config()?;
        config.connection.proxy = self.http_proxy.clone();
        Ok(config)
    }

    fn monitor_config(&self) -> MonitorConfig {
        let config =
            MonitorConfig::default().with_poll_interval(Duration::from_secs(self.poll_interval_secs));
        match self.monitor_timeout_secs {
            Some(secs) => config.with_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        json: cli.json_logs,
        ..Default::default()
    })?;

    let result = run(cli).await;
    if let Err(e) = &result {
        error!(error = %e, "training job failed");
    }
    shutdown_telemetry();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.job_config()?;
    let mut controller = JobController::connect(config)
        .await?
        .with_monitor_config(cli.monitor_config());

    let cancel = controller.cancellation_token();
    tokio::spawn(handle_interrupts(cancel.clone()));

    let outcome = run_pipeline(&mut controller, &cancel).await;

    if cli.keep_on_exit {
        info!(namespace = %controller.namespace(), "leaving job resources in place");
    } else {
        let report = controller.undeploy().await;
        if !report.is_clean() {
            warn!(
                failed = report.failed.len(),
                store_errors = report.store_errors.len(),
                "teardown incomplete"
            );
        }
    }

    outcome
}

/// First Ctrl-C cancels the job and lets teardown run; a second one exits at once
async fn handle_interrupts(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!("interrupt received, stopping; press Ctrl-C again to exit without teardown");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        error!("second interrupt, exiting without teardown");
        std::process::exit(130);
    }
}

/// Run `step` unless the job is cancelled first
async fn interruptible<T, E>(
    cancel: &CancellationToken,
    step: impl std::future::Future<Output = Result<T, E>>,
) -> anyhow::Result<T>
where
    E: Into<anyhow::Error>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(anyhow::anyhow!("interrupted")),
        result = step => result.map_err(Into::into),
    }
}

/// setup → trainer → workers → tail the trainer
async fn run_pipeline(
    controller: &mut JobController,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    interruptible(cancel, controller.setup()).await?;
    interruptible(cancel, controller.deploy_trainer()).await?;
    if controller.run_spec(coach_job::Role::Worker).is_some() {
        interruptible(cancel, controller.deploy_workers()).await?;
    }
    interruptible(cancel, controller.monitor_workers()).await?;

    match controller.monitor_trainer().await? {
        None => Ok(()),
        Some(outcome) if outcome.is_success() => {
            info!(outcome = %outcome, "trainer finished");
            Ok(())
        }
        Some(TailOutcome::Cancelled) => Err(anyhow::anyhow!("interrupted")),
        Some(outcome) => Err(anyhow::anyhow!("trainer did not complete: {}", outcome)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coach_common::kube_utils::ConfigSource;

    const JOB: &str = r#"
namespace: from-file
runs:
  - role: trainer
    image: coach:latest
    command: [python3, train.py]
dataStore:
  kind: s3
  endPoint: s3.amazonaws.com
  bucketName: ckpts
"#;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("coach-deploy").chain(args.iter().copied())).unwrap()
    }

    #[tokio::test]
    async fn cancelled_job_skips_the_remaining_steps() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let step = async { Ok::<_, std::io::Error>(()) };
        let err = interruptible(&cancel, step).await.unwrap_err();
        assert_eq!(err.to_string(), "interrupted");
    }

    #[tokio::test]
    async fn interrupt_stops_a_step_that_is_still_waiting() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let step = async {
            tokio::time::sleep(Duration::from_secs(120)).await;
            Ok::<_, std::io::Error>(())
        };
        assert!(interruptible(&cancel, step).await.is_err());
    }

    #[tokio::test]
    async fn uncancelled_steps_pass_their_result_through() {
        let cancel = CancellationToken::new();
        let value = interruptible(&cancel, async { Ok::<_, std::io::Error>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        let failed = async { Err::<(), _>(std::io::Error::other("quota exceeded")) };
        let err = interruptible(&cancel, failed).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn config_flag_is_required() {
        assert!(Cli::try_parse_from(["coach-deploy"]).is_err());
    }

    #[test]
    fn flags_override_the_job_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.yaml");
        std::fs::write(&path, JOB).unwrap();
        let path = path.to_string_lossy().into_owned();

        let cli = parse(&["-f", &path, "--namespace", "rl", "--in-cluster"]);
        let config = cli.job_config().unwrap();
        assert_eq!(config.connection.namespace.as_deref(), Some("rl"));
        assert_eq!(config.connection.source, ConfigSource::InCluster);

        let cli = parse(&["-f", &path, "--kubeconfig", "/tmp/kc", "--in-cluster"]);
        let config = cli.job_config().unwrap();
        assert_eq!(config.connection.namespace.as_deref(), Some("from-file"));
        assert_eq!(
            config.connection.source,
            ConfigSource::Kubeconfig(PathBuf::from("/tmp/kc"))
        );
    }

    #[test]
    fn monitor_flags_build_the_tail_config() {
        let cli = parse(&["-f", "job.yaml"]);
        assert_eq!(cli.monitor_config(), MonitorConfig::default());

        let cli = parse(&[
            "-f",
            "job.yaml",
            "--poll-interval-secs",
            "2",
            "--monitor-timeout-secs",
            "600",
        ]);
        let monitor = cli.monitor_config();
        assert_eq!(monitor.poll_interval, Duration::from_secs(2));
        assert_eq!(monitor.timeout, Some(Duration::from_secs(600)));
    }
}
