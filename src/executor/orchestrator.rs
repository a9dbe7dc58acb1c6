//! Single-attempt execution
//!
//! [`AttemptExecutor`] performs one pass of resolve, launch and wait for a
//! step and records what happened in an [`ExecutionAttempt`]. Retrying and
//! the settle window live one level up, in the background controller.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use super::process::ProcessInvocation;
use super::resolver::CommandResolver;
use super::sink::OutputSink;
use super::traits::{Collaborators, ProcessLauncher, RunningProcess};
use crate::infrastructure::{Config, MetricsCollector, ProcessMetrics, RssSampler};
use crate::pipeline::{ExecutionAttempt, ProcessError, StepError, StepOutputs, StepSpec};

/// Runs individual attempts of one step
pub struct AttemptExecutor {
    spec: Arc<StepSpec>,
    resolver: CommandResolver,
    launcher: Arc<dyn ProcessLauncher>,
    metrics: Arc<MetricsCollector>,
    sink: OutputSink,
    log_metrics: bool,
    sample_interval: Duration,
    timeout: Option<Duration>,
}

impl AttemptExecutor {
    /// Wires an executor for `spec`
    ///
    /// Both stdout and stderr of every launched process go to `sink`. The
    /// step timeout is only applied when `config.enforce_timeout` is set.
    #[must_use]
    pub fn new(
        spec: Arc<StepSpec>,
        collaborators: &Collaborators,
        config: &Config,
        sink: OutputSink,
        log_metrics: bool,
    ) -> Self {
        let resolver = CommandResolver::new(
            collaborators.expressions.clone(),
            collaborators.images.clone(),
        )
        .with_image_secret_env(&config.image_secret_env);

        let timeout = config.enforce_timeout.then(|| {
            Duration::from_secs(spec.effective_timeout_secs(config.default_timeout_secs))
        });

        Self {
            spec,
            resolver,
            launcher: collaborators.launcher.clone(),
            metrics: collaborators.metrics.clone(),
            sink,
            log_metrics,
            sample_interval: config.metrics_sample_interval(),
            timeout,
        }
    }

    /// The step this executor runs
    #[must_use]
    pub fn spec(&self) -> &StepSpec {
        &self.spec
    }

    /// Runs attempt number `index` to completion
    pub async fn execute(&self, index: u32) -> ExecutionAttempt {
        let mut attempt = ExecutionAttempt::begin(index);
        attempt.outcome = self.try_execute(&mut attempt).await.map(|()| StepOutputs::new());
        attempt
    }

    async fn try_execute(&self, attempt: &mut ExecutionAttempt) -> Result<(), StepError> {
        let script = self.resolver.script(&self.spec)?;
        attempt.environment = self.resolver.environment(&self.spec)?;
        let (_, command) = self.resolver.command(&self.spec, script.as_deref()).await?;
        attempt.command = Some(command.clone());

        let invocation = ProcessInvocation::new(command.clone())
            .with_stdout(self.sink.clone())
            .with_stderr(self.sink.clone())
            .with_env(attempt.environment.clone())
            .tagged(&self.spec.id, attempt.index);

        let started = Instant::now();
        let mut process = self.launcher.start(invocation)?;
        let pid = process.pid();

        let sampler = match (self.log_metrics, pid) {
            (true, Some(pid)) => {
                info!(pid, "started background step process");
                Some(RssSampler::spawn(pid, self.sample_interval))
            }
            _ => None,
        };

        let waited = self.wait(process.as_mut()).await;

        let peak_rss_kb = match sampler {
            Some(sampler) => sampler.finish().await,
            None => None,
        };
        let elapsed = started.elapsed();
        let elapsed_time_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        if self.log_metrics {
            self.metrics.record(ProcessMetrics {
                step_id: self.spec.id.clone(),
                attempt: attempt.index,
                pid,
                peak_rss_kb,
                elapsed,
            });
            info!(pid, peak_rss_kb, elapsed_time_ms, "background step process metrics");
        }

        waited?;

        info!(
            arguments = %command,
            output = ?StepOutputs::new(),
            elapsed_time_ms,
            "Successfully executed background step"
        );
        Ok(())
    }

    async fn wait(&self, process: &mut dyn RunningProcess) -> Result<(), ProcessError> {
        let Some(limit) = self.timeout else {
            return process.wait().await;
        };

        let waited = tokio::time::timeout(limit, process.wait()).await;
        match waited {
            Ok(result) => result,
            Err(_) => {
                if let Err(e) = process.kill().await {
                    warn!(error = %e, "failed to kill timed out process");
                }
                Err(ProcessError::TimedOut {
                    secs: limit.as_secs(),
                })
            }
        }
    }
}

impl std::fmt::Debug for AttemptExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptExecutor")
            .field("step_id", &self.spec.id)
            .field("log_metrics", &self.log_metrics)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::{Behavior, FakeExpressions, FakeImages, FakeLauncher, FakeReports};
    use crate::executor::traits::ImageMetadata;
    use crate::pipeline::{ErrorKind, ShellType};
    use pretty_assertions::assert_eq;

    struct Harness {
        launcher: Arc<FakeLauncher>,
        images: Arc<FakeImages>,
        metrics: Arc<MetricsCollector>,
        collaborators: Collaborators,
    }

    fn harness(launcher: FakeLauncher) -> Harness {
        let launcher = Arc::new(launcher);
        let images = Arc::new(FakeImages::returning(ImageMetadata {
            entrypoint: vec!["docker-entrypoint.sh".to_string()],
            args: vec!["postgres".to_string()],
        }));
        let metrics = Arc::new(MetricsCollector::new());
        let collaborators = Collaborators {
            launcher: launcher.clone(),
            expressions: Arc::new(FakeExpressions::identity()),
            images: images.clone(),
            reports: Arc::new(FakeReports::ok()),
            metrics: metrics.clone(),
        };
        Harness {
            launcher,
            images,
            metrics,
            collaborators,
        }
    }

    fn executor(h: &Harness, spec: StepSpec, config: &Config) -> (AttemptExecutor, OutputSink) {
        executor_with_metrics(h, spec, config, false)
    }

    fn executor_with_metrics(
        h: &Harness,
        spec: StepSpec,
        config: &Config,
        log_metrics: bool,
    ) -> (AttemptExecutor, OutputSink) {
        let sink = OutputSink::discard();
        let executor = AttemptExecutor::new(
            Arc::new(spec),
            &h.collaborators,
            config,
            sink.clone(),
            log_metrics,
        );
        (executor, sink)
    }

    #[tokio::test]
    async fn test_successful_attempt_binds_sink_env_and_tag() {
        let h = harness(FakeLauncher::new(Behavior::Succeed));
        let spec = StepSpec::new("db")
            .with_command("pg_ctl start", ShellType::Sh)
            .with_env("PGPORT", "5433");
        let (executor, sink) = executor(&h, spec, &Config::default());

        let attempt = executor.execute(2).await;

        assert!(attempt.is_success());
        assert_eq!(attempt.index, 2);
        assert_eq!(
            attempt.command.unwrap().as_slice(),
            ["sh", "-c", "set -xe\npg_ctl start"]
        );
        assert_eq!(attempt.environment.get("PGPORT").unwrap(), "5433");

        let invocations = h.launcher.invocations();
        assert_eq!(invocations.len(), 1);
        let invocation = &invocations[0];
        assert!(invocation.stdout().unwrap().same_as(&sink));
        assert!(invocation.stderr().unwrap().same_as(&sink));
        assert_eq!(invocation.env().get("PGPORT").unwrap(), "5433");
        assert_eq!(invocation.step_id(), "db");
        assert_eq!(invocation.attempt(), 2);
    }

    #[tokio::test]
    async fn test_exit_failure_is_process_error() {
        let h = harness(FakeLauncher::new(Behavior::Exit(2)));
        let spec = StepSpec::new("s").with_command("false", ShellType::Bash);
        let (executor, _) = executor(&h, spec, &Config::default());

        let attempt = executor.execute(1).await;

        assert_eq!(attempt.error_kind(), Some(ErrorKind::Process));
        let err = attempt.outcome.unwrap_err();
        assert!(matches!(
            err.as_process(),
            Some(ProcessError::Exit { code: Some(2) })
        ));
    }

    #[tokio::test]
    async fn test_start_failure_is_process_error() {
        let h = harness(FakeLauncher::new(Behavior::FailStart));
        let spec = StepSpec::new("s").with_entrypoint(["missing-binary"]);
        let (executor, _) = executor(&h, spec, &Config::default());

        let attempt = executor.execute(1).await;
        let err = attempt.outcome.unwrap_err();
        assert!(err.as_process().unwrap().is_start());
        assert!(h.metrics.get("s").is_empty());
    }

    #[tokio::test]
    async fn test_resolution_failure_never_launches() {
        let h = harness(FakeLauncher::new(Behavior::Succeed));
        let spec = StepSpec::new("s").with_command("ls", ShellType::Unknown("fish".to_string()));
        let (executor, _) = executor(&h, spec, &Config::default());

        let attempt = executor.execute(1).await;

        assert_eq!(attempt.error_kind(), Some(ErrorKind::Resolution));
        assert!(attempt.command.is_none());
        assert_eq!(h.launcher.starts(), 0);
    }

    #[tokio::test]
    async fn test_image_default_attempt() {
        let h = harness(FakeLauncher::new(Behavior::Succeed));
        let spec = StepSpec::new("pg").with_image("postgres:16");
        let (executor, _) = executor(&h, spec, &Config::default());

        let attempt = executor.execute(1).await;

        assert!(attempt.is_success());
        assert_eq!(
            attempt.command.unwrap().as_slice(),
            ["docker-entrypoint.sh", "postgres"]
        );
        assert_eq!(h.images.calls(), 1);
    }

    #[tokio::test]
    async fn test_metrics_recorded_per_launched_attempt() {
        let h = harness(FakeLauncher::new(Behavior::Succeed));
        let spec = StepSpec::new("m").with_entrypoint(["true"]);
        let (executor, _) = executor_with_metrics(&h, spec, &Config::default(), true);

        executor.execute(1).await;
        executor.execute(2).await;

        let recorded = h.metrics.get("m");
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[1].attempt, 2);
        assert_eq!(recorded[0].pid, Some(4242));
    }

    #[tokio::test]
    async fn test_no_metrics_recorded_when_flag_is_off() {
        let h = harness(FakeLauncher::new(Behavior::Exit(1)));
        let spec = StepSpec::new("m").with_entrypoint(["true"]);
        let (executor, _) = executor(&h, spec, &Config::default());

        executor.execute(1).await;
        executor.execute(2).await;

        assert_eq!(h.launcher.starts(), 2);
        assert!(h.metrics.get("m").is_empty());
        assert!(h.metrics.get_all().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_not_enforced_by_default() {
        let h = harness(FakeLauncher::new(Behavior::ExitAfter(
            Duration::from_secs(10),
            0,
        )));
        let spec = StepSpec::new("s")
            .with_entrypoint(["sleep", "10"])
            .with_timeout_secs(1);
        let (executor, _) = executor(&h, spec, &Config::default());

        assert!(executor.execute(1).await.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_enforced_when_configured() {
        let h = harness(FakeLauncher::new(Behavior::Hang));
        let spec = StepSpec::new("s")
            .with_entrypoint(["sleep", "infinity"])
            .with_timeout_secs(3);
        let config = Config {
            enforce_timeout: true,
            ..Config::default()
        };
        let (executor, _) = executor(&h, spec, &config);

        let attempt = executor.execute(1).await;
        let err = attempt.outcome.unwrap_err();
        assert!(matches!(
            err.as_process(),
            Some(ProcessError::TimedOut { secs: 3 })
        ));
    }
}
