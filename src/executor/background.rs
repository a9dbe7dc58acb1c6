//! Background step controller
//!
//! [`BackgroundStep::run`] launches the step's retry loop on its own tokio
//! task and then races the loop's outcome against a settle window:
//!
//! - If the loop finishes inside the window, its outcome is returned as is.
//!   Fast failures (bad shell, missing binary, immediate non-zero exit) are
//!   caught here.
//! - If the window elapses first, the step is considered launched and `run`
//!   returns success. The task keeps running detached; its eventual outcome
//!   is only logged.
//!
//! The loop runs every configured attempt, including after a successful one.
//! Test reports are collected exactly once, after the last attempt and
//! before the outcome is handed back.

use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{Instrument, Span, debug, error, info_span, warn};
use uuid::Uuid;

use super::orchestrator::AttemptExecutor;
use super::sink::OutputSink;
use super::traits::{Collaborators, ReportCollector};
use crate::infrastructure::Config;
use crate::pipeline::{
    ConfigError, ExecutionResult, ReportDeclaration, StepError, StepOutputs, StepSpec,
};

/// How the race between the retry task and the settle window ended
#[derive(Debug)]
enum Settlement {
    /// The task reported back in time
    Completed(Option<StepError>),
    /// The settle window elapsed first
    StillRunning,
}

/// A background step ready to run once
pub struct BackgroundStep {
    spec: StepSpec,
    sink: OutputSink,
    log_metrics: bool,
    span: Span,
    config: Config,
    collaborators: Option<Collaborators>,
}

impl BackgroundStep {
    /// Creates a step executor
    ///
    /// Combined stdout and stderr of the step go to `sink`. Diagnostics are
    /// emitted under `span`. With `log_metrics`, the pid and peak memory of
    /// each launched process are logged.
    #[must_use]
    pub fn new(spec: StepSpec, sink: OutputSink, log_metrics: bool, span: Span) -> Self {
        Self {
            spec,
            sink,
            log_metrics,
            span,
            config: Config::default(),
            collaborators: None,
        }
    }

    /// Uses the given collaborators instead of the OS-backed ones
    #[must_use]
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    /// Uses the given configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `config` fails validation, e.g.
    /// a zero settle window.
    pub fn with_config(mut self, config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Number of attempts `run` will make
    #[must_use]
    pub fn num_retries(&self) -> u32 {
        self.spec
            .effective_num_retries(self.config.default_num_retries)
    }

    /// Runs the step, returning once it finished or the settle window elapsed
    pub async fn run(self) -> ExecutionResult {
        let retries = self.num_retries();
        let settle_window = self.config.settle_window();
        let step_id = self.spec.id.clone();
        let span = info_span!(
            parent: &self.span,
            "background_step",
            step_id = %step_id,
            run_id = %Uuid::new_v4(),
        );

        let collaborators = self
            .collaborators
            .unwrap_or_else(|| Collaborators::os(&self.config));
        let reports = collaborators.reports.clone();
        let declarations = self.spec.reports.clone();
        let executor = AttemptExecutor::new(
            Arc::new(self.spec),
            &collaborators,
            &self.config,
            self.sink,
            self.log_metrics,
        );

        let (tx, rx) = oneshot::channel();
        let task_step_id = step_id.clone();
        tokio::spawn(
            async move {
                let failure = run_attempts(&executor, retries).await;
                let outcome =
                    collect_reports(reports.as_ref(), &declarations, &task_step_id, failure).await;
                if let Err(late) = tx.send(outcome) {
                    match late {
                        Some(e) => warn!(error = %e, "background step failed after settle window"),
                        None => debug!("background step finished after settle window"),
                    }
                }
            }
            .instrument(span.clone()),
        );

        let settlement = tokio::select! {
            received = rx => match received {
                Ok(outcome) => Settlement::Completed(outcome),
                Err(_) => Settlement::Completed(Some(StepError::Lost { step_id })),
            },
            () = tokio::time::sleep(settle_window) => Settlement::StillRunning,
        };

        let error = match settlement {
            Settlement::Completed(outcome) => outcome,
            Settlement::StillRunning => {
                span.in_scope(|| debug!(?settle_window, "step still running, treating as launched"));
                None
            }
        };

        ExecutionResult {
            outputs: StepOutputs::new(),
            retries,
            error,
        }
    }
}

impl std::fmt::Debug for BackgroundStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundStep")
            .field("step_id", &self.spec.id)
            .field("log_metrics", &self.log_metrics)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Runs every attempt and returns the last one's error
async fn run_attempts(executor: &AttemptExecutor, retries: u32) -> Option<StepError> {
    let mut last = None;
    for index in 1..=retries {
        let attempt = executor
            .execute(index)
            .instrument(info_span!("attempt", index))
            .await;
        last = match attempt.outcome {
            Ok(_) => None,
            Err(e) => {
                warn!(attempt = index, retries, error = %e, "background step attempt failed");
                Some(e)
            }
        };
    }
    last
}

/// Collects reports once and folds a collection failure into the outcome
async fn collect_reports(
    collector: &dyn ReportCollector,
    declarations: &[ReportDeclaration],
    step_id: &str,
    failure: Option<StepError>,
) -> Option<StepError> {
    let collected = collector.collect(declarations, step_id).await;
    match (failure, collected) {
        (None, Ok(())) => None,
        (None, Err(e)) => {
            error!(error = %e, "unable to collect test reports");
            Some(StepError::Collection(e))
        }
        (Some(failure), Err(e)) => {
            error!(error = %e, "error while collecting test reports");
            Some(failure)
        }
        (Some(failure), Ok(())) => Some(failure),
    }
}
