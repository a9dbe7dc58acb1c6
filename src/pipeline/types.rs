//! Execution records produced while running a background step

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::errors::{ErrorKind, StepError};

/// Output values captured from a step, keyed by output name
pub type StepOutputs = HashMap<String, String>;

/// The argv to execute, never empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResolvedCommand(Vec<String>);

impl ResolvedCommand {
    /// Wraps an argv, returning `None` when it is empty
    #[must_use]
    pub fn new(argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() { None } else { Some(Self(argv)) }
    }

    /// The program to launch
    #[must_use]
    pub fn program(&self) -> &str {
        &self.0[0]
    }

    /// The arguments following the program
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.0[1..]
    }

    /// The whole argv
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Consumes the command and returns the argv
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl fmt::Display for ResolvedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_words::join(&self.0))
    }
}

/// One pass through resolve, launch and wait
#[derive(Debug)]
pub struct ExecutionAttempt {
    /// 1-based attempt number
    pub index: u32,

    /// When the attempt started
    pub started_at: DateTime<Utc>,

    /// Resolved argv, absent when resolution failed before it was known
    pub command: Option<ResolvedCommand>,

    /// Resolved environment (literal values)
    pub environment: BTreeMap<String, String>,

    /// What happened
    pub outcome: Result<StepOutputs, StepError>,
}

impl ExecutionAttempt {
    /// Starts a new attempt record with a pending success outcome
    #[must_use]
    pub fn begin(index: u32) -> Self {
        Self {
            index,
            started_at: Utc::now(),
            command: None,
            environment: BTreeMap::new(),
            outcome: Ok(StepOutputs::new()),
        }
    }

    /// Returns true if the attempt succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Kind of the failure, if the attempt failed
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.outcome.as_ref().err().map(StepError::kind)
    }
}

/// What `BackgroundStep::run` hands back to the pipeline runner
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Step outputs (reserved, currently always empty)
    pub outputs: StepOutputs,

    /// Number of attempts configured for the run
    pub retries: u32,

    /// Terminal error, `None` when the step launched successfully
    pub error: Option<StepError>,
}

impl ExecutionResult {
    /// Returns true if no terminal error was recorded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts into a `Result`, dropping the retry count
    pub fn into_result(self) -> Result<StepOutputs, StepError> {
        match self.error {
            None => Ok(self.outputs),
            Some(err) => Err(err),
        }
    }

    /// Serializable summary for reporting
    #[must_use]
    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            outputs: self.outputs.clone(),
            retries: self.retries,
            error: self.error.as_ref().map(ToString::to_string),
        }
    }
}

/// Plain-data view of an [`ExecutionResult`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    /// Step outputs
    pub outputs: StepOutputs,
    /// Retry count
    pub retries: u32,
    /// Error message, if any
    pub error: Option<String>,
}
