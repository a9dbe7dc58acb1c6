//! Error types for background step execution

use thiserror::Error;

/// Broad classification of a [`StepError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The command line or environment could not be worked out
    Resolution,
    /// The process ran and failed, or could not be run at all
    Process,
    /// Declared test reports could not be gathered
    Collection,
    /// The background task went away without reporting an outcome
    Lost,
}

/// Terminal error of a background step
#[derive(Error, Debug)]
pub enum StepError {
    /// Resolution failed before anything was launched
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// The launched process failed
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Report collection failed after a successful run
    #[error("unable to collect test reports: {0}")]
    Collection(#[from] CollectionError),

    /// The background task terminated without sending its outcome
    #[error("background task for step '{step_id}' terminated without reporting an outcome")]
    Lost {
        /// Identifier of the step whose task was lost.
        step_id: String,
    },
}

impl StepError {
    /// Returns the broad kind of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolution(_) => ErrorKind::Resolution,
            Self::Process(_) => ErrorKind::Process,
            Self::Collection(_) => ErrorKind::Collection,
            Self::Lost { .. } => ErrorKind::Lost,
        }
    }

    /// Returns the underlying process error, if any
    #[must_use]
    pub fn as_process(&self) -> Option<&ProcessError> {
        match self {
            Self::Process(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors raised while turning a step into an executable command line
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// Shell wrapping was required but the shell type is not one of the known ones
    #[error("Unknown shell type: {0}")]
    UnknownShell(String),

    /// An expression in the command or environment could not be resolved
    #[error("failed to resolve expression in {field}: {source}")]
    Expression {
        /// Which part of the step held the expression (`command`, `environment.NAME`).
        field: String,
        /// Underlying resolver error.
        #[source]
        source: ExpressionError,
    },

    /// The image metadata lookup failed
    #[error("failed to fetch default entrypoint for image '{image}': {source}")]
    Image {
        /// Image reference that was looked up.
        image: String,
        /// Underlying lookup error.
        #[source]
        source: ImageError,
    },

    /// Every strategy came up empty
    #[error("no command to execute for step '{step_id}'")]
    NoCommand {
        /// Identifier of the step.
        step_id: String,
    },
}

/// Errors reported by the process launcher
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The process ran and exited with a non-zero status
    #[error("{}", exit_message(.code))]
    Exit {
        /// Exit code, `None` when the process was killed by a signal.
        code: Option<i32>,
    },

    /// The process could not be started
    #[error("failed to start '{program}': {source}")]
    Start {
        /// Program that was being started.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the process failed
    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    /// The process outlived its enforced timeout and was killed
    #[error("process killed after timeout of {secs}s")]
    TimedOut {
        /// The timeout that was exceeded, in seconds.
        secs: u64,
    },
}

impl ProcessError {
    /// Returns true when the process ran but exited unsuccessfully
    #[must_use]
    pub fn is_exit(&self) -> bool {
        matches!(self, Self::Exit { .. })
    }

    /// Returns true when the process never got to run
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start { .. })
    }
}

#[allow(clippy::ref_option)]
fn exit_message(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("process exited with status {code}"),
        None => "process terminated by signal".to_string(),
    }
}

/// Errors from the expression resolver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// The input contains a reference that cannot be parsed
    #[error("malformed expression at offset {offset}: '{fragment}'")]
    Malformed {
        /// Byte offset of the offending reference.
        offset: usize,
        /// The offending text.
        fragment: String,
    },
}

/// Errors from the image metadata lookup
#[derive(Error, Debug)]
pub enum ImageError {
    /// No image reference was configured
    #[error("image reference is empty")]
    EmptyReference,

    /// The pull secret is not valid base64
    #[error("image pull secret is not valid base64: {0}")]
    InvalidSecret(#[from] base64::DecodeError),

    /// The container runtime could not be invoked
    #[error("failed to run {runtime}: {source}")]
    Runtime {
        /// Runtime binary name.
        runtime: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The container runtime reported a failure
    #[error("{runtime} {action} failed: {stderr}")]
    Command {
        /// Runtime binary name.
        runtime: String,
        /// Which runtime action failed (`pull`, `inspect`).
        action: &'static str,
        /// Captured standard error.
        stderr: String,
    },

    /// The inspect output was not understood
    #[error("unexpected image metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Temporary registry config could not be written
    #[error("failed to prepare registry credentials: {0}")]
    Credentials(#[source] std::io::Error),
}

/// Errors from test report collection
#[derive(Error, Debug)]
pub enum CollectionError {
    /// A declared path pattern is not a valid glob
    #[error("invalid report path pattern '{pattern}': {source}")]
    Pattern {
        /// The declared pattern.
        pattern: String,
        /// Underlying glob error.
        #[source]
        source: glob::PatternError,
    },

    /// A matched report file could not be read
    #[error("failed to read report '{}': {source}", .path.display())]
    Read {
        /// Path of the report.
        path: std::path::PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read config '{}': {source}", .path.display())]
    Read {
        /// Path of the config file.
        path: std::path::PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be parsed
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A configuration value is out of range
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_kind() {
        let err = StepError::from(ProcessError::Exit { code: Some(1) });
        assert_eq!(err.kind(), ErrorKind::Process);
        assert!(err.as_process().is_some_and(ProcessError::is_exit));

        let err = StepError::from(ResolutionError::UnknownShell("zsh".to_string()));
        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert!(err.as_process().is_none());
    }

    #[test]
    fn test_process_error_display() {
        assert_eq!(
            ProcessError::Exit { code: Some(2) }.to_string(),
            "process exited with status 2"
        );
        assert_eq!(
            ProcessError::Exit { code: None }.to_string(),
            "process terminated by signal"
        );
    }

    #[test]
    fn test_unknown_shell_display() {
        let err = ResolutionError::UnknownShell("fish".to_string());
        assert_eq!(err.to_string(), "Unknown shell type: fish");
    }

    #[test]
    fn test_process_error_start_is_not_exit() {
        let err = ProcessError::Start {
            program: "missing".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.is_start());
        assert!(!err.is_exit());
    }
}
