//! Step specification for background steps
//!
//! A [`StepSpec`] is the immutable description of one background step as the
//! surrounding pipeline runner hands it over: what to run, in which shell,
//! with which environment and which test reports to gather afterwards.

#![allow(clippy::must_use_candidate, clippy::return_self_not_must_use)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::errors::ResolutionError;

/// Retry count applied when a step leaves `num_retries` unset
pub const DEFAULT_NUM_RETRIES: u32 = 1;

/// Timeout applied when a step leaves `timeout_secs` unset (4 hours)
pub const DEFAULT_TIMEOUT_SECS: u64 = 14_400;

/// Shell used to wrap a step's `command`
///
/// The known shells form a closed set. Anything else is kept as
/// [`ShellType::Unknown`] so that it only fails when shell wrapping is
/// actually needed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ShellType {
    /// GNU Bash
    Bash,
    /// POSIX sh
    Sh,
    /// Windows PowerShell
    Powershell,
    /// PowerShell Core
    Pwsh,
    /// No shell configured
    #[default]
    Unspecified,
    /// A shell name outside the supported set
    Unknown(String),
}

impl ShellType {
    /// Returns the `(binary, flag)` pair used to run a script in this shell
    pub fn invocation(&self) -> Result<(&'static str, &'static str), ResolutionError> {
        match self {
            Self::Bash => Ok(("bash", "-c")),
            Self::Sh => Ok(("sh", "-c")),
            Self::Powershell => Ok(("powershell", "-Command")),
            Self::Pwsh => Ok(("pwsh", "-Command")),
            Self::Unspecified | Self::Unknown(_) => {
                Err(ResolutionError::UnknownShell(self.to_string()))
            }
        }
    }

    /// Returns the preamble that makes a multi-line script abort on the first failure
    pub fn early_exit_preamble(&self) -> Result<&'static str, ResolutionError> {
        match self {
            Self::Bash | Self::Sh => Ok("set -xe\n"),
            Self::Powershell | Self::Pwsh => Ok("$ErrorActionPreference = 'Stop'\n"),
            Self::Unspecified | Self::Unknown(_) => {
                Err(ResolutionError::UnknownShell(self.to_string()))
            }
        }
    }

    /// Returns true for the four supported shells
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unspecified | Self::Unknown(_))
    }
}

impl FromStr for ShellType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "bash" => Self::Bash,
            "sh" => Self::Sh,
            "powershell" => Self::Powershell,
            "pwsh" => Self::Pwsh,
            "" | "unspecified" => Self::Unspecified,
            _ => Self::Unknown(s.trim().to_string()),
        })
    }
}

impl From<String> for ShellType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(shell) => shell,
            Err(never) => match never {},
        }
    }
}

impl From<ShellType> for String {
    fn from(shell: ShellType) -> Self {
        shell.to_string()
    }
}

impl fmt::Display for ShellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bash => write!(f, "bash"),
            Self::Sh => write!(f, "sh"),
            Self::Powershell => write!(f, "powershell"),
            Self::Pwsh => write!(f, "pwsh"),
            Self::Unspecified => write!(f, "unspecified"),
            Self::Unknown(name) => write!(f, "{name}"),
        }
    }
}

/// Format of a declared test report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    /// JUnit XML
    #[default]
    Junit,
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Junit => write!(f, "junit"),
        }
    }
}

/// Where to find test-result artifacts produced by a step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDeclaration {
    /// Report format
    #[serde(rename = "type", default)]
    pub kind: ReportType,

    /// File path patterns (globs)
    #[serde(default)]
    pub paths: Vec<String>,
}

impl ReportDeclaration {
    /// Creates a JUnit report declaration
    pub fn junit<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: ReportType::Junit,
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

/// Immutable configuration of one background step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepSpec {
    /// Step identifier
    pub id: String,

    /// Human readable name
    pub display_name: String,

    /// Shell-agnostic command body, may be empty
    pub command: String,

    /// Shell used to run `command`
    pub shell_type: ShellType,

    /// Environment variables as raw expression strings
    pub environment: BTreeMap<String, String>,

    /// Explicit argv override, may be empty
    pub entrypoint: Vec<String>,

    /// Container image reference, may be empty
    pub image: String,

    /// Test reports to gather after execution
    pub reports: Vec<ReportDeclaration>,

    /// Number of attempts, 0 means default
    pub num_retries: u32,

    /// Advisory timeout in seconds, 0 means default
    pub timeout_secs: u64,
}

impl StepSpec {
    /// Creates a step spec with the given identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Sets the display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Sets the command body and its shell
    pub fn with_command(mut self, command: impl Into<String>, shell: ShellType) -> Self {
        self.command = command.into();
        self.shell_type = shell;
        self
    }

    /// Sets the explicit entrypoint
    pub fn with_entrypoint<I, S>(mut self, entrypoint: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entrypoint = entrypoint.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the container image
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Adds an environment variable (raw expression)
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Adds a report declaration
    pub fn with_report(mut self, report: ReportDeclaration) -> Self {
        self.reports.push(report);
        self
    }

    /// Sets the retry count
    pub fn with_num_retries(mut self, num_retries: u32) -> Self {
        self.num_retries = num_retries;
        self
    }

    /// Sets the timeout
    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Retry count after defaulting, always at least 1
    pub fn effective_num_retries(&self, default: u32) -> u32 {
        if self.num_retries == 0 {
            default.max(1)
        } else {
            self.num_retries
        }
    }

    /// Timeout after defaulting, always at least 1
    pub fn effective_timeout_secs(&self, default: u64) -> u64 {
        if self.timeout_secs == 0 {
            default.max(1)
        } else {
            self.timeout_secs
        }
    }

    /// Returns true when the command has to be wrapped in a shell
    pub fn needs_shell(&self) -> bool {
        self.entrypoint.is_empty() && !self.command.is_empty()
    }

    /// Name used in log records
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }
}
