//! Prelude module for common imports

// Step description and results
pub use crate::pipeline::errors::{ErrorKind, StepError};
pub use crate::pipeline::steps::{ReportDeclaration, ShellType, StepSpec};
pub use crate::pipeline::types::{ExecutionResult, StepOutputs};

// Running steps
pub use crate::executor::{BackgroundStep, Collaborators, OutputSink};
pub use crate::infrastructure::Config;
