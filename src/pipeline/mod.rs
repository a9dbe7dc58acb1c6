//! Background step domain types
//!
//! Everything the executor consumes and produces: the step specification,
//! per-attempt records, the final result and the error taxonomy.

pub mod errors;
pub mod steps;
pub mod types;


pub use errors::{
    CollectionError, ConfigError, ErrorKind, ExpressionError, ImageError, ProcessError,
    ResolutionError, StepError,
};
pub use steps::{
    DEFAULT_NUM_RETRIES, DEFAULT_TIMEOUT_SECS, ReportDeclaration, ReportType, ShellType, StepSpec,
};
pub use types::{
    ExecutionAttempt, ExecutionResult, ExecutionSummary, ResolvedCommand, StepOutputs,
};
