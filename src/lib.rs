//! # bgstep - background step execution for CI pipelines
//!
//! `bgstep` launches the long-running service steps of a build (databases,
//! caches, mock servers) without blocking the pipeline on their lifetime.
//!
//! A step is described by a [`StepSpec`]. [`BackgroundStep::run`] resolves
//! what to execute, launches it on a detached task and returns as soon as
//! the process fails or a short settle window has passed:
//!
//! ```rust,no_run
//! use bgstep::{BackgroundStep, OutputSink, ShellType, StepSpec};
//!
//! # async fn demo() {
//! let spec = StepSpec::new("redis")
//!     .with_command("redis-server --port 6380", ShellType::Bash);
//!
//! let result = BackgroundStep::new(spec, OutputSink::stderr(), false, tracing::Span::current())
//!     .run()
//!     .await;
//! assert!(result.is_success());
//! # }
//! ```
//!
//! ## Command resolution
//!
//! An explicit entrypoint wins over a shell command, which wins over the
//! default entrypoint declared by the step's container image. See
//! [`CommandResolver`].
//!
//! ## License
//!
//! Licensed under either of
//! - Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <https://www.apache.org/licenses/LICENSE-2.0>)
//! - MIT license ([LICENSE-MIT](LICENSE-MIT) or <https://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod executor;
pub mod infrastructure;
pub mod pipeline;

// Prelude module for common imports
pub mod prelude;

// Re-export commonly used types
pub use executor::{
    AttemptExecutor, BackgroundStep, Collaborators, CommandResolver, EnvExpressionResolver,
    ExpressionResolver, FsReportCollector, ImageMetadata, ImageMetadataResolver,
    OsProcessLauncher, OutputSink, ProcessInvocation, ProcessLauncher, ReportCollector,
    RunningProcess, SharedBuffer, Strategy,
};
pub use infrastructure::{
    Config, ContainerImageInspector, ContainerRuntime, MetricsCollector, ProcessMetrics,
    init_logging,
};
pub use pipeline::{
    CollectionError, ConfigError, ErrorKind, ExecutionAttempt, ExecutionResult, ExecutionSummary,
    ExpressionError, ImageError, ProcessError, ReportDeclaration, ReportType, ResolutionError,
    ResolvedCommand, ShellType, StepError, StepOutputs, StepSpec,
};

/// Version of the bgstep crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
