//! Background step execution layer
//!
//! This module contains the capability traits and the pieces that drive a
//! step: command resolution, process launching, the per-attempt orchestrator
//! and the retrying background controller.

mod background;
mod expression;
mod orchestrator;
mod process;
mod reports;
mod resolver;
mod sink;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use background::BackgroundStep;
pub use expression::EnvExpressionResolver;
pub use orchestrator::AttemptExecutor;
pub use process::{OsProcessLauncher, ProcessInvocation};
pub use reports::{FsReportCollector, ReportSummary};
pub use resolver::{CommandResolver, DEFAULT_IMAGE_SECRET_ENV, Strategy};
pub use sink::{OutputSink, SharedBuffer};
pub use traits::{
    Collaborators, ExpressionResolver, ImageMetadata, ImageMetadataResolver, ProcessLauncher,
    ReportCollector, RunningProcess,
};
