//! Capability traits for the collaborators a background step relies on
//!
//! The orchestrator only ever talks to these narrow interfaces, so every
//! piece of I/O (spawning processes, looking up image metadata, expanding
//! expressions, gathering reports) can be swapped for a fake in tests.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::expression::EnvExpressionResolver;
use super::process::{OsProcessLauncher, ProcessInvocation};
use super::reports::FsReportCollector;
use crate::infrastructure::{Config, ContainerImageInspector, MetricsCollector};
use crate::pipeline::{
    CollectionError, ExpressionError, ImageError, ProcessError, ReportDeclaration,
};

/// Expands expressions embedded in commands and environment values
pub trait ExpressionResolver: Send + Sync {
    /// Resolves a raw string to its literal value
    fn resolve(&self, raw: &str) -> Result<String, ExpressionError>;
}

/// Entrypoint and default arguments declared by a container image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    /// Declared entrypoint
    pub entrypoint: Vec<String>,
    /// Declared default arguments
    pub args: Vec<String>,
}

impl ImageMetadata {
    /// Entrypoint followed by arguments
    #[must_use]
    pub fn combined(self) -> Vec<String> {
        let mut argv = self.entrypoint;
        argv.extend(self.args);
        argv
    }
}

/// Looks up the default entrypoint of a container image
#[async_trait]
pub trait ImageMetadataResolver: Send + Sync {
    /// Fetches metadata for `image`, authenticating with `pull_secret` if given
    async fn lookup(
        &self,
        step_id: &str,
        image: &str,
        pull_secret: Option<&str>,
    ) -> Result<ImageMetadata, ImageError>;
}

/// Gathers declared test reports once a step has run
#[async_trait]
pub trait ReportCollector: Send + Sync {
    /// Collects `reports` for `step_id`; an empty list is a no-op
    async fn collect(
        &self,
        reports: &[ReportDeclaration],
        step_id: &str,
    ) -> Result<(), CollectionError>;
}

/// Starts processes
pub trait ProcessLauncher: Send + Sync {
    /// Starts the process described by `invocation`
    fn start(&self, invocation: ProcessInvocation)
    -> Result<Box<dyn RunningProcess>, ProcessError>;
}

/// A process that has been started
#[async_trait]
pub trait RunningProcess: Send {
    /// OS process id, if still known
    fn pid(&self) -> Option<u32>;

    /// Waits for the process to exit; a non-zero status is `ProcessError::Exit`
    async fn wait(&mut self) -> Result<(), ProcessError>;

    /// Kills the process
    async fn kill(&mut self) -> Result<(), ProcessError>;
}

/// The set of collaborators a background step is wired to
#[derive(Clone)]
pub struct Collaborators {
    /// Process launcher
    pub launcher: Arc<dyn ProcessLauncher>,
    /// Expression resolver
    pub expressions: Arc<dyn ExpressionResolver>,
    /// Image metadata lookup
    pub images: Arc<dyn ImageMetadataResolver>,
    /// Report collector
    pub reports: Arc<dyn ReportCollector>,
    /// Process metrics sink
    pub metrics: Arc<MetricsCollector>,
}

impl Collaborators {
    /// Collaborators backed by the local OS and container runtime
    #[must_use]
    pub fn os(config: &Config) -> Self {
        let workspace = std::env::current_dir().unwrap_or_default();
        Self {
            launcher: Arc::new(OsProcessLauncher::new()),
            expressions: Arc::new(EnvExpressionResolver::from_process_env()),
            images: Arc::new(ContainerImageInspector::new(config.container_runtime.clone())),
            reports: Arc::new(FsReportCollector::new(workspace)),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    /// Replaces the process launcher
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Replaces the expression resolver
    #[must_use]
    pub fn with_expressions(mut self, expressions: Arc<dyn ExpressionResolver>) -> Self {
        self.expressions = expressions;
        self
    }

    /// Replaces the image metadata lookup
    #[must_use]
    pub fn with_images(mut self, images: Arc<dyn ImageMetadataResolver>) -> Self {
        self.images = images;
        self
    }

    /// Replaces the report collector
    #[must_use]
    pub fn with_reports(mut self, reports: Arc<dyn ReportCollector>) -> Self {
        self.reports = reports;
        self
    }

    /// Replaces the metrics sink
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
