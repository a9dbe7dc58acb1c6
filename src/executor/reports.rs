//! Filesystem test report collection
//!
//! Declared report paths are glob patterns, relative to the workspace root
//! unless absolute. Each matched JUnit file is read and its test cases are
//! counted; a pattern that matches nothing only produces a warning.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::traits::ReportCollector;
use crate::pipeline::{CollectionError, ReportDeclaration};

/// Totals gathered from the reports of one step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    /// Report files read
    pub files: usize,
    /// `<testcase` elements across those files
    pub test_cases: usize,
}

/// Collector reading report files from the local filesystem
#[derive(Debug, Clone)]
pub struct FsReportCollector {
    root: PathBuf,
}

impl FsReportCollector {
    /// Creates a collector resolving relative patterns against `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Reads every file the declarations match
    pub async fn summarize(
        &self,
        declarations: &[ReportDeclaration],
        step_id: &str,
    ) -> Result<ReportSummary, CollectionError> {
        let mut summary = ReportSummary::default();

        for declaration in declarations {
            for pattern in &declaration.paths {
                let files = self.matches(pattern)?;
                if files.is_empty() {
                    warn!(step_id = %step_id, pattern = %pattern, "no report files matched");
                    continue;
                }
                for path in files {
                    let content = tokio::fs::read_to_string(&path)
                        .await
                        .map_err(|source| CollectionError::Read {
                            path: path.clone(),
                            source,
                        })?;
                    summary.files += 1;
                    summary.test_cases += content.matches("<testcase").count();
                }
            }
        }

        Ok(summary)
    }

    fn matches(&self, pattern: &str) -> Result<Vec<PathBuf>, CollectionError> {
        let full = if Path::new(pattern).is_absolute() {
            PathBuf::from(pattern)
        } else {
            self.root.join(pattern)
        };
        let full = full.to_string_lossy();

        let paths = glob::glob(&full).map_err(|source| CollectionError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;

        paths
            .filter_map(|entry| match entry {
                Ok(path) if path.is_file() => Some(Ok(path)),
                Ok(_) => None,
                Err(e) => Some(Err(CollectionError::Read {
                    path: e.path().to_path_buf(),
                    source: e.into_error(),
                })),
            })
            .collect()
    }
}

#[async_trait]
impl ReportCollector for FsReportCollector {
    async fn collect(
        &self,
        reports: &[ReportDeclaration],
        step_id: &str,
    ) -> Result<(), CollectionError> {
        if reports.is_empty() {
            return Ok(());
        }

        let summary = self.summarize(reports, step_id).await?;
        info!(
            step_id = %step_id,
            files = summary.files,
            test_cases = summary.test_cases,
            "collected test reports"
        );
        Ok(())
    }
}
