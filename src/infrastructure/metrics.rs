//! Process metrics
//!
//! Records pid, peak resident set size and wall-clock time of each launched
//! attempt. RSS is sampled from `/proc/<pid>/status` while the process runs;
//! on platforms without procfs the peak is simply unknown.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Metrics for one launched attempt of a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessMetrics {
    /// Step id
    pub step_id: String,

    /// 1-based attempt number
    pub attempt: u32,

    /// OS process id
    pub pid: Option<u32>,

    /// Highest VmRSS seen while sampling, in KiB
    pub peak_rss_kb: Option<u64>,

    /// Time from launch until the process was no longer waited on
    pub elapsed: Duration,
}

/// Metrics collector for step executions
#[derive(Debug, Default)]
pub struct MetricsCollector {
    metrics: Arc<RwLock<HashMap<String, Vec<ProcessMetrics>>>>,
}

impl MetricsCollector {
    /// Creates a new metrics collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records metrics for an attempt
    pub fn record(&self, metrics: ProcessMetrics) {
        self.metrics
            .write()
            .entry(metrics.step_id.clone())
            .or_default()
            .push(metrics);
    }

    /// Gets all attempts recorded for a step, in recording order
    #[must_use]
    pub fn get(&self, step_id: &str) -> Vec<ProcessMetrics> {
        self.metrics.read().get(step_id).cloned().unwrap_or_default()
    }

    /// Gets all recorded metrics
    #[must_use]
    pub fn get_all(&self) -> Vec<ProcessMetrics> {
        self.metrics.read().values().flatten().cloned().collect()
    }
}

/// Background task polling the RSS of a process
#[derive(Debug)]
pub struct RssSampler {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Option<u64>>,
}

impl RssSampler {
    /// Starts sampling `pid` every `interval`
    #[must_use]
    pub fn spawn(pid: u32, interval: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut peak: Option<u64> = None;
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => match read_vm_rss(pid) {
                        Some(kb) => peak = Some(peak.map_or(kb, |p| p.max(kb))),
                        None => break,
                    },
                }
            }
            peak
        });
        Self { stop, handle }
    }

    /// Stops sampling and returns the peak seen
    pub async fn finish(self) -> Option<u64> {
        let _ = self.stop.send(());
        self.handle.await.ok().flatten()
    }
}

/// Reads the current VmRSS of `pid`, in KiB
#[must_use]
pub fn read_vm_rss(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}
