//! Infrastructure layer
//!
//! This module contains external integrations and adapters.

mod config;
mod image;
mod logging;
mod metrics;

pub use config::Config;
pub use image::{ContainerImageInspector, ContainerRuntime};
pub use logging::init_logging;
pub use metrics::{MetricsCollector, ProcessMetrics, RssSampler, read_vm_rss};
