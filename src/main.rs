//! bgstep - run CI background steps from the command line
//!
//! ## Commands
//!
//! - `bgstep run` - Launch a step and print its result summary as JSON
//! - `bgstep resolve` - Show which command a step would execute
//! - `bgstep completions` - Generate shell completions
//!
//! ## Quick Start
//!
//! ```bash
//! # Start a Redis sidecar; returns once it fails or has been up for 5s
//! bgstep run redis.yaml
//!
//! # Inspect the command line without launching anything
//! bgstep resolve redis.yaml
//!
//! # Generate shell completions
//! bgstep completions bash > /etc/bash_completion.d/bgstep
//! ```
//!
//! Diagnostics are written to stderr; `RUST_LOG` overrides `--log-level`.

use std::process::ExitCode;

mod cli;

#[tokio::main]
async fn main() -> ExitCode {
    match cli::run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if std::env::var("BGSTEP_VERBOSE").is_ok() {
                eprintln!("{e:?}");
            }
            ExitCode::FAILURE
        }
    }
}
