//! CLI for bgstep
//!
//! - `run`: Launch a background step and print its result summary
//! - `resolve`: Show the command line a step would execute
//! - `completions`: Generate shell completions

pub mod completions;

use anyhow::{Context, Result};
use bgstep::{
    BackgroundStep, Collaborators, CommandResolver, Config, OutputSink, StepSpec, init_logging,
};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// CLI arguments for bgstep
#[derive(Parser, Debug)]
#[command(name = "bgstep")]
#[command(author, version, about = "Run CI background steps", long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overriding the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Launch a background step
    Run {
        /// Step file (YAML or JSON)
        step_file: PathBuf,
        /// Log pid and peak memory of launched processes
        #[arg(long)]
        log_metrics: bool,
        /// Append step output to this file instead of stderr
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the command a step would execute, without running it
    Resolve {
        /// Step file (YAML or JSON)
        step_file: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: ShellArg,
        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ShellArg {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

/// Build the CLI command for completion generation
pub fn build_cli() -> clap::Command {
    Args::command()
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("Invalid config: {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn load_step(path: &Path) -> Result<StepSpec> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read step file: {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("Invalid step file: {}", path.display()))
}

/// Destination for the launched process' output
///
/// The process writes to it directly and keeps it after `run` exits. Without
/// `--output` it shares stderr so stdout carries only the JSON summary.
fn output_sink(path: Option<&Path>) -> Result<OutputSink> {
    match path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open output file: {}", path.display()))?;
            Ok(OutputSink::file(file))
        }
        None => Ok(OutputSink::stderr()),
    }
}

/// Parse and execute CLI arguments
pub async fn run() -> Result<ExitCode> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level);

    match args.command {
        Command::Run {
            step_file,
            log_metrics,
            output,
        } => {
            let spec = load_step(&step_file)?;
            let sink = output_sink(output.as_deref())?;
            let span = tracing::info_span!("bgstep", step = %spec.label());

            let result = BackgroundStep::new(spec, sink, log_metrics, span)
                .with_config(config)?
                .run()
                .await;

            println!("{}", serde_json::to_string_pretty(&result.summary())?);
            if !result.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Resolve { step_file } => {
            let spec = load_step(&step_file)?;
            let collaborators = Collaborators::os(&config);
            let resolver = CommandResolver::new(collaborators.expressions, collaborators.images)
                .with_image_secret_env(&config.image_secret_env);

            let script = resolver.script(&spec)?;
            let environment = resolver.environment(&spec)?;
            let (strategy, command) = resolver.command(&spec, script.as_deref()).await?;

            let resolved = json!({
                "step_id": spec.id,
                "strategy": strategy.to_string(),
                "command": command,
                "environment": environment,
            });
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
        Command::Completions { shell, output } => {
            use clap_complete::Shell;

            let shell_enum = match shell {
                ShellArg::Bash => Shell::Bash,
                ShellArg::Zsh => Shell::Zsh,
                ShellArg::Fish => Shell::Fish,
                ShellArg::PowerShell => Shell::PowerShell,
            };

            let completions = completions::generate_completions(shell_enum)?;

            if let Some(output_path) = output {
                completions::save_completions(&completions, &output_path)?;
            } else {
                println!("{completions}");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let args = Args::try_parse_from([
            "bgstep",
            "run",
            "redis.yaml",
            "--log-metrics",
            "--config",
            "bgstep.yaml",
        ])
        .unwrap();

        assert_eq!(args.config, Some(PathBuf::from("bgstep.yaml")));
        match args.command {
            Command::Run {
                step_file,
                log_metrics,
                output,
            } => {
                assert_eq!(step_file, PathBuf::from("redis.yaml"));
                assert!(log_metrics);
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_load_step_yaml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("redis.yaml");
        std::fs::write(
            &path,
            "id: redis\ncommand: redis-server\nshell_type: bash\nnum_retries: 2\n",
        )
        .unwrap();

        let spec = load_step(&path).unwrap();
        assert_eq!(spec.id, "redis");
        assert_eq!(spec.num_retries, 2);
    }

    #[test]
    fn test_load_step_missing_file() {
        let err = load_step(Path::new("/nonexistent/step.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read step file"));
    }

    #[test]
    fn test_output_defaults_to_stderr() {
        let sink = output_sink(None).unwrap();
        assert!(sink.same_as(&OutputSink::stderr()));
        assert!(!sink.same_as(&OutputSink::stdout()));
    }

    #[test]
    fn test_output_file_is_appended_directly() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("service.log");
        std::fs::write(&path, "before\n").unwrap();

        let sink = output_sink(Some(&path)).unwrap();
        assert!(sink.child_stdio().unwrap().is_some());
        sink.write_chunk(b"after\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "before\nafter\n");
    }

    #[test]
    fn test_default_config_without_path() {
        assert_eq!(load_config(None).unwrap(), Config::default());
    }
}
