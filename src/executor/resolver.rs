//! Command resolution
//!
//! Decides what a background step actually executes. Three strategies are
//! tried in a fixed priority order and the first one that applies wins:
//!
//! 1. [`Strategy::Entrypoint`]: the step's explicit entrypoint, verbatim.
//! 2. [`Strategy::ShellScript`]: the step's command, wrapped as
//!    `[shell, flag, preamble + command]`.
//! 3. [`Strategy::ImageDefault`]: the entrypoint and default arguments the
//!    container image declares.
//!
//! A strategy either produces a command, reports that it does not apply
//! (`Ok(None)`), or fails; only "does not apply" falls through.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::traits::{ExpressionResolver, ImageMetadataResolver};
use crate::pipeline::{ResolutionError, ResolvedCommand, StepSpec};

/// Environment variable holding the image pull secret, unless configured otherwise
pub const DEFAULT_IMAGE_SECRET_ENV: &str = "PIPELINE_IMAGE_SECRET";

/// A way of producing the command line for a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Explicit entrypoint override
    Entrypoint,
    /// Shell-wrapped command
    ShellScript,
    /// Default entrypoint declared by the image
    ImageDefault,
}

impl Strategy {
    /// Strategies in the order they are tried
    pub const PRIORITY: [Self; 3] = [Self::Entrypoint, Self::ShellScript, Self::ImageDefault];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entrypoint => write!(f, "entrypoint"),
            Self::ShellScript => write!(f, "shell"),
            Self::ImageDefault => write!(f, "image"),
        }
    }
}

/// Turns a [`StepSpec`] into script text, environment and argv
#[derive(Clone)]
pub struct CommandResolver {
    expressions: Arc<dyn ExpressionResolver>,
    images: Arc<dyn ImageMetadataResolver>,
    image_secret_env: String,
}

impl CommandResolver {
    /// Creates a resolver using the given collaborators
    #[must_use]
    pub fn new(
        expressions: Arc<dyn ExpressionResolver>,
        images: Arc<dyn ImageMetadataResolver>,
    ) -> Self {
        Self {
            expressions,
            images,
            image_secret_env: DEFAULT_IMAGE_SECRET_ENV.to_string(),
        }
    }

    /// Reads the image pull secret from `name` instead of the default variable
    #[must_use]
    pub fn with_image_secret_env(mut self, name: impl Into<String>) -> Self {
        self.image_secret_env = name.into();
        self
    }

    /// Script text to run in the step's shell
    ///
    /// Returns `None` when no shell wrapping is needed: the step has an
    /// explicit entrypoint, or no command at all. The shell type is checked
    /// before the command is resolved.
    pub fn script(&self, spec: &StepSpec) -> Result<Option<String>, ResolutionError> {
        if !spec.needs_shell() {
            return Ok(None);
        }

        let preamble = spec.shell_type.early_exit_preamble()?;
        let body = self
            .expressions
            .resolve(&spec.command)
            .map_err(|source| ResolutionError::Expression {
                field: "command".to_string(),
                source,
            })?;

        Ok(Some(format!("{preamble}{body}")))
    }

    /// Literal environment, failing on the first value that does not resolve
    pub fn environment(
        &self,
        spec: &StepSpec,
    ) -> Result<BTreeMap<String, String>, ResolutionError> {
        spec.environment
            .iter()
            .map(|(name, raw)| {
                self.expressions
                    .resolve(raw)
                    .map(|value| (name.clone(), value))
                    .map_err(|source| ResolutionError::Expression {
                        field: format!("environment.{name}"),
                        source,
                    })
            })
            .collect()
    }

    /// Full command line, plus the strategy that produced it
    ///
    /// `script` is the output of [`CommandResolver::script`].
    pub async fn command(
        &self,
        spec: &StepSpec,
        script: Option<&str>,
    ) -> Result<(Strategy, ResolvedCommand), ResolutionError> {
        for strategy in Strategy::PRIORITY {
            if let Some(command) = self.apply(strategy, spec, script).await? {
                debug!(step_id = %spec.id, %strategy, command = %command, "resolved command");
                return Ok((strategy, command));
            }
        }

        Err(ResolutionError::NoCommand {
            step_id: spec.id.clone(),
        })
    }

    /// Resolves script and command in one go
    pub async fn resolve(&self, spec: &StepSpec) -> Result<ResolvedCommand, ResolutionError> {
        let script = self.script(spec)?;
        let (_, command) = self.command(spec, script.as_deref()).await?;
        Ok(command)
    }

    async fn apply(
        &self,
        strategy: Strategy,
        spec: &StepSpec,
        script: Option<&str>,
    ) -> Result<Option<ResolvedCommand>, ResolutionError> {
        match strategy {
            Strategy::Entrypoint => Ok(ResolvedCommand::new(spec.entrypoint.clone())),
            Strategy::ShellScript => match script {
                Some(script) if !script.is_empty() => {
                    let (shell, flag) = spec.shell_type.invocation()?;
                    Ok(ResolvedCommand::new(vec![
                        shell.to_string(),
                        flag.to_string(),
                        script.to_string(),
                    ]))
                }
                _ => Ok(None),
            },
            Strategy::ImageDefault => {
                let secret = std::env::var(&self.image_secret_env).ok();
                let metadata = self
                    .images
                    .lookup(&spec.id, &spec.image, secret.as_deref())
                    .await
                    .map_err(|source| ResolutionError::Image {
                        image: spec.image.clone(),
                        source,
                    })?;
                Ok(ResolvedCommand::new(metadata.combined()))
            }
        }
    }
}

impl fmt::Debug for CommandResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandResolver")
            .field("image_secret_env", &self.image_secret_env)
            .finish_non_exhaustive()
    }
}
