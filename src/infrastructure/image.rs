//! Container image metadata lookup (Docker/Podman)
//!
//! Asks the local container runtime for the `Entrypoint` and `Cmd` an image
//! declares, pulling the image first when it is not present locally. A pull
//! secret, when given, is a base64-encoded registry config (`config.json`)
//! that is written to a private temporary directory for the duration of the
//! lookup.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

use crate::executor::{ImageMetadata, ImageMetadataResolver};
use crate::pipeline::ImageError;

/// Container runtime type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    /// Docker runtime
    #[default]
    Docker,
    /// Podman runtime
    Podman,
}

impl ContainerRuntime {
    /// Gets the runtime executable name
    #[must_use]
    pub fn binary(&self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }

    /// Environment variable pointing the runtime at a registry credentials file
    fn credentials_env(&self, dir: &Path) -> (&'static str, String) {
        match self {
            ContainerRuntime::Docker => ("DOCKER_CONFIG", dir.display().to_string()),
            ContainerRuntime::Podman => (
                "REGISTRY_AUTH_FILE",
                dir.join("config.json").display().to_string(),
            ),
        }
    }
}

impl std::fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary())
    }
}

/// `.Config` section of `image inspect` output
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    entrypoint: Option<Vec<String>>,
    #[serde(default)]
    cmd: Option<Vec<String>>,
}

impl From<InspectConfig> for ImageMetadata {
    fn from(config: InspectConfig) -> Self {
        Self {
            entrypoint: config.entrypoint.unwrap_or_default(),
            args: config.cmd.unwrap_or_default(),
        }
    }
}

fn parse_inspect_output(stdout: &str) -> Result<ImageMetadata, ImageError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(ImageMetadata::default());
    }
    let config: InspectConfig = serde_json::from_str(trimmed)?;
    Ok(config.into())
}

/// Image metadata lookup backed by the `docker`/`podman` CLI
#[derive(Debug, Clone, Default)]
pub struct ContainerImageInspector {
    runtime: ContainerRuntime,
}

impl ContainerImageInspector {
    /// Creates an inspector for the given runtime
    #[must_use]
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self { runtime }
    }

    /// Runtime in use
    #[must_use]
    pub fn runtime(&self) -> &ContainerRuntime {
        &self.runtime
    }

    fn command(&self, credentials: Option<&TempDir>) -> Command {
        let mut cmd = Command::new(self.runtime.binary());
        if let Some(dir) = credentials {
            let (key, value) = self.runtime.credentials_env(dir.path());
            cmd.env(key, value);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run(
        &self,
        action: &'static str,
        args: &[&str],
        credentials: Option<&TempDir>,
    ) -> Result<String, ImageError> {
        let output = self
            .command(credentials)
            .args(args)
            .output()
            .await
            .map_err(|source| ImageError::Runtime {
                runtime: self.runtime.to_string(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(ImageError::Command {
                runtime: self.runtime.to_string(),
                action,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn inspect(
        &self,
        image: &str,
        credentials: Option<&TempDir>,
    ) -> Result<ImageMetadata, ImageError> {
        let stdout = self
            .run(
                "inspect",
                &["image", "inspect", "--format", "{{json .Config}}", image],
                credentials,
            )
            .await?;
        parse_inspect_output(&stdout)
    }
}

/// Writes a decoded registry config into a fresh private directory
fn write_credentials(secret: &str) -> Result<TempDir, ImageError> {
    let decoded = STANDARD.decode(secret.trim())?;
    let dir = tempfile::Builder::new()
        .prefix("bgstep-registry-")
        .tempdir()
        .map_err(ImageError::Credentials)?;
    std::fs::write(dir.path().join("config.json"), decoded).map_err(ImageError::Credentials)?;
    Ok(dir)
}

#[async_trait]
impl ImageMetadataResolver for ContainerImageInspector {
    async fn lookup(
        &self,
        step_id: &str,
        image: &str,
        pull_secret: Option<&str>,
    ) -> Result<ImageMetadata, ImageError> {
        if image.trim().is_empty() {
            return Err(ImageError::EmptyReference);
        }

        let credentials = pull_secret
            .filter(|s| !s.trim().is_empty())
            .map(write_credentials)
            .transpose()?;

        match self.inspect(image, credentials.as_ref()).await {
            Ok(metadata) => Ok(metadata),
            Err(ImageError::Command { stderr, .. }) => {
                debug!(step_id = %step_id, image = %image, %stderr, "image not available locally");
                info!(step_id = %step_id, image = %image, runtime = %self.runtime, "pulling image");
                self.run("pull", &["pull", "--quiet", image], credentials.as_ref())
                    .await?;
                self.inspect(image, credentials.as_ref()).await
            }
            Err(e) => Err(e),
        }
    }
}
