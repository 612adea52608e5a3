use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::runner::Runner;

/// Drives the `docker` command line client.
pub struct DockerCli {
    binary: PathBuf,
    host: Option<String>,
}

impl DockerCli {
    pub fn new<B>(binary: B) -> Self
    where
        B: Into<PathBuf>,
    {
        DockerCli {
            binary: binary.into(),
            host: None,
        }
    }

    /// Points the client at a specific daemon, e.g. `unix:///var/run/docker.sock`.
    pub fn with_host<H>(mut self, host: H) -> Self
    where
        H: Into<String>,
    {
        self.host = Some(host.into());
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.binary);
        if let Some(host) = &self.host {
            command.env("DOCKER_HOST", host);
        }
        command.args(args);

        command.stdin(Stdio::null());
        command.stdout(Stdio::inherit());
        command.stderr(Stdio::inherit());

        command
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        let command_line = format!("{} {}", self.binary.display(), args.join(" "));
        log::info!("Running command '{}'...", command_line);

        let status = self
            .command(args)
            .status()
            .await
            .with_context(|| format!("could not run command `{}`", command_line))?;

        if !status.success() {
            bail!("command `{}` failed with {}", command_line, status);
        }

        Ok(())
    }
}

#[async_trait]
impl Runner for DockerCli {
    async fn pull(&self, image: &str) -> Result<()> {
        log::info!("Pulling docker image '{}'", image);

        let result = self.run(&["pull", image]).await;
        if let Err(error) = &result {
            log::warn!("Failed pulling container image '{}': {:#}", image, error);
        }

        result
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        log::info!("Removing docker image '{}'", image);

        let result = self.run(&["rmi", image]).await;
        if let Err(error) = &result {
            log::warn!("Failed removing container image '{}': {:#}", image, error);
        }

        result
    }

    async fn system_prune(&self) -> Result<()> {
        log::info!("Pruning docker system");

        let result = self.run(&["system", "prune", "--all", "--force"]).await;
        if let Err(error) = &result {
            log::warn!("Failed pruning system: {:#}", error);
        }

        result
    }
}
