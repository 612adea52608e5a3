use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::daemon::Daemon;
use crate::health::HealthProbe;
use crate::metadata::{NAME, VERSION};
use crate::runner::DockerCli;
use crate::scheduler::Scheduler;

mod cli;
mod config;
mod daemon;
mod health;
mod jitter;
mod logger;
mod metadata;
mod runner;
mod scheduler;

const DAEMON_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Cancels `token` on the first SIGTERM or SIGINT.
fn handle_shutdown(token: CancellationToken) -> Result<()> {
    let mut terminate =
        signal(SignalKind::terminate()).context("could not listen for SIGTERM")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("could not listen for SIGINT")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = terminate.recv() => log::info!("Received SIGTERM"),
            _ = interrupt.recv() => log::info!("Received SIGINT"),
        }
        token.cancel();
    });

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let settings = cli.settings().context("invalid configuration")?;

    log::info!(
        "Starting {} version {} (mtu: {}, registry mirror: {}, cleanup: {:?}, container list: {})...",
        NAME,
        VERSION,
        settings.daemon.mtu,
        settings.daemon.registry_mirror.as_deref().unwrap_or(""),
        settings.schedule.cleanup,
        settings.schedule.container_list.display()
    );

    let probe = settings
        .registry_health_endpoint
        .as_deref()
        .map(HealthProbe::new)
        .transpose()?;

    let token = CancellationToken::new();
    handle_shutdown(token.clone())?;

    let mut daemon = Daemon::start(&settings.daemon).context("failed starting docker daemon")?;

    let ready = daemon.wait_until_ready(&token).await?
        && match &probe {
            Some(probe) => probe.wait(settings.health_interval, &token).await,
            None => true,
        };

    if ready {
        let runner = DockerCli::new(&settings.docker_binary).with_host(daemon.host());
        Scheduler::new(runner, settings.schedule).run(token).await;
    }

    log::info!("Shutting down...");
    daemon.stop(DAEMON_STOP_TIMEOUT).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(error) = logger::init(cli.log_format, cli.log_level) {
        eprintln!("{:#}", error);
        process::exit(1);
    }

    if let Err(error) = run(cli).await {
        log::error!("{:#}", error);
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_health_endpoint_fails_before_daemon_start() {
        let dir = tempfile::tempdir().unwrap();
        let dockerd = dir.path().join("dockerd");
        let cli = Cli::try_parse_from(&[
            "preheat",
            "--registry-health-endpoint",
            "not a url",
            "--dockerd-binary",
            dockerd.to_str().unwrap(),
        ])
        .unwrap();

        let error = format!("{:#}", run(cli).await.unwrap_err());
        assert!(error.contains("invalid registry health endpoint"), "{}", error);
        assert!(!error.contains("failed starting docker daemon"), "{}", error);
    }
}
