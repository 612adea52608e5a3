use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

const MAX_CONCURRENT_DOWNLOADS: u32 = 10;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("could not spawn `{}`", .binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("docker daemon exited before it was ready ({status})")]
    Exited { status: ExitStatus },
}

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub binary: PathBuf,
    pub socket: PathBuf,
    pub tcp_host: Option<String>,
    pub mtu: u16,
    pub storage_driver: String,
    pub registry_mirror: Option<String>,
    pub debug: bool,
}

impl DaemonOptions {
    pub fn unix_host(&self) -> String {
        format!("unix://{}", self.socket.display())
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--host={}", self.unix_host()),
            format!("--mtu={}", self.mtu),
        ];

        if let Some(tcp_host) = &self.tcp_host {
            args.push(format!("--host={}", tcp_host));
        }

        args.push(format!("--storage-driver={}", self.storage_driver));
        args.push(format!(
            "--max-concurrent-downloads={}",
            MAX_CONCURRENT_DOWNLOADS
        ));

        // pulls go through the mirror, warming it too
        if let Some(mirror) = &self.registry_mirror {
            args.push(format!("--registry-mirror={}", mirror));
        }

        if self.debug {
            args.push("--debug".to_string());
        }

        args
    }
}

/// A running docker daemon whose output is forwarded to the log.
pub struct Daemon {
    child: Child,
    socket: PathBuf,
    host: String,
    forwarder: JoinHandle<()>,
}

impl Daemon {
    pub fn start(options: &DaemonOptions) -> Result<Self, DaemonError> {
        log::debug!("Starting docker daemon...");
        let args = options.args();
        log::debug!("{} {}", options.binary.display(), args.join(" "));

        let mut child = Command::new(&options.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DaemonError::Spawn {
                binary: options.binary.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let forwarder = tokio::spawn(async move {
            let stdout = stdout.map(|out| LinesStream::new(BufReader::new(out).lines()));
            let stderr = stderr.map(|err| LinesStream::new(BufReader::new(err).lines()));
            match (stdout, stderr) {
                (Some(stdout), Some(stderr)) => forward(stdout.merge(stderr)).await,
                (Some(stdout), None) => forward(stdout).await,
                (None, Some(stderr)) => forward(stderr).await,
                (None, None) => {}
            }
        });

        Ok(Daemon {
            child,
            socket: options.socket.clone(),
            host: options.unix_host(),
            forwarder,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Waits until the daemon socket exists.
    ///
    /// Returns `Ok(false)` when cancelled before the daemon became ready.
    pub async fn wait_until_ready(&mut self, token: &CancellationToken) -> Result<bool> {
        log::debug!("Waiting for docker daemon to be ready for use...");
        loop {
            if tokio::fs::metadata(&self.socket).await.is_ok() {
                log::debug!("Docker daemon is ready for use");
                return Ok(true);
            }

            if let Some(status) = self
                .child
                .try_wait()
                .context("could not check docker daemon status")?
            {
                return Err(DaemonError::Exited { status }.into());
            }

            tokio::select! {
                _ = token.cancelled() => return Ok(false),
                _ = sleep(POLL_INTERVAL) => {}
            }
        }
    }

    /// Sends SIGTERM and waits up to `grace` before killing the daemon.
    pub async fn stop(mut self, grace: Duration) -> Result<()> {
        if let Some(id) = self.child.id() {
            log::info!("Stopping docker daemon with pid {}", id);
            if let Err(error) = kill(Pid::from_raw(id as i32), Signal::SIGTERM) {
                log::warn!("could not send SIGTERM to docker daemon: {}", error);
            }
        }

        match timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status.context("could not wait for docker daemon")?;
                log::info!("Docker daemon exited with {}", status);
            }
            Err(_) => {
                log::warn!(
                    "Docker daemon did not exit within {} seconds, killing it",
                    grace.as_secs()
                );
                self.child
                    .kill()
                    .await
                    .context("could not kill docker daemon")?;
            }
        }

        // children of the daemon may still hold its output pipes open
        match timeout(grace, &mut self.forwarder).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                log::debug!("docker daemon output forwarder ended abnormally: {}", error)
            }
            Err(_) => {
                log::warn!("Docker daemon output is still open, no longer forwarding it");
                self.forwarder.abort();
            }
        }

        Ok(())
    }
}

async fn forward<S>(mut lines: S)
where
    S: tokio_stream::Stream<Item = std::io::Result<String>> + Unpin,
{
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => log::info!(target: "dockerd", "{}", line),
            Err(error) => {
                log::warn!("could not read docker daemon output: {}", error);
                break;
            }
        }
    }
}
