use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::cli::Cleanup;
use crate::config::ContainerList;
use crate::jitter::sleep_with_jitter;
use crate::runner::Runner;

#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub container_list: PathBuf,
    pub interval: u64,
    /// `0` runs every pull at once
    pub max_concurrent_pulls: usize,
    pub cleanup: Cleanup,
}

/// Outcome of a single pull cycle.
#[derive(Debug, Default, PartialEq)]
pub struct CycleReport {
    pub pulled: Vec<String>,
    pub failed: Vec<String>,
}

pub struct Scheduler<R> {
    runner: Arc<R>,
    options: ScheduleOptions,
}

impl<R> Scheduler<R>
where
    R: Runner + 'static,
{
    pub fn new(runner: R, options: ScheduleOptions) -> Self {
        Scheduler {
            runner: Arc::new(runner),
            options,
        }
    }

    /// Runs pull cycles until `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = self.cycle() => {
                    if let Err(error) = result {
                        log::warn!("{:#}", error);
                    }
                }
            }

            if !sleep_with_jitter(self.options.interval, &token).await {
                break;
            }
        }

        log::debug!("preheat loop stopped");
    }

    /// Reads the container list, pulls every image and cleans up afterwards.
    pub async fn cycle(&self) -> Result<CycleReport> {
        let path = &self.options.container_list;
        log::info!("Reading {} file...", path.display());

        let list = ContainerList::from_file(path).await?;
        let images: Vec<String> = list
            .images()?
            .iter()
            .map(|image| image.as_str().to_string())
            .collect();

        let started = Instant::now();
        log::info!("Pulling {} images...", images.len());
        let report = self
            .for_each(&images, |runner, image| async move {
                runner.pull(&image).await
            })
            .await;
        log::info!(
            "Pulled images: {} succeeded, {} failed in {:.2}s",
            report.pulled.len(),
            report.failed.len(),
            started.elapsed().as_secs_f64()
        );

        match self.options.cleanup {
            Cleanup::None => {}
            Cleanup::RemoveImages => {
                self.for_each(&report.pulled, |runner, image| async move {
                    runner.remove_image(&image).await
                })
                .await;
            }
            Cleanup::Prune => {
                // failure is already logged by the runner
                let _ = self.runner.system_prune().await;
            }
        }

        Ok(report)
    }

    /// Runs `operation` for every image with at most `max_concurrent_pulls`
    /// in flight and waits for all of them.
    async fn for_each<F, Fut>(&self, images: &[String], operation: F) -> CycleReport
    where
        F: Fn(Arc<R>, String) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let permits = match self.options.max_concurrent_pulls {
            0 => images.len().max(1),
            max => max,
        };
        let semaphore = Arc::new(Semaphore::new(permits));

        let mut handles = FuturesUnordered::new();
        for image in images {
            let semaphore = semaphore.clone();
            let operation = operation(self.runner.clone(), image.clone());
            let image = image.clone();
            handles.push(tokio::spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => operation.await,
                    Err(error) => Err(error).context("image semaphore closed"),
                };
                (image, result)
            }));
        }

        let mut report = CycleReport::default();
        while let Some(joined) = handles.next().await {
            match joined {
                Ok((image, Ok(()))) => report.pulled.push(image),
                Ok((image, Err(_))) => report.failed.push(image),
                Err(error) => log::error!("image task panicked: {}", error),
            }
        }

        report
    }
}
