mod docker;

use anyhow::Result;
use async_trait::async_trait;
pub use docker::DockerCli;

/// Image operations against a running container daemon.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn pull(&self, image: &str) -> Result<()>;

    async fn remove_image(&self, image: &str) -> Result<()>;

    /// Removes all unused containers, networks, images and build cache.
    async fn system_prune(&self) -> Result<()>;
}
