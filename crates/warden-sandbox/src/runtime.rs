//! The container runtime seam.

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::SandboxResult;
use crate::spec::ContainerSpec;

/// Framed stdout/stderr of an attached container. See [`crate::frame`].
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Operations the executor needs from a container runtime.
///
/// Implementations must be safe to call concurrently for different
/// containers. `kill` and `remove` must tolerate a container that has
/// already exited.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + std::fmt::Debug {
    /// Check the runtime is reachable.
    async fn ping(&self) -> SandboxResult<()>;

    /// Whether `image` is present locally.
    async fn image_exists(&self, image: &str) -> SandboxResult<bool>;

    /// Pull `image`.
    async fn pull_image(&self, image: &str) -> SandboxResult<()>;

    /// Create a container and return its ID. Does not start it.
    async fn create(&self, spec: &ContainerSpec) -> SandboxResult<String>;

    /// Start the container with output attached. `stdin` is written and
    /// closed when given. The stream ends when the container exits.
    async fn start_attached(&self, id: &str, stdin: Option<Vec<u8>>)
    -> SandboxResult<OutputStream>;

    /// Wait for the container to exit and return its exit code.
    async fn wait(&self, id: &str) -> SandboxResult<i64>;

    /// Current memory usage in bytes, if the runtime reports it.
    async fn stats(&self, id: &str) -> SandboxResult<Option<u64>>;

    /// Kill the container.
    async fn kill(&self, id: &str) -> SandboxResult<()>;

    /// Force-remove the container.
    async fn remove(&self, id: &str) -> SandboxResult<()>;
}
