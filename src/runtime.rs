use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Local container engine used to renew images
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn pull(&self, reference: &str) -> Result<()>;
    async fn push(&self, reference: &str) -> Result<()>;
    async fn remove_local(&self, reference: &str) -> Result<()>;
}

/// Shells out to the `docker` binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        DockerCli {
            program: program.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        debug!(program = %self.program, ?args, "running container runtime");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run {} {}", self.program, args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        DockerCli::new("docker")
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn pull(&self, reference: &str) -> Result<()> {
        self.run(&["pull", reference]).await
    }

    async fn push(&self, reference: &str) -> Result<()> {
        self.run(&["push", reference]).await
    }

    async fn remove_local(&self, reference: &str) -> Result<()> {
        self.run(&["image", "rm", reference]).await
    }
}
