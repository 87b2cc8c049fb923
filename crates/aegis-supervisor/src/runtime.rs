//! Container runtime door
//!
//! All unit control goes through the `docker` CLI with explicit
//! timeouts. A control command reports success only when the runtime
//! exits cleanly and the unit is observed running within a bounded
//! wait.

use aegis_common::{Error, Result};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const RUNNING_WAIT: Duration = Duration::from_secs(15);
const RUNNING_POLL: Duration = Duration::from_secs(1);

/// Observed state of one managed unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitState {
    pub name: String,
    /// Runtime status: running, exited, restarting, ...
    pub status: String,
    /// Health-probe result: healthy, unhealthy, starting, or unknown
    pub health: String,
}

impl UnitState {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    pub fn is_unhealthy(&self) -> bool {
        self.health == "unhealthy"
    }
}

/// Thin async wrapper over the container runtime CLI
#[derive(Clone, Default)]
pub struct ContainerRuntime;

impl ContainerRuntime {
    pub fn new() -> Self {
        ContainerRuntime
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output> {
        debug!("docker {}", args.join(" "));
        let output = tokio::time::timeout(timeout, Command::new("docker").args(args).output())
            .await
            .map_err(|_| Error::Timeout(format!("docker {} timed out", args.join(" "))))?
            .map_err(|e| Error::Runtime(format!("docker {}: {e}", args.join(" "))))?;
        Ok(output)
    }

    async fn run_ok(&self, args: &[&str], timeout: Duration) -> Result<()> {
        let output = self.run(args, timeout).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Runtime(format!(
                "docker {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Enumerate all units with status and health-probe result
    pub async fn list_units(&self) -> Result<Vec<UnitState>> {
        let output = self
            .run(
                &["ps", "-a", "--format", "{{.Names}}"],
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;
        if !output.status.success() {
            return Err(Error::Runtime(format!(
                "docker ps failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut units = Vec::new();
        for name in String::from_utf8_lossy(&output.stdout).lines() {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            match self.inspect(name).await {
                Ok(state) => units.push(state),
                Err(e) => warn!("Failed to inspect {}: {}", name, e),
            }
        }
        Ok(units)
    }

    /// Status and health of a single unit
    pub async fn inspect(&self, name: &str) -> Result<UnitState> {
        let output = self
            .run(
                &[
                    "inspect",
                    "--format",
                    "{{.State.Status}}\t{{if .State.Health}}{{.State.Health.Status}}{{else}}unknown{{end}}",
                    name,
                ],
                Duration::from_secs(10),
            )
            .await?;
        if !output.status.success() {
            return Err(Error::Runtime(format!(
                "docker inspect {name} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let line = String::from_utf8_lossy(&output.stdout);
        let mut parts = line.trim().split('\t');
        let status = parts.next().unwrap_or("unknown").to_string();
        let health = parts.next().unwrap_or("unknown").to_string();
        Ok(UnitState {
            name: name.to_string(),
            status,
            health,
        })
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.inspect(name)
            .await
            .map(|s| s.is_running())
            .unwrap_or(false)
    }

    /// Poll until the unit reports running or the wait budget is spent
    async fn await_running(&self, name: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + RUNNING_WAIT;
        while tokio::time::Instant::now() < deadline {
            if self.is_running(name).await {
                return Ok(());
            }
            tokio::time::sleep(RUNNING_POLL).await;
        }
        Err(Error::Runtime(format!(
            "unit {name} not running after control command"
        )))
    }

    /// Restart the unit in place
    pub async fn restart(&self, name: &str, stop_timeout_secs: u32) -> Result<()> {
        info!("Restarting unit {}", name);
        self.run_ok(
            &["restart", "-t", &stop_timeout_secs.to_string(), name],
            Duration::from_secs(120),
        )
        .await?;
        self.await_running(name).await
    }

    pub async fn stop(&self, name: &str, stop_timeout_secs: u32) -> Result<()> {
        info!("Stopping unit {}", name);
        self.run_ok(
            &["stop", "-t", &stop_timeout_secs.to_string(), name],
            Duration::from_secs(120),
        )
        .await
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        info!("Starting unit {}", name);
        self.run_ok(&["start", name], Duration::from_secs(60)).await?;
        self.await_running(name).await
    }

    /// Prune unused images, stopped containers, and volumes
    pub async fn system_prune(&self) -> Result<()> {
        self.run_ok(
            &["system", "prune", "-af", "--volumes"],
            Duration::from_secs(120),
        )
        .await
    }

    /// Prune the image build cache
    pub async fn builder_prune(&self) -> Result<()> {
        self.run_ok(&["builder", "prune", "-af"], Duration::from_secs(60))
            .await
    }
}
