//! Suspend/resume signal transport
//!
//! The offload controller is agnostic to whether the direct OS call or a
//! privileged-helper transport performs the actual signal, so the
//! mechanism sits behind the [`SignalSender`] capability.

use crate::error::GuardError;
use async_trait::async_trait;
use tokio::process::Command;

/// Capability for delivering suspend/resume signals to processes.
#[async_trait]
pub trait SignalSender: Send + Sync {
    /// Pause execution of `pid` without terminating it.
    async fn suspend(&self, pid: u32) -> Result<(), GuardError>;

    /// Return a suspended `pid` to running state.
    async fn resume(&self, pid: u32) -> Result<(), GuardError>;

    /// Whether `pid` still exists in the OS process table.
    async fn exists(&self, pid: u32) -> bool;
}

/// Direct transport that shells out to `kill(1)` with SIGSTOP/SIGCONT.
pub struct KillCommandSender;

impl KillCommandSender {
    async fn send(&self, pid: u32, sig: &str) -> Result<(), GuardError> {
        let status = Command::new("kill")
            .args(["-s", sig, &pid.to_string()])
            .status()
            .await
            .map_err(|e| GuardError::PermissionDenied(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(GuardError::PermissionDenied(format!(
                "kill -s {} {} exited with {}",
                sig, pid, status
            )))
        }
    }
}

#[async_trait]
impl SignalSender for KillCommandSender {
    async fn suspend(&self, pid: u32) -> Result<(), GuardError> {
        self.send(pid, "STOP").await
    }

    async fn resume(&self, pid: u32) -> Result<(), GuardError> {
        self.send(pid, "CONT").await
    }

    async fn exists(&self, pid: u32) -> bool {
        // Signal 0 probes the process table without delivering anything.
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}
