//! The shell-out boundary. Every kernel-affecting action goes through
//! [`KernelExecutor`] so the install/teardown logic in [`crate::layers`] is
//! testable without root or a real network namespace.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    #[error("command `{command}` exited with status {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("failed to spawn `{command}`: {reason}")]
    SpawnFailed { command: String, reason: String },
}

/// Abstraction over "run a shell command and tell me if it worked",
/// matching the C original's `system()`-call-per-operation style but
/// letting tests substitute a recording double.
pub trait KernelExecutor: Send + Sync {
    /// Run `program` with `args`, returning an error on spawn failure or
    /// non-zero exit. Implementations MUST NOT block the async runtime
    /// thread for longer than a real `ip`/`iptables` invocation would.
    fn run(&self, program: &str, args: &[&str]) -> Result<(), ExecError>;
}

/// The production executor: actually runs `ip`/`iptables`/`ipset`/
/// `conntrack` via `std::process::Command`.
pub struct SystemExecutor;

impl KernelExecutor for SystemExecutor {
    fn run(&self, program: &str, args: &[&str]) -> Result<(), ExecError> {
        let output = std::process::Command::new(program)
            .args(args)
            .output()
            .map_err(|e| ExecError::SpawnFailed {
                command: format!("{program} {}", args.join(" ")),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(ExecError::NonZeroExit {
                command: format!("{program} {}", args.join(" ")),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

/// Test double that records every command it was asked to run instead of
/// executing it, so layer-install/teardown tests can assert on the exact
/// command sequence without touching a real kernel.
#[derive(Default)]
pub struct RecordingExecutor {
    pub commands: std::sync::Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl KernelExecutor for RecordingExecutor {
    fn run(&self, program: &str, args: &[&str]) -> Result<(), ExecError> {
        self.commands
            .lock()
            .unwrap()
            .push(format!("{program} {}", args.join(" ")));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_executor_captures_command_sequence() {
        let exec = RecordingExecutor::new();
        exec.run("ip", &["link", "set", "eth1", "up"]).unwrap();
        exec.run("iptables", &["-t", "nat", "-A", "POSTROUTING"]).unwrap();
        assert_eq!(
            exec.commands(),
            vec!["ip link set eth1 up", "iptables -t nat -A POSTROUTING"]
        );
    }
}
