// lossweep: TLS Handshake Latency under Emulated and Real Network Impairment
// Copyright (C) 2025 The lossweep authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Hosts on which external commands are executed.
//!
//! All external collaborators (`tc`, `ip`, `ping`, the timing program, the web server) are reached
//! through the [`Exec`] trait, such that the same sweep logic can run on the local machine, inside
//! an emulated network namespace, or against a fake host in tests.

use std::{process::ExitStatus, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{with_deadline, SweepError, SweepResult};

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// A place where commands can be executed.
#[async_trait]
pub trait Exec: Send + Sync {
    /// Human-readable name used as a log prefix.
    fn name(&self) -> &str;

    /// Run `program` with `args` to completion and capture its output.
    async fn output(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput>;
}

/// Render a command line for logging and error messages.
pub fn render(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a command and require a zero exit status. Non-empty stderr is logged as a warning.
pub async fn run_checked(
    host: &dyn Exec,
    program: &str,
    args: &[&str],
    deadline: Duration,
) -> SweepResult<CommandOutput> {
    let command = render(program, args);
    with_deadline(format!("[{}] `{command}`", host.name()), deadline, async {
        let output = host.output(program, args).await?;
        if !output.stderr.trim().is_empty() {
            log::warn!("[{}] {command}: {}", host.name(), output.stderr.trim());
        }
        if output.success() {
            Ok(output)
        } else {
            Err(SweepError::CommandFailed {
                host: host.name().to_string(),
                command,
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    })
    .await
}

/// Run a command whose failure is expected in some states (e.g., deleting a qdisc that does not
/// exist). Any error is logged and swallowed. Returns whether the command succeeded.
pub async fn run_tolerated(host: &dyn Exec, program: &str, args: &[&str], deadline: Duration) -> bool {
    match run_checked(host, program, args, deadline).await {
        Ok(_) => true,
        Err(e) => {
            log::info!("[{}] ignoring failure: {e}", host.name());
            false
        }
    }
}

async fn capture(mut command: Command) -> std::io::Result<CommandOutput> {
    let output = command.kill_on_drop(true).output().await?;
    Ok(CommandOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Executes commands directly on this machine.
#[derive(Debug, Clone)]
pub struct LocalHost {
    name: String,
}

impl LocalHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new("local")
    }
}

#[async_trait]
impl Exec for LocalHost {
    fn name(&self) -> &str {
        &self.name
    }

    async fn output(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
        let mut command = Command::new(program);
        command.args(args);
        capture(command).await
    }
}

/// Executes commands inside a Linux network namespace using `ip netns exec`.
#[derive(Debug, Clone)]
pub struct NamespaceHost {
    namespace: String,
}

impl NamespaceHost {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl Exec for NamespaceHost {
    fn name(&self) -> &str {
        &self.namespace
    }

    async fn output(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
        let mut command = Command::new("ip");
        command
            .args(["netns", "exec", &self.namespace, program])
            .args(args);
        capture(command).await
    }
}
