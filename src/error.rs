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
//! Error types shared by all experiment components.

use std::{process::ExitStatus, time::Duration};

/// Result type used throughout the crate.
pub type SweepResult<T = ()> = Result<T, SweepError>;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Join Error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("[{host}] `{command}` exited with {status}: {stderr}")]
    CommandFailed {
        host: String,
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{0} did not finish within {1:?}")]
    Timeout(String, Duration),
    #[error("Cannot extract the average RTT from the ping output towards {0}")]
    RttUnavailable(String),
    #[error("{0} is not reachable: {1}")]
    Unreachable(String, String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SweepError {
    /// Whether this error is a missed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SweepError::Timeout(..))
    }
}

/// Await `fut`, failing with [`SweepError::Timeout`] if it takes longer than `deadline`.
pub async fn with_deadline<T, F>(what: impl Into<String>, deadline: Duration, fut: F) -> SweepResult<T>
where
    F: std::future::Future<Output = SweepResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(SweepError::Timeout(what.into(), deadline)),
    }
}
