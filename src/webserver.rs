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
//! The TLS web server the timing program connects to (nginx built with post-quantum support).

use std::{sync::Arc, time::Duration};

use crate::{
    error::SweepResult,
    exec::{run_checked, run_tolerated, Exec},
};

pub struct WebServer {
    host: Arc<dyn Exec>,
    binary: String,
    conf: String,
    deadline: Duration,
}

impl WebServer {
    pub fn new(
        host: Arc<dyn Exec>,
        binary: impl Into<String>,
        conf: impl Into<String>,
        deadline: Duration,
    ) -> Self {
        Self {
            host,
            binary: binary.into(),
            conf: conf.into(),
            deadline,
        }
    }

    /// Start the server daemon with its configuration. A failure is fatal.
    pub async fn start(&self) -> SweepResult {
        run_checked(
            self.host.as_ref(),
            &self.binary,
            &["-c", self.conf.as_str()],
            self.deadline,
        )
        .await?;
        log::info!("[{}] started {} -c {}", self.host.name(), self.binary, self.conf);
        Ok(())
    }

    /// Stop all running server processes. Nothing to stop is not an error.
    pub async fn stop(&self) {
        if run_tolerated(self.host.as_ref(), "pkill", &["nginx"], self.deadline).await {
            log::info!("[{}] stopped existing nginx processes", self.host.name());
        } else {
            log::info!("[{}] no existing nginx processes found", self.host.name());
        }
    }
}
