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
//! Connectivity checks and RTT baseline measurements using `ping`.

use std::{fmt, net::SocketAddr, time::Duration};

use lazy_static::lazy_static;
use lossweep_utils::other::filename_safe;
use regex::Regex;
use tokio::net::TcpStream;

use crate::{
    error::{with_deadline, SweepError, SweepResult},
    exec::{run_checked, Exec},
    util::status,
};

/// Number of echo requests used to measure the RTT baseline.
pub const RTT_PROBES: usize = 30;
/// Number of echo requests used for the reachability check.
pub const CONNECTION_PROBES: usize = 3;

lazy_static! {
    static ref PACKET_LOSS: Regex =
        Regex::new(r"(?P<loss>[0-9]+(\.[0-9]+)?)% packet loss").unwrap();
}

/// Average RTT measured once per latency tier, used to label result files.
#[derive(Debug, Clone, PartialEq)]
pub struct RttLabel {
    /// Average RTT as printed by `ping`, e.g. `31.730`.
    pub avg: String,
}

impl RttLabel {
    pub fn avg_ms(&self) -> f64 {
        self.avg.parse().unwrap_or(f64::NAN)
    }
}

impl fmt::Display for RttLabel {
    /// Filesystem-safe form, e.g. `31p730ms`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", filename_safe(&self.avg))
    }
}

/// Extract the average RTT from the statistics line of `ping`, e.g.
/// `rtt min/avg/max/mdev = 31.241/31.730/32.110/0.219 ms`.
pub fn parse_rtt_label(output: &str) -> Option<RttLabel> {
    let line = output.lines().find(|l| l.contains("rtt"))?;
    let avg = line.split('/').nth(4)?.trim();
    avg.parse::<f64>().ok()?;
    Some(RttLabel {
        avg: avg.to_string(),
    })
}

/// Extract the packet loss percentage reported by `ping`.
pub fn parse_packet_loss(output: &str) -> Option<f64> {
    PACKET_LOSS
        .captures(output)?
        .name("loss")?
        .as_str()
        .parse()
        .ok()
}

/// Probes a single target from a host.
pub struct Prober<'a> {
    host: &'a dyn Exec,
    target: String,
    deadline: Duration,
}

impl<'a> Prober<'a> {
    pub fn new(host: &'a dyn Exec, target: impl ToString, deadline: Duration) -> Self {
        Self {
            host,
            target: target.to_string(),
            deadline,
        }
    }

    /// Measure the RTT baseline with [`RTT_PROBES`] echo requests. There is no retry: without a
    /// baseline the experiment cannot continue.
    pub async fn probe_rtt(&self) -> SweepResult<RttLabel> {
        let count = RTT_PROBES.to_string();
        let output = run_checked(
            self.host,
            "ping",
            &[self.target.as_str(), "-c", count.as_str()],
            self.deadline,
        )
        .await?;
        log::trace!("[{}] ping output:\n{}", self.host.name(), output.stdout);
        let label = parse_rtt_label(&output.stdout)
            .ok_or_else(|| SweepError::RttUnavailable(self.target.clone()))?;
        log::info!("{} RTT measurement success! RTT: {label}", status(true));
        Ok(label)
    }

    /// Check that the target answers all of [`CONNECTION_PROBES`] echo requests.
    pub async fn check_connection(&self) -> SweepResult {
        log::info!("Testing connection between {} and {}...", self.host.name(), self.target);
        let count = CONNECTION_PROBES.to_string();
        let args = ["-c", count.as_str(), self.target.as_str()];
        // `ping` exits non-zero on loss, so look at the output instead of the status
        let output = with_deadline(format!("ping {}", self.target), self.deadline, async {
            Ok(self.host.output("ping", &args).await?)
        })
        .await?;
        match parse_packet_loss(&output.stdout) {
            Some(loss) if loss == 0.0 => {
                log::info!("{} Connection test passed: No packet loss.", status(true));
                Ok(())
            }
            Some(loss) => {
                log::error!("{} Connection test failed: Packet loss detected.", status(false));
                Err(SweepError::Unreachable(
                    self.target.clone(),
                    format!("{loss}% packet loss"),
                ))
            }
            None => {
                log::error!("{} Connection test failed: {}", status(false), output.stderr.trim());
                Err(SweepError::Unreachable(
                    self.target.clone(),
                    output.stderr.trim().to_string(),
                ))
            }
        }
    }
}

/// Check that a TCP service (e.g., the TLS server under test) accepts connections.
pub async fn check_service(addr: SocketAddr, deadline: Duration) -> SweepResult {
    let result = with_deadline(format!("connecting to {addr}"), deadline, async {
        Ok(TcpStream::connect(addr).await?)
    })
    .await;
    match result {
        Ok(_) => {
            log::info!("{} Service at {addr} is up.", status(true));
            Ok(())
        }
        Err(e) => {
            log::error!("{} Service at {addr} is not reachable: {e}", status(false));
            Err(SweepError::Unreachable(addr.to_string(), e.to_string()))
        }
    }
}
