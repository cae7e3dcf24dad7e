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
//! Experiment configuration: endpoint addresses, sweep plans and deadlines.

use std::{fs, net::Ipv4Addr, path::Path, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{SweepError, SweepResult};

/// Endpoint configuration shared by the client and the server of the two-host setup, loaded
/// once at process start from a JSON file such as
///
/// ```json
/// { "server_ip": "192.168.50.55", "client_ip": "192.168.50.54", "socket_port": 8000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub server_ip: Ipv4Addr,
    pub client_ip: Ipv4Addr,
    /// Port of the completion-signal listener on the server.
    pub socket_port: u16,
    /// Port of the TLS service under test, if it should be checked before measuring.
    #[serde(default, deserialize_with = "port_from_str_or_int")]
    pub tls_port: Option<u16>,
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_netmask")]
    pub netmask: u8,
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_netmask() -> u8 {
    24
}

/// The timing program reads `tls_port` as a string, so accept both `"4433"` and `4433`.
fn port_from_str_or_int<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Int(u16),
        Str(String),
    }
    match Option::<Port>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Port::Int(p)) => Ok(Some(p)),
        Some(Port::Str(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl EndpointConfig {
    pub fn load(path: impl AsRef<Path>) -> SweepResult<Self> {
        let path = path.as_ref();
        log::debug!("Loading endpoint configuration from {path:?}");
        let config: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        if config.netmask > 32 {
            return Err(SweepError::Config(format!(
                "netmask /{} is not a valid IPv4 prefix length",
                config.netmask
            )));
        }
        Ok(config)
    }

    pub fn server_cidr(&self) -> String {
        format!("{}/{}", self.server_ip, self.netmask)
    }

    pub fn client_cidr(&self) -> String {
        format!("{}/{}", self.client_ip, self.netmask)
    }
}

/// The grid of a sweep and the amount of work per sweep point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    /// One-way delay tiers, as understood by netem (e.g., `15.458ms`).
    pub latencies: Vec<String>,
    /// Algorithm identifiers passed to the timing program.
    pub algorithms: Vec<String>,
    /// Packet loss levels in percent, in the order they are measured.
    #[serde(default = "default_packet_losses")]
    pub packet_losses: Vec<f64>,
    /// Number of timing program invocations per sweep point.
    pub invocations: usize,
    /// Number of handshakes timed by each invocation.
    pub measurements_per_invocation: usize,
    /// Bandwidth of the client side (downlink), in mbit.
    #[serde(default = "default_bandwidth")]
    pub client_bandwidth_mbit: u32,
    /// Bandwidth of the server side (uplink), in mbit.
    #[serde(default = "default_bandwidth")]
    pub server_bandwidth_mbit: u32,
}

fn default_bandwidth() -> u32 {
    1000
}

/// `0, 0.1, 0.5, 1, 1.5, 2, 2.5, 3` followed by every integer from 4 to 20.
pub fn default_packet_losses() -> Vec<f64> {
    [0.0, 0.1, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0]
        .into_iter()
        .chain((4..=20).map(f64::from))
        .collect()
}

impl SweepPlan {
    /// Key exchange experiment: all key exchange algorithms, symmetric 1000 mbit link, 50
    /// parallel-friendly invocations of 100 handshakes.
    pub fn key_exchange() -> Self {
        Self {
            latencies: ["2.684ms", "15.458ms", "39.224ms", "97.73ms"]
                .map(String::from)
                .to_vec(),
            algorithms: [
                "prime256v1",
                "p256_kyber512_90s",
                "p256_frodo640aes",
                "p256_sikep434",
            ]
            .map(String::from)
            .to_vec(),
            packet_losses: default_packet_losses(),
            invocations: 50,
            measurements_per_invocation: 100,
            client_bandwidth_mbit: 1000,
            server_bandwidth_mbit: 1000,
        }
    }

    /// Signature experiment for a single algorithm: 100 mbit downlink, 20 mbit uplink, and an
    /// additional high-latency tier.
    pub fn signature(algorithm: impl Into<String>) -> Self {
        Self {
            latencies: ["2.684ms", "15.458ms", "39.224ms", "97.73ms", "297.73ms"]
                .map(String::from)
                .to_vec(),
            algorithms: vec![algorithm.into()],
            packet_losses: default_packet_losses(),
            invocations: 10,
            measurements_per_invocation: 100,
            client_bandwidth_mbit: 100,
            server_bandwidth_mbit: 20,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> SweepResult<Self> {
        let plan: Self = serde_json::from_str(&fs::read_to_string(path.as_ref())?)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Check that the plan describes a non-empty grid with valid values.
    pub fn validate(&self) -> SweepResult<()> {
        if self.latencies.is_empty() || self.algorithms.is_empty() || self.packet_losses.is_empty()
        {
            return Err(SweepError::Config(
                "latencies, algorithms and packet_losses must not be empty".to_string(),
            ));
        }
        if let Some(p) = self
            .packet_losses
            .iter()
            .find(|p| !p.is_finite() || **p < 0.0 || **p > 100.0)
        {
            return Err(SweepError::Config(format!("invalid packet loss {p}%")));
        }
        if let Some(dup) = self.algorithms.iter().duplicates().next() {
            return Err(SweepError::Config(format!("algorithm {dup} listed twice")));
        }
        if self.invocations == 0 || self.measurements_per_invocation == 0 {
            return Err(SweepError::Config(
                "invocations and measurements_per_invocation must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Expected number of samples per row if no invocation is dropped.
    pub fn samples_per_point(&self) -> usize {
        self.invocations * self.measurements_per_invocation
    }

    /// Total number of sweep points (rows) of the whole experiment.
    pub fn num_points(&self) -> usize {
        self.latencies.len() * self.algorithms.len() * self.packet_losses.len()
    }
}

/// Upper bounds for every blocking operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Configuration commands (`tc`, `ip`, web server start).
    pub command: Duration,
    /// A single invocation of the timing program.
    pub measurement: Duration,
    /// Connectivity and RTT probes.
    pub probe: Duration,
    /// Accepting and reading a completion signal.
    pub signal: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(120),
            measurement: Duration::from_secs(600),
            probe: Duration::from_secs(120),
            signal: Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_packet_losses() {
        let losses = default_packet_losses();
        assert_eq!(losses.len(), 8 + 17);
        assert_eq!(losses[..3], [0.0, 0.1, 0.5]);
        assert_eq!(losses[8], 4.0);
        assert_eq!(*losses.last().unwrap(), 20.0);
    }

    #[test]
    fn test_endpoint_config() {
        let config: EndpointConfig = serde_json::from_str(
            r#"{"server_ip": "192.168.50.55", "client_ip": "192.168.50.54", "socket_port": 8000, "tls_port": "4433"}"#,
        )
        .unwrap();
        assert_eq!(config.server_ip, Ipv4Addr::new(192, 168, 50, 55));
        assert_eq!(config.socket_port, 8000);
        assert_eq!(config.tls_port, Some(4433));
        assert_eq!(config.interface, "eth0");
        assert_eq!(config.server_cidr(), "192.168.50.55/24");
        assert_eq!(config.client_cidr(), "192.168.50.54/24");
    }

    #[test]
    fn test_endpoint_config_missing_key() {
        let result: Result<EndpointConfig, _> =
            serde_json::from_str(r#"{"server_ip": "192.168.50.55", "socket_port": 8000}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_plan_validation() {
        assert!(SweepPlan::key_exchange().validate().is_ok());
        assert!(SweepPlan::signature("dilithium2").validate().is_ok());

        let mut plan = SweepPlan::key_exchange();
        plan.packet_losses.push(-1.0);
        assert!(plan.validate().is_err());

        let mut plan = SweepPlan::key_exchange();
        plan.algorithms.push("prime256v1".to_string());
        assert!(plan.validate().is_err());

        let mut plan = SweepPlan::signature("dilithium2");
        plan.invocations = 0;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_plan_from_json() {
        let plan: SweepPlan = serde_json::from_str(
            r#"{"latencies": ["15.458ms"], "algorithms": ["prime256v1"], "invocations": 2, "measurements_per_invocation": 3}"#,
        )
        .unwrap();
        assert_eq!(plan.packet_losses, default_packet_losses());
        assert_eq!(plan.samples_per_point(), 6);
        assert_eq!(plan.num_points(), 25);
        assert_eq!(plan.client_bandwidth_mbit, 1000);
    }
}
