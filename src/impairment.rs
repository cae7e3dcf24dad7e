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
//! Network impairment using `tc netem`.
//!
//! The impairment of a path is mutated in place: [`Impairment::apply`] re-issues a `change`
//! instruction on the root netem qdisc, and the most recently applied [`ImpairmentProfile`] is
//! the one in effect for all traffic leaving that interface.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    error::SweepResult,
    exec::{run_checked, run_tolerated, Exec},
};

/// Default netem queue limit, in packets.
pub const DEFAULT_QUEUE_LIMIT: u32 = 1000;

/// Parameters applied to one direction of a network path.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpairmentProfile {
    /// One-way delay as understood by netem, e.g. `15.458ms`.
    pub latency: String,
    /// Packet loss in percent. A value of zero omits the `loss` clause entirely.
    pub packet_loss_percent: f64,
    /// Rate ceiling in mbit.
    pub bandwidth_mbit: Option<u32>,
    /// Queue limit in packets.
    pub queue_limit: u32,
}

impl ImpairmentProfile {
    pub fn new(latency: impl Into<String>, packet_loss_percent: f64) -> Self {
        Self {
            latency: latency.into(),
            packet_loss_percent,
            bandwidth_mbit: None,
            queue_limit: DEFAULT_QUEUE_LIMIT,
        }
    }

    pub fn with_bandwidth(mut self, bandwidth_mbit: Option<u32>) -> Self {
        self.bandwidth_mbit = bandwidth_mbit;
        self
    }

    /// netem parameters, starting with `limit`.
    pub fn netem_args(&self) -> Vec<String> {
        let mut args = vec![
            "limit".to_string(),
            self.queue_limit.to_string(),
            "delay".to_string(),
            self.latency.clone(),
        ];
        if let Some(rate) = self.bandwidth_mbit {
            args.push("rate".to_string());
            args.push(format!("{rate}mbit"));
        }
        // some backends reject an explicit `loss 0%`
        if self.packet_loss_percent > 0.0 {
            args.push("loss".to_string());
            args.push(format!("{}%", self.packet_loss_percent));
        }
        args
    }
}

impl fmt::Display for ImpairmentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.netem_args().join(" "))
    }
}

/// Something that can shape one direction of a network path.
#[async_trait]
pub trait Impairment: Send + Sync {
    /// Human-readable identification of the shaped path.
    fn describe(&self) -> String;

    /// Install an (unconfigured) shaping rule, such that `apply` can change it afterwards.
    async fn install(&self) -> SweepResult;

    /// Replace the parameters of the shaping rule. Any failure is fatal for the experiment.
    async fn apply(&self, profile: &ImpairmentProfile) -> SweepResult;

    /// Remove the shaping rule. Removing a rule that does not exist is not an error.
    async fn reset(&self);
}

/// `tc netem` on the root qdisc of an interface of a host.
#[derive(Clone)]
pub struct NetemController {
    host: Arc<dyn Exec>,
    interface: String,
    deadline: Duration,
}

impl NetemController {
    pub fn new(host: Arc<dyn Exec>, interface: impl Into<String>, deadline: Duration) -> Self {
        Self {
            host,
            interface: interface.into(),
            deadline,
        }
    }

    /// Arguments to `tc` that change the root netem qdisc to `profile`.
    pub fn change_args(&self, profile: &ImpairmentProfile) -> Vec<String> {
        let mut args = ["qdisc", "change", "dev", self.interface.as_str(), "root", "netem"]
            .map(String::from)
            .to_vec();
        args.extend(profile.netem_args());
        args
    }
}

#[async_trait]
impl Impairment for NetemController {
    fn describe(&self) -> String {
        format!("{}:{}", self.host.name(), self.interface)
    }

    async fn install(&self) -> SweepResult {
        run_checked(
            self.host.as_ref(),
            "tc",
            &["qdisc", "add", "dev", self.interface.as_str(), "root", "netem"],
            self.deadline,
        )
        .await?;
        log::debug!("[{}] installed root netem qdisc", self.describe());
        Ok(())
    }

    async fn apply(&self, profile: &ImpairmentProfile) -> SweepResult {
        let args = self.change_args(profile);
        let args = args.iter().map(String::as_str).collect::<Vec<_>>();
        log::info!("[{}] tc {}", self.describe(), args.join(" "));
        run_checked(self.host.as_ref(), "tc", &args, self.deadline).await?;
        Ok(())
    }

    async fn reset(&self) {
        if !run_tolerated(
            self.host.as_ref(),
            "tc",
            &["qdisc", "del", "dev", self.interface.as_str(), "root"],
            self.deadline,
        )
        .await
        {
            log::info!("[{}] no existing qdisc to delete", self.describe());
        }
    }
}

/// Bring-up and bring-down of a physical interface for the two-host setup.
pub struct InterfaceSetup {
    host: Arc<dyn Exec>,
    interface: String,
    deadline: Duration,
}

impl InterfaceSetup {
    pub fn new(host: Arc<dyn Exec>, interface: impl Into<String>, deadline: Duration) -> Self {
        Self {
            host,
            interface: interface.into(),
            deadline,
        }
    }

    /// Bring the interface into a clean state. Every step may fail (the initial state is
    /// unknown), failures are reported as warnings only.
    pub async fn reset(&self) {
        let iface = self.interface.as_str();
        let steps: [(&str, Vec<&str>); 3] = [
            ("ip", vec!["link", "set", iface, "down"]),
            ("ip", vec!["addr", "flush", "dev", iface]),
            ("tc", vec!["qdisc", "del", "dev", iface, "root"]),
        ];
        for (program, args) in steps {
            match run_checked(self.host.as_ref(), program, &args, self.deadline).await {
                Ok(_) => log::info!("Reset step completed: {program} {}", args.join(" ")),
                Err(e) => log::warn!("Warning during reset: {e}"),
            }
        }
    }

    /// Reset the interface, bring it up with `cidr`, and optionally install a root netem
    /// qdisc. Every step after the reset is fatal.
    pub async fn configure(&self, cidr: &str, with_netem: bool) -> SweepResult {
        self.reset().await;
        let iface = self.interface.as_str();
        run_checked(
            self.host.as_ref(),
            "ip",
            &["link", "set", iface, "up"],
            self.deadline,
        )
        .await?;
        run_checked(
            self.host.as_ref(),
            "ip",
            &["addr", "add", cidr, "dev", iface],
            self.deadline,
        )
        .await?;
        if with_netem {
            NetemController::new(self.host.clone(), iface, self.deadline)
                .install()
                .await?;
        }
        log::info!("[{}] configured {iface} with {cidr}", self.host.name());
        Ok(())
    }
}
