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
//! Library for measuring TLS handshake latency under emulated and real network impairment.
//!
//! A [`sweep::Sweep`] iterates over latency tiers, algorithms and packet loss levels. For every
//! point, it reconfigures the [`impairment::Impairment`] of both directions of the path, runs the
//! external timing program through a [`measurement::Measure`], and appends one row to the result
//! file of the (algorithm, RTT) pair.

pub mod config;
pub mod error;
pub mod exec;
pub mod impairment;
pub mod measurement;
pub mod probe;
pub mod signal;
pub mod sweep;
pub mod topology;
pub mod util;
pub mod webserver;

pub mod prelude {
    pub use super::{
        config::{Deadlines, EndpointConfig, SweepPlan},
        error::{SweepError, SweepResult},
        exec::{Exec, LocalHost, NamespaceHost},
        impairment::{Impairment, ImpairmentProfile, InterfaceSetup, NetemController},
        measurement::{Measure, RunMode, TimingProgram},
        probe::{Prober, RttLabel},
        signal::{send_completion, CompletionListener, COMPLETION_TOKEN},
        sweep::{PathImpairment, RunSummary, Sweep},
        webserver::WebServer,
    };
}
