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
//! Module that sweeps the grid of latencies, algorithms and packet loss levels and collects all
//! handshake timings into CSV files.
//!
//! For every latency tier, the RTT baseline is probed once (without packet loss) and used to
//! name the result files `{algorithm}_{rtt}ms.csv`. Each file receives one row per packet loss
//! level: `packet_loss, sample_1, ..., sample_n`.

use std::{
    collections::HashSet,
    fmt,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use itertools::iproduct;

use crate::{
    config::SweepPlan,
    error::SweepResult,
    impairment::{Impairment, ImpairmentProfile},
    measurement::{run_sweep_point, Measure, PointSamples, RunMode},
    probe::{Prober, RttLabel},
    util::{self, PathBufExt},
};

/// Source of the RTT baseline of a latency tier.
#[async_trait]
pub trait RttProbe: Send + Sync {
    async fn probe_rtt(&self) -> SweepResult<RttLabel>;
}

#[async_trait]
impl<'a> RttProbe for Prober<'a> {
    async fn probe_rtt(&self) -> SweepResult<RttLabel> {
        Prober::probe_rtt(self).await
    }
}

/// One direction of the measured path, together with its bandwidth limit.
#[derive(Clone)]
pub struct PathImpairment {
    pub impairment: Arc<dyn Impairment>,
    pub bandwidth_mbit: Option<u32>,
}

impl PathImpairment {
    pub fn new(impairment: Arc<dyn Impairment>, bandwidth_mbit: Option<u32>) -> Self {
        Self {
            impairment,
            bandwidth_mbit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Init,
    BaselineProbe,
    Configure,
    Measure,
    Record,
    Done,
}

impl fmt::Display for SweepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SweepState::Init => "INIT",
            SweepState::BaselineProbe => "BASELINE_PROBE",
            SweepState::Configure => "CONFIGURE",
            SweepState::Measure => "MEASURE",
            SweepState::Record => "RECORD",
            SweepState::Done => "DONE",
        };
        f.write_str(s)
    }
}

/// Result of one (algorithm, packet loss) combination of a latency tier.
#[derive(Debug, Clone)]
pub struct SweepPoint {
    pub algorithm: String,
    pub rtt: RttLabel,
    pub packet_loss: f64,
    pub result: PointSamples,
}

impl SweepPoint {
    /// CSV row: the packet loss followed by all samples.
    pub fn record(&self) -> Vec<String> {
        std::iter::once(self.packet_loss.to_string())
            .chain(self.result.samples.iter().map(f64::to_string))
            .collect()
    }
}

/// What a finished sweep produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// All result files, in the order they were written.
    pub files: Vec<PathBuf>,
    /// Number of rows written over all files.
    pub rows: usize,
    /// Number of timing invocations that yielded no samples.
    pub dropped_invocations: usize,
}

/// Result file for `algorithm` at the measured `rtt`.
pub fn result_file(data_dir: &Path, algorithm: &str, rtt: &RttLabel) -> PathBuf {
    data_dir.then(format!("{algorithm}_{rtt}.csv"))
}

/// The sweep orchestrator. Owns the lifecycle of the result files.
pub struct Sweep<'a> {
    plan: SweepPlan,
    /// Both directions of the path. `paths[i]` is configured before `paths[i + 1]`.
    paths: Vec<PathImpairment>,
    prober: &'a dyn RttProbe,
    measure: Arc<dyn Measure>,
    data_dir: PathBuf,
    mode: RunMode,
    state: SweepState,
}

impl<'a> Sweep<'a> {
    pub fn new(
        plan: SweepPlan,
        paths: Vec<PathImpairment>,
        prober: &'a dyn RttProbe,
        measure: Arc<dyn Measure>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            plan,
            paths,
            prober,
            measure,
            data_dir: data_dir.into(),
            mode: RunMode::Sequential,
            state: SweepState::Init,
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    fn transition(&mut self, state: SweepState) {
        log::trace!("sweep state {} -> {state}", self.state);
        self.state = state;
    }

    /// Apply `latency` and `packet_loss` to every direction of the path, in order. All
    /// directions are configured before this returns.
    async fn configure(&mut self, latency: &str, packet_loss: f64) -> SweepResult {
        self.transition(SweepState::Configure);
        for path in self.paths.iter() {
            let profile = ImpairmentProfile::new(latency, packet_loss).with_bandwidth(path.bandwidth_mbit);
            path.impairment.apply(&profile).await?;
        }
        Ok(())
    }

    /// Run the whole sweep. Any configuration or probing error aborts the sweep; dropped
    /// measurements only shorten the affected rows.
    pub async fn run(&mut self) -> SweepResult<RunSummary> {
        self.plan.validate()?;
        self.transition(SweepState::Init);
        fs::create_dir_all(&self.data_dir)?;
        log::info!(
            "Sweeping {} latencies x {} algorithms x {} packet loss levels into {:?}",
            self.plan.latencies.len(),
            self.plan.algorithms.len(),
            self.plan.packet_losses.len(),
            self.data_dir
        );

        let mut summary = RunSummary::default();
        let mut written = HashSet::new();
        let overall = util::progress_bar(self.plan.num_points() as u64, "Sweep");

        let latencies = self.plan.latencies.clone();
        let algorithms = self.plan.algorithms.clone();
        let packet_losses = self.plan.packet_losses.clone();

        for latency in latencies.iter() {
            // baseline without packet loss
            self.configure(latency, 0.0).await?;
            self.transition(SweepState::BaselineProbe);
            let rtt = self.prober.probe_rtt().await?;
            log::info!("Latency {latency}: measured RTT {:.3} ms ({rtt})", rtt.avg_ms());

            for algorithm in algorithms.iter() {
                let path = result_file(&self.data_dir, algorithm, &rtt);
                if !written.insert(path.clone()) {
                    log::warn!("Overwriting {path:?}, written earlier in this sweep");
                }
                let mut csv_writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .from_path(&path)?;

                for packet_loss in packet_losses.iter().copied() {
                    self.configure(latency, packet_loss).await?;

                    self.transition(SweepState::Measure);
                    let result = run_sweep_point(
                        self.measure.clone(),
                        algorithm,
                        self.plan.invocations,
                        self.plan.measurements_per_invocation,
                        self.mode,
                    )
                    .await?;
                    if result.dropped > 0 {
                        log::warn!(
                            "{algorithm} at {latency}, {packet_loss}% loss: dropped {} of {} invocations",
                            result.dropped,
                            self.plan.invocations
                        );
                    }

                    self.transition(SweepState::Record);
                    let point = SweepPoint {
                        algorithm: algorithm.clone(),
                        rtt: rtt.clone(),
                        packet_loss,
                        result,
                    };
                    csv_writer.write_record(point.record())?;
                    csv_writer.flush()?;
                    summary.rows += 1;
                    summary.dropped_invocations += point.result.dropped;
                    overall.inc(1);
                }
                csv_writer.flush()?;
                log::info!("Finished {path:?}");
                summary.files.push(path);
            }
        }

        overall.finish_and_clear();
        self.transition(SweepState::Done);
        log::info!(
            "Sweep done: {} files, {} rows, {} dropped invocations",
            summary.files.len(),
            summary.rows,
            summary.dropped_invocations
        );
        Ok(summary)
    }
}

/// All (latency, algorithm, packet loss) combinations of a plan, in sweep order.
pub fn grid(plan: &SweepPlan) -> impl Iterator<Item = (&String, &String, &f64)> {
    iproduct!(&plan.latencies, &plan.algorithms, &plan.packet_losses)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    use crate::{error::SweepError, measurement::test::FakeTimer};

    /// Records every applied profile, tagged with the name of the direction.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<(String, ImpairmentProfile)>>>,
        fail_on_loss: Option<f64>,
    }

    #[async_trait]
    impl Impairment for Recorder {
        fn describe(&self) -> String {
            self.name.to_string()
        }

        async fn install(&self) -> SweepResult {
            Ok(())
        }

        async fn apply(&self, profile: &ImpairmentProfile) -> SweepResult {
            if self.fail_on_loss == Some(profile.packet_loss_percent) {
                return Err(SweepError::Config("rejected".to_string()));
            }
            self.log
                .lock()
                .unwrap()
                .push((self.name.to_string(), profile.clone()));
            Ok(())
        }

        async fn reset(&self) {}
    }

    struct FixedRtt(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl RttProbe for FixedRtt {
        async fn probe_rtt(&self) -> SweepResult<RttLabel> {
            let avg = self.0.lock().unwrap().remove(0);
            Ok(RttLabel {
                avg: avg.to_string(),
            })
        }
    }

    fn plan() -> SweepPlan {
        SweepPlan {
            latencies: vec!["2.684ms".to_string(), "15.458ms".to_string()],
            algorithms: vec!["prime256v1".to_string(), "p256_kyber512".to_string()],
            packet_losses: vec![0.0, 1.0],
            invocations: 2,
            measurements_per_invocation: 2,
            client_bandwidth_mbit: 100,
            server_bandwidth_mbit: 20,
        }
    }

    fn paths(
        log: &Arc<Mutex<Vec<(String, ImpairmentProfile)>>>,
        fail_on_loss: Option<f64>,
    ) -> Vec<PathImpairment> {
        vec![
            PathImpairment::new(
                Arc::new(Recorder {
                    name: "client",
                    log: log.clone(),
                    fail_on_loss: None,
                }),
                Some(100),
            ),
            PathImpairment::new(
                Arc::new(Recorder {
                    name: "server",
                    log: log.clone(),
                    fail_on_loss,
                }),
                Some(20),
            ),
        ]
    }

    #[tokio::test]
    async fn test_sweep_files_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let prober = FixedRtt(Mutex::new(vec!["5.400", "31.730"]));
        let mut sweep = Sweep::new(
            plan(),
            paths(&log, None),
            &prober,
            Arc::new(FakeTimer::default()),
            dir.path().join("mn_data"),
        );
        let summary = sweep.run().await.unwrap();
        assert_eq!(sweep.state(), SweepState::Done);

        let names = summary
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "prime256v1_5p400ms.csv",
                "p256_kyber512_5p400ms.csv",
                "prime256v1_31p730ms.csv",
                "p256_kyber512_31p730ms.csv",
            ]
        );
        assert_eq!(summary.rows, 8);
        assert_eq!(summary.dropped_invocations, 0);

        // per latency: one baseline + (2 algorithms x 2 losses), both directions each
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2 * 2 * (1 + 2 * 2));
        assert_eq!(log[0].0, "client");
        assert_eq!(log[1].0, "server");
        assert_eq!(log[0].1.bandwidth_mbit, Some(100));
        assert_eq!(log[1].1.bandwidth_mbit, Some(20));
        assert_eq!(log[0].1.packet_loss_percent, 0.0);
        assert_eq!(log[4].1.packet_loss_percent, 1.0);
        assert_eq!(log[4].1.latency, "2.684ms");
        assert_eq!(log[10].1.latency, "15.458ms");
    }

    #[tokio::test]
    async fn test_sweep_aborts_on_impairment_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let prober = FixedRtt(Mutex::new(vec!["5.400", "31.730"]));
        let timer = Arc::new(FakeTimer::default());
        let mut sweep = Sweep::new(plan(), paths(&log, Some(1.0)), &prober, timer.clone(), dir.path());
        assert!(sweep.run().await.is_err());
        assert_eq!(sweep.state(), SweepState::Configure);
        // only the 0% point of the first algorithm was measured
        assert_eq!(
            timer.calls.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    #[test]
    fn test_record() {
        let point = SweepPoint {
            algorithm: "prime256v1".to_string(),
            rtt: RttLabel {
                avg: "31.730".to_string(),
            },
            packet_loss: 0.1,
            result: PointSamples {
                samples: vec![12.5, 13.0],
                dropped: 0,
            },
        };
        assert_eq!(point.record(), vec!["0.1", "12.5", "13"]);
    }

    #[test]
    fn test_grid_order() {
        let plan = plan();
        let grid = grid(&plan).collect::<Vec<_>>();
        assert_eq!(grid.len(), plan.num_points());
        assert_eq!(grid[0], (&plan.latencies[0], &plan.algorithms[0], &0.0));
        assert_eq!(grid[1], (&plan.latencies[0], &plan.algorithms[0], &1.0));
        assert_eq!(grid[2], (&plan.latencies[0], &plan.algorithms[1], &0.0));
    }
}
