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
//! End-to-end sweeps with fake impairment and RTT backends, using real processes as timing
//! program.
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use lossweep::{
    measurement::run_batch,
    prelude::*,
    sweep::{RttProbe, SweepState},
};
use lossweep_utils::results::{read_result_file, split_file_name};

/// Remembers the last applied profile, like the kernel does.
#[derive(Default)]
struct InMemoryPath {
    current: Mutex<Option<ImpairmentProfile>>,
    applied: Mutex<usize>,
}

#[async_trait]
impl Impairment for InMemoryPath {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn install(&self) -> SweepResult {
        Ok(())
    }

    async fn apply(&self, profile: &ImpairmentProfile) -> SweepResult {
        *self.current.lock().unwrap() = Some(profile.clone());
        *self.applied.lock().unwrap() += 1;
        Ok(())
    }

    async fn reset(&self) {
        *self.current.lock().unwrap() = None;
    }
}

struct StaticRtt(&'static str);

#[async_trait]
impl RttProbe for StaticRtt {
    async fn probe_rtt(&self) -> SweepResult<RttLabel> {
        Ok(RttLabel {
            avg: self.0.to_string(),
        })
    }
}

/// Write an executable shell script that prints `$2` comma-separated samples with a trailing
/// separator, like the real timing program.
fn timing_script(dir: &Path) -> PathBuf {
    let path = dir.join("s_timer.sh");
    fs::write(
        &path,
        "#!/bin/sh\ni=0\nwhile [ \"$i\" -lt \"$2\" ]; do printf '%s.5,' \"$i\"; i=$((i+1)); done\nprintf '\\n'\n",
    )
    .unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn plan(packet_losses: Vec<f64>, invocations: usize, count: usize) -> SweepPlan {
    SweepPlan {
        latencies: vec!["15.458ms".to_string()],
        algorithms: vec!["prime256v1".to_string()],
        packet_losses,
        invocations,
        measurements_per_invocation: count,
        client_bandwidth_mbit: 1000,
        server_bandwidth_mbit: 1000,
    }
}

#[tokio::test]
async fn sweep_writes_one_row_per_loss_level() {
    let dir = tempfile::tempdir().unwrap();
    let script = timing_script(dir.path());
    let timer = TimingProgram::new(
        Arc::new(LocalHost::default()),
        script.to_string_lossy(),
        Duration::from_secs(10),
    );
    let client = Arc::new(InMemoryPath::default());
    let server = Arc::new(InMemoryPath::default());
    let prober = StaticRtt("31.730");

    let mut sweep = Sweep::new(
        plan(vec![0.0, 0.1, 1.0], 2, 3),
        vec![
            PathImpairment::new(client.clone(), Some(1000)),
            PathImpairment::new(server.clone(), Some(1000)),
        ],
        &prober,
        Arc::new(timer),
        dir.path().join("mn_data"),
    );
    let summary = sweep.run().await.unwrap();
    assert_eq!(sweep.state(), SweepState::Done);
    assert_eq!(summary.files.len(), 1);
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.dropped_invocations, 0);

    let file = &summary.files[0];
    assert_eq!(
        split_file_name(file),
        Some(("prime256v1".to_string(), "31p730ms".to_string()))
    );

    let rows = read_result_file(file).unwrap();
    assert_eq!(rows.len(), 3);
    for (row, loss) in rows.iter().zip([0.0, 0.1, 1.0]) {
        assert_eq!(row.packet_loss, loss);
        // 1 + 2 x 3 columns
        assert_eq!(row.samples.len(), 6);
        assert_eq!(row.samples, vec![0.5, 1.5, 2.5, 0.5, 1.5, 2.5]);
    }

    // the last applied profile stays in effect
    let last = client.current.lock().unwrap().clone().unwrap();
    assert_eq!(last.packet_loss_percent, 1.0);
    assert_eq!(last.latency, "15.458ms");
    // baseline + one per loss level
    assert_eq!(*server.applied.lock().unwrap(), 4);
}

#[tokio::test]
async fn failed_invocations_shorten_rows() {
    let dir = tempfile::tempdir().unwrap();
    // `echo` prints its arguments instead of samples
    let timer = TimingProgram::new(
        Arc::new(LocalHost::default()),
        "echo",
        Duration::from_secs(10),
    );
    let prober = StaticRtt("2.1");
    let mut sweep = Sweep::new(
        plan(vec![0.0, 5.0], 3, 2),
        vec![PathImpairment::new(Arc::new(InMemoryPath::default()), None)],
        &prober,
        Arc::new(timer),
        dir.path(),
    )
    .with_mode(RunMode::Pool(2));
    let summary = sweep.run().await.unwrap();
    assert_eq!(summary.dropped_invocations, 6);

    let rows = read_result_file(&summary.files[0]).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.samples.is_empty()));
    assert_eq!(rows[1].packet_loss, 5.0);
}

#[tokio::test]
async fn missing_timing_program_yields_empty_batch() {
    let timer = TimingProgram::new(
        Arc::new(LocalHost::default()),
        "/nonexistent/s_timer.o",
        Duration::from_secs(10),
    );
    assert!(run_batch(&timer, "prime256v1", 10).await.is_empty());
}

#[tokio::test]
async fn client_signals_both_phases() {
    let listener = CompletionListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { listener.wait(2, Duration::from_secs(10)).await });

    // probing phase, then a (tiny) measurement phase, like the client binary
    send_completion(addr, Duration::from_secs(10)).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let script = timing_script(dir.path());
    let prober = StaticRtt("31.730");
    let mut sweep = Sweep::new(
        plan(vec![0.0], 1, 1),
        vec![PathImpairment::new(Arc::new(InMemoryPath::default()), Some(100))],
        &prober,
        Arc::new(TimingProgram::new(
            Arc::new(LocalHost::default()),
            script.to_string_lossy(),
            Duration::from_secs(10),
        )),
        dir.path(),
    );
    sweep.run().await.unwrap();
    send_completion(addr, Duration::from_secs(10)).await.unwrap();

    let report = server.await.unwrap().unwrap();
    assert!(report.is_complete());
    assert_eq!(report.verified, 2);
}
