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
//! Invocation of the external handshake timing program.
//!
//! The timing program is called as `<program> <algorithm> <count>` and prints a single line of
//! comma-separated handshake durations in milliseconds, possibly with a trailing separator and
//! platform-specific line endings.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
    error::SweepResult,
    exec::{run_checked, Exec},
    util,
};

/// Samples (in ms) produced by one invocation of the timing program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementBatch(pub Vec<f64>);

impl MeasurementBatch {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parse the output of one invocation. Empty tokens are discarded. Returns `None` if any token
/// is not a number or if the number of samples differs from `expected`.
pub fn parse_batch(raw: &str, expected: usize) -> Option<MeasurementBatch> {
    let samples = raw
        .replace(['\r', '\n'], "")
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| token.parse::<f64>().ok())
        .collect::<Option<Vec<f64>>>()?;
    (samples.len() == expected).then_some(MeasurementBatch(samples))
}

/// Source of raw handshake timings.
#[async_trait]
pub trait Measure: Send + Sync {
    /// Time `count` handshakes using `algorithm` and return the raw output.
    async fn measure(&self, algorithm: &str, count: usize) -> SweepResult<String>;
}

/// The external timing program, executed on a host.
pub struct TimingProgram {
    host: Arc<dyn Exec>,
    program: String,
    deadline: Duration,
}

impl TimingProgram {
    pub fn new(host: Arc<dyn Exec>, program: impl Into<String>, deadline: Duration) -> Self {
        Self {
            host,
            program: program.into(),
            deadline,
        }
    }
}

#[async_trait]
impl Measure for TimingProgram {
    async fn measure(&self, algorithm: &str, count: usize) -> SweepResult<String> {
        let count = count.to_string();
        let output = run_checked(
            self.host.as_ref(),
            &self.program,
            &[algorithm, count.as_str()],
            self.deadline,
        )
        .await?;
        Ok(output.stdout)
    }
}

/// Run the timing program once. A failed invocation or malformed output yields an empty batch
/// instead of an error.
pub async fn run_batch(measure: &dyn Measure, algorithm: &str, count: usize) -> MeasurementBatch {
    match measure.measure(algorithm, count).await {
        Ok(raw) => parse_batch(&raw, count).unwrap_or_else(|| {
            log::warn!(
                "Dropping malformed output of {algorithm} (expected {count} samples): {:?}",
                raw.trim()
            );
            MeasurementBatch::default()
        }),
        Err(e) => {
            log::warn!("Dropping invocation of {algorithm}: {e}");
            MeasurementBatch::default()
        }
    }
}

/// How the invocations of one sweep point are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// One invocation after the other.
    #[default]
    Sequential,
    /// At most `n` invocations at the same time.
    Pool(usize),
}

/// All samples of one sweep point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSamples {
    /// Samples of all successful invocations, in invocation order.
    pub samples: Vec<f64>,
    /// Number of invocations that did not yield any sample.
    pub dropped: usize,
}

impl PointSamples {
    fn collect(batches: impl IntoIterator<Item = MeasurementBatch>) -> Self {
        let mut point = Self::default();
        for batch in batches {
            if batch.is_empty() {
                point.dropped += 1;
            }
            point.samples.extend(batch.0);
        }
        point
    }
}

/// Invoke the timing program `invocations` times and concatenate all samples in invocation
/// order. The impairment of the path must be in place before calling this function.
pub async fn run_sweep_point(
    measure: Arc<dyn Measure>,
    algorithm: &str,
    invocations: usize,
    count: usize,
    mode: RunMode,
) -> SweepResult<PointSamples> {
    let bar = util::progress_bar(invocations as u64, "Running timers");
    let batches = match mode {
        RunMode::Sequential => {
            let mut batches = Vec::with_capacity(invocations);
            for _ in 0..invocations {
                batches.push(run_batch(measure.as_ref(), algorithm, count).await);
                bar.inc(1);
            }
            batches
        }
        RunMode::Pool(size) => {
            let permits = Arc::new(Semaphore::new(size.max(1)));
            // dropping the set aborts all invocations still running
            let mut jobs = JoinSet::new();
            for i in 0..invocations {
                let measure = measure.clone();
                let permits = permits.clone();
                let algorithm = algorithm.to_string();
                let bar = bar.clone();
                jobs.spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    let batch = run_batch(measure.as_ref(), &algorithm, count).await;
                    bar.inc(1);
                    (i, batch)
                });
            }
            let mut batches = (0..invocations)
                .map(|_| MeasurementBatch::default())
                .collect::<Vec<_>>();
            while let Some(job) = jobs.join_next().await {
                let (i, batch) = job?;
                batches[i] = batch;
            }
            batches
        }
    };
    bar.finish_and_clear();
    Ok(PointSamples::collect(batches))
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use crate::error::SweepError;

    /// Fake timing program: invocation `i` returns `count` samples `i.0, i.1, ...`. Invocations
    /// listed in `fail` return garbage instead. With `slower_first`, invocation `i` sleeps
    /// `(16 - i) * slower_first`, so earlier invocations finish last.
    #[derive(Default)]
    pub(crate) struct FakeTimer {
        pub(crate) calls: AtomicUsize,
        pub(crate) fail: Vec<usize>,
        pub(crate) trailing_separator: bool,
        pub(crate) slower_first: Option<Duration>,
        pub(crate) finished: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Measure for FakeTimer {
        async fn measure(&self, _algorithm: &str, count: usize) -> SweepResult<String> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(step) = self.slower_first {
                tokio::time::sleep(step * 16u32.saturating_sub(i as u32)).await;
            }
            self.finished.lock().unwrap().push(i);
            if self.fail.contains(&i) {
                return Ok("SSL_connect failed\n".to_string());
            }
            let mut out = (0..count)
                .map(|j| format!("{i}.{j}"))
                .collect::<Vec<_>>()
                .join(",");
            if self.trailing_separator {
                out.push(',');
            }
            out.push_str("\r\n");
            Ok(out)
        }
    }

    struct Broken;

    /// Invocation 0 panics, all others take long and count their completions.
    #[derive(Default)]
    struct PanicsFirst {
        calls: AtomicUsize,
        completed: AtomicUsize,
    }

    #[async_trait]
    impl Measure for PanicsFirst {
        async fn measure(&self, _algorithm: &str, count: usize) -> SweepResult<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("timer crashed");
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["1.0"; count].join(","))
        }
    }

    #[async_trait]
    impl Measure for Broken {
        async fn measure(&self, algorithm: &str, _count: usize) -> SweepResult<String> {
            Err(SweepError::Timeout(algorithm.to_string(), Duration::from_secs(1)))
        }
    }

    #[test]
    fn test_parse_batch() {
        assert_eq!(
            parse_batch("1.5,2.25,3\r\n", 3),
            Some(MeasurementBatch(vec![1.5, 2.25, 3.0]))
        );
        assert_eq!(
            parse_batch("1.5,2.25,3,\n", 3),
            Some(MeasurementBatch(vec![1.5, 2.25, 3.0]))
        );
    }

    #[test]
    fn test_parse_batch_all_or_nothing() {
        // wrong count
        assert_eq!(parse_batch("1.5,2.25\n", 3), None);
        // garbage token
        assert_eq!(parse_batch("1.5,oops,3\n", 3), None);
        assert_eq!(parse_batch("", 3), None);
    }

    #[tokio::test]
    async fn test_run_batch_lenient() {
        let timer = FakeTimer {
            fail: vec![0],
            ..Default::default()
        };
        assert!(run_batch(&timer, "prime256v1", 4).await.is_empty());
        assert_eq!(run_batch(&timer, "prime256v1", 4).await.len(), 4);
        assert!(run_batch(&Broken, "prime256v1", 4).await.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_point_sequential() {
        let timer = Arc::new(FakeTimer {
            trailing_separator: true,
            ..Default::default()
        });
        let point = run_sweep_point(timer.clone(), "prime256v1", 3, 2, RunMode::Sequential)
            .await
            .unwrap();
        assert_eq!(point.samples, vec![0.0, 0.1, 1.0, 1.1, 2.0, 2.1]);
        assert_eq!(point.dropped, 0);
        assert_eq!(timer.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_sweep_point_counts_drops() {
        let timer = Arc::new(FakeTimer {
            fail: vec![1],
            ..Default::default()
        });
        let point = run_sweep_point(timer, "prime256v1", 3, 2, RunMode::Sequential)
            .await
            .unwrap();
        assert_eq!(point.samples, vec![0.0, 0.1, 2.0, 2.1]);
        assert_eq!(point.dropped, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sweep_point_pool() {
        let timer = Arc::new(FakeTimer::default());
        let point = run_sweep_point(timer, "prime256v1", 8, 5, RunMode::Pool(4))
            .await
            .unwrap();
        assert_eq!(point.samples.len(), 8 * 5);
        assert_eq!(point.dropped, 0);
        // every invocation stays a contiguous chunk
        for chunk in point.samples.chunks(5) {
            let first = chunk[0].trunc();
            assert!(chunk.iter().all(|s| s.trunc() == first));
        }
    }

    #[tokio::test]
    async fn test_sweep_point_pool_keeps_invocation_order() {
        let timer = Arc::new(FakeTimer {
            slower_first: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let point = run_sweep_point(timer.clone(), "prime256v1", 4, 2, RunMode::Pool(4))
            .await
            .unwrap();
        // invocations complete in reverse, but the samples are in invocation order
        assert_eq!(*timer.finished.lock().unwrap(), vec![3, 2, 1, 0]);
        assert_eq!(
            point.samples,
            vec![0.0, 0.1, 1.0, 1.1, 2.0, 2.1, 3.0, 3.1]
        );
        assert_eq!(point.dropped, 0);
    }

    #[tokio::test]
    async fn test_sweep_point_pool_aborts_on_failure() {
        let timer = Arc::new(PanicsFirst::default());
        let err = run_sweep_point(timer.clone(), "prime256v1", 4, 2, RunMode::Pool(4))
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::Join(_)));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(timer.completed.load(Ordering::SeqCst), 0);
    }
}
