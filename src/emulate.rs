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
//! Single-machine experiment: emulates the client/server link with two network namespaces,
//! starts the web server in the server namespace and sweeps the impairment grid.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use clap::{Parser, ValueEnum};

use lossweep_utils::{other::get_timestamp, results::list_result_files};

use lossweep::{
    prelude::*,
    sweep::grid,
    topology::{EmulatedLink, SERVER_IP},
    util::{self, PathBufExt},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Experiment {
    /// All key exchange algorithms over a symmetric 1000 mbit link.
    Kex,
    /// A single signature algorithm over a 100/20 mbit link.
    Sig,
}

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Path to the nginx executable.
    nginx_path: String,
    /// nginx configuration, passed with `-c`.
    nginx_conf_dir: String,
    /// Which experiment to run.
    #[arg(short, long, value_enum, default_value_t = Experiment::Kex)]
    experiment: Experiment,
    /// Signature algorithm (required for `--experiment sig`).
    #[arg(short, long, required_if_eq("experiment", "sig"))]
    algorithm: Option<String>,
    /// Load the sweep plan from a JSON file instead of using the experiment's defaults.
    #[arg(short, long)]
    plan: Option<PathBuf>,
    /// Root of the output directory. Results go to `<data-root>/<experiment>/`.
    #[arg(short, long, default_value = "mn_data")]
    data_root: PathBuf,
    /// The handshake timing program.
    #[arg(short, long, default_value = "./s_timer.o")]
    timer: String,
    /// Number of parallel timing invocations. 0 runs them sequentially. Defaults to 4 for `kex`
    /// and 0 for `sig`.
    #[arg(long)]
    pool: Option<usize>,
    /// Prefix of the network namespaces, at most 8 characters.
    #[arg(long, default_value = "lsw")]
    namespace_prefix: String,
    /// Maximum duration of a single timing invocation, in seconds.
    #[arg(long, default_value_t = 600)]
    measurement_timeout: u64,
    /// Write into a fresh `<experiment>_<timestamp>` directory instead of `<experiment>`.
    #[arg(long)]
    timestamped: bool,
    /// Only print the sweep grid.
    #[arg(long)]
    dry_run: bool,
}

fn warn_existing_results(data_dir: &Path) {
    if let Ok(files) = list_result_files(data_dir) {
        if !files.is_empty() {
            log::warn!(
                "{data_dir:?} already contains {} result files, matching ones will be overwritten",
                files.len()
            );
        }
    }
}

fn run_mode(pool: usize) -> RunMode {
    if pool == 0 {
        RunMode::Sequential
    } else {
        RunMode::Pool(pool)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    util::init_logging();
    let args = Args::parse();

    let (mut plan, default_pool, subdir) = match args.experiment {
        Experiment::Kex => (SweepPlan::key_exchange(), 4, "kex"),
        Experiment::Sig => (
            SweepPlan::signature(args.algorithm.clone().unwrap_or_default()),
            0,
            "sig",
        ),
    };
    if let Some(path) = args.plan.as_ref() {
        plan = SweepPlan::load(path).with_context(|| format!("Cannot load plan {path:?}"))?;
    }
    plan.validate()?;

    if args.dry_run {
        for (latency, algorithm, packet_loss) in grid(&plan) {
            println!("{latency},{algorithm},{packet_loss}");
        }
        return Ok(());
    }

    let deadlines = Deadlines {
        measurement: Duration::from_secs(args.measurement_timeout),
        ..Default::default()
    };
    let data_dir = if args.timestamped {
        args.data_root
            .as_path()
            .then(format!("{subdir}_{}", get_timestamp()))
    } else {
        args.data_root.as_path().then(subdir)
    };
    warn_existing_results(&data_dir);
    let mode = run_mode(args.pool.unwrap_or(default_pool));

    let link = EmulatedLink::create(&args.namespace_prefix, deadlines.command)
        .await
        .context("Cannot create the emulated link")?;
    let client_netem = Arc::new(NetemController::new(
        link.client.clone(),
        link.client_iface.clone(),
        deadlines.command,
    ));
    let server_netem = Arc::new(NetemController::new(
        link.server.clone(),
        link.server_iface.clone(),
        deadlines.command,
    ));
    let webserver = WebServer::new(
        link.server.clone(),
        &args.nginx_path,
        &args.nginx_conf_dir,
        deadlines.command,
    );

    let result = tokio::select! {
        result = async {
            client_netem.install().await?;
            server_netem.install().await?;

            let prober = Prober::new(link.client.as_ref(), SERVER_IP, deadlines.probe);
            prober.check_connection().await?;
            webserver.start().await?;

            let timer = TimingProgram::new(link.client.clone(), &args.timer, deadlines.measurement);
            let paths = vec![
                PathImpairment::new(client_netem.clone(), Some(plan.client_bandwidth_mbit)),
                PathImpairment::new(server_netem.clone(), Some(plan.server_bandwidth_mbit)),
            ];
            Sweep::new(plan, paths, &prober, Arc::new(timer), &data_dir)
                .with_mode(mode)
                .run()
                .await
        } => result.map_err(anyhow::Error::from),
        // dropping the sweep aborts timing invocations that are still running
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("Interrupted")),
    };

    // cleanup, also after an error
    webserver.stop().await;
    client_netem.reset().await;
    server_netem.reset().await;
    drop(link);

    let summary = result?;
    for file in summary.files.iter() {
        println!("{}", file.display());
    }
    Ok(())
}
