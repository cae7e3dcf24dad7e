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
//! Client side of the two-host experiment: shapes the local interface, measures the RTT to the
//! server, sweeps the impairment grid against the real network and reports each finished phase
//! to the server.
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;

use lossweep::{
    prelude::*,
    probe::check_service,
    util::{self, PathBufExt},
};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Endpoint configuration file.
    #[arg(short, long, default_value = "../config.json")]
    config: PathBuf,
    /// Measure a single signature algorithm instead of all key exchange algorithms.
    #[arg(short = 's', long)]
    signature: Option<String>,
    /// Load the sweep plan from a JSON file.
    #[arg(short, long)]
    plan: Option<PathBuf>,
    /// Output directory.
    #[arg(short, long, default_value = "data")]
    data_root: PathBuf,
    /// The handshake timing program.
    #[arg(short, long, default_value = "./s_timer.o")]
    timer: String,
    /// Number of parallel timing invocations. 0 runs them sequentially.
    #[arg(long, default_value_t = 0)]
    pool: usize,
    /// Do not reset and configure the network interface.
    #[arg(long)]
    skip_interface_setup: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    util::init_logging();
    let args = Args::parse();
    let config = EndpointConfig::load(&args.config)
        .with_context(|| format!("Cannot load endpoint configuration {:?}", args.config))?;
    let deadlines = Deadlines::default();

    let (plan, subdir) = match (&args.plan, &args.signature) {
        (Some(path), _) => (SweepPlan::load(path)?, "custom"),
        (None, Some(alg)) => (SweepPlan::signature(alg), "sig"),
        (None, None) => (SweepPlan::key_exchange(), "kex"),
    };
    plan.validate()?;

    let host: Arc<dyn Exec> = Arc::new(LocalHost::new("client"));
    if !args.skip_interface_setup {
        InterfaceSetup::new(host.clone(), &config.interface, deadlines.command)
            .configure(&config.client_cidr(), true)
            .await
            .context("Cannot configure the network interface")?;
    }

    let prober = Prober::new(host.as_ref(), config.server_ip, deadlines.probe);
    prober.check_connection().await?;
    let rtt = prober.probe_rtt().await?;
    log::info!("Baseline RTT towards {}: {rtt}", config.server_ip);
    if let Some(port) = config.tls_port {
        check_service(SocketAddr::from((config.server_ip, port)), deadlines.probe).await?;
    }

    let signal_addr = SocketAddr::from((config.server_ip, config.socket_port));
    // first phase: network probing
    send_completion(signal_addr, deadlines.signal).await?;

    let netem = Arc::new(NetemController::new(
        host.clone(),
        &config.interface,
        deadlines.command,
    ));
    let timer = TimingProgram::new(host.clone(), &args.timer, deadlines.measurement);
    let mode = if args.pool == 0 {
        RunMode::Sequential
    } else {
        RunMode::Pool(args.pool)
    };
    let paths = vec![PathImpairment::new(
        netem.clone(),
        Some(plan.client_bandwidth_mbit),
    )];
    let result = Sweep::new(
        plan,
        paths,
        &prober,
        Arc::new(timer),
        args.data_root.as_path().then(subdir),
    )
    .with_mode(mode)
    .run()
    .await;
    netem.reset().await;
    let summary = result?;

    // second phase: measurements
    send_completion(signal_addr, deadlines.signal)
        .await
        .with_context(|| format!("Cannot signal completion to {signal_addr}"))?;

    for file in summary.files.iter() {
        println!("{}", file.display());
    }
    Ok(())
}
