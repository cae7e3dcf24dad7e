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
//! Server side of the two-host experiment: runs the web server until the client reports that
//! it finished all of its phases.
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;

use lossweep::{prelude::*, util};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Path to the nginx executable.
    nginx_path: String,
    /// nginx configuration, passed with `-c`.
    nginx_conf_dir: String,
    /// Endpoint configuration file.
    #[arg(short, long, default_value = "../config.json")]
    config: PathBuf,
    /// Number of completion messages to wait for.
    #[arg(short, long, default_value_t = 2)]
    messages: usize,
    /// Reset and configure the network interface before starting the server.
    #[arg(long)]
    configure_interface: bool,
    /// Also install a root netem qdisc on the interface (requires `--configure-interface`).
    #[arg(long, requires = "configure_interface")]
    netem: bool,
    /// Maximum time to wait for each completion message, in seconds.
    #[arg(long, default_value_t = 24 * 3600)]
    signal_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    util::init_logging();
    let args = Args::parse();
    let config = EndpointConfig::load(&args.config)
        .with_context(|| format!("Cannot load endpoint configuration {:?}", args.config))?;
    let deadlines = Deadlines {
        signal: Duration::from_secs(args.signal_timeout),
        ..Default::default()
    };

    let host: Arc<dyn Exec> = Arc::new(LocalHost::new("server"));
    let webserver = WebServer::new(
        host.clone(),
        &args.nginx_path,
        &args.nginx_conf_dir,
        deadlines.command,
    );

    webserver.stop().await;

    if args.configure_interface {
        InterfaceSetup::new(host.clone(), &config.interface, deadlines.command)
            .configure(&config.server_cidr(), args.netem)
            .await
            .context("Cannot configure the network interface")?;
    }

    webserver.start().await?;
    log::info!("[+] nginx started");

    let addr = SocketAddr::from((config.server_ip, config.socket_port));
    let result = async {
        let listener = CompletionListener::bind(addr).await?;
        listener.wait(args.messages, deadlines.signal).await
    }
    .await;

    webserver.stop().await;

    let report = result.context("Failed while waiting for the client")?;
    if !report.is_complete() || report.verified != args.messages {
        anyhow::bail!(
            "Client did not finish: {} verified, {} rejected messages",
            report.verified,
            report.rejected
        );
    }
    log::info!("Client finished all {} phases", args.messages);
    Ok(())
}
