// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use clap_derive::Parser;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

use potluck_hub::{Hub, reaper, ws_host};

#[derive(Parser, Debug)]
struct Args {
    #[arg(
        long,
        value_name = "listen-address",
        help = "Websocket listen address",
        default_value = "0.0.0.0:8080"
    )]
    listen_address: String,

    #[arg(
        long,
        value_name = "session-ttl",
        help = "Idle time after which a session is reaped",
        default_value = "4h",
        value_parser = humantime::parse_duration
    )]
    session_ttl: Duration,

    #[arg(
        long,
        value_name = "reap-interval",
        help = "How often the reaper sweeps for expired sessions",
        default_value = "30m",
        value_parser = humantime::parse_duration
    )]
    reap_interval: Duration,

    #[arg(long, help = "Enable debug logging", default_value = "false")]
    debug: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), eyre::Error> {
    color_eyre::install()?;
    let args: Args = Args::parse();

    let main_subscriber = tracing_subscriber::fmt()
        .compact()
        .with_ansi(true)
        .with_thread_names(true)
        .with_max_level(if args.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(main_subscriber)
        .expect("Unable to set configure logging");

    let mut hup_signal =
        signal(SignalKind::hangup()).expect("Unable to register HUP signal handler");
    let mut stop_signal =
        signal(SignalKind::interrupt()).expect("Unable to register STOP signal handler");

    let kill_switch = Arc::new(AtomicBool::new(false));

    let listen_addr = args
        .listen_address
        .parse::<SocketAddr>()
        .map_err(|e| eyre::eyre!("Invalid listen address {}: {}", args.listen_address, e))?;

    let hub = Arc::new(Hub::new(args.session_ttl));
    let reaper_task = reaper::start_reaper(hub.clone(), args.reap_interval, kill_switch.clone());

    let (bound_addr, server_task) = ws_host::bind_and_serve(hub, listen_addr).await?;
    info!(address = ?bound_addr, ttl = ?args.session_ttl, reap_interval = ?args.reap_interval,
        "Hub listening");

    select! {
        _ = server_task => {
            info!("Server exited.");
        }
        _ = reaper_task => {
            info!("Reaper exited.");
        }
        _ = hup_signal.recv() => {
            info!("HUP received, stopping...");
            kill_switch.store(true, Ordering::SeqCst);
        }
        _ = stop_signal.recv() => {
            info!("STOP received, stopping...");
            kill_switch.store(true, Ordering::SeqCst);
        }
    }
    info!("Done.");

    Ok(())
}
