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

//! Periodic sweep of sessions idle past their TTL.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::dispatch::Hub;

/// Spawn the reaper task. Every `interval` it asks the hub to drop sessions
/// idle past the TTL and notify their lingering connections. Runs until the
/// kill switch flips.
pub fn start_reaper(
    hub: Arc<Hub>,
    interval: Duration,
    kill_switch: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; with nothing expired yet it
        // is a harmless no-op.
        loop {
            ticker.tick().await;
            if kill_switch.load(Ordering::Relaxed) {
                info!("Kill switch activated, reaper exiting");
                return;
            }
            let reaped = hub.reap_expired();
            if !reaped.is_empty() {
                info!(count = reaped.len(), "Reaped expired sessions");
            }
        }
    })
}
