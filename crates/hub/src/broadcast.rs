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

//! Fan-out of events to every live connection in a session.
//!
//! Delivery is best-effort: a dead peer is logged and skipped, never allowed
//! to fail the originating command or roll back its mutation.

use tracing::{trace, warn};

use potluck_common::ServerEvent;

use crate::registry::{ClientRegistry, Outbound};

/// Send `event` to every live connection in `session_id`, skipping
/// `exclude_user` if given. Returns how many peers were written to.
pub fn broadcast(
    registry: &ClientRegistry,
    session_id: &str,
    event: &ServerEvent,
    exclude_user: Option<&str>,
) -> usize {
    // Snapshot targets under the registry lock; write outside it.
    let targets = registry.session_targets(session_id, exclude_user);

    let mut delivered = 0;
    for (client_id, sender) in targets {
        match sender.send(Outbound::Event(event.clone())) {
            Ok(()) => delivered += 1,
            Err(_) => {
                warn!(?client_id, session_id, "Dropping broadcast to dead connection");
            }
        }
    }
    trace!(session_id, event = ?event.kind(), delivered, "Broadcast");
    delivered
}
