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

//! The potluck hub: an authoritative in-memory server for collaborative
//! sessions over websockets. One host per session, any number of
//! participants, all mutations sequenced per session and fanned out to
//! every live peer, with idle sessions reaped on a timer.
//!
//! The library surface exists so integration tests (and embedders) can run
//! an in-process hub on an ephemeral port; the shipped binary lives in
//! `main.rs`.

pub mod broadcast;
pub mod dispatch;
pub mod registry;
pub mod reaper;
pub mod store;
pub mod ws_host;

pub use dispatch::Hub;
