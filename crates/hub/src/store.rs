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

//! Owner of every session document.
//!
//! The map lock is held only to resolve/insert/remove entries; each session
//! carries its own interior lock, which is what serializes mutations to that
//! session while letting distinct sessions proceed in parallel. Lock order
//! is always map-then-session, and neither lock is ever held across an
//! await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use potluck_common::Session;

pub type SharedSession = Arc<Mutex<Session>>;

pub struct SessionStore {
    ttl_ms: u64,
    sessions: Mutex<HashMap<String, SharedSession>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_ms: ttl.as_millis() as u64,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a session, treating an expired one as absent and eagerly
    /// removing it.
    pub fn resolve(&self, session_id: &str, now: u64) -> Option<SharedSession> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get(session_id)?.clone();
        if session.lock().unwrap().is_expired(now, self.ttl_ms) {
            debug!(session_id, "Dropping expired session on lookup");
            sessions.remove(session_id);
            return None;
        }
        Some(session)
    }

    /// Insert a fresh session. If a live session already holds the id, it is
    /// returned as the error; an expired leftover is replaced.
    pub fn create(&self, session: Session, now: u64) -> Result<SharedSession, SharedSession> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(existing) = sessions.get(&session.session_id)
            && !existing.lock().unwrap().is_expired(now, self.ttl_ms)
        {
            return Err(existing.clone());
        }
        let session_id = session.session_id.clone();
        let shared = Arc::new(Mutex::new(session));
        sessions.insert(session_id, shared.clone());
        Ok(shared)
    }

    pub fn remove(&self, session_id: &str) -> Option<SharedSession> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.remove(session_id)
    }

    /// Remove every expired session, returning what was reaped.
    pub fn sweep(&self, now: u64) -> Vec<(String, SharedSession)> {
        let mut sessions = self.sessions.lock().unwrap();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.lock().unwrap().is_expired(now, self.ttl_ms))
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| sessions.remove(&id).map(|s| (id, s)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
