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

//! The registry of live connections: which websocket belongs to which user
//! in which session, and the outbound queue for writing to it.
//!
//! The registry owns only the connection<->user mapping; session documents
//! are owned by the store. A participant record and its live connection have
//! independent lifetimes.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use potluck_common::ServerEvent;

/// What a connection's writer task consumes.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    /// Close the websocket with a normal-closure code and this reason, then
    /// stop writing.
    Close { reason: String },
}

/// A live connection's identity within a session.
#[derive(Debug, Clone)]
pub struct ClientBinding {
    pub user_id: String,
    pub session_id: String,
    pub display_name: String,
    pub sender: UnboundedSender<Outbound>,
}

#[derive(Default)]
struct Inner {
    /// client (connection) id -> binding
    clients: HashMap<Uuid, ClientBinding>,
    /// user id -> the one client id currently bound for it
    user_clients: HashMap<String, Uuid>,
}

/// One-active-connection-per-user registry. Entries are installed only by a
/// successful `session:create` / `session:join`.
#[derive(Default)]
pub struct ClientRegistry {
    inner: Mutex<Inner>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to a user within a session. If the user was bound
    /// to a different live connection, that binding is evicted and returned
    /// so the caller can close it.
    pub fn register(
        &self,
        client_id: Uuid,
        user_id: &str,
        session_id: &str,
        display_name: &str,
        sender: UnboundedSender<Outbound>,
    ) -> Option<ClientBinding> {
        let mut inner = self.inner.lock().unwrap();

        let prior_id = match inner.user_clients.get(user_id) {
            Some(prior) if *prior != client_id => Some(*prior),
            _ => None,
        };
        let displaced = prior_id.and_then(|prior| inner.clients.remove(&prior));

        // A connection rebinding itself (e.g. joining a new session) sheds
        // its old user mapping first.
        if let Some(old) = inner.clients.get(&client_id)
            && old.user_id != user_id
        {
            let old_user = old.user_id.clone();
            inner.user_clients.remove(&old_user);
        }

        inner.clients.insert(
            client_id,
            ClientBinding {
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
                display_name: display_name.to_string(),
                sender,
            },
        );
        inner.user_clients.insert(user_id.to_string(), client_id);
        displaced
    }

    pub fn binding(&self, client_id: Uuid) -> Option<ClientBinding> {
        let inner = self.inner.lock().unwrap();
        inner.clients.get(&client_id).cloned()
    }

    pub fn client_for_user(&self, user_id: &str) -> Option<Uuid> {
        let inner = self.inner.lock().unwrap();
        inner.user_clients.get(user_id).copied()
    }

    /// Drop a connection's entries. The user mapping is removed only if it
    /// still points at this connection (it may have been replaced already).
    pub fn unregister(&self, client_id: Uuid) -> Option<ClientBinding> {
        let mut inner = self.inner.lock().unwrap();
        let binding = inner.clients.remove(&client_id)?;
        if inner.user_clients.get(&binding.user_id) == Some(&client_id) {
            inner.user_clients.remove(&binding.user_id);
        }
        Some(binding)
    }

    /// Snapshot the outbound senders for every live connection in a session,
    /// optionally excluding one user. Writes happen outside the lock.
    pub fn session_targets(
        &self,
        session_id: &str,
        exclude_user: Option<&str>,
    ) -> Vec<(Uuid, UnboundedSender<Outbound>)> {
        let inner = self.inner.lock().unwrap();
        inner
            .clients
            .iter()
            .filter(|(_, b)| b.session_id == session_id)
            .filter(|(_, b)| exclude_user != Some(b.user_id.as_str()))
            .map(|(id, b)| (*id, b.sender.clone()))
            .collect()
    }

    /// Remove every entry bound to a session, returning the evicted
    /// bindings. Used when the host ends the session.
    pub fn purge_session(&self, session_id: &str) -> Vec<ClientBinding> {
        let mut inner = self.inner.lock().unwrap();
        let client_ids: Vec<Uuid> = inner
            .clients
            .iter()
            .filter(|(_, b)| b.session_id == session_id)
            .map(|(id, _)| *id)
            .collect();

        let mut purged = Vec::with_capacity(client_ids.len());
        for client_id in client_ids {
            if let Some(binding) = inner.clients.remove(&client_id) {
                if inner.user_clients.get(&binding.user_id) == Some(&client_id) {
                    inner.user_clients.remove(&binding.user_id);
                }
                purged.push(binding);
            }
        }
        purged
    }
}
