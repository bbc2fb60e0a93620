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

//! The command dispatcher: routes every inbound command to its handler,
//! validates authority, mutates session state under that session's lock,
//! and publishes the resulting events.
//!
//! Handlers mutate and then queue the resulting events to peers while the
//! session lock is still held; the queue pushes never block, and holding
//! the lock across them is what makes events observe the same total order
//! as the mutations that produced them. The session lock is never held
//! while the store's map lock is taken.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use potluck_common::{
    ClientCommand, IngredientDraft, RecipeDraft, ServerEvent, Session, VoteKind, now_ms,
};

use crate::broadcast::broadcast;
use crate::registry::{ClientBinding, ClientRegistry, Outbound};
use crate::store::{SessionStore, SharedSession};

const SESSION_ENDED_BY_HOST: &str = "Session ended by host";

/// The hub: the client registry and the session store, plus every command
/// handler. One per process.
pub struct Hub {
    registry: ClientRegistry,
    store: SessionStore,
}

impl Hub {
    pub fn new(session_ttl: Duration) -> Self {
        Self {
            registry: ClientRegistry::new(),
            store: SessionStore::new(session_ttl),
        }
    }

    /// Route one parsed command from a connection.
    pub fn handle_command(
        &self,
        client_id: Uuid,
        reply: &UnboundedSender<Outbound>,
        command: ClientCommand,
    ) {
        debug!(?client_id, command = command.type_name(), "Dispatching");
        match command {
            ClientCommand::SessionCreate {
                session_id,
                user_id,
                username,
            } => self.session_create(client_id, reply, &session_id, &user_id, &username),
            ClientCommand::SessionJoin {
                session_id,
                user_id,
                username,
            } => self.session_join(client_id, reply, &session_id, &user_id, &username),
            ClientCommand::IngredientsAdd { ingredient } => {
                self.ingredients_add(client_id, reply, &ingredient)
            }
            ClientCommand::IngredientsRemove { ingredient_id } => {
                self.ingredients_remove(client_id, reply, &ingredient_id)
            }
            ClientCommand::IngredientsBlacklist {
                ingredient_name,
                from_ingredients,
            } => self.ingredients_blacklist(client_id, reply, &ingredient_name, from_ingredients),
            ClientCommand::RecipesAdd { recipe } => self.recipes_add(client_id, reply, recipe),
            ClientCommand::RecipesVote {
                recipe_id,
                vote_type,
            } => self.recipes_vote(client_id, reply, &recipe_id, vote_type),
            ClientCommand::RecipesRemove { recipe_id } => {
                self.recipes_remove(client_id, reply, &recipe_id)
            }
            ClientCommand::ContextUpdate { context } => {
                self.context_update(client_id, reply, context)
            }
            ClientCommand::HostTransfer { new_host_id } => {
                self.host_transfer(client_id, reply, &new_host_id)
            }
            ClientCommand::HostPermissions {
                allow_recipe_generation,
            } => self.host_permissions(client_id, reply, allow_recipe_generation),
            ClientCommand::SessionEnd {} => self.session_end(client_id, reply),
        }
    }

    /// Transport told us a connection is gone. The participant record stays;
    /// only its live connection (and registry entries) go away.
    pub fn handle_disconnect(&self, client_id: Uuid) {
        let Some(binding) = self.registry.unregister(client_id) else {
            return;
        };
        info!(?client_id, user_id = %binding.user_id, session_id = %binding.session_id,
            "Client disconnected");

        let now = now_ms();
        let Some(session) = self.store.resolve(&binding.session_id, now) else {
            return;
        };
        let mut guard = session.lock().unwrap();
        let Some(participant) = guard.mark_disconnected(&binding.user_id, now) else {
            return;
        };

        broadcast(
            &self.registry,
            &binding.session_id,
            &ServerEvent::ParticipantDisconnected {
                user_id: participant.id,
                username: participant.name,
            },
            Some(&binding.user_id),
        );
        drop(guard);
    }

    /// Sweep expired sessions and notify any lingering connections. The
    /// notified connections stay open; their registry entries are cleared on
    /// their next natural disconnect.
    pub fn reap_expired(&self) -> Vec<String> {
        let now = now_ms();
        let reaped = self.store.sweep(now);
        let mut session_ids = Vec::with_capacity(reaped.len());
        for (session_id, _) in reaped {
            info!(%session_id, "Session idle past TTL, reaping");
            broadcast(
                &self.registry,
                &session_id,
                &ServerEvent::SessionExpired {
                    session_id: session_id.clone(),
                },
                None,
            );
            session_ids.push(session_id);
        }
        session_ids
    }

    fn session_create(
        &self,
        client_id: Uuid,
        reply: &UnboundedSender<Outbound>,
        session_id: &str,
        user_id: &str,
        username: &str,
    ) {
        let now = now_ms();
        match self
            .store
            .create(Session::new(session_id, user_id, username, now), now)
        {
            Ok(session) => {
                let guard = session.lock().unwrap();
                let snapshot = guard.clone();
                self.bind_client(client_id, user_id, session_id, username, reply);
                info!(session_id, host = user_id, "Session created");
                send(reply, ServerEvent::SessionCreated { session: snapshot });
                drop(guard);
            }
            Err(existing) => {
                let mut guard = existing.lock().unwrap();
                if guard.host_id != user_id {
                    drop(guard);
                    send(
                        reply,
                        ServerEvent::SessionError {
                            message: "Session already exists".to_string(),
                        },
                    );
                    return;
                }
                // Host rejoin: reconnect the host's participant record and
                // displace any prior live connection they held.
                let participant = guard.join(user_id, username, now);
                guard.touch(now);
                let snapshot = guard.clone();

                self.bind_client(client_id, user_id, session_id, username, reply);
                info!(session_id, host = user_id, "Host rejoined session");
                send(reply, ServerEvent::SessionCreated { session: snapshot });
                broadcast(
                    &self.registry,
                    session_id,
                    &ServerEvent::ParticipantJoined { participant },
                    Some(user_id),
                );
                drop(guard);
            }
        }
    }

    fn session_join(
        &self,
        client_id: Uuid,
        reply: &UnboundedSender<Outbound>,
        session_id: &str,
        user_id: &str,
        username: &str,
    ) {
        let now = now_ms();
        let Some(session) = self.store.resolve(session_id, now) else {
            send(
                reply,
                ServerEvent::SessionError {
                    message: "Session not found or expired".to_string(),
                },
            );
            return;
        };

        if let Some(existing) = self.registry.client_for_user(user_id)
            && existing != client_id
        {
            send(
                reply,
                ServerEvent::SessionError {
                    message: "User already connected from another client".to_string(),
                },
            );
            return;
        }

        let mut guard = session.lock().unwrap();
        let participant = guard.join(user_id, username, now);
        guard.touch(now);
        let snapshot = guard.clone();

        self.bind_client(client_id, user_id, session_id, username, reply);
        info!(session_id, user_id, "Participant joined session");
        send(reply, ServerEvent::SessionJoined { session: snapshot });
        broadcast(
            &self.registry,
            session_id,
            &ServerEvent::ParticipantJoined { participant },
            Some(user_id),
        );
        drop(guard);
    }

    fn ingredients_add(
        &self,
        client_id: Uuid,
        reply: &UnboundedSender<Outbound>,
        draft: &IngredientDraft,
    ) {
        let Some((binding, session, now)) = self.resolve_bound(client_id, reply) else {
            return;
        };
        let mut guard = session.lock().unwrap();
        // Duplicate names are a silent no-op.
        let Some(ingredient) = guard.add_ingredient(draft, now) else {
            return;
        };
        guard.touch(now);

        // Everyone hears this, the originator included: that is how it
        // learns the server-assigned id.
        broadcast(
            &self.registry,
            &binding.session_id,
            &ServerEvent::IngredientAdded { ingredient },
            None,
        );
        drop(guard);
    }

    fn ingredients_remove(
        &self,
        client_id: Uuid,
        reply: &UnboundedSender<Outbound>,
        ingredient_id: &str,
    ) {
        let Some((binding, session, now)) = self.resolve_bound(client_id, reply) else {
            return;
        };
        let mut guard = session.lock().unwrap();
        let Some(ingredient) = guard.remove_ingredient(ingredient_id) else {
            return;
        };
        guard.touch(now);

        broadcast(
            &self.registry,
            &binding.session_id,
            &ServerEvent::IngredientRemoved {
                ingredient_id: ingredient_id.to_string(),
                ingredient,
            },
            None,
        );
        drop(guard);
    }

    fn ingredients_blacklist(
        &self,
        client_id: Uuid,
        reply: &UnboundedSender<Outbound>,
        ingredient_name: &str,
        from_ingredients: bool,
    ) {
        let Some((binding, session, now)) = self.resolve_bound(client_id, reply) else {
            return;
        };
        let mut guard = session.lock().unwrap();
        let name = guard.blacklist_ingredient(ingredient_name, from_ingredients);
        guard.touch(now);
        let blacklist = guard.blacklist.clone();
        let ingredients = guard.ingredients.clone();

        // Snapshot semantics: clients replace both arrays wholesale.
        broadcast(
            &self.registry,
            &binding.session_id,
            &ServerEvent::IngredientBlacklisted {
                ingredient_name: name,
                blacklist,
                ingredients,
            },
            None,
        );
        drop(guard);
    }

    fn recipes_add(&self, client_id: Uuid, reply: &UnboundedSender<Outbound>, draft: RecipeDraft) {
        let Some((binding, session, now)) = self.resolve_bound(client_id, reply) else {
            return;
        };
        let mut guard = session.lock().unwrap();
        let recipe = guard.add_recipe(draft, now);
        guard.touch(now);

        broadcast(
            &self.registry,
            &binding.session_id,
            &ServerEvent::RecipeAdded { recipe },
            None,
        );
        drop(guard);
    }

    fn recipes_vote(
        &self,
        client_id: Uuid,
        reply: &UnboundedSender<Outbound>,
        recipe_id: &str,
        vote_type: VoteKind,
    ) {
        let Some((binding, session, now)) = self.resolve_bound(client_id, reply) else {
            return;
        };
        let mut guard = session.lock().unwrap();
        guard.apply_vote(&binding.user_id, recipe_id, vote_type);
        guard.touch(now);
        let recipes = guard.recipes.clone();

        broadcast(
            &self.registry,
            &binding.session_id,
            &ServerEvent::RecipeVoted {
                recipe_id: recipe_id.to_string(),
                vote_type,
                user_id: binding.user_id.clone(),
                recipes,
            },
            None,
        );
        drop(guard);
    }

    fn recipes_remove(
        &self,
        client_id: Uuid,
        reply: &UnboundedSender<Outbound>,
        recipe_id: &str,
    ) {
        let Some((binding, session, now)) = self.resolve_bound(client_id, reply) else {
            return;
        };
        let mut guard = session.lock().unwrap();
        let Some(recipe) = guard.remove_recipe(recipe_id) else {
            return;
        };
        guard.touch(now);

        broadcast(
            &self.registry,
            &binding.session_id,
            &ServerEvent::RecipeRemoved {
                recipe_id: recipe_id.to_string(),
                recipe,
            },
            None,
        );
        drop(guard);
    }

    fn context_update(&self, client_id: Uuid, reply: &UnboundedSender<Outbound>, context: String) {
        let Some((binding, session, now)) = self.resolve_bound(client_id, reply) else {
            return;
        };
        let mut guard = session.lock().unwrap();
        // Non-host attempts are dropped without so much as an error event.
        if guard.host_id != binding.user_id {
            return;
        }
        guard.context = context.clone();
        guard.touch(now);

        // The host's own UI already holds the value it sent.
        broadcast(
            &self.registry,
            &binding.session_id,
            &ServerEvent::ContextUpdated { context },
            Some(&binding.user_id),
        );
        drop(guard);
    }

    fn host_transfer(
        &self,
        client_id: Uuid,
        reply: &UnboundedSender<Outbound>,
        new_host_id: &str,
    ) {
        let Some((binding, session, now)) = self.resolve_bound(client_id, reply) else {
            return;
        };
        let mut guard = session.lock().unwrap();
        if guard.host_id != binding.user_id {
            drop(guard);
            send_error(reply, "Only host can transfer privileges");
            return;
        }
        let Some((new_host_id, new_host_name)) = guard.transfer_host(new_host_id) else {
            drop(guard);
            send_error(reply, "New host not found in session");
            return;
        };
        guard.touch(now);
        let snapshot = guard.clone();

        info!(session_id = %binding.session_id, %new_host_id, "Host transferred");
        broadcast(
            &self.registry,
            &binding.session_id,
            &ServerEvent::HostTransferred {
                new_host_id,
                new_host_name,
                session: snapshot,
            },
            None,
        );
        drop(guard);
    }

    fn host_permissions(
        &self,
        client_id: Uuid,
        reply: &UnboundedSender<Outbound>,
        allow_recipe_generation: bool,
    ) {
        let Some((binding, session, now)) = self.resolve_bound(client_id, reply) else {
            return;
        };
        let mut guard = session.lock().unwrap();
        if guard.host_id != binding.user_id {
            drop(guard);
            send_error(reply, "Only host can update permissions");
            return;
        }
        guard.allow_recipe_generation = allow_recipe_generation;
        guard.touch(now);
        let snapshot = guard.clone();

        broadcast(
            &self.registry,
            &binding.session_id,
            &ServerEvent::HostPermissionsUpdated {
                allow_recipe_generation,
                session: snapshot,
            },
            None,
        );
        drop(guard);
    }

    fn session_end(&self, client_id: Uuid, reply: &UnboundedSender<Outbound>) {
        let Some((binding, session, _now)) = self.resolve_bound(client_id, reply) else {
            return;
        };
        let guard = session.lock().unwrap();
        if guard.host_id != binding.user_id {
            drop(guard);
            send_error(reply, "Only host can end the session");
            return;
        }
        info!(session_id = %binding.session_id, "Session ended by host");
        // Tell everyone while the session is still locked, then tear down:
        // the store's map lock is only taken after this lock is released.
        broadcast(
            &self.registry,
            &binding.session_id,
            &ServerEvent::SessionEnded {
                message: SESSION_ENDED_BY_HOST.to_string(),
            },
            None,
        );
        drop(guard);

        self.store.remove(&binding.session_id);
        for evicted in self.registry.purge_session(&binding.session_id) {
            let _ = evicted.sender.send(Outbound::Close {
                reason: SESSION_ENDED_BY_HOST.to_string(),
            });
        }
    }

    /// Resolve the binding and live session for a registered connection.
    /// Commands from unregistered connections are ignored outright; a
    /// binding whose session has expired gets a `session:error`.
    fn resolve_bound(
        &self,
        client_id: Uuid,
        reply: &UnboundedSender<Outbound>,
    ) -> Option<(ClientBinding, SharedSession, u64)> {
        let binding = self.registry.binding(client_id)?;
        let now = now_ms();
        let Some(session) = self.store.resolve(&binding.session_id, now) else {
            send(
                reply,
                ServerEvent::SessionError {
                    message: "Session not found or expired".to_string(),
                },
            );
            return None;
        };
        Some((binding, session, now))
    }

    fn bind_client(
        &self,
        client_id: Uuid,
        user_id: &str,
        session_id: &str,
        display_name: &str,
        reply: &UnboundedSender<Outbound>,
    ) {
        if let Some(displaced) = self.registry.register(
            client_id,
            user_id,
            session_id,
            display_name,
            reply.clone(),
        ) {
            warn!(user_id, "Displacing prior connection for user");
            let _ = displaced.sender.send(Outbound::Close {
                reason: "Connection replaced".to_string(),
            });
        }
    }
}

fn send(reply: &UnboundedSender<Outbound>, event: ServerEvent) {
    if reply.send(Outbound::Event(event)).is_err() {
        debug!("Reply to closed connection dropped");
    }
}

fn send_error(reply: &UnboundedSender<Outbound>, message: &str) {
    send(
        reply,
        ServerEvent::Error {
            message: message.to_string(),
        },
    );
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    use potluck_common::EventKind;

    use super::*;

    struct TestClient {
        id: Uuid,
        tx: UnboundedSender<Outbound>,
        rx: UnboundedReceiver<Outbound>,
    }

    fn client() -> TestClient {
        let (tx, rx) = unbounded_channel();
        TestClient {
            id: Uuid::new_v4(),
            tx,
            rx,
        }
    }

    fn hub() -> Hub {
        Hub::new(Duration::from_secs(4 * 60 * 60))
    }

    fn create(hub: &Hub, c: &TestClient, session_id: &str, user_id: &str, name: &str) {
        hub.handle_command(
            c.id,
            &c.tx,
            ClientCommand::SessionCreate {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                username: name.to_string(),
            },
        );
    }

    fn join(hub: &Hub, c: &TestClient, session_id: &str, user_id: &str, name: &str) {
        hub.handle_command(
            c.id,
            &c.tx,
            ClientCommand::SessionJoin {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                username: name.to_string(),
            },
        );
    }

    /// Drain everything queued for a client, splitting events from closes.
    fn drain(c: &mut TestClient) -> (Vec<ServerEvent>, Vec<String>) {
        let mut events = Vec::new();
        let mut closes = Vec::new();
        while let Ok(outbound) = c.rx.try_recv() {
            match outbound {
                Outbound::Event(event) => events.push(event),
                Outbound::Close { reason } => closes.push(reason),
            }
        }
        (events, closes)
    }

    fn kinds(events: &[ServerEvent]) -> Vec<EventKind> {
        events.iter().map(ServerEvent::kind).collect()
    }

    #[test]
    fn create_then_join_delivers_snapshots_and_join_event() {
        let hub = hub();
        let mut a = client();
        let mut b = client();

        create(&hub, &a, "S", "U1", "Alice");
        let (events, _) = drain(&mut a);
        let ServerEvent::SessionCreated { session } = &events[0] else {
            panic!("expected session:created, got {events:?}");
        };
        assert_eq!(session.host_id, "U1");
        assert_eq!(session.participants.len(), 1);
        assert!(session.participants[0].is_connected);

        join(&hub, &b, "S", "U2", "Bob");
        let (events, _) = drain(&mut b);
        let ServerEvent::SessionJoined { session } = &events[0] else {
            panic!("expected session:joined, got {events:?}");
        };
        assert_eq!(session.participants.len(), 2);

        // A hears about the join; B does not hear about itself.
        let (events, _) = drain(&mut a);
        let ServerEvent::ParticipantJoined { participant } = &events[0] else {
            panic!("expected participant:joined, got {events:?}");
        };
        assert_eq!(participant.id, "U2");
    }

    #[test]
    fn create_of_existing_session_errors_for_non_host() {
        let hub = hub();
        let mut a = client();
        let mut b = client();
        create(&hub, &a, "S", "U1", "Alice");
        drain(&mut a);

        create(&hub, &b, "S", "U2", "Bob");
        let (events, _) = drain(&mut b);
        assert_eq!(
            events,
            vec![ServerEvent::SessionError {
                message: "Session already exists".to_string()
            }]
        );
        // And nothing was mutated for A.
        assert!(drain(&mut a).0.is_empty());
    }

    #[test]
    fn host_rejoin_displaces_prior_connection() {
        let hub = hub();
        let mut old = client();
        let mut new = client();
        create(&hub, &old, "S", "U1", "Alice");
        drain(&mut old);

        create(&hub, &new, "S", "U1", "Alice");
        let (events, _) = drain(&mut new);
        let ServerEvent::SessionCreated { session } = &events[0] else {
            panic!("expected session:created on rejoin, got {events:?}");
        };
        assert!(session.participants[0].reconnected_at.is_some());

        let (_, closes) = drain(&mut old);
        assert_eq!(closes, vec!["Connection replaced".to_string()]);
    }

    #[test]
    fn join_of_unknown_session_errors() {
        let hub = hub();
        let mut b = client();
        join(&hub, &b, "nope", "U2", "Bob");
        let (events, _) = drain(&mut b);
        assert_eq!(
            events,
            vec![ServerEvent::SessionError {
                message: "Session not found or expired".to_string()
            }]
        );
    }

    #[test]
    fn join_with_already_connected_user_errors() {
        let hub = hub();
        let mut a = client();
        let mut b = client();
        create(&hub, &a, "S", "U1", "Alice");
        drain(&mut a);

        join(&hub, &b, "S", "U1", "Alice");
        let (events, _) = drain(&mut b);
        assert_eq!(
            events,
            vec![ServerEvent::SessionError {
                message: "User already connected from another client".to_string()
            }]
        );
    }

    #[test]
    fn commands_from_unregistered_connections_are_ignored() {
        let hub = hub();
        let mut stranger = client();
        hub.handle_command(
            stranger.id,
            &stranger.tx,
            ClientCommand::IngredientsAdd {
                ingredient: IngredientDraft {
                    name: "Flour".to_string(),
                    added_by: "U9".to_string(),
                },
            },
        );
        assert!(drain(&mut stranger).0.is_empty());
    }

    #[test]
    fn duplicate_ingredient_add_emits_nothing() {
        let hub = hub();
        let mut a = client();
        let mut b = client();
        create(&hub, &a, "S", "U1", "Alice");
        join(&hub, &b, "S", "U2", "Bob");
        drain(&mut a);
        drain(&mut b);

        let add = |c: &TestClient, name: &str, by: &str| {
            hub.handle_command(
                c.id,
                &c.tx,
                ClientCommand::IngredientsAdd {
                    ingredient: IngredientDraft {
                        name: name.to_string(),
                        added_by: by.to_string(),
                    },
                },
            );
        };
        add(&a, "Flour", "U1");
        let (events_a, _) = drain(&mut a);
        let (events_b, _) = drain(&mut b);
        // Both sides hear the add, lowercased, with a server id.
        for events in [&events_a, &events_b] {
            let ServerEvent::IngredientAdded { ingredient } = &events[0] else {
                panic!("expected ingredients:added, got {events:?}");
            };
            assert_eq!(ingredient.name, "flour");
            assert!(!ingredient.id.is_empty());
        }

        add(&b, "FLOUR", "U2");
        assert!(drain(&mut a).0.is_empty());
        assert!(drain(&mut b).0.is_empty());
    }

    #[test]
    fn ingredient_remove_of_missing_id_is_silent() {
        let hub = hub();
        let mut a = client();
        create(&hub, &a, "S", "U1", "Alice");
        drain(&mut a);

        hub.handle_command(
            a.id,
            &a.tx,
            ClientCommand::IngredientsRemove {
                ingredient_id: "missing".to_string(),
            },
        );
        assert!(drain(&mut a).0.is_empty());
    }

    #[test]
    fn blacklist_broadcast_carries_both_snapshots() {
        let hub = hub();
        let mut a = client();
        create(&hub, &a, "S", "U1", "Alice");
        hub.handle_command(
            a.id,
            &a.tx,
            ClientCommand::IngredientsAdd {
                ingredient: IngredientDraft {
                    name: "Cilantro".to_string(),
                    added_by: "U1".to_string(),
                },
            },
        );
        drain(&mut a);

        hub.handle_command(
            a.id,
            &a.tx,
            ClientCommand::IngredientsBlacklist {
                ingredient_name: "CILANTRO".to_string(),
                from_ingredients: true,
            },
        );
        let (events, _) = drain(&mut a);
        let ServerEvent::IngredientBlacklisted {
            ingredient_name,
            blacklist,
            ingredients,
        } = &events[0]
        else {
            panic!("expected ingredients:blacklisted, got {events:?}");
        };
        assert_eq!(ingredient_name, "cilantro");
        assert_eq!(blacklist, &vec!["cilantro".to_string()]);
        assert!(ingredients.is_empty());
    }

    #[test]
    fn vote_flow_recomputes_and_fans_out() {
        let hub = hub();
        let mut a = client();
        let mut b = client();
        create(&hub, &a, "S", "U1", "Alice");
        join(&hub, &b, "S", "U2", "Bob");
        hub.handle_command(
            a.id,
            &a.tx,
            ClientCommand::RecipesAdd {
                recipe: RecipeDraft {
                    title: "Curry".to_string(),
                    body: Default::default(),
                },
            },
        );
        let (events, _) = drain(&mut a);
        drain(&mut b);
        let recipe_id = match events.last().unwrap() {
            ServerEvent::RecipeAdded { recipe } => recipe.id.clone(),
            other => panic!("expected recipes:added, got {other:?}"),
        };

        hub.handle_command(
            b.id,
            &b.tx,
            ClientCommand::RecipesVote {
                recipe_id: recipe_id.clone(),
                vote_type: VoteKind::Up,
            },
        );
        let (events, _) = drain(&mut a);
        let ServerEvent::RecipeVoted {
            vote_type,
            user_id,
            recipes,
            ..
        } = &events[0]
        else {
            panic!("expected recipes:voted, got {events:?}");
        };
        assert_eq!(*vote_type, VoteKind::Up);
        assert_eq!(user_id, "U2");
        assert_eq!(recipes[0].votes, 1);
        assert_eq!(recipes[0].voter_ids, vec!["U2"]);
    }

    #[test]
    fn context_update_is_host_only_and_skips_the_host() {
        let hub = hub();
        let mut a = client();
        let mut b = client();
        create(&hub, &a, "S", "U1", "Alice");
        join(&hub, &b, "S", "U2", "Bob");
        drain(&mut a);
        drain(&mut b);

        // Non-host: silent drop, no event anywhere, no mutation.
        hub.handle_command(
            b.id,
            &b.tx,
            ClientCommand::ContextUpdate {
                context: "dessert".to_string(),
            },
        );
        assert!(drain(&mut a).0.is_empty());
        assert!(drain(&mut b).0.is_empty());

        // Host: everyone but the host hears it.
        hub.handle_command(
            a.id,
            &a.tx,
            ClientCommand::ContextUpdate {
                context: "dessert".to_string(),
            },
        );
        assert!(drain(&mut a).0.is_empty());
        let (events, _) = drain(&mut b);
        assert_eq!(
            events,
            vec![ServerEvent::ContextUpdated {
                context: "dessert".to_string()
            }]
        );
    }

    #[test]
    fn host_transfer_validates_caller_and_target() {
        let hub = hub();
        let mut a = client();
        let mut b = client();
        create(&hub, &a, "S", "U1", "Alice");
        join(&hub, &b, "S", "U2", "Bob");
        drain(&mut a);
        drain(&mut b);

        hub.handle_command(
            b.id,
            &b.tx,
            ClientCommand::HostTransfer {
                new_host_id: "U2".to_string(),
            },
        );
        let (events, _) = drain(&mut b);
        assert_eq!(
            events,
            vec![ServerEvent::Error {
                message: "Only host can transfer privileges".to_string()
            }]
        );

        hub.handle_command(
            a.id,
            &a.tx,
            ClientCommand::HostTransfer {
                new_host_id: "U9".to_string(),
            },
        );
        let (events, _) = drain(&mut a);
        assert_eq!(
            events,
            vec![ServerEvent::Error {
                message: "New host not found in session".to_string()
            }]
        );

        hub.handle_command(
            a.id,
            &a.tx,
            ClientCommand::HostTransfer {
                new_host_id: "U2".to_string(),
            },
        );
        // Everyone, the old host included, receives the transfer.
        for c in [&mut a, &mut b] {
            let (events, _) = drain(c);
            let ServerEvent::HostTransferred {
                new_host_id,
                new_host_name,
                session,
            } = &events[0]
            else {
                panic!("expected host:transferred, got {events:?}");
            };
            assert_eq!(new_host_id, "U2");
            assert_eq!(new_host_name, "Bob");
            assert_eq!(session.host_id, "U2");
        }
    }

    #[test]
    fn host_permissions_are_host_only() {
        let hub = hub();
        let mut a = client();
        let mut b = client();
        create(&hub, &a, "S", "U1", "Alice");
        join(&hub, &b, "S", "U2", "Bob");
        drain(&mut a);
        drain(&mut b);

        hub.handle_command(
            b.id,
            &b.tx,
            ClientCommand::HostPermissions {
                allow_recipe_generation: false,
            },
        );
        let (events, _) = drain(&mut b);
        assert_eq!(kinds(&events), vec![EventKind::Error]);

        hub.handle_command(
            a.id,
            &a.tx,
            ClientCommand::HostPermissions {
                allow_recipe_generation: false,
            },
        );
        let (events, _) = drain(&mut b);
        let ServerEvent::HostPermissionsUpdated {
            allow_recipe_generation,
            session,
        } = &events[0]
        else {
            panic!("expected host:permissions:updated, got {events:?}");
        };
        assert!(!allow_recipe_generation);
        assert!(!session.allow_recipe_generation);
    }

    #[test]
    fn session_end_is_host_only_and_tears_everything_down() {
        let hub = hub();
        let mut a = client();
        let mut b = client();
        create(&hub, &a, "S", "U1", "Alice");
        join(&hub, &b, "S", "U2", "Bob");
        drain(&mut a);
        drain(&mut b);

        // Non-host: rejected, session survives.
        hub.handle_command(b.id, &b.tx, ClientCommand::SessionEnd {});
        let (events, closes) = drain(&mut b);
        assert_eq!(kinds(&events), vec![EventKind::Error]);
        assert!(closes.is_empty());

        // Host: everyone gets session:ended, then a normal close.
        hub.handle_command(a.id, &a.tx, ClientCommand::SessionEnd {});
        for c in [&mut a, &mut b] {
            let (events, closes) = drain(c);
            assert_eq!(kinds(&events), vec![EventKind::SessionEnded]);
            assert_eq!(closes, vec!["Session ended by host".to_string()]);
        }

        // The session is gone; a rejoin attempt errors.
        let mut c = client();
        join(&hub, &c, "S", "U3", "Carol");
        let (events, _) = drain(&mut c);
        assert_eq!(
            events,
            vec![ServerEvent::SessionError {
                message: "Session not found or expired".to_string()
            }]
        );
    }

    #[test]
    fn disconnect_flips_participant_and_notifies_peers() {
        let hub = hub();
        let mut a = client();
        let mut b = client();
        create(&hub, &a, "S", "U1", "Alice");
        join(&hub, &b, "S", "U2", "Bob");
        drain(&mut a);
        drain(&mut b);

        hub.handle_disconnect(b.id);
        let (events, _) = drain(&mut a);
        assert_eq!(
            events,
            vec![ServerEvent::ParticipantDisconnected {
                user_id: "U2".to_string(),
                username: "Bob".to_string(),
            }]
        );

        // The participant record survives; rejoin reconnects it.
        let mut b2 = client();
        join(&hub, &b2, "S", "U2", "Bob");
        let (events, _) = drain(&mut b2);
        let ServerEvent::SessionJoined { session } = &events[0] else {
            panic!("expected session:joined, got {events:?}");
        };
        assert_eq!(session.participants.len(), 2);
        let bob = session.participant("U2").unwrap();
        assert!(bob.is_connected);
        assert!(bob.reconnected_at.is_some());
    }

    #[test]
    fn disconnect_of_unregistered_connection_is_a_noop() {
        let hub = hub();
        hub.handle_disconnect(Uuid::new_v4());
    }

    #[test]
    fn reaper_sweeps_idle_sessions_and_notifies_lingerers() {
        let hub = Hub::new(Duration::from_millis(10));
        let mut a = client();
        create(&hub, &a, "S", "U1", "Alice");
        drain(&mut a);

        std::thread::sleep(Duration::from_millis(30));
        let reaped = hub.reap_expired();
        assert_eq!(reaped, vec!["S".to_string()]);

        // A's connection was left open and told why the session vanished.
        let (events, closes) = drain(&mut a);
        assert_eq!(
            events,
            vec![ServerEvent::SessionExpired {
                session_id: "S".to_string()
            }]
        );
        assert!(closes.is_empty());

        // Nothing left to reap on the next tick.
        assert!(hub.reap_expired().is_empty());
    }
}
