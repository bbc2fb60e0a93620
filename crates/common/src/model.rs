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

//! The authoritative session document and its mutation rules.
//!
//! Everything here is pure state manipulation; locking, broadcast, and
//! transport concerns live in the hub. All timestamps are epoch
//! milliseconds, which is what clients see on the wire.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A user's standing vote on a recipe. `Neutral` is never stored; it is the
/// wire spelling for "erase my vote".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Up,
    Down,
    Neutral,
}

/// A member of a session. Participants persist across disconnects; only
/// session deletion removes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub joined_at: u64,
    pub is_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnected_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    pub id: String,
    /// Always stored lowercased; name uniqueness is case-insensitive.
    pub name: String,
    pub added_by: String,
    pub added_at: u64,
}

/// The client-supplied portion of `ingredients:add`. Any id the client
/// attaches is ignored; the server assigns one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngredientDraft {
    pub name: String,
    #[serde(default)]
    pub added_by: String,
}

/// A recipe as the server holds it. The body is opaque to the hub beyond
/// `title`; whatever else the client sent rides along in `body` and is
/// re-emitted verbatim. `votes` and `voter_ids` are always server-computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub created_at: u64,
    pub votes: i64,
    pub voter_ids: Vec<String>,
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

/// The client-supplied portion of `recipes:add`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeDraft {
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

// Fields the server owns on a recipe. Client-sent values for these are
// discarded during normalization so the flattened body can't shadow them.
const RESERVED_RECIPE_FIELDS: &[&str] = &["id", "createdAt", "votes", "voterIds"];

/// The shared session document. One host, a participant roster, the
/// ingredient list with its blacklist, a free-form context string, and
/// voted-on recipes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub host_id: String,
    pub host_name: String,
    pub created_at: u64,
    pub last_activity: u64,
    pub allow_recipe_generation: bool,
    pub participants: Vec<Participant>,
    pub ingredients: Vec<Ingredient>,
    /// Lowercased ingredient names barred from the list. Disjoint from
    /// `ingredients` names at the end of every blacklist mutation.
    pub blacklist: Vec<String>,
    pub context: String,
    pub recipes: Vec<Recipe>,
    /// userId -> recipeId -> standing vote. Neutral entries are erased, and
    /// a user with no standing votes has no entry at all.
    pub votes: HashMap<String, HashMap<String, VoteKind>>,
}

impl Session {
    /// A fresh session with the creator as host and sole (connected)
    /// participant.
    pub fn new(session_id: &str, host_id: &str, host_name: &str, now: u64) -> Self {
        Self {
            session_id: session_id.to_string(),
            host_id: host_id.to_string(),
            host_name: host_name.to_string(),
            created_at: now,
            last_activity: now,
            allow_recipe_generation: true,
            participants: vec![Participant {
                id: host_id.to_string(),
                name: host_name.to_string(),
                joined_at: now,
                is_connected: true,
                reconnected_at: None,
                disconnected_at: None,
            }],
            ingredients: Vec::new(),
            blacklist: Vec::new(),
            context: String::new(),
            recipes: Vec::new(),
            votes: HashMap::new(),
        }
    }

    /// Stamp activity. Monotonic: a stale clock reading never moves
    /// `last_activity` backwards.
    pub fn touch(&mut self, now: u64) {
        self.last_activity = self.last_activity.max(now);
    }

    /// Idle longer than the TTL?
    pub fn is_expired(&self, now: u64, ttl_ms: u64) -> bool {
        now.saturating_sub(self.last_activity) > ttl_ms
    }

    pub fn participant(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == user_id)
    }

    fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.id == user_id)
    }

    /// Join or rejoin. An existing participant is flipped back to connected
    /// and stamped with `reconnectedAt`; an unknown one is appended. Returns
    /// a copy of the (re)joined participant record for the broadcast.
    pub fn join(&mut self, user_id: &str, name: &str, now: u64) -> Participant {
        if let Some(p) = self.participant_mut(user_id) {
            p.is_connected = true;
            p.reconnected_at = Some(now);
            return p.clone();
        }
        let participant = Participant {
            id: user_id.to_string(),
            name: name.to_string(),
            joined_at: now,
            is_connected: true,
            reconnected_at: None,
            disconnected_at: None,
        };
        self.participants.push(participant.clone());
        participant
    }

    /// Flip a participant to disconnected. The record stays; only the live
    /// connection is gone. Returns a copy for the broadcast.
    pub fn mark_disconnected(&mut self, user_id: &str, now: u64) -> Option<Participant> {
        let p = self.participant_mut(user_id)?;
        p.is_connected = false;
        p.disconnected_at = Some(now);
        Some(p.clone())
    }

    /// Add an ingredient, suppressing case-insensitive duplicates. Returns
    /// the server-normalized record, or `None` for the silent no-op.
    pub fn add_ingredient(&mut self, draft: &IngredientDraft, now: u64) -> Option<Ingredient> {
        let name = draft.name.to_lowercase();
        if self.ingredients.iter().any(|i| i.name == name) {
            return None;
        }
        let ingredient = Ingredient {
            id: Uuid::new_v4().to_string(),
            name,
            added_by: draft.added_by.clone(),
            added_at: now,
        };
        self.ingredients.push(ingredient.clone());
        Some(ingredient)
    }

    pub fn remove_ingredient(&mut self, ingredient_id: &str) -> Option<Ingredient> {
        let idx = self.ingredients.iter().position(|i| i.id == ingredient_id)?;
        Some(self.ingredients.remove(idx))
    }

    /// Blacklist a name (lowercased, added once). With `from_ingredients`,
    /// any ingredient carrying that name is removed as well, restoring the
    /// blacklist/ingredients disjointness invariant.
    pub fn blacklist_ingredient(&mut self, ingredient_name: &str, from_ingredients: bool) -> String {
        let name = ingredient_name.to_lowercase();
        if !self.blacklist.contains(&name) {
            self.blacklist.push(name.clone());
        }
        if from_ingredients {
            self.ingredients.retain(|i| i.name != name);
        }
        name
    }

    /// Append a recipe, normalized: fresh server id, zeroed tallies, and
    /// any reserved fields the client smuggled into the body stripped.
    pub fn add_recipe(&mut self, draft: RecipeDraft, now: u64) -> Recipe {
        let mut body = draft.body;
        for field in RESERVED_RECIPE_FIELDS {
            body.remove(*field);
        }
        let recipe = Recipe {
            id: Uuid::new_v4().to_string(),
            title: draft.title,
            created_at: now,
            votes: 0,
            voter_ids: Vec::new(),
            body,
        };
        self.recipes.push(recipe.clone());
        recipe
    }

    pub fn remove_recipe(&mut self, recipe_id: &str) -> Option<Recipe> {
        let idx = self.recipes.iter().position(|r| r.id == recipe_id)?;
        Some(self.recipes.remove(idx))
    }

    /// Record a vote and recompute every recipe's tally. A `Neutral` vote
    /// erases the user's standing vote.
    pub fn apply_vote(&mut self, user_id: &str, recipe_id: &str, kind: VoteKind) {
        let user_votes = self.votes.entry(user_id.to_string()).or_default();
        user_votes.remove(recipe_id);
        if kind != VoteKind::Neutral {
            user_votes.insert(recipe_id.to_string(), kind);
        }
        if self.votes.get(user_id).is_some_and(HashMap::is_empty) {
            self.votes.remove(user_id);
        }
        self.recompute_tallies();
    }

    /// Re-derive `votes` and `voter_ids` on every recipe from the vote map.
    /// Voter ids come out sorted so snapshots are deterministic.
    pub fn recompute_tallies(&mut self) {
        for recipe in &mut self.recipes {
            let mut tally = 0i64;
            let mut voters = Vec::new();
            for (user_id, user_votes) in &self.votes {
                match user_votes.get(&recipe.id) {
                    Some(VoteKind::Up) => tally += 1,
                    Some(VoteKind::Down) => tally -= 1,
                    Some(VoteKind::Neutral) | None => continue,
                }
                voters.push(user_id.clone());
            }
            voters.sort();
            recipe.votes = tally;
            recipe.voter_ids = voters;
        }
    }

    /// Hand host privileges to an existing participant. Returns the new
    /// host's `(id, name)`, or `None` if no such participant.
    pub fn transfer_host(&mut self, new_host_id: &str) -> Option<(String, String)> {
        let participant = self.participant(new_host_id)?;
        let (id, name) = (participant.id.clone(), participant.name.clone());
        self.host_id = id.clone();
        self.host_name = name.clone();
        Some((id, name))
    }
}
