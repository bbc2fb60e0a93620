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

//! The websocket wire protocol.
//!
//! Inbound frames are `{"type": ..., "data": {...}}` envelopes; outbound
//! events carry their `type` tag at the top level with the event fields
//! inline. Field names are camelCase on both directions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Ingredient, IngredientDraft, Participant, Recipe, RecipeDraft, Session, VoteKind};

/// Why an inbound frame could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Not JSON, no `type`, or a payload that doesn't fit the command.
    #[error("Invalid message format")]
    InvalidFrame,
    /// A well-formed envelope naming a command we don't have.
    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

/// Every command a client can send, exhaustively. Dispatch is an exhaustive
/// match over this enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    #[serde(rename = "session:create", rename_all = "camelCase")]
    SessionCreate {
        session_id: String,
        user_id: String,
        username: String,
    },
    #[serde(rename = "session:join", rename_all = "camelCase")]
    SessionJoin {
        session_id: String,
        user_id: String,
        username: String,
    },
    #[serde(rename = "ingredients:add")]
    IngredientsAdd { ingredient: IngredientDraft },
    #[serde(rename = "ingredients:remove", rename_all = "camelCase")]
    IngredientsRemove { ingredient_id: String },
    #[serde(rename = "ingredients:blacklist", rename_all = "camelCase")]
    IngredientsBlacklist {
        ingredient_name: String,
        #[serde(default)]
        from_ingredients: bool,
    },
    #[serde(rename = "recipes:add")]
    RecipesAdd { recipe: RecipeDraft },
    #[serde(rename = "recipes:vote", rename_all = "camelCase")]
    RecipesVote {
        recipe_id: String,
        vote_type: VoteKind,
    },
    #[serde(rename = "recipes:remove", rename_all = "camelCase")]
    RecipesRemove { recipe_id: String },
    #[serde(rename = "context:update")]
    ContextUpdate { context: String },
    #[serde(rename = "host:transfer", rename_all = "camelCase")]
    HostTransfer { new_host_id: String },
    #[serde(rename = "host:permissions", rename_all = "camelCase")]
    HostPermissions { allow_recipe_generation: bool },
    #[serde(rename = "session:end")]
    SessionEnd {},
}

impl ClientCommand {
    /// The wire spelling of every command type, in protocol order.
    pub const TYPES: &'static [&'static str] = &[
        "session:create",
        "session:join",
        "ingredients:add",
        "ingredients:remove",
        "ingredients:blacklist",
        "recipes:add",
        "recipes:vote",
        "recipes:remove",
        "context:update",
        "host:transfer",
        "host:permissions",
        "session:end",
    ];

    /// Parse one text frame into a command, distinguishing garbage frames
    /// from well-formed envelopes that name an unknown command.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let mut value: serde_json::Value =
            serde_json::from_str(text).map_err(|_| ProtocolError::InvalidFrame)?;
        let Some(ty) = value.get("type").and_then(serde_json::Value::as_str) else {
            return Err(ProtocolError::InvalidFrame);
        };
        if !Self::TYPES.contains(&ty) {
            return Err(ProtocolError::UnknownType(ty.to_string()));
        }
        // Commands with no payload may omit `data` entirely.
        if value.get("data").is_none_or(serde_json::Value::is_null) {
            value["data"] = serde_json::json!({});
        }
        serde_json::from_value(value).map_err(|_| ProtocolError::InvalidFrame)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SessionCreate { .. } => "session:create",
            Self::SessionJoin { .. } => "session:join",
            Self::IngredientsAdd { .. } => "ingredients:add",
            Self::IngredientsRemove { .. } => "ingredients:remove",
            Self::IngredientsBlacklist { .. } => "ingredients:blacklist",
            Self::RecipesAdd { .. } => "recipes:add",
            Self::RecipesVote { .. } => "recipes:vote",
            Self::RecipesRemove { .. } => "recipes:remove",
            Self::ContextUpdate { .. } => "context:update",
            Self::HostTransfer { .. } => "host:transfer",
            Self::HostPermissions { .. } => "host:permissions",
            Self::SessionEnd {} => "session:end",
        }
    }
}

/// Every event the hub can emit. Snapshot-carrying events serialize a deep
/// clone of the session taken under its lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "connection:established", rename_all = "camelCase")]
    ConnectionEstablished { connection_id: String },
    #[serde(rename = "session:created")]
    SessionCreated { session: Session },
    #[serde(rename = "session:joined")]
    SessionJoined { session: Session },
    #[serde(rename = "session:error")]
    SessionError { message: String },
    #[serde(rename = "session:expired", rename_all = "camelCase")]
    SessionExpired { session_id: String },
    #[serde(rename = "session:ended")]
    SessionEnded { message: String },
    #[serde(rename = "session:participant:joined")]
    ParticipantJoined { participant: Participant },
    #[serde(rename = "session:participant:disconnected", rename_all = "camelCase")]
    ParticipantDisconnected { user_id: String, username: String },
    #[serde(rename = "ingredients:added")]
    IngredientAdded { ingredient: Ingredient },
    #[serde(rename = "ingredients:removed", rename_all = "camelCase")]
    IngredientRemoved {
        ingredient_id: String,
        ingredient: Ingredient,
    },
    #[serde(rename = "ingredients:blacklisted", rename_all = "camelCase")]
    IngredientBlacklisted {
        ingredient_name: String,
        blacklist: Vec<String>,
        ingredients: Vec<Ingredient>,
    },
    #[serde(rename = "recipes:added")]
    RecipeAdded { recipe: Recipe },
    #[serde(rename = "recipes:voted", rename_all = "camelCase")]
    RecipeVoted {
        recipe_id: String,
        vote_type: VoteKind,
        user_id: String,
        recipes: Vec<Recipe>,
    },
    #[serde(rename = "recipes:removed", rename_all = "camelCase")]
    RecipeRemoved { recipe_id: String, recipe: Recipe },
    #[serde(rename = "context:updated")]
    ContextUpdated { context: String },
    #[serde(rename = "host:transferred", rename_all = "camelCase")]
    HostTransferred {
        new_host_id: String,
        new_host_name: String,
        session: Session,
    },
    #[serde(rename = "host:permissions:updated", rename_all = "camelCase")]
    HostPermissionsUpdated {
        allow_recipe_generation: bool,
        session: Session,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Discriminant-only view of [`ServerEvent`], used to key subscriber sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionEstablished,
    SessionCreated,
    SessionJoined,
    SessionError,
    SessionExpired,
    SessionEnded,
    ParticipantJoined,
    ParticipantDisconnected,
    IngredientAdded,
    IngredientRemoved,
    IngredientBlacklisted,
    RecipeAdded,
    RecipeVoted,
    RecipeRemoved,
    ContextUpdated,
    HostTransferred,
    HostPermissionsUpdated,
    Error,
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectionEstablished { .. } => EventKind::ConnectionEstablished,
            Self::SessionCreated { .. } => EventKind::SessionCreated,
            Self::SessionJoined { .. } => EventKind::SessionJoined,
            Self::SessionError { .. } => EventKind::SessionError,
            Self::SessionExpired { .. } => EventKind::SessionExpired,
            Self::SessionEnded { .. } => EventKind::SessionEnded,
            Self::ParticipantJoined { .. } => EventKind::ParticipantJoined,
            Self::ParticipantDisconnected { .. } => EventKind::ParticipantDisconnected,
            Self::IngredientAdded { .. } => EventKind::IngredientAdded,
            Self::IngredientRemoved { .. } => EventKind::IngredientRemoved,
            Self::IngredientBlacklisted { .. } => EventKind::IngredientBlacklisted,
            Self::RecipeAdded { .. } => EventKind::RecipeAdded,
            Self::RecipeVoted { .. } => EventKind::RecipeVoted,
            Self::RecipeRemoved { .. } => EventKind::RecipeRemoved,
            Self::ContextUpdated { .. } => EventKind::ContextUpdated,
            Self::HostTransferred { .. } => EventKind::HostTransferred,
            Self::HostPermissionsUpdated { .. } => EventKind::HostPermissionsUpdated,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::now_ms;

    #[test]
    fn create_command_parses_from_envelope() {
        let cmd = ClientCommand::parse(
            r#"{"type": "session:create", "data": {"sessionId": "S", "userId": "U1", "username": "Alice"}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::SessionCreate {
                session_id: "S".to_string(),
                user_id: "U1".to_string(),
                username: "Alice".to_string(),
            }
        );
    }

    #[test]
    fn vote_command_carries_lowercase_vote_kinds() {
        let cmd = ClientCommand::parse(
            r#"{"type": "recipes:vote", "data": {"recipeId": "R1", "voteType": "down"}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::RecipesVote {
                recipe_id: "R1".to_string(),
                vote_type: VoteKind::Down,
            }
        );
    }

    #[test]
    fn blacklist_from_ingredients_defaults_to_false() {
        let cmd = ClientCommand::parse(
            r#"{"type": "ingredients:blacklist", "data": {"ingredientName": "Nuts"}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::IngredientsBlacklist {
                ingredient_name: "Nuts".to_string(),
                from_ingredients: false,
            }
        );
    }

    #[test]
    fn session_end_parses_with_or_without_data() {
        assert_eq!(
            ClientCommand::parse(r#"{"type": "session:end", "data": {}}"#).unwrap(),
            ClientCommand::SessionEnd {}
        );
        assert_eq!(
            ClientCommand::parse(r#"{"type": "session:end"}"#).unwrap(),
            ClientCommand::SessionEnd {}
        );
    }

    #[test]
    fn garbage_frames_are_invalid_not_unknown() {
        assert_eq!(
            ClientCommand::parse("not json"),
            Err(ProtocolError::InvalidFrame)
        );
        assert_eq!(
            ClientCommand::parse(r#"{"data": {}}"#),
            Err(ProtocolError::InvalidFrame)
        );
        assert_eq!(
            ClientCommand::parse(r#"{"type": 7}"#),
            Err(ProtocolError::InvalidFrame)
        );
        // Known type, payload missing required fields.
        assert_eq!(
            ClientCommand::parse(r#"{"type": "session:join", "data": {}}"#),
            Err(ProtocolError::InvalidFrame)
        );
    }

    #[test]
    fn unknown_types_are_reported_by_name() {
        assert_eq!(
            ClientCommand::parse(r#"{"type": "session:nuke", "data": {}}"#),
            Err(ProtocolError::UnknownType("session:nuke".to_string()))
        );
    }

    #[test]
    fn every_command_type_name_is_registered() {
        // `parse` gates on TYPES before the typed decode; a variant missing
        // from the list would be unreachable from the wire.
        for ty in ClientCommand::TYPES {
            let probe = json!({"type": ty, "data": {}});
            assert_ne!(
                ClientCommand::parse(&probe.to_string()),
                Err(ProtocolError::UnknownType(ty.to_string()))
            );
        }
    }

    #[test]
    fn events_serialize_with_inline_fields() {
        let event = ServerEvent::ConnectionEstablished {
            connection_id: "abc".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "connection:established", "connectionId": "abc"})
        );

        let event = ServerEvent::ParticipantDisconnected {
            user_id: "U2".to_string(),
            username: "Bob".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "session:participant:disconnected",
                "userId": "U2",
                "username": "Bob"
            })
        );
    }

    #[test]
    fn snapshot_events_use_camel_case_fields() {
        let session = Session::new("S", "U1", "Alice", now_ms());
        let value =
            serde_json::to_value(ServerEvent::SessionCreated { session }).unwrap();
        assert_eq!(value["type"], "session:created");
        let snapshot = &value["session"];
        assert_eq!(snapshot["sessionId"], "S");
        assert_eq!(snapshot["hostId"], "U1");
        assert!(snapshot["lastActivity"].is_u64());
        assert!(snapshot["allowRecipeGeneration"].as_bool().unwrap());
        assert_eq!(snapshot["participants"][0]["isConnected"], true);
        // Absent optional stamps are omitted, not null.
        assert!(
            snapshot["participants"][0]
                .as_object()
                .unwrap()
                .get("reconnectedAt")
                .is_none()
        );
    }

    #[test]
    fn recipe_body_fields_flatten_into_the_event() {
        let mut session = Session::new("S", "U1", "Alice", 1);
        let body = serde_json::from_str(r#"{"servings": 4}"#).unwrap();
        let recipe = session.add_recipe(
            RecipeDraft {
                title: "Soup".to_string(),
                body,
            },
            2,
        );
        let value = serde_json::to_value(ServerEvent::RecipeAdded { recipe }).unwrap();
        assert_eq!(value["recipe"]["title"], "Soup");
        assert_eq!(value["recipe"]["servings"], 4);
        assert_eq!(value["recipe"]["votes"], 0);

        // And the tagged event round-trips.
        let back: ServerEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind(), EventKind::RecipeAdded);
    }

    #[test]
    fn voted_event_shape_matches_the_protocol_table() {
        let value = serde_json::to_value(ServerEvent::RecipeVoted {
            recipe_id: "R1".to_string(),
            vote_type: VoteKind::Up,
            user_id: "U1".to_string(),
            recipes: vec![],
        })
        .unwrap();
        assert_eq!(value["type"], "recipes:voted");
        assert_eq!(value["recipeId"], "R1");
        assert_eq!(value["voteType"], "up");
        assert_eq!(value["userId"], "U1");
        assert!(value["recipes"].is_array());
    }
}
