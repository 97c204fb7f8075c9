use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Numeric id of a game server.
pub type ServerId = i64;

/// Refractor's internal id for a player (not the game's id).
pub type PlayerId = i64;

/// Failure decoding or encoding a feed frame.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("malformed body for {kind:?} event: {source}")]
    Body {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode outbound message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// `{ "type": ..., "body": ... }`, shared by both directions.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    body: serde_json::Value,
}

/// Player presence change on a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPresence {
    pub server_id: ServerId,
    pub id: PlayerId,
    pub player_game_id: String,
    pub name: String,
}

/// Server status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub server_id: ServerId,
}

/// A chat line relayed from a game server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub server_id: ServerId,
    pub name: String,
    pub message: String,
    #[serde(default, rename = "sentAt", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// An event pushed by the live feed.
///
/// New event types need a new variant here; until then they decode as
/// [`InboundEvent::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    PlayerJoin(PlayerPresence),
    PlayerQuit(PlayerPresence),
    ServerOnline(ServerStatus),
    ServerOffline(ServerStatus),
    Chat(ChatMessage),
    /// A `type` this client doesn't handle. The body is discarded.
    Unknown { kind: String },
}

impl InboundEvent {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(WireError::Envelope)?;
        let Envelope { kind, body } = envelope;

        let event = match kind.as_str() {
            "player-join" => Self::PlayerJoin(decode_body(&kind, body)?),
            "player-quit" => Self::PlayerQuit(decode_body(&kind, body)?),
            "server-online" => Self::ServerOnline(decode_body(&kind, body)?),
            "server-offline" => Self::ServerOffline(decode_body(&kind, body)?),
            "chat" => Self::Chat(decode_body(&kind, body)?),
            _ => Self::Unknown { kind: kind.clone() },
        };
        Ok(event)
    }

    /// The wire `type` string.
    pub fn kind(&self) -> &str {
        match self {
            Self::PlayerJoin(_) => "player-join",
            Self::PlayerQuit(_) => "player-quit",
            Self::ServerOnline(_) => "server-online",
            Self::ServerOffline(_) => "server-offline",
            Self::Chat(_) => "chat",
            Self::Unknown { kind } => kind,
        }
    }
}

fn decode_body<T: DeserializeOwned>(kind: &str, body: serde_json::Value) -> Result<T, WireError> {
    serde_json::from_value(body).map_err(|source| WireError::Body {
        kind: kind.to_string(),
        source,
    })
}

/// Body of an outbound chat send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSend {
    pub server_id: ServerId,
    pub message: String,
}

/// A message the client sends to the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "body", rename_all = "kebab-case")]
pub enum OutboundMessage {
    /// Keep-alive. The body is always an empty string.
    Ping(String),
    /// Relay a chat line to a game server.
    Chat(ChatSend),
}

impl OutboundMessage {
    pub fn ping() -> Self {
        Self::Ping(String::new())
    }

    pub fn chat(server_id: ServerId, message: impl Into<String>) -> Self {
        Self::Chat(ChatSend {
            server_id,
            message: message.into(),
        })
    }

    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Encode)
    }
}
