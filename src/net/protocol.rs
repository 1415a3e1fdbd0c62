//! Message catalog
//!
//! The closed set of message kinds, their stable wire discriminants and the
//! payload shapes each kind carries. Payload field names are camelCase on the
//! wire and are part of the protocol contract, as are the discriminants.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::quat::Quat;
use crate::util::vec3::Vec3;

/// Open map of named component data attached to spawned entities.
///
/// Ordered by key so that encoding is deterministic.
pub type ComponentMap = BTreeMap<String, serde_json::Value>;

/// Kind of a message, carried as the one-byte type field of the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ClientHello,
    ServerHello,
    PositionUpdate,
    VoiceData,
    EntitySpawn,
    EntityUpdate,
    EntityDespawn,
    ChatMessage,
    PresenceUpdate,
    /// A discriminant this build does not know (including 0 / UNKNOWN)
    Unrecognized(u8),
}

impl MessageType {
    /// Every recognized kind, in discriminant order
    pub const ALL: [MessageType; 9] = [
        MessageType::ClientHello,
        MessageType::ServerHello,
        MessageType::PositionUpdate,
        MessageType::VoiceData,
        MessageType::EntitySpawn,
        MessageType::EntityUpdate,
        MessageType::EntityDespawn,
        MessageType::ChatMessage,
        MessageType::PresenceUpdate,
    ];

    /// Wire discriminant
    pub const fn code(self) -> u8 {
        match self {
            MessageType::ClientHello => 1,
            MessageType::ServerHello => 2,
            MessageType::PositionUpdate => 10,
            MessageType::VoiceData => 11,
            MessageType::EntitySpawn => 20,
            MessageType::EntityUpdate => 21,
            MessageType::EntityDespawn => 22,
            MessageType::ChatMessage => 30,
            MessageType::PresenceUpdate => 42,
            MessageType::Unrecognized(code) => code,
        }
    }

    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => MessageType::ClientHello,
            2 => MessageType::ServerHello,
            10 => MessageType::PositionUpdate,
            11 => MessageType::VoiceData,
            20 => MessageType::EntitySpawn,
            21 => MessageType::EntityUpdate,
            22 => MessageType::EntityDespawn,
            30 => MessageType::ChatMessage,
            42 => MessageType::PresenceUpdate,
            other => MessageType::Unrecognized(other),
        }
    }

    #[inline]
    pub const fn is_recognized(self) -> bool {
        !matches!(self, MessageType::Unrecognized(_))
    }

    pub const fn name(self) -> &'static str {
        match self {
            MessageType::ClientHello => "CLIENT_HELLO",
            MessageType::ServerHello => "SERVER_HELLO",
            MessageType::PositionUpdate => "POSITION_UPDATE",
            MessageType::VoiceData => "VOICE_DATA",
            MessageType::EntitySpawn => "ENTITY_SPAWN",
            MessageType::EntityUpdate => "ENTITY_UPDATE",
            MessageType::EntityDespawn => "ENTITY_DESPAWN",
            MessageType::ChatMessage => "CHAT_MESSAGE",
            MessageType::PresenceUpdate => "PRESENCE_UPDATE",
            MessageType::Unrecognized(_) => "UNRECOGNIZED",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Unrecognized(code) => write!(f, "UNRECOGNIZED({})", code),
            other => f.write_str(other.name()),
        }
    }
}

/// Raised when a numeric enum field holds a value outside its range
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownDiscriminant {
    pub kind: &'static str,
    pub value: u8,
}

/// Declares a payload enum that travels as its numeric value
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "u8", try_from = "u8")]
        pub enum $name {
            $($variant = $value),+
        }

        impl From<$name> for u8 {
            fn from(v: $name) -> u8 {
                v as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = UnknownDiscriminant;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    _ => Err(UnknownDiscriminant { kind: stringify!($name), value }),
                }
            }
        }
    };
}

wire_enum! {
    /// Audio codec of a voice frame
    VoiceCodec { Opus = 0, Pcmu = 1, Pcma = 2 }
}

wire_enum! {
    /// Chat delivery flavour
    ChatMessageType { Normal = 0, Whisper = 1, Shout = 2, System = 3 }
}

wire_enum! {
    /// Presence sub-event carried by PRESENCE_UPDATE
    PresenceEventType { Join = 0, Leave = 1, Update = 2 }
}

/// Pose of a networked entity at a given send time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub entity_id: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub sequence_number: u32,
    /// Sender clock in milliseconds; interpolation runs on this value
    pub timestamp: u64,
}

/// One encoded audio frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceData {
    pub from_client_id: String,
    /// Raw frame bytes, base64 text inside the JSON payload
    #[serde(with = "base64_bytes")]
    pub audio_data: Vec<u8>,
    pub sequence_number: u32,
    pub codec: VoiceCodec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySpawn {
    pub entity_id: String,
    pub template_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub components: ComponentMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityUpdate {
    pub entity_id: String,
    #[serde(default)]
    pub components: ComponentMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDespawn {
    pub entity_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub from_client_id: String,
    pub message: String,
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub chat_type: ChatMessageType,
}

/// Optional presence details; absent fields are omitted on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Quat>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub client_id: String,
    pub event_type: PresenceEventType,
    #[serde(default)]
    pub data: PresenceData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientHello {
    pub client_id: String,
    pub display_name: String,
    pub auth_token: String,
    pub requested_room: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHello {
    pub server_version: String,
    pub assigned_client_id: String,
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<WorldState>,
}

/// Room contents sent to a client when it joins
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldState {
    #[serde(default)]
    pub entities: Vec<EntitySnapshot>,
    #[serde(default)]
    pub players: Vec<PlayerSnapshot>,
    pub last_update: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub id: String,
    pub template_id: String,
    pub position: Vec3,
    pub rotation: Quat,
    #[serde(default)]
    pub components: ComponentMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub client_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: String,
    pub position: Vec3,
    pub rotation: Quat,
}

/// Typed payload of a message
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    PositionUpdate(PositionUpdate),
    VoiceData(VoiceData),
    EntitySpawn(EntitySpawn),
    EntityUpdate(EntityUpdate),
    EntityDespawn(EntityDespawn),
    ChatMessage(ChatMessage),
    PresenceUpdate(PresenceUpdate),
    /// No usable payload: unrecognized type, corrupt payload, or none sent
    Empty,
}

impl Payload {
    /// Message kind implied by this payload shape, `None` for `Empty`
    pub fn kind(&self) -> Option<MessageType> {
        Some(match self {
            Payload::ClientHello(_) => MessageType::ClientHello,
            Payload::ServerHello(_) => MessageType::ServerHello,
            Payload::PositionUpdate(_) => MessageType::PositionUpdate,
            Payload::VoiceData(_) => MessageType::VoiceData,
            Payload::EntitySpawn(_) => MessageType::EntitySpawn,
            Payload::EntityUpdate(_) => MessageType::EntityUpdate,
            Payload::EntityDespawn(_) => MessageType::EntityDespawn,
            Payload::ChatMessage(_) => MessageType::ChatMessage,
            Payload::PresenceUpdate(_) => MessageType::PresenceUpdate,
            Payload::Empty => return None,
        })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }
}

/// Reasons a message fails the sanity gate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: message_id")]
    MissingMessageId,
    #[error("Unknown message type: {0}")]
    UnrecognizedType(u8),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(u64),
}

/// The wire envelope: id, send time, kind and payload
///
/// `message_type` must name the payload's kind (any kind may carry
/// [`Payload::Empty`]); `encode` rejects a message that breaks this.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_id: String,
    /// Sender clock, milliseconds since the Unix epoch
    pub timestamp: u64,
    pub message_type: MessageType,
    pub payload: Payload,
}

impl Message {
    /// Stamp a payload with a fresh id and the current wall-clock time
    pub fn new(payload: Payload) -> Self {
        Self::with_timestamp(payload, now_millis())
    }

    /// Stamp a payload with a fresh id and an explicit send time
    pub fn with_timestamp(payload: Payload, timestamp: u64) -> Self {
        let message_type = payload.kind().unwrap_or(MessageType::Unrecognized(0));
        Self {
            message_id: Uuid::new_v4().to_string(),
            timestamp,
            message_type,
            payload,
        }
    }

    /// Check the envelope fields a receiver relies on
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.message_id.is_empty() {
            return Err(ValidationError::MissingMessageId);
        }
        if let MessageType::Unrecognized(code) = self.message_type {
            return Err(ValidationError::UnrecognizedType(code));
        }
        if self.timestamp == 0 {
            return Err(ValidationError::InvalidTimestamp(self.timestamp));
        }
        Ok(())
    }
}

/// Cheap sanity gate for decoded messages: non-empty id, recognized type,
/// positive timestamp. `decode` does not run it.
pub fn validate_message(message: &Message) -> bool {
    message.validate().is_ok()
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
