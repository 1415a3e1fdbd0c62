//! Envelope codec
//!
//! Maps one [`Message`] to one byte buffer and back:
//!
//! ```text
//! [id_len: u8][message_id: id_len bytes][timestamp: u64 BE][type: u8][payload: UTF-8 JSON]
//! ```
//!
//! The payload runs to the end of the buffer, so the transport must hand over
//! exactly one message per call. Envelope damage is an error; payload damage
//! is absorbed and yields [`Payload::Empty`] so the message keeps its identity
//! and timing.

use crate::net::protocol::{Message, MessageType, Payload};
use crate::util::quat::Quat;
use crate::util::vec3::Vec3;

/// Longest message id the one-byte length prefix can describe
pub const MAX_MESSAGE_ID_LEN: usize = u8::MAX as usize;

/// Header bytes excluding the id itself: id length, timestamp, type
pub const FIXED_HEADER_LEN: usize = 1 + 8 + 1;

/// Which part of the envelope header was inconsistent with the buffer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeDefect {
    #[error("empty buffer")]
    Empty,
    #[error("id length {declared} exceeds {available} remaining bytes")]
    TruncatedId { declared: usize, available: usize },
    #[error("message id is not valid UTF-8")]
    InvalidId,
    #[error("timestamp needs 8 bytes, {available} remaining")]
    TruncatedTimestamp { available: usize },
    #[error("missing type byte")]
    MissingType,
}

/// Errors that stop a message from being encoded or decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(#[from] EnvelopeDefect),
    #[error("Message id too long: {0} bytes (max 255)")]
    IdTooLong(usize),
    #[error("Payload encode error: {0}")]
    PayloadEncode(String),
    #[error("Message type {declared} does not match its {payload} payload")]
    KindMismatch {
        declared: MessageType,
        payload: MessageType,
    },
}

/// Payload problems absorbed during decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadIssue {
    #[error("Unrecognized message type: {0}")]
    UnrecognizedType(u8),
    #[error("Payload decode failure: {0}")]
    Malformed(String),
}

/// Result of a tolerant decode
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub message: Message,
    /// Set when the payload was replaced by [`Payload::Empty`]
    pub issue: Option<PayloadIssue>,
}

/// Encode a message into a single envelope buffer
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let id = message.message_id.as_bytes();
    if id.len() > MAX_MESSAGE_ID_LEN {
        return Err(CodecError::IdTooLong(id.len()));
    }

    if let Some(kind) = message.payload.kind() {
        if kind != message.message_type {
            return Err(CodecError::KindMismatch {
                declared: message.message_type,
                payload: kind,
            });
        }
    }
    // serde_json writes NaN and infinities as null, which no receiver can parse
    if let Some(field) = non_finite_field(&message.payload) {
        return Err(CodecError::PayloadEncode(format!("non-finite {}", field)));
    }

    let payload = encode_payload(&message.payload)
        .map_err(|e| CodecError::PayloadEncode(e.to_string()))?;

    Ok(EnvelopeWriter::with_capacity(FIXED_HEADER_LEN + id.len() + payload.len())
        .write_u8(id.len() as u8)
        .write(id)
        .write_u64(message.timestamp)
        .write_u8(message.message_type.code())
        .write(&payload)
        .build())
}

/// Decode one envelope buffer, discarding the payload report
pub fn decode(data: &[u8]) -> Result<Message, CodecError> {
    decode_with_report(data).map(|decoded| decoded.message)
}

/// Decode one envelope buffer, reporting absorbed payload problems
pub fn decode_with_report(data: &[u8]) -> Result<Decoded, CodecError> {
    let mut reader = EnvelopeReader::new(data);

    let id_len = reader.read_u8().ok_or(EnvelopeDefect::Empty)? as usize;
    let id_bytes = reader.read(id_len).ok_or(EnvelopeDefect::TruncatedId {
        declared: id_len,
        available: reader.remaining().len(),
    })?;
    let message_id = std::str::from_utf8(id_bytes)
        .map_err(|_| EnvelopeDefect::InvalidId)?
        .to_owned();
    let timestamp = reader.read_u64().ok_or(EnvelopeDefect::TruncatedTimestamp {
        available: reader.remaining().len(),
    })?;
    let message_type = MessageType::from_code(reader.read_u8().ok_or(EnvelopeDefect::MissingType)?);

    let (payload, issue) = match decode_payload(message_type, reader.remaining()) {
        Ok(payload) => (payload, None),
        Err(issue) => (Payload::Empty, Some(issue)),
    };

    Ok(Decoded {
        message: Message {
            message_id,
            timestamp,
            message_type,
            payload,
        },
        issue,
    })
}

fn encode_payload(payload: &Payload) -> Result<Vec<u8>, serde_json::Error> {
    match payload {
        Payload::ClientHello(p) => serde_json::to_vec(p),
        Payload::ServerHello(p) => serde_json::to_vec(p),
        Payload::PositionUpdate(p) => serde_json::to_vec(p),
        Payload::VoiceData(p) => serde_json::to_vec(p),
        Payload::EntitySpawn(p) => serde_json::to_vec(p),
        Payload::EntityUpdate(p) => serde_json::to_vec(p),
        Payload::EntityDespawn(p) => serde_json::to_vec(p),
        Payload::ChatMessage(p) => serde_json::to_vec(p),
        Payload::PresenceUpdate(p) => serde_json::to_vec(p),
        Payload::Empty => Ok(Vec::new()),
    }
}

/// First pose field of the payload holding NaN or an infinity
fn non_finite_field(payload: &Payload) -> Option<&'static str> {
    fn check(position: Option<&Vec3>, rotation: Option<&Quat>) -> Option<&'static str> {
        if position.is_some_and(|v| !v.is_finite()) {
            Some("position")
        } else if rotation.is_some_and(|q| !q.is_finite()) {
            Some("rotation")
        } else {
            None
        }
    }

    match payload {
        Payload::PositionUpdate(p) => check(Some(&p.position), Some(&p.rotation)),
        Payload::PresenceUpdate(p) => check(p.data.position.as_ref(), p.data.rotation.as_ref()),
        Payload::ServerHello(p) => p.initial_state.as_ref().and_then(|world| {
            world
                .entities
                .iter()
                .find_map(|e| check(Some(&e.position), Some(&e.rotation)))
                .or_else(|| {
                    world
                        .players
                        .iter()
                        .find_map(|pl| check(Some(&pl.position), Some(&pl.rotation)))
                })
        }),
        _ => None,
    }
}

fn decode_payload(message_type: MessageType, bytes: &[u8]) -> Result<Payload, PayloadIssue> {
    if let MessageType::Unrecognized(code) = message_type {
        return Err(PayloadIssue::UnrecognizedType(code));
    }
    if bytes.is_empty() {
        return Ok(Payload::Empty);
    }

    let parsed = match message_type {
        MessageType::ClientHello => serde_json::from_slice(bytes).map(Payload::ClientHello),
        MessageType::ServerHello => serde_json::from_slice(bytes).map(Payload::ServerHello),
        MessageType::PositionUpdate => serde_json::from_slice(bytes).map(Payload::PositionUpdate),
        MessageType::VoiceData => serde_json::from_slice(bytes).map(Payload::VoiceData),
        MessageType::EntitySpawn => serde_json::from_slice(bytes).map(Payload::EntitySpawn),
        MessageType::EntityUpdate => serde_json::from_slice(bytes).map(Payload::EntityUpdate),
        MessageType::EntityDespawn => serde_json::from_slice(bytes).map(Payload::EntityDespawn),
        MessageType::ChatMessage => serde_json::from_slice(bytes).map(Payload::ChatMessage),
        MessageType::PresenceUpdate => serde_json::from_slice(bytes).map(Payload::PresenceUpdate),
        MessageType::Unrecognized(code) => return Err(PayloadIssue::UnrecognizedType(code)),
    };

    parsed.map_err(|e| PayloadIssue::Malformed(e.to_string()))
}

/// Append-only envelope builder
struct EnvelopeWriter {
    buffer: Vec<u8>,
}

impl EnvelopeWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    fn write(mut self, data: &[u8]) -> Self {
        self.buffer.extend_from_slice(data);
        self
    }

    fn write_u8(mut self, value: u8) -> Self {
        self.buffer.push(value);
        self
    }

    /// Big-endian, matching the network byte order of the header
    fn write_u64(mut self, value: u64) -> Self {
        self.buffer.extend_from_slice(&value.to_be_bytes());
        self
    }

    fn build(self) -> Vec<u8> {
        self.buffer
    }
}

/// Bounds-checked envelope reader; every read returns `None` past the end
struct EnvelopeReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> EnvelopeReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn read(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.position.checked_add(n)?;
        let slice = self.data.get(self.position..end)?;
        self.position = end;
        Some(slice)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.read(1).map(|b| b[0])
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.read(8)
            .and_then(|b| b.try_into().ok())
            .map(u64::from_be_bytes)
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.position..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::*;
    use crate::util::quat::Quat;
    use crate::util::vec3::Vec3;
    use serde_json::json;

    fn position_message() -> Message {
        Message::with_timestamp(
            Payload::PositionUpdate(PositionUpdate {
                entity_id: "player-123".to_string(),
                position: Vec3::new(1.5, 2.0, -3.7),
                rotation: Quat::new(0.0, 0.707, 0.0, 0.707),
                sequence_number: 5,
                timestamp: 1_700_000_000_123,
            }),
            1_700_000_000_123,
        )
    }

    fn all_kinds() -> Vec<Message> {
        let mut components = ComponentMap::new();
        components.insert("health".to_string(), json!(100));
        components.insert("color".to_string(), json!({ "r": 1, "g": 0.5, "b": 0 }));

        let payloads = vec![
            Payload::ClientHello(ClientHello {
                client_id: "c1".to_string(),
                display_name: "Ada".to_string(),
                auth_token: "tok".to_string(),
                requested_room: "lobby".to_string(),
            }),
            Payload::ServerHello(ServerHello {
                server_version: "1.0.0".to_string(),
                assigned_client_id: "c1".to_string(),
                room_id: "lobby".to_string(),
                initial_state: Some(WorldState {
                    entities: vec![EntitySnapshot {
                        id: "e9".to_string(),
                        template_id: "crate".to_string(),
                        position: Vec3::new(4.0, 0.0, 1.0),
                        rotation: Quat::IDENTITY,
                        components: components.clone(),
                    }],
                    players: vec![],
                    last_update: 42,
                }),
            }),
            position_message().payload,
            Payload::VoiceData(VoiceData {
                from_client_id: "c2".to_string(),
                audio_data: vec![0xde, 0xad, 0xbe, 0xef, 0x00],
                sequence_number: 77,
                codec: VoiceCodec::Opus,
            }),
            Payload::EntitySpawn(EntitySpawn {
                entity_id: "e1".to_string(),
                template_id: "avatar".to_string(),
                owner_id: "c1".to_string(),
                components: components.clone(),
            }),
            Payload::EntityUpdate(EntityUpdate {
                entity_id: "e1".to_string(),
                components,
            }),
            Payload::EntityDespawn(EntityDespawn {
                entity_id: "e1".to_string(),
            }),
            Payload::ChatMessage(ChatMessage {
                from_client_id: "c1".to_string(),
                message: "Hello, wörld! 👋".to_string(),
                timestamp: 99,
                chat_type: ChatMessageType::Whisper,
            }),
            Payload::PresenceUpdate(PresenceUpdate {
                client_id: "c3".to_string(),
                event_type: PresenceEventType::Update,
                data: PresenceData {
                    display_name: Some("Grace".to_string()),
                    avatar_url: None,
                    position: Some(Vec3::new(1.0, 2.0, 3.0)),
                    rotation: Some(Quat::IDENTITY),
                },
            }),
        ];

        payloads
            .into_iter()
            .map(|p| Message::with_timestamp(p, 1_000))
            .collect()
    }

    #[test]
    fn test_round_trip_every_kind() {
        for msg in all_kinds() {
            let encoded = encode(&msg).unwrap();
            let decoded = decode_with_report(&encoded).unwrap();
            assert_eq!(decoded.issue, None, "{}", msg.message_type);
            assert_eq!(decoded.message, msg);
        }
    }

    #[test]
    fn test_header_layout() {
        let msg = Message {
            message_id: "ab".to_string(),
            timestamp: 0x0102_0304_0506_0708,
            message_type: MessageType::EntityDespawn,
            payload: Payload::Empty,
        };
        let encoded = encode(&msg).unwrap();
        assert_eq!(
            encoded,
            vec![2, b'a', b'b', 1, 2, 3, 4, 5, 6, 7, 8, 22]
        );
    }

    #[test]
    fn test_payload_is_json_text() {
        let msg = Message {
            message_id: "m".to_string(),
            timestamp: 5,
            message_type: MessageType::EntityDespawn,
            payload: Payload::EntityDespawn(EntityDespawn {
                entity_id: "e1".to_string(),
            }),
        };
        let encoded = encode(&msg).unwrap();
        let payload = &encoded[FIXED_HEADER_LEN + 1..];
        assert_eq!(payload, br#"{"entityId":"e1"}"#);
    }

    #[test]
    fn test_encode_is_deterministic() {
        for msg in all_kinds() {
            assert_eq!(encode(&msg).unwrap(), encode(&msg).unwrap());
        }
    }

    #[test]
    fn test_id_length_limit() {
        let mut msg = position_message();
        msg.message_id = "x".repeat(MAX_MESSAGE_ID_LEN);
        let encoded = encode(&msg).unwrap();
        assert_eq!(decode(&encoded).unwrap().message_id.len(), MAX_MESSAGE_ID_LEN);

        msg.message_id = "x".repeat(MAX_MESSAGE_ID_LEN + 1);
        assert_eq!(encode(&msg), Err(CodecError::IdTooLong(256)));
    }

    #[test]
    fn test_id_limit_counts_utf8_bytes() {
        let mut msg = position_message();
        // 128 two-byte characters
        msg.message_id = "é".repeat(128);
        assert!(matches!(encode(&msg), Err(CodecError::IdTooLong(256))));
    }

    #[test]
    fn test_empty_buffer() {
        assert_eq!(
            decode(&[]),
            Err(CodecError::MalformedEnvelope(EnvelopeDefect::Empty))
        );
    }

    #[test]
    fn test_declared_id_longer_than_buffer() {
        let data = [200u8, b'a', b'b'];
        assert_eq!(
            decode(&data),
            Err(CodecError::MalformedEnvelope(EnvelopeDefect::TruncatedId {
                declared: 200,
                available: 2,
            }))
        );
    }

    #[test]
    fn test_invalid_utf8_id() {
        let mut data = vec![2u8, 0xff, 0xfe];
        data.extend_from_slice(&1u64.to_be_bytes());
        data.push(10);
        assert_eq!(
            decode(&data),
            Err(CodecError::MalformedEnvelope(EnvelopeDefect::InvalidId))
        );
    }

    #[test]
    fn test_every_header_prefix_is_malformed() {
        let encoded = encode(&position_message()).unwrap();
        let header_len = FIXED_HEADER_LEN + position_message().message_id.len();
        for len in 0..header_len {
            let result = decode(&encoded[..len]);
            assert!(
                matches!(result, Err(CodecError::MalformedEnvelope(_))),
                "prefix of {} bytes decoded as {:?}",
                len,
                result
            );
        }
    }

    #[test]
    fn test_payload_prefixes_keep_envelope() {
        let msg = position_message();
        let encoded = encode(&msg).unwrap();
        let header_len = FIXED_HEADER_LEN + msg.message_id.len();
        for len in header_len..encoded.len() {
            let decoded = decode(&encoded[..len]).unwrap();
            assert_eq!(decoded.message_id, msg.message_id);
            assert_eq!(decoded.timestamp, msg.timestamp);
            assert_eq!(decoded.message_type, MessageType::PositionUpdate);
            assert_eq!(decoded.payload, Payload::Empty);
        }
    }

    #[test]
    fn test_corrupted_payload_is_tolerated() {
        let msg = position_message();
        let mut encoded = encode(&msg).unwrap();
        let header_len = FIXED_HEADER_LEN + msg.message_id.len();
        encoded[header_len] = b'#';
        encoded.truncate(encoded.len() - 3);

        let decoded = decode_with_report(&encoded).unwrap();
        assert_eq!(decoded.message.message_id, msg.message_id);
        assert_eq!(decoded.message.timestamp, msg.timestamp);
        assert_eq!(decoded.message.message_type, MessageType::PositionUpdate);
        assert_eq!(decoded.message.payload, Payload::Empty);
        assert!(matches!(decoded.issue, Some(PayloadIssue::Malformed(_))));
    }

    #[test]
    fn test_wrong_payload_shape_is_tolerated() {
        let mut data = vec![1u8, b'm'];
        data.extend_from_slice(&7u64.to_be_bytes());
        data.push(MessageType::PositionUpdate.code());
        data.extend_from_slice(br#"{"entityId":"e1","position":"nope"}"#);

        let decoded = decode_with_report(&data).unwrap();
        assert_eq!(decoded.message.payload, Payload::Empty);
        assert!(matches!(decoded.issue, Some(PayloadIssue::Malformed(_))));
    }

    #[test]
    fn test_invalid_utf8_payload_is_tolerated() {
        let mut data = vec![1u8, b'm'];
        data.extend_from_slice(&7u64.to_be_bytes());
        data.push(MessageType::ChatMessage.code());
        data.extend_from_slice(&[0xc3, 0x28, 0xa0]);

        let decoded = decode_with_report(&data).unwrap();
        assert_eq!(decoded.message.message_type, MessageType::ChatMessage);
        assert_eq!(decoded.message.payload, Payload::Empty);
        assert!(decoded.issue.is_some());
    }

    #[test]
    fn test_unrecognized_type_keeps_envelope() {
        let mut data = vec![3u8, b'a', b'b', b'c'];
        data.extend_from_slice(&123u64.to_be_bytes());
        data.push(99);
        data.extend_from_slice(br#"{"future":true}"#);

        let decoded = decode_with_report(&data).unwrap();
        assert_eq!(decoded.message.message_id, "abc");
        assert_eq!(decoded.message.timestamp, 123);
        assert_eq!(decoded.message.message_type, MessageType::Unrecognized(99));
        assert_eq!(decoded.message.payload, Payload::Empty);
        assert_eq!(decoded.issue, Some(PayloadIssue::UnrecognizedType(99)));
        assert!(!validate_message(&decoded.message));
    }

    #[test]
    fn test_empty_payload_region_is_not_an_issue() {
        let msg = Message {
            message_id: "m".to_string(),
            timestamp: 10,
            message_type: MessageType::ChatMessage,
            payload: Payload::Empty,
        };
        let decoded = decode_with_report(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded.issue, None);
        assert_eq!(decoded.message, msg);
    }

    #[test]
    fn test_empty_id_is_encodable() {
        let mut msg = position_message();
        msg.message_id.clear();
        let decoded = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert!(!validate_message(&decoded));
    }

    #[test]
    fn test_non_finite_pose_rejected() {
        for position in [
            Vec3::new(f32::NAN, 0.0, 0.0),
            Vec3::new(0.0, f32::INFINITY, 0.0),
            Vec3::new(0.0, 0.0, f32::NEG_INFINITY),
        ] {
            let mut msg = position_message();
            if let Payload::PositionUpdate(update) = &mut msg.payload {
                update.position = position;
            }
            assert!(matches!(encode(&msg), Err(CodecError::PayloadEncode(_))));
        }

        let mut msg = position_message();
        if let Payload::PositionUpdate(update) = &mut msg.payload {
            update.rotation = Quat::new(f32::NAN, 0.0, 0.0, 1.0);
        }
        assert_eq!(
            encode(&msg),
            Err(CodecError::PayloadEncode("non-finite rotation".to_string()))
        );
    }

    #[test]
    fn test_non_finite_presence_rejected() {
        let msg = Message::with_timestamp(
            Payload::PresenceUpdate(PresenceUpdate {
                client_id: "c1".to_string(),
                event_type: PresenceEventType::Update,
                data: PresenceData {
                    position: Some(Vec3::new(f32::NAN, 0.0, 0.0)),
                    ..Default::default()
                },
            }),
            10,
        );
        assert!(matches!(encode(&msg), Err(CodecError::PayloadEncode(_))));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut msg = position_message();
        msg.message_type = MessageType::ChatMessage;
        assert_eq!(
            encode(&msg),
            Err(CodecError::KindMismatch {
                declared: MessageType::ChatMessage,
                payload: MessageType::PositionUpdate,
            })
        );
    }
}
