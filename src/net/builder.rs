//! Convenience constructors for outbound messages
//!
//! Every builder stamps a fresh UUID v4 id and the current wall-clock time.
//! Use the `*_at` variants when the caller owns the clock (tests, replays,
//! the dispatcher's outbound path).

use crate::net::protocol::{
    now_millis, ChatMessage, ChatMessageType, ComponentMap, EntityDespawn, EntitySpawn,
    EntityUpdate, Message, Payload, PositionUpdate, PresenceData, PresenceEventType,
    PresenceUpdate, VoiceCodec, VoiceData,
};
use crate::util::quat::Quat;
use crate::util::vec3::Vec3;

/// Builder for protocol messages
pub struct MessageBuilder;

impl MessageBuilder {
    /// Position update stamped at the current time
    pub fn position_update(
        entity_id: impl Into<String>,
        position: Vec3,
        rotation: Quat,
        sequence_number: u32,
    ) -> Message {
        Self::position_update_at(entity_id, position, rotation, sequence_number, now_millis())
    }

    /// Position update whose envelope and payload both carry `timestamp`
    pub fn position_update_at(
        entity_id: impl Into<String>,
        position: Vec3,
        rotation: Quat,
        sequence_number: u32,
        timestamp: u64,
    ) -> Message {
        Message::with_timestamp(
            Payload::PositionUpdate(PositionUpdate {
                entity_id: entity_id.into(),
                position,
                rotation,
                sequence_number,
                timestamp,
            }),
            timestamp,
        )
    }

    pub fn voice_data(
        from_client_id: impl Into<String>,
        audio_data: Vec<u8>,
        sequence_number: u32,
        codec: VoiceCodec,
    ) -> Message {
        Message::new(Payload::VoiceData(VoiceData {
            from_client_id: from_client_id.into(),
            audio_data,
            sequence_number,
            codec,
        }))
    }

    pub fn entity_spawn(
        entity_id: impl Into<String>,
        template_id: impl Into<String>,
        owner_id: impl Into<String>,
        components: ComponentMap,
    ) -> Message {
        Self::entity_spawn_at(entity_id, template_id, owner_id, components, now_millis())
    }

    pub fn entity_spawn_at(
        entity_id: impl Into<String>,
        template_id: impl Into<String>,
        owner_id: impl Into<String>,
        components: ComponentMap,
        timestamp: u64,
    ) -> Message {
        Message::with_timestamp(
            Payload::EntitySpawn(EntitySpawn {
                entity_id: entity_id.into(),
                template_id: template_id.into(),
                owner_id: owner_id.into(),
                components,
            }),
            timestamp,
        )
    }

    pub fn entity_update(entity_id: impl Into<String>, components: ComponentMap) -> Message {
        Message::new(Payload::EntityUpdate(EntityUpdate {
            entity_id: entity_id.into(),
            components,
        }))
    }

    pub fn entity_despawn(entity_id: impl Into<String>) -> Message {
        Message::new(Payload::EntityDespawn(EntityDespawn {
            entity_id: entity_id.into(),
        }))
    }

    /// Chat message; the payload timestamp matches the envelope
    pub fn chat_message(
        from_client_id: impl Into<String>,
        message: impl Into<String>,
        chat_type: ChatMessageType,
    ) -> Message {
        let timestamp = now_millis();
        Message::with_timestamp(
            Payload::ChatMessage(ChatMessage {
                from_client_id: from_client_id.into(),
                message: message.into(),
                timestamp,
                chat_type,
            }),
            timestamp,
        )
    }

    pub fn presence_event(
        client_id: impl Into<String>,
        event_type: PresenceEventType,
        data: PresenceData,
    ) -> Message {
        Message::new(Payload::PresenceUpdate(PresenceUpdate {
            client_id: client_id.into(),
            event_type,
            data,
        }))
    }
}
