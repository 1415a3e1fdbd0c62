//! Inbound routing and outbound sync for one client
//!
//! The dispatcher owns the entity registry. Inbound buffers are decoded and
//! routed by payload kind; pose-carrying messages land in the target entity's
//! state buffer. Outbound helpers encode ready-to-send buffers for locally
//! owned entities.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::metrics::Metrics;
use crate::net::builder::MessageBuilder;
use crate::net::codec::{self, CodecError, PayloadIssue};
use crate::net::inbox::Inbox;
use crate::net::protocol::{
    ChatMessage, ChatMessageType, ClientHello, ComponentMap, EntitySpawn, Message, Payload,
    PresenceData, PresenceEventType, PresenceUpdate, ServerHello, VoiceData,
};
use crate::sync::policy::SyncSettings;
use crate::sync::registry::{EntityRegistry, NetworkedEntity};
use crate::sync::state_buffer::Pose;
use crate::util::quat::Quat;
use crate::util::vec3::Vec3;

/// Owner recorded for entities that arrive in a server snapshot
pub const SERVER_OWNER: &str = "server";

/// Template id for player avatars in a server snapshot
pub const PLAYER_TEMPLATE: &str = "player";

/// Something the application may want to react to
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Welcome {
        client_id: String,
        room_id: String,
        server_version: String,
        entities: usize,
    },
    EntitySpawned {
        entity_id: String,
        template_id: String,
        owner_id: String,
        is_local: bool,
    },
    OwnershipTransferred {
        entity_id: String,
        owner_id: String,
        is_local: bool,
    },
    EntityDespawned {
        entity_id: String,
    },
    EntityUpdated {
        entity_id: String,
        components: ComponentMap,
    },
    PoseBuffered {
        entity_id: String,
        timestamp: u64,
    },
    PresenceJoined {
        client_id: String,
        data: PresenceData,
    },
    PresenceLeft {
        client_id: String,
    },
    PresenceUpdated {
        client_id: String,
        data: PresenceData,
    },
    Chat(ChatMessage),
    Voice(VoiceData),
    ClientHello(ClientHello),
}

/// Routes messages for one local client
pub struct Dispatcher {
    local_client_id: String,
    room_id: Option<String>,
    config: SyncConfig,
    settings: SyncSettings,
    registry: EntityRegistry,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(local_client_id: impl Into<String>, config: SyncConfig, metrics: Arc<Metrics>) -> Self {
        let settings = config.sync_settings();
        Self {
            local_client_id: local_client_id.into(),
            room_id: None,
            config,
            settings,
            registry: EntityRegistry::new(),
            metrics,
        }
    }

    pub fn local_client_id(&self) -> &str {
        &self.local_client_id
    }

    /// Room assigned by the last server hello
    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Decode and route one inbound buffer.
    ///
    /// A corrupt envelope is counted and returned as an error; a bad payload
    /// is counted and the message is still routed with an empty payload.
    pub fn handle_bytes(&mut self, data: &[u8]) -> Result<Option<SyncEvent>, CodecError> {
        self.metrics.record_received(data.len());

        let decoded = match codec::decode_with_report(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.metrics.malformed_envelopes.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping {} byte message: {}", data.len(), e);
                return Err(e);
            }
        };

        if let Some(issue) = &decoded.issue {
            match issue {
                PayloadIssue::UnrecognizedType(_) => {
                    self.metrics.unrecognized_types.fetch_add(1, Ordering::Relaxed)
                }
                PayloadIssue::Malformed(_) => {
                    self.metrics.payload_failures.fetch_add(1, Ordering::Relaxed)
                }
            };
            debug!(
                "Message {} ({}): {}",
                decoded.message.message_id, decoded.message.message_type, issue
            );
        }

        Ok(self.handle_message(decoded.message))
    }

    /// Route a decoded message
    pub fn handle_message(&mut self, message: Message) -> Option<SyncEvent> {
        let timestamp = message.timestamp;
        match message.payload {
            Payload::EntitySpawn(spawn) => self.on_spawn(spawn, timestamp),
            Payload::EntityDespawn(despawn) => {
                self.registry.remove(&despawn.entity_id)?;
                self.update_tracked();
                info!("Entity {} despawned", despawn.entity_id);
                Some(SyncEvent::EntityDespawned {
                    entity_id: despawn.entity_id,
                })
            }
            Payload::EntityUpdate(update) => {
                let entity = self.registry.get_mut(&update.entity_id)?;
                entity
                    .components
                    .extend(update.components.iter().map(|(k, v)| (k.clone(), v.clone())));
                Some(SyncEvent::EntityUpdated {
                    entity_id: update.entity_id,
                    components: update.components,
                })
            }
            Payload::PositionUpdate(update) => {
                if self.push_sample(&update.entity_id, update.position, update.rotation, update.timestamp) {
                    Some(SyncEvent::PoseBuffered {
                        entity_id: update.entity_id,
                        timestamp: update.timestamp,
                    })
                } else {
                    debug!("Ignoring position update for {}", update.entity_id);
                    None
                }
            }
            Payload::PresenceUpdate(presence) => Some(self.on_presence(presence, timestamp)),
            Payload::ServerHello(hello) => Some(self.on_server_hello(hello)),
            Payload::ChatMessage(chat) => Some(SyncEvent::Chat(chat)),
            Payload::VoiceData(voice) => Some(SyncEvent::Voice(voice)),
            Payload::ClientHello(hello) => Some(SyncEvent::ClientHello(hello)),
            Payload::Empty => None,
        }
    }

    /// Route every buffer waiting in the inbox
    pub fn drain_inbox(&mut self, inbox: &Inbox) -> Vec<SyncEvent> {
        inbox
            .drain()
            .iter()
            .filter_map(|data| self.handle_bytes(data).ok().flatten())
            .collect()
    }

    /// Pose of an entity at render time `timestamp`
    pub fn pose_of(&self, entity_id: &str, timestamp: u64) -> Option<Pose> {
        self.registry.get(entity_id)?.pose_at(timestamp)
    }

    /// Poses of every remote entity that has at least one sample
    pub fn remote_poses(&self, timestamp: u64) -> Vec<(String, Pose)> {
        self.registry
            .iter()
            .filter(|(_, entity)| !entity.is_owner())
            .filter_map(|(id, entity)| entity.pose_at(timestamp).map(|pose| (id.to_string(), pose)))
            .collect()
    }

    /// Encode a position update for an owned entity if its send interval
    /// has elapsed
    pub fn sync_local(
        &mut self,
        entity_id: &str,
        pose: Pose,
        now: u64,
    ) -> Result<Option<Vec<u8>>, CodecError> {
        let Some(entity) = self.registry.get_mut(entity_id) else {
            return Ok(None);
        };
        if !entity.channel.should_sync(now) {
            return Ok(None);
        }

        let sequence = entity.channel.next_sequence();
        let message =
            MessageBuilder::position_update_at(entity_id, pose.position, pose.rotation, sequence, now);
        let bytes = codec::encode(&message)?;
        entity.channel.mark_synced(now);

        self.metrics.record_sent(bytes.len());
        Ok(Some(bytes))
    }

    /// Register a locally owned entity and encode its spawn
    pub fn create_local_entity(
        &mut self,
        template_id: &str,
        pose: Pose,
        mut components: ComponentMap,
        now: u64,
    ) -> Result<(String, Vec<u8>), CodecError> {
        if !pose.position.is_finite() || !pose.rotation.is_finite() {
            return Err(CodecError::PayloadEncode("non-finite spawn pose".to_string()));
        }
        let entity_id = format!("entity-{}", Uuid::new_v4());

        components.insert("position".to_string(), to_component(&pose.position)?);
        components.insert("rotation".to_string(), to_component(&pose.rotation)?);

        let message = MessageBuilder::entity_spawn_at(
            entity_id.as_str(),
            template_id,
            self.local_client_id.as_str(),
            components.clone(),
            now,
        );
        let bytes = codec::encode(&message)?;

        let mut entity = NetworkedEntity::new(
            &entity_id,
            template_id,
            self.local_client_id.as_str(),
            true,
            self.settings,
            self.config.buffer_capacity,
        );
        entity.components = components;
        self.registry.insert(entity_id.as_str(), entity);
        self.update_tracked();

        info!("Created local entity {} ({})", entity_id, template_id);
        self.metrics.record_sent(bytes.len());
        Ok((entity_id, bytes))
    }

    /// Remove an owned entity and encode its despawn. Entities owned by
    /// someone else are left alone.
    pub fn despawn_local(&mut self, entity_id: &str) -> Result<Option<Vec<u8>>, CodecError> {
        match self.registry.get(entity_id) {
            Some(entity) if entity.is_owner() => {}
            _ => return Ok(None),
        }

        let bytes = codec::encode(&MessageBuilder::entity_despawn(entity_id))?;
        self.registry.remove(entity_id);
        self.update_tracked();

        info!("Despawned local entity {}", entity_id);
        self.metrics.record_sent(bytes.len());
        Ok(Some(bytes))
    }

    /// Encode a chat message from the local client
    pub fn chat(&self, text: &str, chat_type: ChatMessageType) -> Result<Vec<u8>, CodecError> {
        let bytes = codec::encode(&MessageBuilder::chat_message(
            self.local_client_id.as_str(),
            text,
            chat_type,
        ))?;
        self.metrics.record_sent(bytes.len());
        Ok(bytes)
    }

    fn on_spawn(&mut self, spawn: EntitySpawn, timestamp: u64) -> Option<SyncEvent> {
        let is_local = spawn.owner_id == self.local_client_id;

        if let Some(entity) = self.registry.get_mut(&spawn.entity_id) {
            if entity.owner_id == spawn.owner_id {
                debug!("Duplicate spawn for {}", spawn.entity_id);
                return None;
            }
            entity.transfer_ownership(spawn.owner_id.as_str(), is_local);
            info!("Entity {} now owned by {}", spawn.entity_id, spawn.owner_id);
            return Some(SyncEvent::OwnershipTransferred {
                entity_id: spawn.entity_id,
                owner_id: spawn.owner_id,
                is_local,
            });
        }

        let mut entity = NetworkedEntity::new(
            &spawn.entity_id,
            spawn.template_id.as_str(),
            spawn.owner_id.as_str(),
            is_local,
            self.settings,
            self.config.buffer_capacity,
        );
        if !is_local {
            if let Some(pose) = pose_from_components(&spawn.components) {
                entity.buffer.add_sample(pose.position, pose.rotation, timestamp);
            }
        }
        entity.components = spawn.components;
        self.registry.insert(spawn.entity_id.as_str(), entity);
        self.update_tracked();

        info!(
            "Entity {} spawned ({}, owner {})",
            spawn.entity_id, spawn.template_id, spawn.owner_id
        );
        Some(SyncEvent::EntitySpawned {
            entity_id: spawn.entity_id,
            template_id: spawn.template_id,
            owner_id: spawn.owner_id,
            is_local,
        })
    }

    fn on_presence(&mut self, presence: PresenceUpdate, timestamp: u64) -> SyncEvent {
        if let (Some(position), Some(rotation)) = (presence.data.position, presence.data.rotation) {
            self.push_sample(&presence.client_id, position, rotation, timestamp);
        }

        match presence.event_type {
            PresenceEventType::Join => SyncEvent::PresenceJoined {
                client_id: presence.client_id,
                data: presence.data,
            },
            PresenceEventType::Leave => {
                let is_avatar = self
                    .registry
                    .get(&presence.client_id)
                    .is_some_and(|entity| entity.template_id == PLAYER_TEMPLATE);
                if is_avatar {
                    self.registry.remove(&presence.client_id);
                    self.update_tracked();
                    info!("Player {} left, avatar removed", presence.client_id);
                }
                SyncEvent::PresenceLeft {
                    client_id: presence.client_id,
                }
            }
            PresenceEventType::Update => SyncEvent::PresenceUpdated {
                client_id: presence.client_id,
                data: presence.data,
            },
        }
    }

    fn on_server_hello(&mut self, hello: ServerHello) -> SyncEvent {
        self.local_client_id = hello.assigned_client_id.clone();
        self.room_id = Some(hello.room_id.clone());

        let mut entities = 0;
        if let Some(world) = hello.initial_state {
            for snapshot in world.entities {
                let mut entity = self.remote_entity(&snapshot.id, &snapshot.template_id, SERVER_OWNER);
                entity
                    .buffer
                    .add_sample(snapshot.position, snapshot.rotation, world.last_update);
                entity.components = snapshot.components;
                self.registry.insert(snapshot.id, entity);
                entities += 1;
            }
            for player in world.players {
                if player.client_id == self.local_client_id {
                    continue;
                }
                let mut entity = self.remote_entity(&player.client_id, PLAYER_TEMPLATE, &player.client_id);
                entity
                    .buffer
                    .add_sample(player.position, player.rotation, world.last_update);
                self.registry.insert(player.client_id, entity);
                entities += 1;
            }
            self.update_tracked();
        }

        info!(
            "Joined room {} as {} ({} entities)",
            hello.room_id, hello.assigned_client_id, entities
        );
        SyncEvent::Welcome {
            client_id: hello.assigned_client_id,
            room_id: hello.room_id,
            server_version: hello.server_version,
            entities,
        }
    }

    fn remote_entity(&self, entity_id: &str, template_id: &str, owner_id: &str) -> NetworkedEntity {
        NetworkedEntity::new(
            entity_id,
            template_id,
            owner_id,
            false,
            self.settings,
            self.config.buffer_capacity,
        )
    }

    /// Buffer a sample for a known remote entity; false when ignored
    fn push_sample(&mut self, entity_id: &str, position: Vec3, rotation: Quat, timestamp: u64) -> bool {
        let Some(entity) = self.registry.get_mut(entity_id) else {
            return false;
        };
        if entity.is_owner() {
            return false;
        }

        if let Some(latest) = entity.buffer.latest() {
            if timestamp > latest.timestamp {
                self.metrics.record_sample_interval(timestamp - latest.timestamp);
            }
        }
        entity.buffer.add_sample(position, rotation, timestamp);
        self.metrics.samples_buffered.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn update_tracked(&self) {
        self.metrics
            .entities_tracked
            .store(self.registry.len() as u64, Ordering::Relaxed);
    }
}

fn to_component<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, CodecError> {
    serde_json::to_value(value).map_err(|e| CodecError::PayloadEncode(e.to_string()))
}

/// Pose carried in spawn components; rotation defaults to identity
fn pose_from_components(components: &ComponentMap) -> Option<Pose> {
    let position: Vec3 = serde_json::from_value(components.get("position")?.clone()).ok()?;
    let rotation = components
        .get("rotation")
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default();
    Some(Pose::new(position, rotation))
}
