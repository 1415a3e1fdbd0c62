//! Network-visible entities keyed by network id
//!
//! Owned by the dispatcher and passed by reference to whatever needs lookup;
//! there is no process-wide registry.

use hashbrown::HashMap;

use crate::net::protocol::ComponentMap;
use crate::sync::policy::{SyncChannel, SyncSettings};
use crate::sync::state_buffer::{EntityStateBuffer, Pose};

/// Sync state of one networked entity
#[derive(Debug, Clone)]
pub struct NetworkedEntity {
    pub template_id: String,
    pub owner_id: String,
    pub components: ComponentMap,
    pub channel: SyncChannel,
    pub buffer: EntityStateBuffer,
}

impl NetworkedEntity {
    pub fn new(
        entity_id: &str,
        template_id: impl Into<String>,
        owner_id: impl Into<String>,
        is_owner: bool,
        settings: SyncSettings,
        capacity: usize,
    ) -> Self {
        let mut buffer = EntityStateBuffer::new(capacity);
        buffer.set_interpolate(settings.interpolate);
        Self {
            template_id: template_id.into(),
            owner_id: owner_id.into(),
            components: ComponentMap::new(),
            channel: SyncChannel::new(entity_id, is_owner, settings),
            buffer,
        }
    }

    #[inline]
    pub fn is_owner(&self) -> bool {
        self.channel.is_owner()
    }

    /// Hand the entity to a new owner; motion from before the transfer is
    /// discarded so it is never blended with motion after it.
    pub fn transfer_ownership(&mut self, owner_id: impl Into<String>, is_owner: bool) {
        self.owner_id = owner_id.into();
        self.channel.set_owner(is_owner);
        self.buffer.clear();
    }

    pub fn pose_at(&self, timestamp: u64) -> Option<Pose> {
        self.buffer.query(timestamp)
    }
}

/// Registry of networked entities
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, NetworkedEntity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
        }
    }

    /// Register an entity, replacing any previous entry with the same id
    pub fn insert(&mut self, entity_id: impl Into<String>, entity: NetworkedEntity) {
        self.entities.insert(entity_id.into(), entity);
    }

    pub fn remove(&mut self, entity_id: &str) -> Option<NetworkedEntity> {
        self.entities.remove(entity_id)
    }

    pub fn get(&self, entity_id: &str) -> Option<&NetworkedEntity> {
        self.entities.get(entity_id)
    }

    pub fn get_mut(&mut self, entity_id: &str) -> Option<&mut NetworkedEntity> {
        self.entities.get_mut(entity_id)
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NetworkedEntity)> {
        self.entities.iter().map(|(id, e)| (id.as_str(), e))
    }

    /// Ids of entities owned by another client
    pub fn remote_ids(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, e)| !e.is_owner())
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// Ids of entities this client owns
    pub fn owned_ids(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, e)| e.is_owner())
            .map(|(id, _)| id.to_string())
            .collect()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
    }
}
