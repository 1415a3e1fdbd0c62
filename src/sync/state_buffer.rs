//! Per-entity pose history with time-based interpolation
//!
//! Samples are kept sorted by their sender timestamp. A late sample is
//! inserted at its place in time rather than appended, so arrival order never
//! affects what `query` returns. When the buffer is over capacity the sample
//! with the oldest timestamp is dropped; a sample older than everything in a
//! full buffer is therefore discarded on arrival.
//!
//! Queries outside the buffered time range clamp to the nearest edge sample.
//! Motion is never extrapolated.

use std::collections::VecDeque;

use crate::util::quat::Quat;
use crate::util::vec3::Vec3;

/// Default capacity: one second of samples at 60 Hz
pub const DEFAULT_CAPACITY: usize = 60;

/// One buffered observation of an entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSample {
    pub position: Vec3,
    pub rotation: Quat,
    /// Sender-side timestamp in milliseconds
    pub timestamp: u64,
}

impl StateSample {
    #[inline]
    pub fn pose(&self) -> Pose {
        Pose {
            position: self.position,
            rotation: self.rotation,
        }
    }
}

/// Position and orientation handed to the renderer
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Blend towards `other`; position is lerped, rotation slerped
    pub fn interpolate(&self, other: &Pose, t: f32) -> Pose {
        Pose {
            position: self.position.lerp(other.position, t),
            rotation: self.rotation.slerp(other.rotation, t),
        }
    }
}

/// Bounded, timestamp-ordered sample buffer for one networked entity
#[derive(Debug, Clone)]
pub struct EntityStateBuffer {
    samples: VecDeque<StateSample>,
    capacity: usize,
    interpolate: bool,
}

impl EntityStateBuffer {
    /// Capacity is raised to at least 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
            interpolate: true,
        }
    }

    /// Buffer that always returns the newest sample
    pub fn without_interpolation(capacity: usize) -> Self {
        let mut buffer = Self::new(capacity);
        buffer.interpolate = false;
        buffer
    }

    /// Insert a sample at its timestamp position, then evict the oldest
    /// samples while over capacity. Equal timestamps keep arrival order.
    pub fn add_sample(&mut self, position: Vec3, rotation: Quat, timestamp: u64) {
        let index = self.samples.partition_point(|s| s.timestamp <= timestamp);
        self.samples.insert(
            index,
            StateSample {
                position,
                rotation,
                timestamp,
            },
        );

        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Pose at render time `timestamp`, or `None` before the first sample
    pub fn query(&self, timestamp: u64) -> Option<Pose> {
        let newest = self.samples.back()?;
        if self.samples.len() < 2 || !self.interpolate {
            return Some(newest.pose());
        }

        let oldest = self.samples.front()?;
        if timestamp <= oldest.timestamp {
            return Some(oldest.pose());
        }
        if timestamp >= newest.timestamp {
            return Some(newest.pose());
        }

        let (before, after) = self
            .samples
            .iter()
            .zip(self.samples.iter().skip(1))
            .find(|(before, after)| before.timestamp <= timestamp && timestamp <= after.timestamp)?;

        let duration = after.timestamp - before.timestamp;
        let t = if duration > 0 {
            ((timestamp - before.timestamp) as f64 / duration as f64) as f32
        } else {
            0.0
        };

        Some(before.pose().interpolate(&after.pose(), t))
    }

    /// Drop every sample (despawn, respawn, ownership change)
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn interpolates(&self) -> bool {
        self.interpolate
    }

    pub fn set_interpolate(&mut self, enabled: bool) {
        self.interpolate = enabled;
    }

    /// Sample with the newest timestamp
    pub fn latest(&self) -> Option<&StateSample> {
        self.samples.back()
    }

    /// Sample with the oldest timestamp
    pub fn oldest(&self) -> Option<&StateSample> {
        self.samples.front()
    }

    /// Milliseconds covered by the buffered samples
    pub fn time_span(&self) -> u64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0,
        }
    }

    /// Samples in timestamp order
    pub fn samples(&self) -> impl Iterator<Item = &StateSample> {
        self.samples.iter()
    }
}

impl Default for EntityStateBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
