//! Outbound throttling for locally owned entities
//!
//! Decouples the render tick rate from the network send rate: a channel only
//! lets an update through once its send interval has elapsed.

/// Settings shared by every channel a dispatcher creates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncSettings {
    /// Outbound updates per second for owned entities
    pub sync_rate_hz: f32,
    /// Remote buffers interpolate between samples
    pub interpolate: bool,
    /// Recorded for consumers; buffers always clamp at the newest sample
    pub extrapolate: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_rate_hz: 30.0,
            interpolate: true,
            extrapolate: false,
        }
    }
}

/// Per-entity outbound sync state
#[derive(Debug, Clone)]
pub struct SyncChannel {
    entity_id: String,
    is_owner: bool,
    sync_rate_hz: f32,
    /// Milliseconds between updates; infinite for a non-positive rate
    sync_interval_ms: f64,
    interpolate: bool,
    extrapolate: bool,
    last_sync_time: Option<u64>,
    sequence: u32,
}

impl SyncChannel {
    pub fn new(entity_id: impl Into<String>, is_owner: bool, settings: SyncSettings) -> Self {
        Self {
            entity_id: entity_id.into(),
            is_owner,
            sync_rate_hz: settings.sync_rate_hz,
            sync_interval_ms: interval_ms(settings.sync_rate_hz),
            interpolate: settings.interpolate,
            extrapolate: settings.extrapolate,
            last_sync_time: None,
            sequence: 0,
        }
    }

    /// True when this entity is owned locally and its interval has elapsed.
    /// The first check after creation always passes.
    pub fn should_sync(&self, now: u64) -> bool {
        if !self.is_owner {
            return false;
        }
        match self.last_sync_time {
            None => self.sync_interval_ms.is_finite(),
            Some(last) => now.saturating_sub(last) as f64 >= self.sync_interval_ms,
        }
    }

    /// Record that an update went out at `now`
    pub fn mark_synced(&mut self, now: u64) {
        self.last_sync_time = Some(now);
    }

    /// Sequence number for the next outbound update
    pub fn next_sequence(&mut self) -> u32 {
        let seq = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        seq
    }

    /// Ownership transfer; the send clock restarts
    pub fn set_owner(&mut self, is_owner: bool) {
        if self.is_owner != is_owner {
            self.is_owner = is_owner;
            self.last_sync_time = None;
        }
    }

    pub fn set_sync_rate(&mut self, sync_rate_hz: f32) {
        self.sync_rate_hz = sync_rate_hz;
        self.sync_interval_ms = interval_ms(sync_rate_hz);
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    #[inline]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    pub fn sync_rate_hz(&self) -> f32 {
        self.sync_rate_hz
    }

    pub fn sync_interval_ms(&self) -> f64 {
        self.sync_interval_ms
    }

    pub fn interpolate(&self) -> bool {
        self.interpolate
    }

    pub fn extrapolate(&self) -> bool {
        self.extrapolate
    }

    pub fn last_sync_time(&self) -> Option<u64> {
        self.last_sync_time
    }
}

fn interval_ms(sync_rate_hz: f32) -> f64 {
    if sync_rate_hz > 0.0 && sync_rate_hz.is_finite() {
        1000.0 / sync_rate_hz as f64
    } else {
        f64::INFINITY
    }
}
