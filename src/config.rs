use crate::sync::policy::SyncSettings;
use crate::sync::state_buffer::DEFAULT_CAPACITY;

/// State-sync configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Samples kept per remote entity
    pub buffer_capacity: usize,
    /// Outbound updates per second for owned entities
    pub sync_rate_hz: f32,
    /// Blend between samples instead of snapping to the newest
    pub interpolate: bool,
    /// Stored on every channel; buffers clamp at the newest sample regardless
    pub extrapolate: bool,
    /// Pending messages the inbox holds before dropping
    pub inbox_capacity: usize,
    /// How far behind the current time remote entities are rendered
    pub render_delay_ms: u64,
    /// Port for the Prometheus endpoint; disabled when unset
    pub metrics_port: Option<u16>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            sync_rate_hz: 30.0,
            interpolate: true,
            extrapolate: false,
            inbox_capacity: 1024,
            render_delay_ms: 100,
            metrics_port: None,
        }
    }
}

impl SyncConfig {
    /// Load from environment variables, keeping defaults for anything unset
    /// or invalid
    pub fn load_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(capacity) = lookup("NETSYNC_BUFFER_CAPACITY") {
            if let Ok(parsed) = capacity.parse::<usize>() {
                if (2..=10000).contains(&parsed) {
                    config.buffer_capacity = parsed;
                } else {
                    tracing::warn!("NETSYNC_BUFFER_CAPACITY must be 2-10000, using default");
                }
            } else {
                tracing::warn!("Invalid NETSYNC_BUFFER_CAPACITY '{}', using default", capacity);
            }
        }

        if let Some(rate) = lookup("NETSYNC_SYNC_RATE_HZ") {
            if let Ok(parsed) = rate.parse::<f32>() {
                if parsed > 0.0 && parsed <= 240.0 {
                    config.sync_rate_hz = parsed;
                } else {
                    tracing::warn!("NETSYNC_SYNC_RATE_HZ must be in (0, 240], using default");
                }
            } else {
                tracing::warn!("Invalid NETSYNC_SYNC_RATE_HZ '{}', using default", rate);
            }
        }

        if let Some(flag) = lookup("NETSYNC_INTERPOLATE") {
            match parse_bool(&flag) {
                Some(parsed) => config.interpolate = parsed,
                None => tracing::warn!("Invalid NETSYNC_INTERPOLATE '{}', using default", flag),
            }
        }

        if let Some(flag) = lookup("NETSYNC_EXTRAPOLATE") {
            match parse_bool(&flag) {
                Some(parsed) => config.extrapolate = parsed,
                None => tracing::warn!("Invalid NETSYNC_EXTRAPOLATE '{}', using default", flag),
            }
        }

        if let Some(capacity) = lookup("NETSYNC_INBOX_CAPACITY") {
            if let Ok(parsed) = capacity.parse::<usize>() {
                if parsed > 0 {
                    config.inbox_capacity = parsed;
                } else {
                    tracing::warn!("NETSYNC_INBOX_CAPACITY must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid NETSYNC_INBOX_CAPACITY '{}', using default", capacity);
            }
        }

        if let Some(delay) = lookup("NETSYNC_RENDER_DELAY_MS") {
            if let Ok(parsed) = delay.parse::<u64>() {
                config.render_delay_ms = parsed;
            } else {
                tracing::warn!("Invalid NETSYNC_RENDER_DELAY_MS '{}', using default", delay);
            }
        }

        if let Some(port) = lookup("NETSYNC_METRICS_PORT") {
            match port.parse::<u16>() {
                Ok(parsed) if parsed > 0 => config.metrics_port = Some(parsed),
                _ => tracing::warn!("Invalid NETSYNC_METRICS_PORT '{}', metrics disabled", port),
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if !(2..=10000).contains(&self.buffer_capacity) {
            return Err("buffer_capacity must be 2-10000".to_string());
        }
        if !(self.sync_rate_hz > 0.0 && self.sync_rate_hz <= 240.0) {
            return Err("sync_rate_hz must be in (0, 240]".to_string());
        }
        if self.inbox_capacity == 0 {
            return Err("inbox_capacity must be at least 1".to_string());
        }
        Ok(())
    }

    /// Settings handed to each entity's sync channel
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            sync_rate_hz: self.sync_rate_hz,
            interpolate: self.interpolate,
            extrapolate: self.extrapolate,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.buffer_capacity, 60);
        assert_eq!(config.sync_rate_hz, 30.0);
        assert!(config.interpolate);
        assert!(!config.extrapolate);
        assert_eq!(config.metrics_port, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = SyncConfig::load_or_default();
        assert!(config.buffer_capacity >= 2);
    }

    #[test]
    fn test_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("NETSYNC_BUFFER_CAPACITY", "120"),
            ("NETSYNC_SYNC_RATE_HZ", "20"),
            ("NETSYNC_INTERPOLATE", "false"),
            ("NETSYNC_EXTRAPOLATE", "1"),
            ("NETSYNC_INBOX_CAPACITY", "64"),
            ("NETSYNC_RENDER_DELAY_MS", "50"),
            ("NETSYNC_METRICS_PORT", "9100"),
        ]));
        assert_eq!(config.buffer_capacity, 120);
        assert_eq!(config.sync_rate_hz, 20.0);
        assert!(!config.interpolate);
        assert!(config.extrapolate);
        assert_eq!(config.inbox_capacity, 64);
        assert_eq!(config.render_delay_ms, 50);
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("NETSYNC_BUFFER_CAPACITY", "1"),
            ("NETSYNC_SYNC_RATE_HZ", "0"),
            ("NETSYNC_INTERPOLATE", "maybe"),
            ("NETSYNC_INBOX_CAPACITY", "lots"),
            ("NETSYNC_METRICS_PORT", "0"),
        ]));
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_rate() {
        let config = SyncConfig {
            sync_rate_hz: 500.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sync_settings() {
        let settings = SyncConfig::default().sync_settings();
        assert_eq!(settings, SyncSettings::default());
    }
}
