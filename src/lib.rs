//! netsync
//!
//! State synchronization for multiplayer 3D clients: a compact binary
//! envelope around JSON payloads, a catalog of message kinds, per-entity
//! pose buffers that hide network jitter by interpolating, and a send-rate
//! policy for locally owned entities.
//!
//! # Features
//!
//! - `metrics_server` - Prometheus/JSON scrape endpoint over tokio (enabled by default)

pub mod config;
pub mod metrics;
pub mod net;
pub mod sync;
pub mod util;

pub use config::SyncConfig;
pub use net::codec::{decode, encode, CodecError};
pub use net::dispatch::{Dispatcher, SyncEvent};
pub use net::protocol::{Message, MessageType, Payload};
pub use sync::state_buffer::{EntityStateBuffer, Pose};
