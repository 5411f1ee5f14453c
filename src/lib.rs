#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Altruist Server
//!
//! An on-premise real-time multiplayer game server framework: a
//! deterministic tick engine, a packet router with delta synchronization,
//! an authoritative connection/room store and spatially partitioned worlds,
//! with optional cross-process fan-out over a shared message bridge.

/// Inter-process message bridge (shared list + wake notifications)
pub mod bridge;

/// Packet wire codecs (JSON text, MessagePack binary)
pub mod codec;

/// Server configuration and config.json loading
pub mod config;

/// Tick engine: cyclic jobs, dynamic tasks, cron, physics cadence
pub mod engine;

/// Structured logging configuration
pub mod logging;

/// Metrics collection and reporting
pub mod metrics;

/// Portals and gate dispatch
pub mod portal;

/// Packet protocol definitions
pub mod protocol;

/// Retry logic utilities
pub mod retry;

/// Unicast, room-cast, broadcast and sync senders
pub mod router;

/// Main server orchestration
pub mod server;

/// Connection and room store (memory tier + optional shared tier)
pub mod store;

/// Delta synchronization engine
pub mod sync;

/// WebSocket transport surface
pub mod transport;

/// Spatial worlds: partitions, grids, physics step
pub mod world;
