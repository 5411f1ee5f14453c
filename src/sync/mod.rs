//! Delta synchronization engine.
//!
//! Entity types register their synced fields once at boot through
//! [`SyncSchema::builder`]; the steady state walks the recorded getter
//! closures, compares against each client's last-seen values and produces a
//! compact changed-field bitmask plus the value map for the sync packet.

mod mask;
mod schema;
mod tracker;

pub use mask::SyncMask;
pub use schema::{FieldOptions, SyncFieldSpec, SyncSchema, SyncSchemaBuilder};
pub use tracker::SyncTracker;

use crate::protocol::ConnectionId;

/// Schema registration failures, reported at startup.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("entity type {entity_type}: bit index {bit_index} declared twice")]
    DuplicateBitIndex {
        entity_type: String,
        bit_index: usize,
    },
    #[error("entity type {entity_type}: field {field} declared twice")]
    DuplicateFieldName { entity_type: String, field: String },
    #[error("entity type {entity_type}: bit indices must be contiguous from 0")]
    SparseBitLayout { entity_type: String },
}

/// Capability set the router needs from a sync target.
pub trait Synchronizable {
    /// The owning client; used as the delta-context key.
    fn connection_id(&self) -> ConnectionId;
}
