//! Delta-synchronization scenarios for altruist-server.
//!
//! These integration tests verify the changed-field computation end to end:
//! bitmask contents, always-field coupling, per-field frequencies and the
//! per-client delta context.

use altruist_server::sync::{FieldOptions, SyncSchema, SyncTracker};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct PlayerEntity {
    position: [f64; 2],
    rotation: f64,
    level: u32,
}

impl PlayerEntity {
    fn new() -> Self {
        Self {
            position: [0.0, 0.0],
            rotation: 0.0,
            level: 1,
        }
    }
}

/// `Position` (bit 0, every tick), `Rotation` (bit 1, sync-always),
/// `Level` (bit 2, configurable frequency).
fn tracker(level_frequency: u64) -> SyncTracker<PlayerEntity> {
    let schema = SyncSchema::<PlayerEntity>::builder("PlayerEntity")
        .field("Position", 0, FieldOptions::every_tick(), |p| {
            json!(p.position)
        })
        .field("Rotation", 1, FieldOptions::always(), |p| json!(p.rotation))
        .field(
            "Level",
            2,
            FieldOptions::every_n_ticks(level_frequency),
            |p| json!(p.level),
        )
        .build()
        .expect("schema builds");
    SyncTracker::new(Arc::new(schema))
}

// ===========================================================================
// A. Diff computation
// ===========================================================================

/// S1: mutate Position and sync at tick 10; bits 0 and 1 are set and the
/// data map carries Position plus the riding-along Rotation. A second call
/// without mutation yields an empty mask and emits nothing.
#[test]
fn position_change_couples_rotation_then_goes_quiet() {
    let tracker = tracker(0);
    let client = Uuid::new_v4();
    let mut entity = PlayerEntity::new();

    // Prime the client with the initial snapshot.
    let (mask, _) = tracker.changed_data(&entity, client, 9, false);
    assert!(mask.any());

    entity.position = [1.0, 0.0];
    let (mask, data) = tracker.changed_data(&entity, client, 10, false);

    assert!(mask.is_set(0));
    assert!(mask.is_set(1));
    assert!(!mask.is_set(2));
    assert_eq!(data.len(), 2);
    assert_eq!(data["Position"], json!([1.0, 0.0]));
    assert_eq!(data["Rotation"], json!(0.0));

    let (mask, data) = tracker.changed_data(&entity, client, 11, false);
    assert!(!mask.any(), "unchanged entity must yield an all-zero mask");
    assert!(data.is_empty());
}

/// S2: a field with frequency 3 mutated at tick 5 is withheld (5 % 3 != 0)
/// and goes out at tick 6.
#[test]
fn frequency_field_waits_for_matching_tick() {
    let tracker = tracker(3);
    let client = Uuid::new_v4();
    let mut entity = PlayerEntity::new();
    tracker.changed_data(&entity, client, 0, false);

    entity.level = 2;
    let (mask, data) = tracker.changed_data(&entity, client, 5, false);
    assert!(!mask.is_set(2));
    assert!(!data.contains_key("Level"));

    let (mask, data) = tracker.changed_data(&entity, client, 6, false);
    assert!(mask.is_set(2));
    assert_eq!(data["Level"], json!(2));
}

/// Sync diff idempotence: two calls without mutation, the second mask is
/// all-zero regardless of tick.
#[test]
fn repeated_sync_is_idempotent() {
    let tracker = tracker(0);
    let client = Uuid::new_v4();
    let entity = PlayerEntity::new();

    let (first, _) = tracker.changed_data(&entity, client, 1, false);
    assert!(first.any(), "first sync carries the initial snapshot");

    for tick in 2..10 {
        let (mask, data) = tracker.changed_data(&entity, client, tick, false);
        assert!(!mask.any(), "tick {tick} produced a non-empty mask");
        assert!(data.is_empty());
    }
}

/// Always-coupling: the sync-always field is emitted iff at least one
/// regular field went out in the same call.
#[test]
fn always_field_emits_only_with_regular_traffic() {
    let tracker = tracker(0);
    let client = Uuid::new_v4();
    let mut entity = PlayerEntity::new();
    tracker.changed_data(&entity, client, 1, false);

    // Rotation alone changes: nothing may go out.
    entity.rotation = 45.0;
    let (mask, _) = tracker.changed_data(&entity, client, 2, false);
    assert!(!mask.any());

    // A regular change pulls the pending rotation with it.
    entity.level = 3;
    let (mask, data) = tracker.changed_data(&entity, client, 3, false);
    assert!(mask.is_set(2));
    assert!(mask.is_set(1));
    assert_eq!(data["Rotation"], json!(45.0));
}

/// The mask length follows the schema: ceil(fieldCount / 64) words.
#[test]
fn mask_is_packed_into_machine_words() {
    let tracker = tracker(0);
    let client = Uuid::new_v4();
    let entity = PlayerEntity::new();

    let (mask, _) = tracker.changed_data(&entity, client, 1, true);
    assert_eq!(mask.field_count(), 3);
    assert_eq!(mask.words().len(), 1);
    assert_eq!(mask.count(), 3);
}

// ===========================================================================
// B. Per-client state
// ===========================================================================

/// Delta context is per client: a newcomer receives the full changed set
/// even after another client was brought up to date.
#[test]
fn newcomer_gets_full_state_independently() {
    let tracker = tracker(0);
    let veteran = Uuid::new_v4();
    let newcomer = Uuid::new_v4();
    let mut entity = PlayerEntity::new();

    tracker.changed_data(&entity, veteran, 1, false);
    entity.position = [9.0, 9.0];
    tracker.changed_data(&entity, veteran, 2, false);

    let (mask, data) = tracker.changed_data(&entity, newcomer, 3, false);
    assert!(mask.is_set(0));
    assert!(mask.is_set(2));
    assert_eq!(data["Position"], json!([9.0, 9.0]));

    let (mask, _) = tracker.changed_data(&entity, veteran, 3, false);
    assert!(!mask.any());
}

/// Inheritance flattening: base-class bits precede derived bits and both
/// diff correctly through the projection.
#[test]
fn inherited_schema_flattens_base_bits_first() {
    struct BaseEntity {
        name: String,
    }
    struct NpcEntity {
        base: BaseEntity,
        aggression: u32,
    }

    let base_schema = SyncSchema::<BaseEntity>::builder("BaseEntity")
        .field("Name", 0, FieldOptions::once(), |b| json!(b.name))
        .build()
        .unwrap();

    let schema = SyncSchema::<NpcEntity>::builder("NpcEntity")
        .inherit(&base_schema, |npc: &NpcEntity| &npc.base)
        .field("Aggression", 0, FieldOptions::every_tick(), |npc| {
            json!(npc.aggression)
        })
        .build()
        .unwrap();
    assert_eq!(schema.fields()[0].name, "Name");
    assert_eq!(schema.fields()[1].bit_index, 1);

    let tracker = SyncTracker::new(Arc::new(schema));
    let client = Uuid::new_v4();
    let mut npc = NpcEntity {
        base: BaseEntity {
            name: "grunt".to_string(),
        },
        aggression: 1,
    };

    let (mask, data) = tracker.changed_data(&npc, client, 1, false);
    assert!(mask.is_set(0));
    assert!(mask.is_set(1));
    assert_eq!(data["Name"], json!("grunt"));

    npc.aggression = 5;
    let (mask, data) = tracker.changed_data(&npc, client, 2, false);
    assert!(!mask.is_set(0), "one-time name must not re-fire");
    assert!(mask.is_set(1));
    assert_eq!(data["Aggression"], json!(5));
}
