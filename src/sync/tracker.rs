use dashmap::DashMap;
use std::sync::{Arc, Mutex};

use super::mask::SyncMask;
use super::schema::SyncSchema;
use crate::protocol::ConnectionId;

/// Last state seen by one client, guarded by a per-client lock.
struct ClientSyncState {
    last_values: Vec<Option<serde_json::Value>>,
    emitted_once: Vec<bool>,
}

impl ClientSyncState {
    fn new(field_count: usize) -> Self {
        Self {
            last_values: vec![None; field_count],
            emitted_once: vec![false; field_count],
        }
    }
}

/// Per-entity-type diff engine: computes the changed-field bitmask and the
/// value map for one recipient.
///
/// State is keyed by client id and created lazily on the first sync toward
/// that client. Values are owned JSON trees, so updating `last_values`
/// duplicates arrays instead of aliasing the entity's storage.
pub struct SyncTracker<E> {
    schema: Arc<SyncSchema<E>>,
    states: DashMap<ConnectionId, Mutex<ClientSyncState>>,
}

impl<E> SyncTracker<E> {
    pub fn new(schema: Arc<SyncSchema<E>>) -> Self {
        Self {
            schema,
            states: DashMap::new(),
        }
    }

    pub fn schema(&self) -> &SyncSchema<E> {
        &self.schema
    }

    /// Drop a client's delta context, e.g. when its connection is removed.
    pub fn forget_client(&self, client_id: &ConnectionId) {
        self.states.remove(client_id);
    }

    pub fn tracked_clients(&self) -> usize {
        self.states.len()
    }

    /// Compute the fields of `entity` that `client_id` has not seen yet.
    ///
    /// A field's bit is set when `force_all` is given, or when its value
    /// differs from the client's last-seen copy and its declared frequency
    /// fires on `current_tick`. `sync_always` fields are never emitted on
    /// their own; they ride along exactly when at least one regular field is
    /// emitted in the same call. `one_time` fields stop re-firing once their
    /// value has been recorded, `force_all` included.
    pub fn changed_data(
        &self,
        entity: &E,
        client_id: ConnectionId,
        current_tick: u64,
        force_all: bool,
    ) -> (SyncMask, serde_json::Map<String, serde_json::Value>) {
        let field_count = self.schema.field_count();
        let state_entry = self
            .states
            .entry(client_id)
            .or_insert_with(|| Mutex::new(ClientSyncState::new(field_count)));
        let mut state = state_entry.lock().expect("client sync state lock");

        let mut mask = SyncMask::new(field_count);
        let mut changed = serde_json::Map::new();
        let mut always_fields: Vec<(usize, serde_json::Value)> = Vec::new();
        let mut regular_emitted = false;

        for (i, spec) in self.schema.fields().iter().enumerate() {
            let new_value = spec.value_of(entity);

            if spec.options.sync_always {
                always_fields.push((i, new_value));
                continue;
            }

            let value_changed = state.last_values[i].as_ref() != Some(&new_value);
            if spec.options.one_time && state.emitted_once[i] && !value_changed {
                continue;
            }

            let frequency_fires = spec.options.frequency == 0
                || current_tick % spec.options.frequency == 0;
            let should_sync = force_all || (value_changed && frequency_fires);
            if !should_sync {
                continue;
            }

            mask.set(spec.bit_index);
            changed.insert(spec.name.clone(), new_value.clone());
            state.last_values[i] = Some(new_value);
            state.emitted_once[i] = true;
            regular_emitted = true;
        }

        // Always-synced fields piggyback on any regular emission.
        if regular_emitted {
            for (i, value) in always_fields {
                let spec = &self.schema.fields()[i];
                mask.set(spec.bit_index);
                changed.insert(spec.name.clone(), value.clone());
                state.last_values[i] = Some(value);
                state.emitted_once[i] = true;
            }
        }

        (mask, changed)
    }
}
