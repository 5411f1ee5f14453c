use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::protocol::{ConnectionId, RoomId};

/// Everything the world tracks about one placed object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMetadata {
    pub object_type: String,
    pub instance_id: Uuid,
    pub room_id: Option<RoomId>,
    /// Clients that should receive region broadcasts about this object.
    pub receiver_client_ids: HashSet<ConnectionId>,
    pub position: (f32, f32),
    pub rotation: f32,
}

impl ObjectMetadata {
    pub fn new(object_type: impl Into<String>, instance_id: Uuid, position: (f32, f32)) -> Self {
        Self {
            object_type: object_type.into(),
            instance_id,
            room_id: None,
            receiver_client_ids: HashSet::new(),
            position,
            rotation: 0.0,
        }
    }

    pub fn in_room(mut self, room_id: RoomId) -> Self {
        self.room_id = Some(room_id);
        self
    }
}

/// Fixed-cell spatial hash over one partition's area.
///
/// Three indices are maintained together: cell → instances, type → instances
/// and instance → metadata, so add/remove stay O(1) and queries touch only
/// occupied cells.
#[derive(Debug)]
pub struct SpatialGridIndex {
    cell_size: f32,
    grid: HashMap<(i32, i32), HashSet<Uuid>>,
    instances: HashMap<Uuid, ObjectMetadata>,
    types: HashMap<String, HashSet<Uuid>>,
}

impl SpatialGridIndex {
    pub fn new(cell_size: f32) -> Self {
        debug_assert!(cell_size > 0.0);
        Self {
            cell_size,
            grid: HashMap::new(),
            instances: HashMap::new(),
            types: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn cell_key(&self, x: f32, y: f32) -> (i32, i32) {
        (
            (x / self.cell_size).floor() as i32,
            (y / self.cell_size).floor() as i32,
        )
    }

    /// Insert or replace an object. Re-adding an id moves it to its new cell.
    pub fn add(&mut self, meta: ObjectMetadata) {
        self.remove(&meta.object_type.clone(), &meta.instance_id);

        let key = self.cell_key(meta.position.0, meta.position.1);
        self.grid.entry(key).or_default().insert(meta.instance_id);
        self.types
            .entry(meta.object_type.clone())
            .or_default()
            .insert(meta.instance_id);
        self.instances.insert(meta.instance_id, meta);
    }

    /// Remove an object from all three indices. No-op for unknown ids.
    pub fn remove(&mut self, object_type: &str, instance_id: &Uuid) {
        let Some(meta) = self.instances.remove(instance_id) else {
            return;
        };

        let key = self.cell_key(meta.position.0, meta.position.1);
        if let Some(cell) = self.grid.get_mut(&key) {
            cell.remove(instance_id);
            if cell.is_empty() {
                self.grid.remove(&key);
            }
        }
        // The stored type wins over the caller's in case they disagree.
        let stored_type = if meta.object_type == object_type {
            object_type
        } else {
            meta.object_type.as_str()
        };
        if let Some(ids) = self.types.get_mut(stored_type) {
            ids.remove(instance_id);
            if ids.is_empty() {
                self.types.remove(stored_type);
            }
        }
    }

    pub fn contains(&self, instance_id: &Uuid) -> bool {
        self.instances.contains_key(instance_id)
    }

    pub fn get(&self, instance_id: &Uuid) -> Option<&ObjectMetadata> {
        self.instances.get(instance_id)
    }

    pub fn instances_of_type(&self, object_type: &str) -> usize {
        self.types.get(object_type).map_or(0, HashSet::len)
    }

    /// Nearby-object query: iterate the cells overlapping the bounding box
    /// `[x±r, y±r]`, then filter by room and exact squared distance.
    ///
    /// Callers rely on the exact distance filter, not cell coverage: every
    /// returned object satisfies `dx² + dy² ≤ r²`.
    pub fn query(
        &self,
        object_type: &str,
        x: f32,
        y: f32,
        radius: f32,
        room_id: &RoomId,
    ) -> Vec<ObjectMetadata> {
        let mut results = Vec::new();
        if radius < 0.0 {
            return results;
        }

        let (min_col, min_row) = self.cell_key(x - radius, y - radius);
        let (max_col, max_row) = self.cell_key(x + radius, y + radius);
        let radius_sq = radius * radius;

        for col in min_col..=max_col {
            for row in min_row..=max_row {
                let Some(cell) = self.grid.get(&(col, row)) else {
                    continue;
                };
                for instance_id in cell {
                    let Some(meta) = self.instances.get(instance_id) else {
                        continue;
                    };
                    if meta.object_type != object_type {
                        continue;
                    }
                    if meta.room_id.as_ref() != Some(room_id) {
                        continue;
                    }
                    let dx = meta.position.0 - x;
                    let dy = meta.position.1 - y;
                    if dx * dx + dy * dy <= radius_sq {
                        results.push(meta.clone());
                    }
                }
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(object_type: &str, room: RoomId, x: f32, y: f32) -> ObjectMetadata {
        ObjectMetadata::new(object_type, Uuid::new_v4(), (x, y)).in_room(room)
    }

    #[test]
    fn query_filters_by_exact_distance() {
        let mut index = SpatialGridIndex::new(16.0);
        let room = Uuid::new_v4();
        let near = object("npc", room, 10.0, 10.0);
        let far = object("npc", room, 100.0, 10.0);
        index.add(near.clone());
        index.add(far.clone());

        let close_hits = index.query("npc", 10.0, 10.0, 20.0, &room);
        assert_eq!(close_hits.len(), 1);
        assert_eq!(close_hits[0].instance_id, near.instance_id);

        let wide_hits = index.query("npc", 10.0, 10.0, 95.0, &room);
        assert_eq!(wide_hits.len(), 2);
    }

    #[test]
    fn query_filters_by_type_and_room() {
        let mut index = SpatialGridIndex::new(16.0);
        let room_a = Uuid::new_v4();
        let room_b = Uuid::new_v4();
        index.add(object("npc", room_a, 5.0, 5.0));
        index.add(object("loot", room_a, 5.0, 5.0));
        index.add(object("npc", room_b, 5.0, 5.0));

        let hits = index.query("npc", 5.0, 5.0, 10.0, &room_a);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].object_type, "npc");
        assert_eq!(hits[0].room_id, Some(room_a));
    }

    #[test]
    fn boundary_distance_is_inclusive() {
        let mut index = SpatialGridIndex::new(8.0);
        let room = Uuid::new_v4();
        index.add(object("npc", room, 3.0, 4.0));

        // Distance from origin is exactly 5.
        assert_eq!(index.query("npc", 0.0, 0.0, 5.0, &room).len(), 1);
        assert_eq!(index.query("npc", 0.0, 0.0, 4.99, &room).len(), 0);
    }

    #[test]
    fn remove_erases_all_indices() {
        let mut index = SpatialGridIndex::new(16.0);
        let room = Uuid::new_v4();
        let meta = object("npc", room, 1.0, 1.0);
        let id = meta.instance_id;
        index.add(meta);

        index.remove("npc", &id);
        assert!(!index.contains(&id));
        assert_eq!(index.instances_of_type("npc"), 0);
        assert!(index.query("npc", 1.0, 1.0, 5.0, &room).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn re_adding_moves_between_cells() {
        let mut index = SpatialGridIndex::new(4.0);
        let room = Uuid::new_v4();
        let mut meta = object("npc", room, 1.0, 1.0);
        index.add(meta.clone());

        meta.position = (100.0, 100.0);
        index.add(meta.clone());

        assert_eq!(index.len(), 1);
        assert!(index.query("npc", 1.0, 1.0, 2.0, &room).is_empty());
        assert_eq!(index.query("npc", 100.0, 100.0, 2.0, &room).len(), 1);
    }

    #[test]
    fn negative_coordinates_hash_correctly() {
        let mut index = SpatialGridIndex::new(16.0);
        let room = Uuid::new_v4();
        index.add(object("npc", room, -10.0, -10.0));

        assert_eq!(index.query("npc", -10.0, -10.0, 1.0, &room).len(), 1);
        assert!(index.query("npc", 10.0, 10.0, 1.0, &room).is_empty());
    }
}
