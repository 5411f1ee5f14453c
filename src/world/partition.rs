use std::sync::Mutex;
use uuid::Uuid;

use super::grid::{ObjectMetadata, SpatialGridIndex};
use crate::protocol::RoomId;

/// Grid column/row address of a partition inside its world.
pub type PartitionIndex = (u32, u32);

/// An axis-aligned bucket of a world, wrapping one spatial grid.
#[derive(Debug)]
pub struct Partition {
    pub index: PartitionIndex,
    /// Top-left corner in world coordinates.
    pub position: (f32, f32),
    pub size: (f32, f32),
    pub epicenter: (f32, f32),
    grid: Mutex<SpatialGridIndex>,
}

impl Partition {
    pub fn new(index: PartitionIndex, position: (f32, f32), size: (f32, f32), cell_size: f32) -> Self {
        Self {
            index,
            position,
            size,
            epicenter: (position.0 + size.0 / 2.0, position.1 + size.1 / 2.0),
            grid: Mutex::new(SpatialGridIndex::new(cell_size)),
        }
    }

    /// Whether this partition's box intersects the aabb `[min, max]`.
    pub fn intersects_aabb(&self, min: (f32, f32), max: (f32, f32)) -> bool {
        let (px, py) = self.position;
        let (pw, ph) = self.size;
        min.0 <= px + pw && max.0 >= px && min.1 <= py + ph && max.1 >= py
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        self.intersects_aabb((x, y), (x, y))
    }

    pub fn add(&self, meta: ObjectMetadata) {
        self.grid.lock().expect("partition grid lock").add(meta);
    }

    pub fn remove(&self, object_type: &str, instance_id: &Uuid) {
        self.grid
            .lock()
            .expect("partition grid lock")
            .remove(object_type, instance_id);
    }

    pub fn contains_instance(&self, instance_id: &Uuid) -> bool {
        self.grid
            .lock()
            .expect("partition grid lock")
            .contains(instance_id)
    }

    pub fn get(&self, instance_id: &Uuid) -> Option<ObjectMetadata> {
        self.grid
            .lock()
            .expect("partition grid lock")
            .get(instance_id)
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.grid.lock().expect("partition grid lock").len()
    }

    pub fn query(
        &self,
        object_type: &str,
        x: f32,
        y: f32,
        radius: f32,
        room_id: &RoomId,
    ) -> Vec<ObjectMetadata> {
        self.grid
            .lock()
            .expect("partition grid lock")
            .query(object_type, x, y, radius, room_id)
    }
}
