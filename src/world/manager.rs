use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::trace;
use uuid::Uuid;

use super::grid::ObjectMetadata;
use super::partition::{Partition, PartitionIndex};
use crate::protocol::{RoomId, WorldIndex};

/// Dimensions of one registered world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct World {
    pub index: WorldIndex,
    pub width: f32,
    pub height: f32,
}

/// Splits a world into a regular grid of partitions.
#[derive(Debug, Clone, Copy)]
pub struct WorldPartitioner {
    pub partition_width: f32,
    pub partition_height: f32,
    pub cell_size: f32,
}

impl WorldPartitioner {
    pub fn new(partition_width: f32, partition_height: f32, cell_size: f32) -> Self {
        Self {
            partition_width,
            partition_height,
            cell_size,
        }
    }

    /// Produce every partition covering `world`, edge partitions included
    /// even when the world size is not an exact multiple.
    pub fn partition(&self, world: &World) -> Vec<Arc<Partition>> {
        let cols = (world.width / self.partition_width).ceil().max(1.0) as u32;
        let rows = (world.height / self.partition_height).ceil().max(1.0) as u32;

        let mut partitions = Vec::with_capacity((cols * rows) as usize);
        for col in 0..cols {
            for row in 0..rows {
                let position = (
                    col as f32 * self.partition_width,
                    row as f32 * self.partition_height,
                );
                partitions.push(Arc::new(Partition::new(
                    (col, row),
                    position,
                    (self.partition_width, self.partition_height),
                    self.cell_size,
                )));
            }
        }
        partitions
    }
}

/// A movement integrated by the next physics step.
#[derive(Debug, Clone)]
struct QueuedMove {
    object_type: String,
    instance_id: Uuid,
    /// Velocity in world units per second.
    velocity: (f32, f32),
    radius: f32,
}

/// Owns one world's partitions and places, moves and queries its objects.
///
/// A dynamic object whose radius straddles partition boundaries is present in
/// every partition it overlaps; removal erases it from all of them.
pub struct GameWorldManager {
    world: World,
    partitioner: WorldPartitioner,
    partitions: Vec<Arc<Partition>>,
    by_index: DashMap<PartitionIndex, Arc<Partition>>,
    pending_moves: Mutex<Vec<QueuedMove>>,
}

impl std::fmt::Debug for GameWorldManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameWorldManager")
            .field("world", &self.world)
            .field("partitioner", &self.partitioner)
            .field("partition_count", &self.partitions.len())
            .finish_non_exhaustive()
    }
}

impl GameWorldManager {
    pub fn new(world: World, partitioner: WorldPartitioner) -> Self {
        let partitions = partitioner.partition(&world);
        let by_index = DashMap::new();
        for partition in &partitions {
            by_index.insert(partition.index, Arc::clone(partition));
        }

        Self {
            world,
            partitioner,
            partitions,
            by_index,
            pending_moves: Mutex::new(Vec::new()),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// O(1) lookup of the partition containing a point.
    pub fn find_partition_for_position(&self, x: f32, y: f32) -> Option<Arc<Partition>> {
        if x < 0.0 || y < 0.0 {
            return None;
        }
        let col = (x / self.partitioner.partition_width).floor() as u32;
        let row = (y / self.partitioner.partition_height).floor() as u32;
        self.by_index.get(&(col, row)).map(|entry| Arc::clone(&entry))
    }

    /// Every partition whose box intersects the aabb of the `radius`-disk
    /// around `(x, y)`.
    pub fn find_partitions_for_position(&self, x: f32, y: f32, radius: f32) -> Vec<Arc<Partition>> {
        let min = (x - radius, y - radius);
        let max = (x + radius, y + radius);
        self.partitions
            .iter()
            .filter(|p| p.intersects_aabb(min, max))
            .cloned()
            .collect()
    }

    /// Place an object that never moves; it lives in exactly the partition
    /// containing its position.
    pub fn place_static_object(&self, meta: ObjectMetadata) {
        self.place_object(meta, 0.0);
    }

    /// Place an object with an interaction radius; it is registered in every
    /// partition the radius overlaps.
    pub fn place_object(&self, meta: ObjectMetadata, radius: f32) {
        let (x, y) = meta.position;
        for partition in self.find_partitions_for_position(x, y, radius) {
            partition.add(meta.clone());
        }
    }

    /// Move an object: erase it from every partition currently holding it,
    /// then re-register it under the new position.
    pub fn update_object_position(&self, object_type: &str, meta: ObjectMetadata, radius: f32) {
        for partition in &self.partitions {
            if partition.contains_instance(&meta.instance_id) {
                partition.remove(object_type, &meta.instance_id);
            }
        }
        self.place_object(meta, radius);
    }

    /// Remove an object from every partition it occupies.
    pub fn remove_object(&self, object_type: &str, instance_id: &Uuid) {
        for partition in &self.partitions {
            partition.remove(object_type, instance_id);
        }
    }

    /// Current metadata for an instance, from whichever partition holds it.
    pub fn get_object(&self, instance_id: &Uuid) -> Option<ObjectMetadata> {
        self.partitions.iter().find_map(|p| p.get(instance_id))
    }

    /// Radius query across every partition the disk's aabb touches, deduped
    /// for objects straddling partition boundaries.
    pub fn query(
        &self,
        object_type: &str,
        x: f32,
        y: f32,
        radius: f32,
        room_id: &RoomId,
    ) -> Vec<ObjectMetadata> {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut results = Vec::new();
        for partition in self.find_partitions_for_position(x, y, radius) {
            for meta in partition.query(object_type, x, y, radius, room_id) {
                if seen.insert(meta.instance_id) {
                    results.push(meta);
                }
            }
        }
        results
    }

    /// Union of the receiver sets of every object in the region, for
    /// region-scoped broadcasts.
    pub fn receivers_in_region(
        &self,
        object_type: &str,
        x: f32,
        y: f32,
        radius: f32,
        room_id: &RoomId,
    ) -> HashSet<crate::protocol::ConnectionId> {
        self.query(object_type, x, y, radius, room_id)
            .into_iter()
            .flat_map(|meta| meta.receiver_client_ids)
            .collect()
    }

    /// Queue a velocity for integration by the next physics step. The last
    /// intent queued for an instance within one step wins.
    pub fn queue_move(
        &self,
        object_type: impl Into<String>,
        instance_id: Uuid,
        velocity: (f32, f32),
        radius: f32,
    ) {
        let mut pending = self.pending_moves.lock().expect("pending moves lock");
        let object_type = object_type.into();
        pending.retain(|queued| queued.instance_id != instance_id);
        pending.push(QueuedMove {
            object_type,
            instance_id,
            velocity,
            radius,
        });
    }

    /// One physics substep: integrate queued moves over `delta_seconds`,
    /// clamp to the world bounds and re-bucket the moved objects.
    pub fn step(&self, delta_seconds: f64) {
        let moves: Vec<QueuedMove> = {
            let mut pending = self.pending_moves.lock().expect("pending moves lock");
            pending.drain(..).collect()
        };

        for queued in moves {
            let Some(mut meta) = self.get_object(&queued.instance_id) else {
                trace!(instance_id = %queued.instance_id, "Dropping move for unknown object");
                continue;
            };

            let delta = delta_seconds as f32;
            meta.position.0 =
                (meta.position.0 + queued.velocity.0 * delta).clamp(0.0, self.world.width);
            meta.position.1 =
                (meta.position.1 + queued.velocity.1 * delta).clamp(0.0, self.world.height);
            self.update_object_position(&queued.object_type, meta, queued.radius);
        }
    }
}
