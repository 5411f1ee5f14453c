use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::manager::GameWorldManager;
use crate::protocol::WorldIndex;

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("world index {0} is already registered")]
    DuplicateWorldIndex(WorldIndex),
    #[error("world index {0} is not registered")]
    UnknownWorldIndex(WorldIndex),
}

/// Owns every registered world and drives their physics substep.
///
/// `step` is called from the physics thread at its own cadence; handlers and
/// cyclic jobs reach managers through `get`.
#[derive(Default)]
pub struct GameWorldCoordinator {
    worlds: DashMap<WorldIndex, Arc<GameWorldManager>>,
}

impl GameWorldCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a world; duplicate indices are a startup validation error.
    pub fn register(&self, manager: GameWorldManager) -> Result<Arc<GameWorldManager>, WorldError> {
        let index = manager.world().index;
        let manager = Arc::new(manager);
        match self.worlds.entry(index) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(WorldError::DuplicateWorldIndex(index))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                debug!(world_index = index, "Registered world");
                vacant.insert(Arc::clone(&manager));
                Ok(manager)
            }
        }
    }

    pub fn get(&self, index: WorldIndex) -> Result<Arc<GameWorldManager>, WorldError> {
        self.worlds
            .get(&index)
            .map(|entry| Arc::clone(&entry))
            .ok_or(WorldError::UnknownWorldIndex(index))
    }

    pub fn world_count(&self) -> usize {
        self.worlds.len()
    }

    /// Advance every world's physics substate by `delta_seconds`.
    pub fn step(&self, delta_seconds: f64) {
        for entry in &self.worlds {
            entry.value().step(delta_seconds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::manager::{World, WorldPartitioner};

    fn world_manager(index: WorldIndex) -> GameWorldManager {
        GameWorldManager::new(
            World {
                index,
                width: 64.0,
                height: 64.0,
            },
            WorldPartitioner::new(64.0, 64.0, 16.0),
        )
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let coordinator = GameWorldCoordinator::new();
        coordinator.register(world_manager(3)).unwrap();

        let err = coordinator.register(world_manager(3)).unwrap_err();
        assert!(matches!(err, WorldError::DuplicateWorldIndex(3)));
        assert_eq!(coordinator.world_count(), 1);
    }

    #[test]
    fn get_unknown_world_errors() {
        let coordinator = GameWorldCoordinator::new();
        assert!(matches!(
            coordinator.get(9),
            Err(WorldError::UnknownWorldIndex(9))
        ));
    }

    #[test]
    fn step_reaches_every_world() {
        let coordinator = GameWorldCoordinator::new();
        let room = uuid::Uuid::new_v4();

        let manager_a = coordinator.register(world_manager(0)).unwrap();
        let manager_b = coordinator.register(world_manager(1)).unwrap();

        for manager in [&manager_a, &manager_b] {
            let meta = crate::world::ObjectMetadata::new(
                "player",
                uuid::Uuid::new_v4(),
                (10.0, 10.0),
            )
            .in_room(room);
            let id = meta.instance_id;
            manager.place_object(meta, 0.0);
            manager.queue_move("player", id, (10.0, 0.0), 0.0);
        }

        coordinator.step(1.0);

        for manager in [manager_a, manager_b] {
            assert_eq!(manager.query("player", 20.0, 10.0, 0.5, &room).len(), 1);
        }
    }
}
