//! Spatial world model.
//!
//! Worlds are partitioned into fixed-cell grids indexed by a spatial hash so
//! nearby-object queries and region broadcasts stay proportional to occupied
//! cells. The coordinator owns every registered world and is stepped by the
//! physics thread.

mod coordinator;
mod grid;
mod manager;
mod partition;

pub use coordinator::{GameWorldCoordinator, WorldError};
pub use grid::{ObjectMetadata, SpatialGridIndex};
pub use manager::{GameWorldManager, World, WorldPartitioner};
pub use partition::{Partition, PartitionIndex};
