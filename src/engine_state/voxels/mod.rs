//! # Voxel Data
//!
//! Everything the streaming engine knows about the world itself.
//!
//! ## Architecture
//!
//! * **Block**: the block registry and the six block sides
//! * **Chunk**: coordinate keys, dense block grids and the chunk entity with its lifecycle
//! * **Generation**: stage A, turning a seed and coordinate into a block grid
//! * **Visibility**: the square working set around the viewpoint
//! * **World**: the chunk cache reconciled against the working set
//! * **Tasks**: pipeline work scheduled on workers
//!
//! ## Data Flow
//!
//! 1. The viewpoint moves into a new chunk and the visibility calculator emits a new working set
//! 2. The chunk store evicts what left the set and creates what entered it
//! 3. New chunks are queued for generation and meshing
//! 4. Finished meshes are published to their chunks on the control thread

pub mod block;
pub mod chunk;
pub mod generation;
pub mod tasks;
pub mod visibility;
pub mod world;
pub mod world_type;
