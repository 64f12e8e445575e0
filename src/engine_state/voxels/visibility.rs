//! # Visibility Calculator
//!
//! Computes the square working set of chunk coordinates around the viewpoint.
//! The set is enumerated ring by ring outwards from the viewpoint's chunk, so
//! creation order (and therefore FIFO generation order) starts near the
//! viewer.

use cgmath::Vector3;

use crate::engine_state::voxels::chunk::ChunkKey;

/// Tracks the viewpoint's chunk and recomputes the working set when it changes.
#[derive(Debug, Clone)]
pub struct VisibilityCalculator {
    render_distance: u32,
    last_center: Option<ChunkKey>,
}

impl VisibilityCalculator {
    /// Creates a calculator for a square of side `2 * render_distance + 1`.
    pub fn new(render_distance: u32) -> Self {
        VisibilityCalculator {
            render_distance,
            last_center: None,
        }
    }

    /// Render distance in chunks.
    pub fn render_distance(&self) -> u32 {
        self.render_distance
    }

    /// Chunk the last recomputation was centred on.
    pub fn center(&self) -> Option<ChunkKey> {
        self.last_center
    }

    /// Returns the new working set, or `None` when the viewpoint is still in
    /// the same chunk as on the previous call.
    pub fn update(&mut self, position: Vector3<f32>) -> Option<Vec<ChunkKey>> {
        let center = ChunkKey::from_world_position(position);
        if self.last_center == Some(center) {
            return None;
        }
        self.last_center = Some(center);
        Some(working_set(center, self.render_distance))
    }

    /// Forgets the last centre so the next update always recomputes.
    pub fn reset(&mut self) {
        self.last_center = None;
    }
}

/// Every key within Chebyshev distance `radius` of `center`, nearest ring first.
///
/// Ring `i` starts one step left of the previous ring's last cell and walks
/// up, right, down and left along its four edges.
pub fn working_set(center: ChunkKey, radius: u32) -> Vec<ChunkKey> {
    let side = 2 * radius as usize + 1;
    let mut keys = Vec::with_capacity(side * side);
    let (mut x, mut z) = (center.x, center.z);
    keys.push(ChunkKey::new(x, z));

    for ring in 1..=radius as i32 {
        x -= 1;
        keys.push(ChunkKey::new(x, z));
        for _ in 0..2 * (ring - 1) + 1 {
            z += 1;
            keys.push(ChunkKey::new(x, z));
        }
        for _ in 0..2 * ring {
            x += 1;
            keys.push(ChunkKey::new(x, z));
        }
        for _ in 0..2 * ring {
            z -= 1;
            keys.push(ChunkKey::new(x, z));
        }
        for _ in 0..2 * ring {
            x -= 1;
            keys.push(ChunkKey::new(x, z));
        }
    }

    keys
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn radius_zero_is_just_the_center() {
        assert_eq!(working_set(ChunkKey::new(4, -7), 0), vec![ChunkKey::new(4, -7)]);
    }

    #[test]
    fn working_set_is_complete_and_distinct() {
        for radius in 0..6u32 {
            for center in [ChunkKey::new(0, 0), ChunkKey::new(-3, 11)] {
                let keys = working_set(center, radius);
                let side = (2 * radius + 1) as usize;
                assert_eq!(keys.len(), side * side);
                let distinct: HashSet<_> = keys.iter().copied().collect();
                assert_eq!(distinct.len(), keys.len());
                assert!(keys.iter().all(|key| key.ring_distance(center) <= radius));
            }
        }
    }

    #[test]
    fn rings_are_enumerated_nearest_first() {
        let center = ChunkKey::new(1, 1);
        let distances: Vec<u32> = working_set(center, 3)
            .into_iter()
            .map(|key| key.ring_distance(center))
            .collect();
        assert!(distances.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn update_skips_movement_inside_the_same_chunk() {
        let mut calculator = VisibilityCalculator::new(1);
        assert_eq!(calculator.update(Vector3::new(1.0, 64.0, 1.0)).map(|k| k.len()), Some(9));
        assert!(calculator.update(Vector3::new(15.5, 0.0, 0.2)).is_none());
        assert!(calculator.update(Vector3::new(16.0, 0.0, 0.2)).is_some());
        assert_eq!(calculator.center(), Some(ChunkKey::new(1, 0)));
        calculator.reset();
        assert!(calculator.update(Vector3::new(16.0, 0.0, 0.2)).is_some());
    }
}
