//! # Block Module
//!
//! Block identifiers and the registry that assigns them. Ids are dense `u32`
//! values shared byte-for-byte by the generator and the mesher; id 0 is
//! always air.

pub mod block_side;

use std::collections::HashMap;

use phf::phf_ordered_map;

use crate::error::RegistryError;

/// Dense numeric id of a block type as stored in chunk grids and GPU buffers.
pub type BlockId = u32;

/// The id reserved for empty space.
pub const AIR: BlockId = 0;

/// Name of the reserved empty block.
pub const AIR_NAME: &str = "air";

/// Name of the block used as the priming sentinel.
pub const BEDROCK_NAME: &str = "bedrock";

/// Broad grouping of a block, used by hosts for texturing and tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockCategory {
    /// Empty space
    Air,
    /// Natural ground layers
    Sediment,
    /// Trees and plants
    Wood,
    /// Mineral veins
    Ore,
    /// Fluids and everything else
    Other,
}

/// Built-in catalogue in id order (air is prepended at id 0).
pub static DEFAULT_BLOCKS: phf::OrderedMap<&'static str, BlockCategory> = phf_ordered_map! {
    "bedrock" => BlockCategory::Sediment,
    "stone" => BlockCategory::Sediment,
    "dirt" => BlockCategory::Sediment,
    "grass" => BlockCategory::Sediment,
    "sand" => BlockCategory::Sediment,
    "gravel" => BlockCategory::Sediment,
    "clay" => BlockCategory::Sediment,
    "snow" => BlockCategory::Sediment,
    "oak_log" => BlockCategory::Wood,
    "oak_leaves" => BlockCategory::Wood,
    "birch_log" => BlockCategory::Wood,
    "birch_leaves" => BlockCategory::Wood,
    "coal_ore" => BlockCategory::Ore,
    "iron_ore" => BlockCategory::Ore,
    "gold_ore" => BlockCategory::Ore,
    "diamond_ore" => BlockCategory::Ore,
    "water" => BlockCategory::Other,
    "glass" => BlockCategory::Other,
};

/// Bijective mapping between block names and dense ids.
///
/// Built explicitly and shared behind an `Arc` with every consumer; there is
/// no process-wide catalogue.
#[derive(Debug, Clone)]
pub struct BlockRegistry {
    names: Vec<String>,
    categories: Vec<BlockCategory>,
    ids: HashMap<String, BlockId>,
}

impl BlockRegistry {
    /// Builds a registry from block names in id order, starting at id 1.
    ///
    /// Every block gets [`BlockCategory::Other`]; use
    /// [`BlockRegistry::with_categories`] to supply categories.
    pub fn new<I, S>(names: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_categories(names.into_iter().map(|name| (name, BlockCategory::Other)))
    }

    /// Builds a registry from `(name, category)` pairs in id order.
    ///
    /// # Errors
    /// Fails on a duplicate name or an explicit `air` entry.
    pub fn with_categories<I, S>(blocks: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (S, BlockCategory)>,
        S: Into<String>,
    {
        let mut registry = BlockRegistry {
            names: vec![AIR_NAME.to_string()],
            categories: vec![BlockCategory::Air],
            ids: HashMap::from([(AIR_NAME.to_string(), AIR)]),
        };

        for (name, category) in blocks {
            let name = name.into();
            if name == AIR_NAME {
                return Err(RegistryError::ReservedAir);
            }
            if registry.ids.contains_key(&name) {
                return Err(RegistryError::Duplicate(name));
            }
            let id = registry.names.len() as BlockId;
            registry.ids.insert(name.clone(), id);
            registry.names.push(name);
            registry.categories.push(category);
        }

        Ok(registry)
    }

    /// Id assigned to `name`, if registered.
    pub fn id_of(&self, name: &str) -> Option<BlockId> {
        self.ids.get(name).copied()
    }

    /// Name registered for `id`, if any.
    pub fn name_of(&self, id: BlockId) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    /// Category registered for `id`, if any.
    pub fn category_of(&self, id: BlockId) -> Option<BlockCategory> {
        self.categories.get(id as usize).copied()
    }

    /// The bedrock sentinel id, when the catalogue defines bedrock.
    pub fn bedrock(&self) -> Option<BlockId> {
        self.id_of(BEDROCK_NAME)
    }

    /// Everything except air occludes.
    pub fn is_solid(id: BlockId) -> bool {
        id != AIR
    }

    /// Number of registered ids, air included.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// A registry always holds air, so it is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Names in id order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        let mut registry = BlockRegistry {
            names: vec![AIR_NAME.to_string()],
            categories: vec![BlockCategory::Air],
            ids: HashMap::from([(AIR_NAME.to_string(), AIR)]),
        };
        for (name, category) in DEFAULT_BLOCKS.entries() {
            let id = registry.names.len() as BlockId;
            registry.ids.insert(name.to_string(), id);
            registry.names.push(name.to_string());
            registry.categories.push(*category);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn air_is_always_zero() {
        let registry = BlockRegistry::new(["stone", "dirt"]).unwrap();
        assert_eq!(registry.id_of("air"), Some(AIR));
        assert_eq!(registry.id_of("stone"), Some(1));
        assert_eq!(registry.id_of("dirt"), Some(2));
        assert_eq!(registry.name_of(0), Some("air"));
    }

    #[test]
    fn names_and_ids_are_a_bijection() {
        let registry = BlockRegistry::default();
        for (id, name) in registry.names().enumerate() {
            assert_eq!(registry.id_of(name), Some(id as BlockId));
        }
        assert_eq!(registry.len(), DEFAULT_BLOCKS.len() + 1);
        assert_eq!(registry.bedrock(), Some(1));
        assert_eq!(registry.category_of(registry.id_of("iron_ore").unwrap()), Some(BlockCategory::Ore));
    }

    #[test]
    fn rejects_duplicates_and_explicit_air() {
        assert_eq!(
            BlockRegistry::new(["stone", "stone"]).unwrap_err(),
            RegistryError::Duplicate("stone".into())
        );
        assert_eq!(BlockRegistry::new(["air"]).unwrap_err(), RegistryError::ReservedAir);
    }

    #[test]
    fn registry_without_bedrock_has_no_sentinel() {
        let registry = BlockRegistry::new(["stone"]).unwrap();
        assert_eq!(registry.bedrock(), None);
        assert!(!BlockRegistry::is_solid(AIR));
        assert!(BlockRegistry::is_solid(1));
    }
}
