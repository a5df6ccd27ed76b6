use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an entity (a connected participant, usually).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// Integer block coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockPos(pub IVec3);

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self(IVec3::new(x, y, z))
    }

    /// Center of the block: the position a participant is placed at when
    /// teleported onto it.
    pub fn center(self) -> Vec3 {
        self.0.as_vec3() + Vec3::splat(0.5)
    }
}

impl std::fmt::Display for BlockPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.0.x, self.0.y, self.0.z)
    }
}

/// Persisted per-world settings seeded on every load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSettings {
    pub name: String,
    pub spawn: BlockPos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dimension {
    #[default]
    Overworld,
    Nether,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GameMode {
    #[default]
    Survival,
    Creative,
    Adventure,
    Spectator,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_uniqueness() {
        let a = EntityId::new();
        let b = EntityId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn block_center_is_offset_by_half() {
        let pos = BlockPos::new(0, -55, 0);
        assert_eq!(pos.center(), Vec3::new(0.5, -54.5, 0.5));

        let neg = BlockPos::new(-3, 10, 7);
        assert_eq!(neg.center(), Vec3::new(-2.5, 10.5, 7.5));
    }

    #[test]
    fn block_pos_display() {
        assert_eq!(BlockPos::new(1, -2, 3).to_string(), "(1, -2, 3)");
    }
}
