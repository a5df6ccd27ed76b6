//! Shared value types used across the multiworld crates.

mod types;

pub use types::{BlockPos, Dimension, EntityId, GameMode, WorldSettings};
