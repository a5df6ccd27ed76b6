//! World lifecycle manager: the registry of loaded worlds.
//!
//! # Invariants
//! - A name is registered iff a world with that name is loaded and usable.
//! - The primary world is never registered and can never be unloaded.
//! - A world leaves the registry only after its participants were migrated.
//! - Storage I/O never runs while the registry lock is held.

mod config;
mod error;
mod manager;

pub use config::{ConfigError, ManagerConfig, FROZEN_TIME, LOADED_WORLD_SPAWN};
pub use error::ManagerError;
pub use manager::WorldManager;
