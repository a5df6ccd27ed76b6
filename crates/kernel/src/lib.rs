//! World Kernel: live world handles shared between the world manager and the
//! session registry.
//!
//! # Invariants
//! - A world's identity is the handle, not its name.
//! - A world releases its store exactly once.

pub mod world;

pub use world::{World, WorldConfig, WorldError};
