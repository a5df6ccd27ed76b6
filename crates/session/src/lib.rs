//! Session registry: which participants are connected, which world each one
//! is in, and where.
//!
//! # Invariants
//! - Participants reference worlds weakly; only world owners keep them alive.
//! - A participant is an entity of exactly the world it reports.
//! - Nobody joins a world that has already been closed.

mod player;

pub use player::{Participant, PlayerList, SessionError, SessionRegistry};
