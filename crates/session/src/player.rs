use glam::Vec3;
use multiworld_common::EntityId;
use multiworld_kernel::{World, WorldError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

/// Errors from session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    World(#[from] WorldError),
}

/// The view of connected participants the world manager works against.
pub trait SessionRegistry: Send + Sync {
    /// Snapshot of everyone currently connected.
    fn participants(&self) -> Vec<Arc<Participant>>;

    /// Move `participant` into `world` at `position`.
    ///
    /// On error the participant is left where it was. A participant that has
    /// already left is skipped.
    fn relocate(
        &self,
        participant: &Participant,
        world: &Arc<World>,
        position: Vec3,
    ) -> Result<(), SessionError>;
}

/// A connected participant.
#[derive(Debug)]
pub struct Participant {
    id: EntityId,
    name: String,
    state: Mutex<Placement>,
}

#[derive(Debug)]
struct Placement {
    world: Weak<World>,
    position: Vec3,
    departed: bool,
}

impl Participant {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The world the participant is in, if that world is still alive.
    pub fn world(&self) -> Option<Arc<World>> {
        lock(&self.state).world.upgrade()
    }

    pub fn position(&self) -> Vec3 {
        lock(&self.state).position
    }

    /// Whether the participant is currently associated with `world`.
    ///
    /// Holds even after the world's last strong reference is gone.
    pub fn is_in(&self, world: &World) -> bool {
        std::ptr::eq(lock(&self.state).world.as_ptr(), world)
    }
}

/// In-memory [`SessionRegistry`] keyed by entity id.
#[derive(Debug, Default)]
pub struct PlayerList {
    players: RwLock<BTreeMap<EntityId, Arc<Participant>>>,
}

impl PlayerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a participant into `world` at `position`.
    ///
    /// Fails if the world has already been closed: a world that left the
    /// manager's registry must not gain new members.
    pub fn join(
        &self,
        name: impl Into<String>,
        world: &Arc<World>,
        position: Vec3,
    ) -> Result<Arc<Participant>, SessionError> {
        let id = EntityId::new();
        let participant = Arc::new(Participant {
            id,
            name: name.into(),
            state: Mutex::new(Placement {
                world: Arc::downgrade(world),
                position,
                departed: false,
            }),
        });
        // The entity and the list entry appear under one write lock, so a
        // snapshot taken after the world closes sees every member it had.
        let mut players = self.players.write().unwrap_or_else(PoisonError::into_inner);
        world.add_entity(id, position)?;
        players.insert(id, Arc::clone(&participant));
        drop(players);
        tracing::debug!(player = %participant.name, world = %world.name(), "participant joined");
        Ok(participant)
    }

    /// Disconnect a participant, taking it out of its world.
    pub fn leave(&self, id: EntityId) -> Option<Arc<Participant>> {
        let participant = self
            .players
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)?;
        let mut placement = lock(&participant.state);
        placement.departed = true;
        if let Some(world) = std::mem::take(&mut placement.world).upgrade() {
            world.remove_entity(id);
        }
        drop(placement);
        tracing::debug!(player = %participant.name, "participant left");
        Some(participant)
    }

    pub fn get(&self, id: EntityId) -> Option<Arc<Participant>> {
        self.players
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.players.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionRegistry for PlayerList {
    fn participants(&self) -> Vec<Arc<Participant>> {
        self.players
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn relocate(
        &self,
        participant: &Participant,
        world: &Arc<World>,
        position: Vec3,
    ) -> Result<(), SessionError> {
        // Held across both worlds so concurrent relocations of one
        // participant apply in some order rather than interleaving.
        let mut placement = lock(&participant.state);
        if placement.departed {
            tracing::debug!(player = %participant.name, "participant left before relocation");
            return Ok(());
        }
        world.add_entity(participant.id, position)?;
        if let Some(previous) = placement.world.upgrade() {
            if !previous.same(world) {
                previous.remove_entity(participant.id);
            }
        }
        placement.world = Arc::downgrade(world);
        placement.position = position;
        tracing::debug!(player = %participant.name, world = %world.name(), ?position, "participant relocated");
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use multiworld_common::{BlockPos, WorldSettings};
    use multiworld_kernel::WorldConfig;
    use multiworld_persist::{Compression, DiskDb, WorldDb};

    fn world(dir: &std::path::Path, name: &str, spawn: BlockPos) -> Arc<World> {
        let mut db = DiskDb::open(dir.join(name), Compression::Default).unwrap();
        db.save_settings(&WorldSettings {
            name: name.into(),
            spawn,
        })
        .unwrap();
        World::new(WorldConfig::default(), Box::new(db))
    }

    #[test]
    fn join_places_participant_in_world() {
        let tmp = tempfile::tempdir().unwrap();
        let alpha = world(tmp.path(), "alpha", BlockPos::new(0, -55, 0));
        let players = PlayerList::new();

        let steve = players.join("steve", &alpha, Vec3::new(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(steve.name(), "steve");
        assert!(steve.is_in(&alpha));
        assert!(steve.world().unwrap().same(&alpha));
        assert_eq!(steve.position(), Vec3::new(1.0, 2.0, 3.0));
        assert!(alpha.has_entity(steve.id()));
        assert_eq!(players.len(), 1);
        assert!(players.get(steve.id()).is_some());
    }

    #[test]
    fn join_rejects_closed_world() {
        let tmp = tempfile::tempdir().unwrap();
        let alpha = world(tmp.path(), "alpha", BlockPos::new(0, -55, 0));
        alpha.close().unwrap();

        let players = PlayerList::new();
        assert!(matches!(
            players.join("steve", &alpha, Vec3::ZERO),
            Err(SessionError::World(WorldError::Closed(name))) if name == "alpha"
        ));
        assert!(players.is_empty());
        assert_eq!(alpha.entity_count(), 0);
    }

    #[test]
    fn relocate_moves_entity_between_worlds() {
        let tmp = tempfile::tempdir().unwrap();
        let lobby = world(tmp.path(), "lobby", BlockPos::new(8, 70, 8));
        let alpha = world(tmp.path(), "alpha", BlockPos::new(0, -55, 0));
        let players = PlayerList::new();
        let steve = players.join("steve", &alpha, Vec3::ZERO).unwrap();

        players
            .relocate(&steve, &lobby, lobby.spawn_center())
            .unwrap();

        assert!(steve.is_in(&lobby));
        assert!(!steve.is_in(&alpha));
        assert_eq!(steve.position(), Vec3::new(8.5, 70.5, 8.5));
        assert!(lobby.has_entity(steve.id()));
        assert!(!alpha.has_entity(steve.id()));
    }

    #[test]
    fn relocate_within_same_world_keeps_entity() {
        let tmp = tempfile::tempdir().unwrap();
        let alpha = world(tmp.path(), "alpha", BlockPos::new(0, -55, 0));
        let players = PlayerList::new();
        let steve = players.join("steve", &alpha, Vec3::ZERO).unwrap();

        players.relocate(&steve, &alpha, Vec3::ONE).unwrap();
        assert!(alpha.has_entity(steve.id()));
        assert_eq!(alpha.entity_position(steve.id()), Some(Vec3::ONE));
    }

    #[test]
    fn relocate_into_closed_world_leaves_participant() {
        let tmp = tempfile::tempdir().unwrap();
        let alpha = world(tmp.path(), "alpha", BlockPos::new(0, -55, 0));
        let beta = world(tmp.path(), "beta", BlockPos::new(0, 0, 0));
        let players = PlayerList::new();
        let steve = players.join("steve", &alpha, Vec3::ZERO).unwrap();
        beta.close().unwrap();

        assert!(players.relocate(&steve, &beta, Vec3::ONE).is_err());
        assert!(steve.is_in(&alpha));
        assert_eq!(steve.position(), Vec3::ZERO);
    }

    #[test]
    fn membership_outlives_dropped_world() {
        let tmp = tempfile::tempdir().unwrap();
        let alpha = world(tmp.path(), "alpha", BlockPos::new(0, -55, 0));
        let players = PlayerList::new();
        let steve = players.join("steve", &alpha, Vec3::ZERO).unwrap();

        let raw: *const World = Arc::as_ptr(&alpha);
        drop(alpha);
        assert!(steve.world().is_none());
        assert!(std::ptr::eq(lock(&steve.state).world.as_ptr(), raw));
    }

    #[test]
    fn leave_removes_entity() {
        let tmp = tempfile::tempdir().unwrap();
        let alpha = world(tmp.path(), "alpha", BlockPos::new(0, -55, 0));
        let players = PlayerList::new();
        let steve = players.join("steve", &alpha, Vec3::ZERO).unwrap();

        assert!(players.leave(steve.id()).is_some());
        assert!(players.is_empty());
        assert_eq!(alpha.entity_count(), 0);
        assert!(!steve.is_in(&alpha));
        assert!(players.leave(steve.id()).is_none());
    }

    #[test]
    fn relocate_after_leave_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let lobby = world(tmp.path(), "lobby", BlockPos::new(8, 70, 8));
        let alpha = world(tmp.path(), "alpha", BlockPos::new(0, -55, 0));
        let players = PlayerList::new();
        let steve = players.join("steve", &alpha, Vec3::ZERO).unwrap();

        let snapshot = players.participants();
        players.leave(steve.id()).unwrap();
        for p in &snapshot {
            players.relocate(p, &lobby, lobby.spawn_center()).unwrap();
        }

        assert!(!lobby.has_entity(steve.id()));
        assert_eq!(lobby.entity_count(), 0);
        assert!(!steve.is_in(&lobby));
        assert_eq!(steve.position(), Vec3::ZERO);
    }
}
