use glam::Vec3;
use multiworld_common::{BlockPos, Dimension, EntityId, GameMode};
use multiworld_persist::{StoreError, WorldDb};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Name used when the store carries no settings yet.
pub const DEFAULT_WORLD_NAME: &str = "World";
/// Spawn used when the store carries no settings yet.
pub const FALLBACK_SPAWN: BlockPos = BlockPos::new(0, 64, 0);
/// Length of an in-game day in ticks.
pub const DAY_LENGTH: i64 = 24_000;

/// Errors from world runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("world {0:?} is closed")]
    Closed(String),
}

/// Static operational policy of a world, fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldConfig {
    pub dimension: Dimension,
    /// Simulation changes are never written back to the store.
    pub read_only: bool,
    /// Radius in chunks around participants that receives ticks. 0 disables ticking.
    pub tick_range: i32,
    /// In-game time at construction.
    pub time: i64,
    pub time_stopped: bool,
    pub weather_stopped: bool,
    pub default_game_mode: GameMode,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            dimension: Dimension::Overworld,
            read_only: false,
            tick_range: 6,
            time: 0,
            time_stopped: false,
            weather_stopped: false,
            default_game_mode: GameMode::Survival,
        }
    }
}

#[derive(Debug, Default)]
struct WorldState {
    closed: bool,
    tick: u64,
    time: i64,
    weather_ticks: u64,
    entities: BTreeMap<EntityId, Vec3>,
}

/// A live world.
///
/// Shared as `Arc<World>`. Whoever registered the world holds the owning
/// reference; participants keep `Weak` references only, so the handle never
/// outlives its owner's decision to close it.
pub struct World {
    name: String,
    spawn: BlockPos,
    config: WorldConfig,
    state: Mutex<WorldState>,
    db: Mutex<Option<Box<dyn WorldDb>>>,
}

impl World {
    /// Build a live world on top of an opened store.
    ///
    /// Name and spawn come from the store's settings.
    pub fn new(config: WorldConfig, db: Box<dyn WorldDb>) -> Arc<Self> {
        let (name, spawn) = match db.settings() {
            Some(settings) => (settings.name, settings.spawn),
            None => (DEFAULT_WORLD_NAME.to_owned(), FALLBACK_SPAWN),
        };
        let state = WorldState {
            time: config.time,
            ..Default::default()
        };
        tracing::debug!(%name, %spawn, ?config, "constructed world");
        Arc::new(Self {
            name,
            spawn,
            config,
            state: Mutex::new(state),
            db: Mutex::new(Some(db)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spawn(&self) -> BlockPos {
        self.spawn
    }

    /// Where participants are placed when sent to this world's spawn.
    pub fn spawn_center(&self) -> Vec3 {
        self.spawn.center()
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Identity comparison. Two distinct worlds may share a name.
    pub fn same(&self, other: &World) -> bool {
        std::ptr::eq(self, other)
    }

    /// Number of simulated ticks so far.
    pub fn tick(&self) -> u64 {
        lock(&self.state).tick
    }

    /// Current in-game time.
    pub fn time(&self) -> i64 {
        lock(&self.state).time
    }

    /// Ticks the weather cycle has advanced.
    pub fn weather_ticks(&self) -> u64 {
        lock(&self.state).weather_ticks
    }

    /// Advance the world by one server tick, honoring its frozen clocks.
    pub fn step(&self) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        if self.config.tick_range > 0 {
            state.tick += 1;
        }
        if !self.config.time_stopped {
            state.time = (state.time + 1) % DAY_LENGTH;
        }
        if !self.config.weather_stopped {
            state.weather_ticks += 1;
        }
    }

    /// Place an entity in this world. Fails once the world is closed.
    pub fn add_entity(&self, id: EntityId, position: Vec3) -> Result<(), WorldError> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(WorldError::Closed(self.name.clone()));
        }
        state.entities.insert(id, position);
        Ok(())
    }

    /// Take an entity out of this world, returning its last position.
    pub fn remove_entity(&self, id: EntityId) -> Option<Vec3> {
        lock(&self.state).entities.remove(&id)
    }

    /// Move an entity that is already in this world.
    pub fn set_entity_position(&self, id: EntityId, position: Vec3) -> bool {
        match lock(&self.state).entities.get_mut(&id) {
            Some(pos) => {
                *pos = position;
                true
            }
            None => false,
        }
    }

    pub fn entity_position(&self, id: EntityId) -> Option<Vec3> {
        lock(&self.state).entities.get(&id).copied()
    }

    pub fn has_entity(&self, id: EntityId) -> bool {
        lock(&self.state).entities.contains_key(&id)
    }

    pub fn entity_count(&self) -> usize {
        lock(&self.state).entities.len()
    }

    /// Ids of all entities in the world, in id order.
    pub fn entities(&self) -> Vec<EntityId> {
        lock(&self.state).entities.keys().copied().collect()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Seal the world against new entities and release its store.
    ///
    /// The handle is closed after this call even when the store reports an
    /// error. Closing twice fails with [`WorldError::Closed`].
    pub fn close(&self) -> Result<(), WorldError> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(WorldError::Closed(self.name.clone()));
            }
            state.closed = true;
            let stranded = std::mem::take(&mut state.entities);
            if !stranded.is_empty() {
                tracing::warn!(world = %self.name, count = stranded.len(), "closing world with entities still inside");
            }
        }
        let Some(mut db) = lock(&self.db).take() else {
            return Err(WorldError::Closed(self.name.clone()));
        };
        db.close()?;
        tracing::debug!(world = %self.name, "closed world");
        Ok(())
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("name", &self.name)
            .field("spawn", &self.spawn)
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use multiworld_common::WorldSettings;
    use multiworld_persist::{Compression, DiskDb};

    /// Store whose close always fails.
    struct BrokenDb;

    impl WorldDb for BrokenDb {
        fn settings(&self) -> Option<WorldSettings> {
            None
        }

        fn save_settings(&mut self, _: &WorldSettings) -> Result<(), StoreError> {
            Ok(())
        }

        fn close(&mut self) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk gone")))
        }
    }

    fn open_world(dir: &std::path::Path, name: &str, config: WorldConfig) -> Arc<World> {
        let mut db = DiskDb::open(dir.join(name), Compression::Default).unwrap();
        db.save_settings(&WorldSettings {
            name: name.into(),
            spawn: BlockPos::new(0, -55, 0),
        })
        .unwrap();
        World::new(config, Box::new(db))
    }

    fn frozen() -> WorldConfig {
        WorldConfig {
            read_only: true,
            tick_range: 0,
            time: 6000,
            time_stopped: true,
            weather_stopped: true,
            ..WorldConfig::default()
        }
    }

    #[test]
    fn name_and_spawn_come_from_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let w = open_world(tmp.path(), "alpha", WorldConfig::default());
        assert_eq!(w.name(), "alpha");
        assert_eq!(w.spawn(), BlockPos::new(0, -55, 0));
        assert_eq!(w.spawn_center(), Vec3::new(0.5, -54.5, 0.5));
    }

    #[test]
    fn missing_settings_fall_back_to_defaults() {
        let w = World::new(WorldConfig::default(), Box::new(BrokenDb));
        assert_eq!(w.name(), DEFAULT_WORLD_NAME);
        assert_eq!(w.spawn(), FALLBACK_SPAWN);
    }

    #[test]
    fn identity_is_not_name() {
        let tmp = tempfile::tempdir().unwrap();
        let a = open_world(&tmp.path().join("one"), "alpha", WorldConfig::default());
        let b = open_world(&tmp.path().join("two"), "alpha", WorldConfig::default());
        assert_eq!(a.name(), b.name());
        assert!(a.same(&a));
        assert!(!a.same(&b));
    }

    #[test]
    fn frozen_world_does_not_advance() {
        let tmp = tempfile::tempdir().unwrap();
        let w = open_world(tmp.path(), "alpha", frozen());
        for _ in 0..50 {
            w.step();
        }
        assert_eq!(w.tick(), 0);
        assert_eq!(w.time(), 6000);
        assert_eq!(w.weather_ticks(), 0);
    }

    #[test]
    fn live_world_advances_and_wraps_time() {
        let tmp = tempfile::tempdir().unwrap();
        let w = open_world(
            tmp.path(),
            "alpha",
            WorldConfig {
                time: DAY_LENGTH - 1,
                ..WorldConfig::default()
            },
        );
        w.step();
        w.step();
        assert_eq!(w.tick(), 2);
        assert_eq!(w.time(), 1);
        assert_eq!(w.weather_ticks(), 2);
    }

    #[test]
    fn entities_move_in_and_out() {
        let tmp = tempfile::tempdir().unwrap();
        let w = open_world(tmp.path(), "alpha", WorldConfig::default());
        let id = EntityId::new();
        w.add_entity(id, Vec3::ZERO).unwrap();
        assert!(w.has_entity(id));
        assert!(w.set_entity_position(id, Vec3::X));
        assert_eq!(w.entity_position(id), Some(Vec3::X));
        assert_eq!(w.entities(), vec![id]);

        assert_eq!(w.remove_entity(id), Some(Vec3::X));
        assert_eq!(w.entity_count(), 0);
        assert!(!w.set_entity_position(id, Vec3::Y));
    }

    #[test]
    fn close_is_exactly_once() {
        let tmp = tempfile::tempdir().unwrap();
        let w = open_world(tmp.path(), "alpha", WorldConfig::default());
        assert!(!w.is_closed());
        w.close().unwrap();
        assert!(w.is_closed());
        assert!(matches!(w.close(), Err(WorldError::Closed(_))));
    }

    #[test]
    fn closed_world_rejects_entities_and_stops() {
        let tmp = tempfile::tempdir().unwrap();
        let w = open_world(tmp.path(), "alpha", WorldConfig::default());
        w.add_entity(EntityId::new(), Vec3::ZERO).unwrap();
        w.close().unwrap();
        assert_eq!(w.entity_count(), 0);
        assert!(matches!(
            w.add_entity(EntityId::new(), Vec3::ZERO),
            Err(WorldError::Closed(_))
        ));
        w.step();
        assert_eq!(w.tick(), 0);
    }

    #[test]
    fn failed_close_still_closes_handle() {
        let w = World::new(WorldConfig::default(), Box::new(BrokenDb));
        assert!(matches!(w.close(), Err(WorldError::Store(_))));
        assert!(w.is_closed());
    }
}
