use multiworld_common::WorldSettings;
use multiworld_kernel::{World, WorldConfig, world::{DEFAULT_WORLD_NAME, FALLBACK_SPAWN}};
use multiworld_persist::{Provider, StoreError};
use multiworld_session::SessionRegistry;
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::ManagerConfig;
use crate::error::ManagerError;

#[derive(Debug, Default)]
struct Registry {
    worlds: HashMap<String, Arc<World>>,
    /// Names claimed by an in-flight load or delete.
    loading: HashSet<String>,
}

/// Owns every loaded world except the primary.
///
/// All methods take `&self`; share the manager behind an `Arc` to call it
/// from several threads.
pub struct WorldManager {
    primary: Arc<World>,
    provider: Arc<dyn Provider>,
    sessions: Arc<dyn SessionRegistry>,
    config: ManagerConfig,
    registry: RwLock<Registry>,
}

impl WorldManager {
    pub fn new(
        primary: Arc<World>,
        provider: Arc<dyn Provider>,
        sessions: Arc<dyn SessionRegistry>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            primary,
            provider,
            sessions,
            config,
            registry: RwLock::new(Registry::default()),
        }
    }

    /// Open the primary world at `config.primary_dir`.
    ///
    /// Unlike worlds loaded through the manager, the primary is writable and
    /// keeps its clocks running. Settings already on disk are left alone.
    pub fn open_primary(
        provider: &dyn Provider,
        config: &ManagerConfig,
    ) -> Result<Arc<World>, ManagerError> {
        let dir = &config.primary_dir;
        let failed = |source| ManagerError::LoadFailed {
            name: dir.display().to_string(),
            source,
        };
        let mut db = provider.open(dir, config.compression).map_err(failed)?;
        if db.settings().is_none() {
            let name = dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_WORLD_NAME)
                .to_owned();
            db.save_settings(&WorldSettings {
                name,
                spawn: FALLBACK_SPAWN,
            })
            .map_err(failed)?;
        }
        Ok(World::new(WorldConfig::default(), db))
    }

    pub fn primary(&self) -> &Arc<World> {
        &self.primary
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Load the world stored under `<worlds_dir>/<name>` and register it.
    ///
    /// Concurrent loads of one name open the store once: the first caller
    /// claims the name, every other caller gets [`ManagerError::AlreadyLoaded`].
    pub fn load(&self, name: &str) -> Result<Arc<World>, ManagerError> {
        let _span = tracing::info_span!("load_world", world = %name).entered();
        validate_name(name)?;
        let claim = self
            .claim(name)
            .ok_or_else(|| ManagerError::AlreadyLoaded(name.to_owned()))?;

        tracing::debug!("loading world");
        let failed = |source| ManagerError::LoadFailed {
            name: name.to_owned(),
            source,
        };
        let path = self.config.world_path(name);
        let mut db = self
            .provider
            .open(&path, self.config.compression)
            .map_err(failed)?;

        let settings = WorldSettings {
            name: name.to_owned(),
            spawn: self.config.spawn,
        };
        if let Err(source) = db.save_settings(&settings) {
            if let Err(e) = db.close() {
                tracing::warn!(error = %e, "failed to release store after seeding failed");
            }
            return Err(failed(source));
        }

        let world = World::new(self.config.world_config(), db);
        claim.commit(Arc::clone(&world));
        tracing::info!(path = %path.display(), "loaded world");
        Ok(world)
    }

    /// Move everyone out of `world` into the primary, deregister it and close it.
    ///
    /// If closing fails the world is still deregistered and
    /// [`ManagerError::UnloadFailed`] is returned.
    pub fn unload(&self, world: &Arc<World>) -> Result<(), ManagerError> {
        let name = world.name();
        let _span = tracing::info_span!("unload_world", world = %name).entered();
        if world.same(&self.primary) {
            return Err(ManagerError::CannotUnloadPrimary);
        }
        if !self.is_registered(world) {
            return Err(ManagerError::NotLoaded(name.to_owned()));
        }

        tracing::debug!("unloading world");
        let moved = self.evacuate(world)?;

        {
            let mut registry = self.write();
            match registry.worlds.get(name) {
                Some(registered) if registered.same(world) => {
                    registry.worlds.remove(name);
                }
                // Lost a race with another unload of the same world.
                _ => return Err(ManagerError::NotLoaded(name.to_owned())),
            }
        }

        let closed = world.close();
        // Anyone who joined between the first sweep and the close. The closed
        // world rejects joins and a join is listed by the time its entity is
        // in, so this sweep is final.
        let stragglers = self.evacuate(world);

        if let Err(source) = closed {
            if let Err(e) = &stragglers {
                tracing::warn!(error = %e, "failed to move late joiners out of world");
            }
            tracing::warn!(error = %source, "world removed but failed to close");
            return Err(ManagerError::UnloadFailed {
                name: name.to_owned(),
                source,
            });
        }
        let stragglers = stragglers?;
        tracing::info!(moved = moved + stragglers, "unloaded world");
        Ok(())
    }

    /// Look up a loaded world by name. The primary is not in the registry.
    pub fn get(&self, name: &str) -> Option<Arc<World>> {
        self.read().worlds.get(name).cloned()
    }

    /// Names of all loaded worlds, sorted.
    pub fn loaded_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().worlds.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of all worlds present under `worlds_dir`, loaded or not.
    pub fn available(&self) -> Result<Vec<String>, ManagerError> {
        Ok(self.provider.list(&self.config.worlds_dir)?)
    }

    /// Remove an unloaded world from disk.
    pub fn delete(&self, name: &str) -> Result<(), ManagerError> {
        let _span = tracing::info_span!("delete_world", world = %name).entered();
        validate_name(name)?;
        // Holding the claim keeps loads of this name out while the files go.
        let _claim = self
            .claim(name)
            .ok_or_else(|| ManagerError::StillLoaded(name.to_owned()))?;

        match self.provider.destroy(&self.config.world_path(name)) {
            Ok(()) => {
                tracing::info!("deleted world");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Err(ManagerError::NotFound(name.to_owned())),
            Err(e) => Err(e.into()),
        }
    }

    /// Unload every registered world, continuing past failures.
    ///
    /// Returns the first error encountered.
    pub fn close_all(&self) -> Result<(), ManagerError> {
        let worlds: Vec<Arc<World>> = self.read().worlds.values().cloned().collect();
        let mut first_error = None;
        for world in worlds {
            match self.unload(&world) {
                // Unloaded concurrently.
                Ok(()) | Err(ManagerError::NotLoaded(_)) => {}
                Err(e) => {
                    tracing::warn!(world = %world.name(), error = %e, "failed to unload world during shutdown");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Relocate every participant currently in `world` to the primary's spawn.
    fn evacuate(&self, world: &World) -> Result<usize, ManagerError> {
        let target = self.primary.spawn_center();
        let mut moved = 0;
        for participant in self.sessions.participants() {
            if !participant.is_in(world) {
                continue;
            }
            self.sessions
                .relocate(&participant, &self.primary, target)
                .map_err(|source| ManagerError::MigrationFailed {
                    name: world.name().to_owned(),
                    source,
                })?;
            moved += 1;
        }
        Ok(moved)
    }

    fn is_registered(&self, world: &World) -> bool {
        self.read()
            .worlds
            .get(world.name())
            .is_some_and(|registered| registered.same(world))
    }

    /// Claim `name` for a load or delete. `None` if it is loaded or claimed.
    fn claim(&self, name: &str) -> Option<Claim<'_>> {
        let mut registry = self.write();
        if registry.worlds.contains_key(name) || !registry.loading.insert(name.to_owned()) {
            return None;
        }
        Some(Claim {
            registry: &self.registry,
            name: name.to_owned(),
            committed: false,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for WorldManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldManager")
            .field("primary", &self.primary.name())
            .field("loaded", &self.loaded_names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A name reserved in the registry. Released on drop unless committed.
struct Claim<'a> {
    registry: &'a RwLock<Registry>,
    name: String,
    committed: bool,
}

impl Claim<'_> {
    /// Swap the claim for a registered world in one critical section.
    fn commit(mut self, world: Arc<World>) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.loading.remove(&self.name);
        registry.worlds.insert(std::mem::take(&mut self.name), world);
        self.committed = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .loading
                .remove(&self.name);
        }
    }
}

fn validate_name(name: &str) -> Result<(), ManagerError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
        _ => Err(ManagerError::InvalidName(name.to_owned())),
    }
}
