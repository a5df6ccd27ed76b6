use multiworld_kernel::WorldError;
use multiworld_persist::StoreError;
use multiworld_session::SessionError;

/// Errors returned by [`crate::WorldManager`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("world {0:?} is already loaded")]
    AlreadyLoaded(String),
    /// Storage could not be opened or seeded. Nothing was registered.
    #[error("error loading world {name:?}: {source}")]
    LoadFailed {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("the primary world cannot be unloaded")]
    CannotUnloadPrimary,
    #[error("world {0:?} isn't loaded")]
    NotLoaded(String),
    /// The world was removed from the registry but releasing it failed.
    #[error("error closing world {name:?}: {source}")]
    UnloadFailed {
        name: String,
        #[source]
        source: WorldError,
    },
    /// A participant could not be moved into the primary world.
    #[error("error moving participants out of world {name:?}: {source}")]
    MigrationFailed {
        name: String,
        #[source]
        source: SessionError,
    },
    #[error("invalid world name {0:?}")]
    InvalidName(String),
    #[error("world {0:?} is still loaded")]
    StillLoaded(String),
    #[error("no world named {0:?} on disk")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}
