use multiworld_common::WorldSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::store::StoreError;

/// Compression policy applied to data written through a [`WorldDb`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Store raw CBOR.
    None,
    /// zstd at its default level.
    #[default]
    Default,
    /// zstd at a high level: smaller files, slower writes.
    Best,
}

impl Compression {
    /// zstd level for this policy, `None` when data is stored uncompressed.
    pub fn zstd_level(self) -> Option<i32> {
        match self {
            Compression::None => None,
            Compression::Default => Some(3),
            Compression::Best => Some(19),
        }
    }
}

/// Opens persisted world regions by path.
///
/// Implementations must be shareable across threads: the world manager calls
/// `open` from whichever thread issued the load.
pub trait Provider: Send + Sync {
    /// Open (or create) the world stored at `path`.
    fn open(&self, path: &Path, compression: Compression) -> Result<Box<dyn WorldDb>, StoreError>;

    /// Names of the worlds stored directly under `root`, sorted.
    fn list(&self, root: &Path) -> Result<Vec<String>, StoreError>;

    /// Remove the world stored at `path` from disk.
    fn destroy(&self, path: &Path) -> Result<(), StoreError>;
}

/// Read/write access to one opened world.
pub trait WorldDb: Send {
    /// Settings last written to this world, if any.
    fn settings(&self) -> Option<WorldSettings>;

    /// Overwrite the stored settings.
    fn save_settings(&mut self, settings: &WorldSettings) -> Result<(), StoreError>;

    /// Release the store. Fails with [`StoreError::Closed`] when called twice.
    fn close(&mut self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_levels() {
        assert_eq!(Compression::None.zstd_level(), None);
        assert_eq!(Compression::Default.zstd_level(), Some(3));
        assert!(Compression::Best.zstd_level() > Compression::Default.zstd_level());
    }

    #[test]
    fn compression_serializes_snake_case() {
        let json = serde_json::to_string(&Compression::Best).unwrap();
        assert_eq!(json, "\"best\"");
        let back: Compression = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(back, Compression::None);
    }
}
