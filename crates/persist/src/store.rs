//! Disk-backed world storage.
//!
//! Layout inside a world directory:
//! ```text
//! level.meta.json   - schema version, compression, settings checksum
//! level.dat         - CBOR settings, zstd-compressed unless Compression::None
//! db/               - block and entity region data
//! ```

use multiworld_common::WorldSettings;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::provider::{Compression, Provider, WorldDb};

/// Current level schema version.
const LEVEL_SCHEMA_VERSION: u32 = 1;

const META_FILE: &str = "level.meta.json";
const SETTINGS_FILE: &str = "level.dat";
const DB_DIR: &str = "db";

/// Errors from file-backed persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("no world stored at {}", .0.display())]
    NotFound(PathBuf),
    #[error("world store is closed")]
    Closed,
}

/// Metadata stored in level.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelMeta {
    pub schema_version: u32,
    /// Compression the settings file was written with.
    pub compression: Compression,
    /// SHA-256 of level.dat as written, `None` until settings are saved.
    pub settings_sha256: Option<String>,
}

/// [`Provider`] storing each world in its own directory on the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskProvider;

impl DiskProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Provider for DiskProvider {
    fn open(&self, path: &Path, compression: Compression) -> Result<Box<dyn WorldDb>, StoreError> {
        Ok(Box::new(DiskDb::open(path, compression)?))
    }

    fn list(&self, root: &Path) -> Result<Vec<String>, StoreError> {
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() || !entry.path().join(META_FILE).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn destroy(&self, path: &Path) -> Result<(), StoreError> {
        if !path.join(META_FILE).is_file() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        std::fs::remove_dir_all(path)?;
        tracing::debug!(path = %path.display(), "destroyed world store");
        Ok(())
    }
}

/// An opened world directory.
pub struct DiskDb {
    root: PathBuf,
    meta: LevelMeta,
    compression: Compression,
    settings: Option<WorldSettings>,
    closed: bool,
}

impl DiskDb {
    /// Open or create a world store at the given path.
    ///
    /// `compression` applies to everything written through this handle;
    /// existing data is read with the compression it was written with.
    pub fn open(path: impl AsRef<Path>, compression: Compression) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(DB_DIR))?;

        let meta_path = root.join(META_FILE);
        let (meta, settings) = if meta_path.exists() {
            let meta: LevelMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.schema_version != LEVEL_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: meta.schema_version,
                    expected_version: LEVEL_SCHEMA_VERSION,
                });
            }
            let settings = read_settings(&root, &meta)?;
            (meta, settings)
        } else {
            let meta = LevelMeta {
                schema_version: LEVEL_SCHEMA_VERSION,
                compression,
                settings_sha256: None,
            };
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            (meta, None)
        };

        tracing::debug!(path = %root.display(), ?compression, "opened world store");
        Ok(Self {
            root,
            meta,
            compression,
            settings,
            closed: false,
        })
    }

    /// Get the path to the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the metadata.
    pub fn meta(&self) -> &LevelMeta {
        &self.meta
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn save_meta(&self) -> Result<(), StoreError> {
        let path = self.root.join(META_FILE);
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.meta)?;
        Ok(())
    }
}

impl WorldDb for DiskDb {
    fn settings(&self) -> Option<WorldSettings> {
        self.settings.clone()
    }

    fn save_settings(&mut self, settings: &WorldSettings) -> Result<(), StoreError> {
        self.ensure_open()?;
        let cbor_bytes = cbor_serialize(settings)?;
        let data = match self.compression.zstd_level() {
            Some(level) => zstd_compress(&cbor_bytes, level)?,
            None => cbor_bytes,
        };
        std::fs::write(self.root.join(SETTINGS_FILE), &data)?;

        self.meta.compression = self.compression;
        self.meta.settings_sha256 = Some(sha256_hex(&data));
        self.save_meta()?;
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.closed = true;
        tracing::debug!(path = %self.root.display(), "closed world store");
        Ok(())
    }
}

fn read_settings(root: &Path, meta: &LevelMeta) -> Result<Option<WorldSettings>, StoreError> {
    let path = root.join(SETTINGS_FILE);
    let expected = match (&meta.settings_sha256, path.exists()) {
        (None, false) => return Ok(None),
        (Some(expected), _) => expected,
        (None, true) => {
            return Err(StoreError::IntegrityMismatch {
                expected: "no settings file".into(),
                actual: "unrecorded settings file".into(),
            });
        }
    };

    let data = std::fs::read(&path)?;
    let actual = sha256_hex(&data);
    if &actual != expected {
        return Err(StoreError::IntegrityMismatch {
            expected: expected.clone(),
            actual,
        });
    }

    let cbor_bytes = match meta.compression.zstd_level() {
        Some(_) => zstd_decompress(&data)?,
        None => data,
    };
    cbor_deserialize(&cbor_bytes).map(Some)
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data).map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8], level: i32) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), level)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
