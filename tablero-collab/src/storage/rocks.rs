//! RocksDB-backed room store.
//!
//! Column families:
//! - `rooms`    — room records keyed by room name (bincode)
//! - `room_ids` — room id → room name, for id-based existence checks
//! - `screens`  — screen records keyed by `room_id:screen_id` (JSON, LZ4)
//! - `meta`     — persisted id counters
//!
//! Every public operation is atomic on its own (single row, or a single
//! `WriteBatch`). Read-modify-write sequences that span several calls are
//! serialized one level up, by the per-room locks of the mutator.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, DBCompressionType,
    DBWithThreadMode, Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use thiserror::Error;

use super::records::{decode_counter, room_prefix, screen_key, RoomRecord, ScreenRecord};
use crate::model::{Component, Device, NewScreen, RoomId, RoomSummary, Screen, ScreenId};

const CF_ROOMS: &str = "rooms";
const CF_ROOM_IDS: &str = "room_ids";
const CF_SCREENS: &str = "screens";
const CF_META: &str = "meta";

const COLUMN_FAMILIES: &[&str] = &[CF_ROOMS, CF_ROOM_IDS, CF_SCREENS, CF_META];

const KEY_NEXT_ROOM_ID: &[u8] = b"next_room_id";
const KEY_NEXT_SCREEN_ID: &[u8] = b"next_screen_id";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tablero_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, temp directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Storage errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Room not found: {0}")]
    RoomNotFound(String),
    #[error("Room id not found: {0}")]
    UnknownRoomId(RoomId),
    #[error("Room already exists: {0}")]
    RoomExists(String),
    #[error("Screen {screen_id} not found in room {room_id}")]
    ScreenNotFound { screen_id: ScreenId, room_id: RoomId },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Compression error: {0}")]
    Compression(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Durable storage for rooms and their screens.
///
/// Opened once at startup and shared through an `Arc`; [`RoomStore::close`]
/// flushes memtables at shutdown.
pub struct RoomStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes id allocation and single-row read-modify-write
    write_lock: Mutex<()>,
}

impl RoomStore {
    /// Open the store at the configured path, creating it if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Room store opened at {}", config.path.display());

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_SCREENS => {
                // Values are already LZ4 framed
                opts.set_compression_type(DBCompressionType::None);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(8));
            }
            CF_ROOMS | CF_ROOM_IDS | CF_META => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    // ─── Rooms ────────────────────────────────────────────────────────

    /// Load a room record by name.
    pub fn get_room(&self, name: &str) -> Result<RoomRecord, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        match self.db.get_cf(cf, name.as_bytes())? {
            Some(bytes) => RoomRecord::decode(&bytes),
            None => Err(StoreError::RoomNotFound(name.to_string())),
        }
    }

    /// Stored password hash of a room (`None` = open room).
    pub fn get_room_password_hash(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get_room(name)?.password_hash)
    }

    /// All rooms, newest first.
    pub fn list_rooms(&self) -> Result<Vec<RoomSummary>, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        let mut rooms = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            rooms.push(RoomRecord::decode(&value)?);
        }
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rooms.iter().map(RoomRecord::summary).collect())
    }

    /// Create a room together with its default screen, atomically.
    ///
    /// Fails with [`StoreError::RoomExists`] if the name is taken.
    pub fn create_room(
        &self,
        name: &str,
        password_hash: Option<String>,
    ) -> Result<RoomSummary, StoreError> {
        let _guard = self.lock();

        let cf_rooms = self.cf(CF_ROOMS)?;
        if self.db.get_cf(cf_rooms, name.as_bytes())?.is_some() {
            return Err(StoreError::RoomExists(name.to_string()));
        }

        let room_id = self.read_counter(KEY_NEXT_ROOM_ID)?;
        let screen_id = self.read_counter(KEY_NEXT_SCREEN_ID)?;

        let room = RoomRecord {
            id: room_id,
            name: name.to_string(),
            password_hash,
            created_at: now_millis(),
        };
        let default_screen = NewScreen::room_default();
        let screen = ScreenRecord {
            id: screen_id,
            room_id,
            name: default_screen.name,
            device: default_screen.device,
            components: default_screen.components,
        };

        let cf_meta = self.cf(CF_META)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_rooms, name.as_bytes(), room.encode()?);
        batch.put_cf(self.cf(CF_ROOM_IDS)?, room_id.to_be_bytes(), name.as_bytes());
        batch.put_cf(self.cf(CF_SCREENS)?, screen_key(room_id, screen_id), screen.encode()?);
        batch.put_cf(cf_meta, KEY_NEXT_ROOM_ID, (room_id + 1).to_be_bytes());
        batch.put_cf(cf_meta, KEY_NEXT_SCREEN_ID, (screen_id + 1).to_be_bytes());
        self.write(batch)?;

        Ok(room.summary())
    }

    /// Delete a room and every screen it owns.
    pub fn delete_room(&self, name: &str) -> Result<(), StoreError> {
        let _guard = self.lock();
        let room = self.get_room(name)?;

        let cf_screens = self.cf(CF_SCREENS)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_ROOMS)?, name.as_bytes());
        batch.delete_cf(self.cf(CF_ROOM_IDS)?, room.id.to_be_bytes());
        for key in self.screen_keys(room.id)? {
            batch.delete_cf(cf_screens, key);
        }
        self.write(batch)
    }

    // ─── Screens ──────────────────────────────────────────────────────

    /// Insert a new screen into an existing room.
    pub fn create_screen(&self, room_id: RoomId, screen: NewScreen) -> Result<Screen, StoreError> {
        let _guard = self.lock();

        if self.db.get_cf(self.cf(CF_ROOM_IDS)?, room_id.to_be_bytes())?.is_none() {
            return Err(StoreError::UnknownRoomId(room_id));
        }

        let screen_id = self.read_counter(KEY_NEXT_SCREEN_ID)?;
        let record = ScreenRecord {
            id: screen_id,
            room_id,
            name: screen.name,
            device: screen.device,
            components: screen.components,
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_SCREENS)?, screen_key(room_id, screen_id), record.encode()?);
        batch.put_cf(self.cf(CF_META)?, KEY_NEXT_SCREEN_ID, (screen_id + 1).to_be_bytes());
        self.write(batch)?;

        Ok(record.into_screen())
    }

    /// All screens of a room, in creation order.
    pub fn list_screens(&self, room_id: RoomId) -> Result<Vec<Screen>, StoreError> {
        let cf = self.cf(CF_SCREENS)?;
        let prefix = room_prefix(room_id);
        let mut screens = Vec::new();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if key.len() != 16 || key[..8] != prefix {
                break;
            }
            screens.push(ScreenRecord::decode(&value)?.into_screen());
        }

        Ok(screens)
    }

    /// All screens of a room looked up by name.
    pub fn room_screens(&self, room_name: &str) -> Result<Vec<Screen>, StoreError> {
        let room = self.get_room(room_name)?;
        self.list_screens(room.id)
    }

    /// Number of screens a room currently has.
    pub fn count_screens(&self, room_id: RoomId) -> Result<usize, StoreError> {
        Ok(self.screen_keys(room_id)?.len())
    }

    /// Components of a screen, which must belong to `room_id`.
    pub fn get_screen_components(
        &self,
        screen_id: ScreenId,
        room_id: RoomId,
    ) -> Result<Vec<Component>, StoreError> {
        Ok(self.load_screen(screen_id, room_id)?.components)
    }

    /// Overwrite a screen's whole component collection.
    pub fn replace_screen_components(
        &self,
        screen_id: ScreenId,
        room_id: RoomId,
        components: Vec<Component>,
    ) -> Result<(), StoreError> {
        self.update_screen(screen_id, room_id, |screen| screen.components = components)
    }

    /// Append one component to a screen.
    pub fn append_component(
        &self,
        screen_id: ScreenId,
        room_id: RoomId,
        component: Component,
    ) -> Result<(), StoreError> {
        self.update_screen(screen_id, room_id, |screen| screen.components.push(component))
    }

    pub fn rename_screen(
        &self,
        screen_id: ScreenId,
        room_id: RoomId,
        new_name: &str,
    ) -> Result<(), StoreError> {
        self.update_screen(screen_id, room_id, |screen| screen.name = new_name.to_string())
    }

    pub fn replace_device(
        &self,
        screen_id: ScreenId,
        room_id: RoomId,
        device: Device,
    ) -> Result<(), StoreError> {
        self.update_screen(screen_id, room_id, |screen| screen.device = device)
    }

    /// Delete a screen unless it is the room's last one.
    ///
    /// Returns `Ok(false)` when the delete was refused because only one
    /// screen is left.
    pub fn delete_screen(&self, screen_id: ScreenId, room_id: RoomId) -> Result<bool, StoreError> {
        let _guard = self.lock();

        let keys = self.screen_keys(room_id)?;
        let key = screen_key(room_id, screen_id);
        if !keys.iter().any(|k| *k == key) {
            return Err(StoreError::ScreenNotFound { screen_id, room_id });
        }
        if keys.len() <= 1 {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_SCREENS)?, key);
        self.write(batch)?;
        Ok(true)
    }

    // ─── Lifecycle ────────────────────────────────────────────────────

    /// Flush all column families to disk. Call once at shutdown.
    pub fn close(&self) -> Result<(), StoreError> {
        for name in COLUMN_FAMILIES {
            self.db.flush_cf(self.cf(name)?)?;
        }
        log::info!("Room store at {} flushed", self.config.path.display());
        Ok(())
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    /// Next id from a persisted counter. Ids start at 1.
    fn read_counter(&self, key: &[u8]) -> Result<u64, StoreError> {
        match self.db.get_cf(self.cf(CF_META)?, key)? {
            Some(bytes) => decode_counter(&bytes),
            None => Ok(1),
        }
    }

    fn screen_keys(&self, room_id: RoomId) -> Result<Vec<[u8; 16]>, StoreError> {
        let cf = self.cf(CF_SCREENS)?;
        let prefix = room_prefix(room_id);
        let mut keys = Vec::new();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if key.len() != 16 || key[..8] != prefix {
                break;
            }
            let mut buf = [0u8; 16];
            buf.copy_from_slice(&key);
            keys.push(buf);
        }

        Ok(keys)
    }

    fn load_screen(&self, screen_id: ScreenId, room_id: RoomId) -> Result<ScreenRecord, StoreError> {
        let cf = self.cf(CF_SCREENS)?;
        match self.db.get_cf(cf, screen_key(room_id, screen_id))? {
            Some(bytes) => ScreenRecord::decode(&bytes),
            None => Err(StoreError::ScreenNotFound { screen_id, room_id }),
        }
    }

    fn update_screen(
        &self,
        screen_id: ScreenId,
        room_id: RoomId,
        apply: impl FnOnce(&mut ScreenRecord),
    ) -> Result<(), StoreError> {
        let _guard = self.lock();
        let mut record = self.load_screen(screen_id, room_id)?;
        apply(&mut record);

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_SCREENS)?, screen_key(room_id, screen_id), record.encode()?);
        self.write(batch)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
