//! RocksDB-backed credential store.
//!
//! Column families:
//! - `users` - bincode-encoded [`CredentialRecord`]s keyed by normalized email
//!
//! Lookups are point reads by key, so the column family is tuned with a
//! bloom filter and `optimize_for_point_lookup`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, Options,
    SingleThreaded, WriteOptions,
};

use crate::credentials::{CredentialRecord, CredentialStore, StoreError};

/// Column family names.
const CF_USERS: &str = "users";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct RocksStoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 32MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every write (default: true, registrations are rare)
    pub sync_writes: bool,
}

impl RocksStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 32 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
        }
    }

    /// Small caches and no fsync, for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            block_cache_size: 1024 * 1024,
            sync_writes: false,
            ..Self::new(path)
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// RocksDB-backed credential store.
pub struct RocksCredentialStore {
    /// RocksDB instance (single-threaded mode, concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: RocksStoreConfig,
    /// Serializes the check-then-put in `create`.
    write_lock: Mutex<()>,
}

impl RocksCredentialStore {
    /// Open the store, creating the database and column family if needed.
    pub fn open(config: RocksStoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(
            CF_USERS,
            Self::cf_options(&config),
        )];
        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened credential store at {}", config.path.display());
        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(config: &RocksStoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);

        opts
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Get a column family handle.
    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_USERS)
            .ok_or_else(|| StoreError::Backend(format!("Column family '{CF_USERS}' not found")))
    }

    fn encode(record: &CredentialRecord) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<CredentialRecord, StoreError> {
        let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(record)
    }
}

impl CredentialStore for RocksCredentialStore {
    fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, StoreError> {
        match self.db.get_pinned_cf(self.cf()?, email.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn create(&self, record: CredentialRecord) -> Result<CredentialRecord, StoreError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StoreError::Backend("write lock poisoned".to_string()))?;
        let cf = self.cf()?;
        let key = record.email.as_bytes();

        if self.db.get_pinned_cf(cf, key)?.is_some() {
            return Err(StoreError::Duplicate(record.email));
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.put_cf_opt(cf, key, Self::encode(&record)?, &write_opts)?;

        log::debug!("Stored credentials for {}", record.email);
        Ok(record)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for item in self.db.iterator_cf(self.cf()?, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}
