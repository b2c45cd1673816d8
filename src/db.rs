//! The public database handle (component J): owns the pager, WAL, and
//! writer mutex, and is the only thing a caller constructs directly. Every
//! other type in this crate (`Tree`, `ReadTxn`, `WriteTxn`, catalog records)
//! is reached through a `Db`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::catalog;
use crate::error::{DecentError, Result};
use crate::pager::Pager;
use crate::txn::{ReadTxn, Shared, WriteTxn};
use crate::vfs::FileVfs;
use crate::wal::{Wal, DEFAULT_CHECKPOINT_BYTES, DEFAULT_CHECKPOINT_TIMEOUT_MS};

/// How aggressively commits and checkpoints call `fsync`.
///
/// Three fsync call-sites exist: the WAL append at the end of every commit
/// ([`crate::wal::Wal::commit_transaction`]), the WAL's own checkpoint-end
/// marker ([`crate::wal::Wal::checkpoint`]), and the main-file flush of
/// each checkpointed page ([`crate::pager::Pager::write_page`]). `Full`
/// makes all three — the default, and the only mode this engine's
/// durability guarantees are specified against: a commit or checkpoint
/// that returns `Ok` survives a crash.
///
/// `Fsync` skips only the per-commit WAL fsync, trading the durability of
/// the most recent commit(s) for commit throughput; a checkpoint still
/// fsyncs both the WAL and the main file, so data is at most one
/// checkpoint-interval stale after a crash rather than unbounded. `None`
/// skips all three, so a crash can lose data written since the last
/// checkpoint entirely — appropriate only for a disposable or
/// easily-rebuilt database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Full,
    Fsync,
    None,
}

impl Default for Durability {
    fn default() -> Self {
        Durability::Full
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub page_size: usize,
    pub cache_pages: usize,
    pub wal_checkpoint_bytes: u64,
    pub checkpoint_timeout_ms: u64,
    pub durability: Durability,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            cache_pages: 1024,
            wal_checkpoint_bytes: DEFAULT_CHECKPOINT_BYTES,
            checkpoint_timeout_ms: DEFAULT_CHECKPOINT_TIMEOUT_MS,
            durability: Durability::Full,
        }
    }
}

impl DbConfig {
    /// A config with every knob at its default (page_size: 4096, cache_pages:
    /// 1024, durability: Full).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    pub fn with_wal_checkpoint_bytes(mut self, wal_checkpoint_bytes: u64) -> Self {
        self.wal_checkpoint_bytes = wal_checkpoint_bytes;
        self
    }

    pub fn with_checkpoint_timeout_ms(mut self, checkpoint_timeout_ms: u64) -> Self {
        self.checkpoint_timeout_ms = checkpoint_timeout_ms;
        self
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    /// Skip entirely if a live reader snapshot predates the checkpoint.
    Passive,
    /// Proceed regardless; a reader still attached past
    /// `checkpoint_timeout_ms` has its snapshot expired.
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbStats {
    pub page_size: usize,
    pub page_count: u32,
    pub wal_end_lsn: u64,
    pub schema_cookie: u32,
    pub catalog_root: u32,
    pub oldest_reader_snapshot: Option<u64>,
}

/// Page size must be a power of two in `[512, 65536]`. Checked
/// only at creation time: an existing database's page size is whatever its
/// header already recorded, read back and cross-checked in `open`.
fn validate_page_size(page_size: usize) -> Result<()> {
    if !(512..=65536).contains(&page_size) || !page_size.is_power_of_two() {
        return Err(DecentError::Malformed(format!(
            "page_size {page_size} must be a power of two between 512 and 65536"
        )));
    }
    Ok(())
}

fn wal_path(db_path: &Path) -> PathBuf {
    let mut p = db_path.as_os_str().to_owned();
    p.push("-wal");
    PathBuf::from(p)
}

/// Translate a `Durability` mode into the fsync-skipping flags on `pager`
/// and `wal`. Called once at `Db::create`/`Db::open`, before either is
/// shared with a writer.
fn apply_durability(pager: &Pager, wal: &mut Wal, durability: Durability) {
    match durability {
        Durability::Full => {
            wal.set_commit_fsync_enabled(true);
            wal.set_checkpoint_fsync_enabled(true);
            pager.set_fsync_enabled(true);
        }
        Durability::Fsync => {
            wal.set_commit_fsync_enabled(false);
            wal.set_checkpoint_fsync_enabled(true);
            pager.set_fsync_enabled(true);
        }
        Durability::None => {
            wal.set_commit_fsync_enabled(false);
            wal.set_checkpoint_fsync_enabled(false);
            pager.set_fsync_enabled(false);
        }
    }
}

/// An embedded, single-process database. Cheap to share by reference: every
/// transaction type borrows from `&Db`, and the writer mutex inside
/// [`Shared`] serializes write transactions without any locking at this
/// level.
pub struct Db {
    shared: Shared,
    config: DbConfig,
    checkpoint_deadline: Mutex<Option<Instant>>,
}

impl Db {
    /// Create a brand-new database at `path` (and its WAL sidecar at
    /// `path` + `-wal`). Errors with `AlreadyExists` if `path` is already a
    /// file.
    pub fn create(path: impl AsRef<Path>, config: DbConfig) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(DecentError::AlreadyExists(path.display().to_string()));
        }
        validate_page_size(config.page_size)?;
        let pager = Pager::create(Box::new(FileVfs::create(path)?), config.page_size, config.cache_pages)?;
        let mut wal = Wal::create(
            Box::new(FileVfs::create(wal_path(path))?),
            config.page_size,
            config.wal_checkpoint_bytes,
        )?;
        apply_durability(&pager, &mut wal, config.durability);
        let shared = Shared { pager, wal: Mutex::new(wal), writer: Mutex::new(()) };
        Ok(Self { shared, config, checkpoint_deadline: Mutex::new(None) })
    }

    /// Open an existing database, replaying its WAL sidecar into the
    /// in-memory overlay.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> Result<Self> {
        let path = path.as_ref();
        let (pager, header) = Pager::open(Box::new(FileVfs::open(path)?), config.cache_pages)?;
        if header.page_size as usize != config.page_size {
            return Err(DecentError::IncompatibleFormat(format!(
                "database page size {} does not match configured page size {}",
                header.page_size, config.page_size
            )));
        }
        let mut wal = Wal::open_and_recover(
            Box::new(FileVfs::open(wal_path(path))?),
            config.page_size,
            config.wal_checkpoint_bytes,
        )?;
        if let Some(max_page_id) = wal.max_overlay_page_id() {
            pager.ensure_page_count_at_least(max_page_id + 1);
        }
        apply_durability(&pager, &mut wal, config.durability);
        let shared = Shared { pager, wal: Mutex::new(wal), writer: Mutex::new(()) };
        Ok(Self { shared, config, checkpoint_deadline: Mutex::new(None) })
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn begin_read(&self) -> ReadTxn<'_> {
        ReadTxn::begin(&self.shared)
    }

    /// Block until the writer mutex is free, then begin a write transaction.
    pub fn begin_write(&self) -> Result<WriteTxn<'_>> {
        self.note_write_attempt();
        WriteTxn::begin(&self.shared)
    }

    /// Non-blocking variant: `Busy` if another write transaction is
    /// currently open.
    pub fn try_begin_write(&self) -> Result<WriteTxn<'_>> {
        match self.shared.writer.try_lock() {
            Some(guard) => {
                drop(guard);
                self.note_write_attempt();
                WriteTxn::begin(&self.shared)
            }
            None => Err(DecentError::Busy),
        }
    }

    fn note_write_attempt(&self) {
        let mut deadline = self.checkpoint_deadline.lock();
        if deadline.is_none() {
            *deadline = Some(Instant::now() + Duration::from_millis(self.config.checkpoint_timeout_ms));
        }
    }

    /// Run a checkpoint, draining the WAL overlay into the main file.
    /// `Passive` is a no-op if a live reader snapshot would lose data it's
    /// entitled to see; `Force` proceeds regardless, and
    /// clears this handle's forced-checkpoint deadline on return.
    pub fn checkpoint(&self, mode: CheckpointMode) -> Result<()> {
        match mode {
            CheckpointMode::Passive => checkpoint_passive(&self.shared)?,
            CheckpointMode::Force => checkpoint_force(&self.shared)?,
        }
        *self.checkpoint_deadline.lock() = None;
        Ok(())
    }

    /// Whether a forced checkpoint is overdue: a write transaction began
    /// more than `checkpoint_timeout_ms` ago and no checkpoint has run
    /// since. Callers that want the deadline enforced automatically should
    /// check this after each commit and call `checkpoint(Force)` when true.
    pub fn checkpoint_overdue(&self) -> bool {
        let deadline: Option<Instant> = *self.checkpoint_deadline.lock();
        deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }

    /// Best-effort reclamation: forces a checkpoint so every committed page
    /// is in the main file and the WAL is truncated. Page-level compaction
    /// (merging underfull B+Tree nodes, defragmenting the freelist) is out
    /// of scope for this engine; `vacuum` only
    /// guarantees the WAL is as small as it can currently be.
    pub fn vacuum(&self) -> Result<()> {
        self.checkpoint(CheckpointMode::Force)
    }

    pub fn stats(&self) -> Result<DbStats> {
        let wal_end_lsn = self.shared.wal.lock().wal_end_lsn();
        let header = self.shared.read_header(wal_end_lsn)?;
        let oldest_reader_snapshot = self.shared.wal.lock().oldest_snapshot();
        Ok(DbStats {
            page_size: self.shared.pager.page_size(),
            page_count: self.shared.pager.page_count(),
            wal_end_lsn,
            schema_cookie: header.schema_cookie,
            catalog_root: header.catalog_root,
            oldest_reader_snapshot,
        })
    }

    /// Look up a table's root page by name through a fresh read snapshot.
    /// A thin convenience over `begin_read` + `catalog::get_table` for
    /// callers that just need schema, not a long-lived transaction.
    pub fn table_root(&self, name: &str) -> Result<Option<u32>> {
        let mut reader = self.begin_read();
        let header = reader.header()?;
        if header.catalog_root == 0 {
            return Ok(None);
        }
        Ok(catalog::get_table(&mut reader, header.catalog_root, name)?.map(|t| t.root_page))
    }
}

pub(crate) fn checkpoint_passive(shared: &Shared) -> Result<()> {
    let pager = &shared.pager;
    shared.wal.lock().checkpoint(|page_id, bytes| pager.write_page(page_id, bytes))
}

pub(crate) fn checkpoint_force(shared: &Shared) -> Result<()> {
    let pager = &shared.pager;
    shared.wal.lock().force_checkpoint(|page_id, bytes| pager.write_page(page_id, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogRecord, TableDef};
    use tempfile::tempdir;

    fn config(page_size: usize) -> DbConfig {
        DbConfig { page_size, cache_pages: 16, ..DbConfig::default() }
    }

    #[test]
    fn create_rejects_non_power_of_two_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad-page-size.db");
        let err = Db::create(&path, config(1000)).unwrap_err();
        assert!(matches!(err, DecentError::Malformed(_)));
        assert!(!path.exists());
    }

    #[test]
    fn create_rejects_page_size_below_minimum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("too-small.db");
        let err = Db::create(&path, config(256)).unwrap_err();
        assert!(matches!(err, DecentError::Malformed(_)));
    }

    #[test]
    fn create_accepts_boundary_page_sizes() {
        let dir = tempdir().unwrap();
        Db::create(dir.path().join("min.db"), config(512)).unwrap();
        Db::create(dir.path().join("max.db"), config(65536)).unwrap();
    }

    #[test]
    fn builder_methods_override_individual_defaults() {
        let cfg = DbConfig::new()
            .with_page_size(8192)
            .with_cache_pages(64)
            .with_durability(Durability::None);
        assert_eq!(cfg.page_size, 8192);
        assert_eq!(cfg.cache_pages, 64);
        assert_eq!(cfg.durability, Durability::None);
        assert_eq!(cfg.wal_checkpoint_bytes, DbConfig::default().wal_checkpoint_bytes);
    }

    #[test]
    fn create_rejects_existing_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.db");
        Db::create(&path, config(512)).unwrap();
        assert!(matches!(Db::create(&path, config(512)), Err(DecentError::AlreadyExists(_))));
    }

    #[test]
    fn write_commit_then_reopen_recovers_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.db");
        let table_root = {
            let db = Db::create(&path, config(512)).unwrap();
            let mut txn = db.begin_write().unwrap();
            let catalog_root = crate::btree::create_empty_tree(&mut txn).unwrap();
            let table_root = crate::btree::create_empty_tree(&mut txn).unwrap();
            let catalog_root = catalog::put(
                &mut txn,
                catalog_root,
                &CatalogRecord::Table(TableDef {
                    name: "widgets".into(),
                    root_page: table_root,
                    next_row_id: 0,
                    integer_primary_key_column: None,
                }),
            )
            .unwrap();
            txn.header_mut().catalog_root = catalog_root;
            txn.commit().unwrap();
            db.checkpoint(CheckpointMode::Force).unwrap();
            table_root
        };

        let db = Db::open(&path, config(512)).unwrap();
        assert_eq!(db.table_root("widgets").unwrap(), Some(table_root));
    }

    #[test]
    fn try_begin_write_is_busy_while_writer_held() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.db");
        let db = Db::create(&path, config(512)).unwrap();
        let _txn = db.begin_write().unwrap();
        assert!(matches!(db.try_begin_write(), Err(DecentError::Busy)));
    }

    #[test]
    fn durability_none_still_commits_and_recovers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("e.db");
        let cfg = config(512).with_durability(Durability::None);
        {
            let db = Db::create(&path, cfg.clone()).unwrap();
            let mut txn = db.begin_write().unwrap();
            txn.header_mut().schema_cookie = 7;
            txn.commit().unwrap();
            db.checkpoint(CheckpointMode::Force).unwrap();
        }
        let db = Db::open(&path, cfg).unwrap();
        assert_eq!(db.stats().unwrap().schema_cookie, 7);
    }

    #[test]
    fn stats_reflect_committed_schema_cookie() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.db");
        let db = Db::create(&path, config(512)).unwrap();
        let mut txn = db.begin_write().unwrap();
        txn.header_mut().schema_cookie = 1;
        txn.commit().unwrap();
        assert_eq!(db.stats().unwrap().schema_cookie, 1);
    }
}
