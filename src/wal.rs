//! Append-only write-ahead log (component D). Frames are physical page
//! images, not logical operations: `PAGE` carries `[page-id][page bytes]`,
//! `COMMIT` carries `[txn-id][timestamp]`, and `CHECKPOINT_BEGIN`/`_END`
//! bracket the checkpoint protocol. Recovery rebuilds an in-memory overlay
//! index (`page_id -> newest WAL offset with lsn <= snapshot`) rather than
//! replaying logical puts, so a reader at snapshot `S` can be served directly
//! from the WAL without re-applying any operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher;
use parking_lot::Mutex;

use crate::error::{DecentError, Result};
use crate::varint::{read_varint_u64, write_varint_u64};
use crate::vfs::Vfs;

const WAL_MAGIC: u32 = 0x4442_5731; // "DBW1"
const WAL_VERSION: u16 = 1;
/// magic(4) + version(2) + page_size(4) + salt(8). `page_size` is `u32` to
/// match the database header (see `pager::HEADER_LEN`): 65536, the maximum
/// supported page size, does not fit in `u16`.
const WAL_HEADER_LEN: usize = 4 + 2 + 4 + 8;

const FRAME_PAGE: u8 = 1;
const FRAME_COMMIT: u8 = 2;
const FRAME_CHECKPOINT_BEGIN: u8 = 3;
const FRAME_CHECKPOINT_END: u8 = 4;

/// Default checkpoint trigger: 16 MiB of WAL growth.
pub const DEFAULT_CHECKPOINT_BYTES: u64 = 16 * 1024 * 1024;
/// Default forced-checkpoint deadline: 30 seconds.
pub const DEFAULT_CHECKPOINT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
struct OverlayEntry {
    lsn: u64,
    payload: Vec<u8>,
}

/// Reference-counted registry of outstanding reader snapshots. Retains the
/// pre-checkpoint overlay entries a snapshot still needs until the last
/// holder of that snapshot (or anything older) releases it.
#[derive(Debug, Default)]
struct SnapshotRegistry {
    refcounts: HashMap<u64, u64>,
}

impl SnapshotRegistry {
    fn acquire(&mut self, lsn: u64) {
        *self.refcounts.entry(lsn).or_insert(0) += 1;
    }

    fn release(&mut self, lsn: u64) {
        if let Some(count) = self.refcounts.get_mut(&lsn) {
            *count -= 1;
            if *count == 0 {
                self.refcounts.remove(&lsn);
            }
        }
    }

    fn oldest(&self) -> Option<u64> {
        self.refcounts.keys().copied().min()
    }
}

/// The write-ahead log and its in-memory read overlay.
#[derive(Debug)]
pub struct Wal {
    vfs: Box<dyn Vfs>,
    page_size: usize,
    /// `page_id -> newest frame at-or-below that page's most recent write`.
    /// A real overlay may hold several generations per page; we keep only
    /// the newest because snapshot reads always want the newest entry with
    /// `lsn <= snapshot` and older generations are superseded once a
    /// snapshot that could see them has released.
    overlay: HashMap<u32, Vec<OverlayEntry>>,
    append_offset: u64,
    next_lsn: AtomicU64,
    wal_end_lsn: AtomicU64,
    checkpoint_bytes: u64,
    snapshots: Mutex<SnapshotRegistry>,
    /// Set by a forced checkpoint that proceeded past its deadline with
    /// readers still attached; any snapshot LSN below this has had its
    /// overlay pruned out from under it and must report `SnapshotExpired`.
    expired_floor: AtomicU64,
    /// Whether `commit_transaction` fsyncs after appending a transaction's
    /// frames. Default `true`; `Db` lowers this per `Durability::Fsync`/`None`.
    commit_fsync_enabled: bool,
    /// Whether `checkpoint_inner` fsyncs after its `CHECKPOINT_END` frame.
    /// Default `true`; `Db` lowers this per `Durability::None`.
    checkpoint_fsync_enabled: bool,
}

impl Wal {
    pub fn create(mut vfs: Box<dyn Vfs>, page_size: usize, checkpoint_bytes: u64) -> Result<Self> {
        let mut header = Vec::with_capacity(WAL_HEADER_LEN);
        header.write_u32::<LittleEndian>(WAL_MAGIC)?;
        header.write_u16::<LittleEndian>(WAL_VERSION)?;
        header.write_u32::<LittleEndian>(page_size as u32)?;
        header.write_u64::<LittleEndian>(salt())?;
        vfs.set_len(WAL_HEADER_LEN as u64)?;
        vfs.write_at(0, &header)?;
        vfs.fsync()?;
        Ok(Self {
            vfs,
            page_size,
            overlay: HashMap::new(),
            append_offset: WAL_HEADER_LEN as u64,
            next_lsn: AtomicU64::new(1),
            wal_end_lsn: AtomicU64::new(0),
            checkpoint_bytes,
            snapshots: Mutex::new(SnapshotRegistry::default()),
            expired_floor: AtomicU64::new(0),
            commit_fsync_enabled: true,
            checkpoint_fsync_enabled: true,
        })
    }

    /// Open an existing WAL sidecar and recover its overlay. `checkpoint_bytes ==
    /// 0` after recovery means the WAL is empty/freshly truncated.
    pub fn open_and_recover(
        mut vfs: Box<dyn Vfs>,
        page_size: usize,
        checkpoint_bytes: u64,
    ) -> Result<Self> {
        let len = vfs.size()?;
        if len < WAL_HEADER_LEN as u64 {
            return Err(DecentError::Corrupted("wal file shorter than header".into()));
        }
        let mut header = vec![0u8; WAL_HEADER_LEN];
        vfs.read_at(0, &mut header)?;
        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let version = u16::from_le_bytes(header[4..6].try_into().unwrap());
        let hdr_page_size = u32::from_le_bytes(header[6..10].try_into().unwrap());
        if magic != WAL_MAGIC {
            return Err(DecentError::IncompatibleFormat("bad wal magic".into()));
        }
        if version != WAL_VERSION {
            return Err(DecentError::IncompatibleFormat(format!(
                "unsupported wal version {version}"
            )));
        }
        if hdr_page_size as usize != page_size {
            return Err(DecentError::IncompatibleFormat(
                "wal page size does not match database page size".into(),
            ));
        }

        let mut wal = Self {
            vfs,
            page_size,
            overlay: HashMap::new(),
            append_offset: WAL_HEADER_LEN as u64,
            next_lsn: AtomicU64::new(1),
            wal_end_lsn: AtomicU64::new(0),
            checkpoint_bytes,
            snapshots: Mutex::new(SnapshotRegistry::default()),
            expired_floor: AtomicU64::new(0),
            commit_fsync_enabled: true,
            checkpoint_fsync_enabled: true,
        };
        wal.recover(len)?;
        Ok(wal)
    }

    /// Scan from the start, verifying checksums; stop at the first failure
    /// or truncated frame (treated as end-of-log). Replay
    /// applies only `PAGE` frames belonging to a transaction whose `COMMIT`
    /// frame was also fully present.
    fn recover(&mut self, file_len: u64) -> Result<()> {
        let mut offset = WAL_HEADER_LEN as u64;
        let mut pending: Vec<(u32, u64, Vec<u8>)> = Vec::new();
        let mut highest_committed_lsn = 0u64;

        while offset < file_len {
            match self.read_frame(offset) {
                Ok(Some((kind, lsn, payload, frame_len))) => {
                    match kind {
                        FRAME_PAGE => {
                            let page_id = u32::from_le_bytes(payload[0..4].try_into().unwrap());
                            let bytes = payload[4..].to_vec();
                            pending.push((page_id, lsn, bytes));
                        }
                        FRAME_COMMIT => {
                            highest_committed_lsn = lsn;
                            for (page_id, page_lsn, bytes) in pending.drain(..) {
                                if page_lsn == lsn {
                                    self.apply_overlay(page_id, lsn, bytes);
                                }
                            }
                        }
                        FRAME_CHECKPOINT_BEGIN | FRAME_CHECKPOINT_END => {}
                        _ => {
                            eprintln!("wal recovery: unknown frame kind {kind} at offset {offset}, truncating");
                            break;
                        }
                    }
                    offset += frame_len;
                }
                Ok(None) => {
                    eprintln!("wal recovery: truncated frame at offset {offset}, stopping replay");
                    break;
                }
                Err(e) => {
                    eprintln!("wal recovery: checksum/format failure at offset {offset} ({e}), stopping replay");
                    break;
                }
            }
        }

        // Uncommitted PAGE frames left in `pending` are discarded: a crash
        // between the last PAGE frame and its COMMIT never registers.
        self.append_offset = offset;
        self.wal_end_lsn.store(highest_committed_lsn, Ordering::Release);
        self.next_lsn.store(highest_committed_lsn + 1, Ordering::Release);
        Ok(())
    }

    fn apply_overlay(&mut self, page_id: u32, lsn: u64, payload: Vec<u8>) {
        let entries = self.overlay.entry(page_id).or_default();
        entries.push(OverlayEntry { lsn, payload });
        entries.sort_by_key(|e| e.lsn);
    }

    /// Read one frame at `offset`. Returns `Ok(None)` for a truncated frame
    /// (treated as end-of-log, never silently accepted past that point).
    fn read_frame(&mut self, offset: u64) -> Result<Option<(u8, u64, Vec<u8>, u64)>> {
        let file_len = self.vfs.size()?;
        // kind(1) + lsn(8) + at least 1 byte of varint length.
        if offset + 10 > file_len {
            return Ok(None);
        }
        let mut head = [0u8; 9];
        self.vfs.read_at(offset, &mut head)?;
        let kind = head[0];
        let lsn = u64::from_le_bytes(head[1..9].try_into().unwrap());

        // Probe the length varint (max 10 bytes) without over-reading past EOF.
        let probe_len = (file_len - (offset + 9)).min(10) as usize;
        let mut probe = vec![0u8; probe_len];
        self.vfs.read_at(offset + 9, &mut probe)?;
        let (payload_len, varint_len) = match read_varint_u64(&probe) {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        let payload_len = payload_len as usize;

        let frame_len = 1 + 8 + varint_len as u64 + payload_len as u64 + 4;
        if offset + frame_len > file_len {
            return Ok(None);
        }

        let mut rest = vec![0u8; payload_len + 4];
        self.vfs.read_at(offset + 9 + varint_len as u64, &mut rest)?;
        let payload = rest[..payload_len].to_vec();
        let stored_crc = u32::from_le_bytes(rest[payload_len..payload_len + 4].try_into().unwrap());

        let mut hasher = Hasher::new();
        hasher.update(&head);
        hasher.update(&probe[..varint_len]);
        hasher.update(&payload);
        if hasher.finalize() != stored_crc {
            return Err(DecentError::Corrupted(format!(
                "wal frame checksum mismatch at offset {offset}"
            )));
        }

        Ok(Some((kind, lsn, payload, frame_len)))
    }

    fn append_frame(&mut self, kind: u8, lsn: u64, payload: &[u8]) -> Result<u64> {
        let mut buf = Vec::with_capacity(9 + payload.len() + 5);
        buf.push(kind);
        buf.extend_from_slice(&lsn.to_le_bytes());
        write_varint_u64(&mut buf, payload.len() as u64);
        buf.extend_from_slice(payload);
        let mut hasher = Hasher::new();
        hasher.update(&buf);
        let crc = hasher.finalize();
        buf.extend_from_slice(&crc.to_le_bytes());

        let offset = self.append_offset;
        self.vfs.write_at(offset, &buf)?;
        self.append_offset += buf.len() as u64;
        Ok(offset)
    }

    /// Allocate the next sequential LSN under the writer mutex. Callers
    /// (the transaction manager) must hold the writer lock for the lifetime
    /// of the transaction using this LSN.
    pub fn allocate_txn_lsn(&self) -> u64 {
        self.next_lsn.fetch_add(1, Ordering::AcqRel)
    }

    /// Set by [`crate::db::Db`] from its `Durability` config. Disabling
    /// trades the durability of the most recently committed transaction(s)
    /// across a crash for commit throughput.
    pub fn set_commit_fsync_enabled(&mut self, enabled: bool) {
        self.commit_fsync_enabled = enabled;
    }

    /// Set by [`crate::db::Db`] from its `Durability` config. Disabling
    /// trades durability of the checkpoint boundary itself (the WAL side,
    /// not the main file flush in [`crate::pager::Pager::write_page`]) for
    /// checkpoint throughput.
    pub fn set_checkpoint_fsync_enabled(&mut self, enabled: bool) {
        self.checkpoint_fsync_enabled = enabled;
    }

    /// Append every dirty page as a `PAGE` frame followed by a `COMMIT`
    /// frame, fsync once, then publish `wal_end_lsn` with release ordering.
    pub fn commit_transaction(&mut self, lsn: u64, pages: &[(u32, Vec<u8>)]) -> Result<()> {
        for (page_id, bytes) in pages {
            let mut payload = Vec::with_capacity(4 + bytes.len());
            payload.extend_from_slice(&page_id.to_le_bytes());
            payload.extend_from_slice(bytes);
            self.append_frame(FRAME_PAGE, lsn, &payload)?;
        }
        let timestamp = now_unix_millis();
        let mut commit_payload = Vec::with_capacity(16);
        commit_payload.extend_from_slice(&lsn.to_le_bytes());
        commit_payload.extend_from_slice(&timestamp.to_le_bytes());
        self.append_frame(FRAME_COMMIT, lsn, &commit_payload)?;
        if self.commit_fsync_enabled {
            self.vfs.fsync()?;
        }

        for (page_id, bytes) in pages {
            self.apply_overlay(*page_id, lsn, bytes.clone());
        }
        self.wal_end_lsn.store(lsn, Ordering::Release);
        Ok(())
    }

    pub fn wal_end_lsn(&self) -> u64 {
        self.wal_end_lsn.load(Ordering::Acquire)
    }

    pub fn begin_snapshot(&self) -> u64 {
        let lsn = self.wal_end_lsn();
        self.snapshots.lock().acquire(lsn);
        lsn
    }

    /// Whether `snapshot_lsn` has had its overlay pruned out from under it
    /// by a forced checkpoint that proceeded past its deadline. Callers
    /// must check this before trusting [`Wal::read_overlay`] for a page
    /// fetch under that snapshot.
    pub fn is_snapshot_expired(&self, snapshot_lsn: u64) -> bool {
        snapshot_lsn < self.expired_floor.load(Ordering::Acquire)
    }

    pub fn release_snapshot(&self, lsn: u64) {
        self.snapshots.lock().release(lsn);
    }

    /// Look up the overlay for `page_id` as of `snapshot_lsn`: the newest
    /// entry with `lsn <= snapshot_lsn`, or `None` if the main file holds
    /// the authoritative copy.
    pub fn read_overlay(&self, page_id: u32, snapshot_lsn: u64) -> Option<Vec<u8>> {
        let entries = self.overlay.get(&page_id)?;
        entries
            .iter()
            .rev()
            .find(|e| e.lsn <= snapshot_lsn)
            .map(|e| e.payload.clone())
    }

    pub fn should_checkpoint(&self) -> bool {
        self.append_offset >= WAL_HEADER_LEN as u64 + self.checkpoint_bytes
    }

    /// Oldest snapshot LSN still held by a reader, if any (used by a forced
    /// checkpoint to decide whether the deadline has been exceeded).
    pub fn oldest_snapshot(&self) -> Option<u64> {
        self.snapshots.lock().oldest()
    }

    /// Highest page id carried by any entry in the current overlay. A page
    /// allocated by a transaction that committed before a crash exists only
    /// here until the next checkpoint writes it into the main file, so the
    /// pager's page-count (rebuilt from the main file's length on open) must
    /// be widened past this before handing out fresh ids, or a new
    /// allocation could collide with one already live in the overlay.
    pub fn max_overlay_page_id(&self) -> Option<u32> {
        self.overlay.keys().copied().max()
    }

    /// Passive checkpoint: prunes the overlay and truncates the WAL only if
    /// no live reader snapshot predates the checkpoint's target LSN.
    pub fn checkpoint(
        &mut self,
        flush_page: impl FnMut(u32, &[u8]) -> Result<()>,
    ) -> Result<()> {
        self.checkpoint_inner(flush_page, false)
    }

    /// Forced checkpoint: if the deadline has already been exceeded with
    /// readers still attached, proceeds anyway and raises `expired_floor` to
    /// the checkpoint's target LSN. Any snapshot below that floor must then
    /// report `SnapshotExpired` on its next page fetch.
    pub fn force_checkpoint(
        &mut self,
        flush_page: impl FnMut(u32, &[u8]) -> Result<()>,
    ) -> Result<()> {
        self.checkpoint_inner(flush_page, true)
    }

    /// `CHECKPOINT_BEGIN` / per-page flush (via `flush_page`) / `CHECKPOINT_END`
    /// / truncate. `flush_page` is the caller's hook into
    /// the pager's main-file writer (component B); this module never touches
    /// the main file directly.
    fn checkpoint_inner(
        &mut self,
        mut flush_page: impl FnMut(u32, &[u8]) -> Result<()>,
        force: bool,
    ) -> Result<()> {
        let target_lsn = self.wal_end_lsn();
        let begin_lsn = self.allocate_txn_lsn();
        self.append_frame(FRAME_CHECKPOINT_BEGIN, begin_lsn, &[])?;
        eprintln!("checkpoint: begin lsn={begin_lsn} target={target_lsn}");

        let mut pages: Vec<(u32, Vec<u8>)> = self
            .overlay
            .iter()
            .filter_map(|(page_id, entries)| {
                entries
                    .iter()
                    .rev()
                    .find(|e| e.lsn <= target_lsn)
                    .map(|e| (*page_id, e.payload.clone()))
            })
            .collect();
        pages.sort_by_key(|(id, _)| *id);
        for (page_id, bytes) in &pages {
            flush_page(*page_id, bytes)?;
        }

        let end_lsn = self.allocate_txn_lsn();
        self.append_frame(FRAME_CHECKPOINT_END, end_lsn, &[])?;
        if self.checkpoint_fsync_enabled {
            self.vfs.fsync()?;
        }

        // A reader whose snapshot predates `target_lsn` still needs the
        // pre-checkpoint overlay: the main file now reflects `target_lsn`,
        // which is newer than what that reader is entitled to see. Only
        // prune entries at or below `target_lsn` (and only then truncate
        // the WAL) once no such reader remains, unless this is a forced
        // checkpoint proceeding past its deadline regardless.
        let no_stale_readers = self.oldest_snapshot().map(|s| s >= target_lsn).unwrap_or(true);
        if no_stale_readers || force {
            if force && !no_stale_readers {
                self.expired_floor.store(target_lsn, Ordering::Release);
                eprintln!("checkpoint: forced past deadline, expiring snapshots < {target_lsn}");
            }
            for entries in self.overlay.values_mut() {
                entries.retain(|e| e.lsn > target_lsn);
            }
            self.overlay.retain(|_, entries| !entries.is_empty());
            self.truncate_after_checkpoint()?;
        }
        eprintln!("checkpoint: end lsn={end_lsn}, {} pages flushed", pages.len());
        Ok(())
    }

    fn truncate_after_checkpoint(&mut self) -> Result<()> {
        self.vfs.set_len(WAL_HEADER_LEN as u64)?;
        self.append_offset = WAL_HEADER_LEN as u64;
        Ok(())
    }

    pub fn fsync(&mut self) -> Result<()> {
        self.vfs.fsync()
    }
}

fn salt() -> u64 {
    now_unix_millis()
}

fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::FileVfs;
    use tempfile::tempdir;

    fn new_wal(dir: &tempfile::TempDir, name: &str) -> Wal {
        let path = dir.path().join(name);
        let vfs = Box::new(FileVfs::create(&path).unwrap());
        Wal::create(vfs, 4096, DEFAULT_CHECKPOINT_BYTES).unwrap()
    }

    #[test]
    fn commit_publishes_overlay_and_end_lsn() {
        let dir = tempdir().unwrap();
        let mut wal = new_wal(&dir, "a.wal");
        let lsn = wal.allocate_txn_lsn();
        wal.commit_transaction(lsn, &[(7, vec![1, 2, 3])]).unwrap();
        assert_eq!(wal.wal_end_lsn(), lsn);
        assert_eq!(wal.read_overlay(7, lsn), Some(vec![1, 2, 3]));
    }

    #[test]
    fn snapshot_does_not_see_later_commit() {
        let dir = tempdir().unwrap();
        let mut wal = new_wal(&dir, "b.wal");
        let snap = wal.begin_snapshot();
        let lsn = wal.allocate_txn_lsn();
        wal.commit_transaction(lsn, &[(1, vec![9])]).unwrap();
        assert_eq!(wal.read_overlay(1, snap), None);
        assert_eq!(wal.read_overlay(1, wal.wal_end_lsn()), Some(vec![9]));
    }

    #[test]
    fn recovery_replays_only_committed_frames() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.wal");
        {
            let vfs = Box::new(FileVfs::create(&path).unwrap());
            let mut wal = Wal::create(vfs, 256, DEFAULT_CHECKPOINT_BYTES).unwrap();
            let lsn = wal.allocate_txn_lsn();
            wal.commit_transaction(lsn, &[(1, vec![0xAA; 8])]).unwrap();
        }
        let vfs = Box::new(FileVfs::open(&path).unwrap());
        let wal = Wal::open_and_recover(vfs, 256, DEFAULT_CHECKPOINT_BYTES).unwrap();
        assert_eq!(wal.wal_end_lsn(), 1);
        assert_eq!(wal.read_overlay(1, 1), Some(vec![0xAA; 8]));
    }

    #[test]
    fn torn_commit_frame_is_not_replayed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.wal");
        {
            let vfs = Box::new(FileVfs::create(&path).unwrap());
            let mut wal = Wal::create(vfs, 256, DEFAULT_CHECKPOINT_BYTES).unwrap();
            let lsn = wal.allocate_txn_lsn();
            wal.commit_transaction(lsn, &[(3, b"gamma".to_vec())]).unwrap();
        }
        // Simulate a torn COMMIT frame by truncating the file partway
        // through it: the last 6 bytes of the file are cut off.
        let full_len = std::fs::metadata(&path).unwrap().len();
        let f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(full_len - 6).unwrap();
        drop(f);

        let vfs = Box::new(FileVfs::open(&path).unwrap());
        let wal = Wal::open_and_recover(vfs, 256, DEFAULT_CHECKPOINT_BYTES).unwrap();
        assert_eq!(wal.wal_end_lsn(), 0);
        assert_eq!(wal.read_overlay(3, 1), None);
    }

    #[test]
    fn checkpoint_flushes_pages_and_truncates_when_no_readers() {
        let dir = tempdir().unwrap();
        let mut wal = new_wal(&dir, "e.wal");
        let lsn = wal.allocate_txn_lsn();
        wal.commit_transaction(lsn, &[(2, vec![5; 4])]).unwrap();

        let mut flushed = Vec::new();
        wal.checkpoint(|page_id, bytes| {
            flushed.push((page_id, bytes.to_vec()));
            Ok(())
        })
        .unwrap();

        assert_eq!(flushed, vec![(2, vec![5; 4])]);
        assert_eq!(wal.append_offset, WAL_HEADER_LEN as u64);
    }

    #[test]
    fn checkpoint_retains_overlay_for_older_live_snapshot() {
        let dir = tempdir().unwrap();
        let mut wal = new_wal(&dir, "f.wal");
        let reader_snapshot = wal.begin_snapshot();
        let lsn = wal.allocate_txn_lsn();
        wal.commit_transaction(lsn, &[(9, vec![1])]).unwrap();

        wal.checkpoint(|_, _| Ok(())).unwrap();
        assert_eq!(wal.read_overlay(9, lsn), Some(vec![1]));
        wal.release_snapshot(reader_snapshot);
    }

    #[test]
    fn commit_fsync_disabled_skips_vfs_fsync() {
        use crate::vfs::FaultyVfs;
        let dir = tempdir().unwrap();
        let path = dir.path().join("h.wal");
        let real = FileVfs::create(&path).unwrap();
        let faulty = FaultyVfs::new(Box::new(real), "wal-fsync-count");
        let fsyncs = faulty.fsync_count_handle();
        let mut wal = Wal::create(Box::new(faulty), 4096, DEFAULT_CHECKPOINT_BYTES).unwrap();
        let baseline = fsyncs.load(Ordering::Relaxed);

        wal.set_commit_fsync_enabled(false);
        let lsn = wal.allocate_txn_lsn();
        wal.commit_transaction(lsn, &[(1, vec![1; 8])]).unwrap();
        assert_eq!(fsyncs.load(Ordering::Relaxed), baseline);

        wal.set_commit_fsync_enabled(true);
        let lsn2 = wal.allocate_txn_lsn();
        wal.commit_transaction(lsn2, &[(1, vec![2; 8])]).unwrap();
        assert_eq!(fsyncs.load(Ordering::Relaxed), baseline + 1);
    }

    #[test]
    fn checkpoint_fsync_disabled_skips_vfs_fsync() {
        use crate::vfs::FaultyVfs;
        let dir = tempdir().unwrap();
        let path = dir.path().join("i.wal");
        let real = FileVfs::create(&path).unwrap();
        let faulty = FaultyVfs::new(Box::new(real), "wal-checkpoint-fsync-count");
        let fsyncs = faulty.fsync_count_handle();
        let mut wal = Wal::create(Box::new(faulty), 4096, DEFAULT_CHECKPOINT_BYTES).unwrap();
        wal.set_checkpoint_fsync_enabled(false);

        let lsn = wal.allocate_txn_lsn();
        wal.commit_transaction(lsn, &[(1, vec![1; 8])]).unwrap();
        let baseline = fsyncs.load(Ordering::Relaxed);
        wal.checkpoint(|_, _| Ok(())).unwrap();
        assert_eq!(fsyncs.load(Ordering::Relaxed), baseline);
    }

    #[test]
    fn force_checkpoint_expires_stale_reader_snapshot() {
        let dir = tempdir().unwrap();
        let mut wal = new_wal(&dir, "g.wal");
        let reader_snapshot = wal.begin_snapshot();
        let lsn = wal.allocate_txn_lsn();
        wal.commit_transaction(lsn, &[(4, vec![7])]).unwrap();

        assert!(!wal.is_snapshot_expired(reader_snapshot));
        wal.force_checkpoint(|_, _| Ok(())).unwrap();

        assert!(wal.is_snapshot_expired(reader_snapshot));
        assert_eq!(wal.read_overlay(4, reader_snapshot), None);
        assert_eq!(wal.append_offset, WAL_HEADER_LEN as u64);
        wal.release_snapshot(reader_snapshot);
    }
}
