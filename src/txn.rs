//! Transaction manager (component G): a single writer serialized by a mutex,
//! any number of concurrent readers pinned to a WAL-end-LSN snapshot.
//! A write transaction stages every page mutation in an
//! in-memory dirty map and becomes visible to new readers only at commit,
//! in one WAL append batch.

use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};

use crate::btree::{self, Direction};
use crate::error::{DecentError, Result};
use crate::pager::{Header, Pager, HEADER_LEN, HEADER_PAGE_ID};
use crate::pageio::{PageIo, PageReader};
use crate::wal::Wal;

/// Shared state a [`ReadTxn`]/[`WriteTxn`] borrows from; owned by
/// [`crate::db::Db`]. Kept separate from `Db` so `Db` can add
/// configuration/bookkeeping fields without this module depending on them.
#[derive(Debug)]
pub struct Shared {
    pub(crate) pager: Pager,
    pub(crate) wal: Mutex<Wal>,
    pub(crate) writer: Mutex<()>,
}

impl Shared {
    fn read_committed_page(&self, page_id: u32, snapshot_lsn: u64) -> Result<Vec<u8>> {
        if let Some(bytes) = self.wal.lock().read_overlay(page_id, snapshot_lsn) {
            return Ok(bytes);
        }
        self.pager.read_page(page_id)
    }

    pub(crate) fn read_header(&self, snapshot_lsn: u64) -> Result<Header> {
        let buf = self.read_committed_page(HEADER_PAGE_ID, snapshot_lsn)?;
        Header::decode(&buf[..HEADER_LEN])
    }
}

/// A read-only snapshot pinned to the WAL's end-LSN as of [`begin_read`].
/// Every page fetched through it reflects exactly that instant, regardless
/// of commits or checkpoints that happen afterward, until `SnapshotExpired`
/// is raised by a forced checkpoint that ran out of patience.
pub struct ReadTxn<'db> {
    shared: &'db Shared,
    snapshot_lsn: u64,
}

impl<'db> ReadTxn<'db> {
    pub(crate) fn begin(shared: &'db Shared) -> Self {
        let snapshot_lsn = shared.wal.lock().begin_snapshot();
        Self { shared, snapshot_lsn }
    }

    pub fn snapshot_lsn(&self) -> u64 {
        self.snapshot_lsn
    }

    pub fn header(&mut self) -> Result<Header> {
        self.shared.read_header(self.snapshot_lsn)
    }

    /// A [`Tree`] handle reading the B+Tree rooted at `root` as of this
    /// transaction's snapshot.
    pub fn tree(&mut self, root: u32) -> Tree<'_> {
        Tree { io: self, root }
    }
}

impl PageReader for ReadTxn<'_> {
    fn page_size(&self) -> usize {
        self.shared.pager.page_size()
    }

    fn read_page(&mut self, page_id: u32) -> Result<Vec<u8>> {
        if self.shared.wal.lock().is_snapshot_expired(self.snapshot_lsn) {
            return Err(DecentError::SnapshotExpired);
        }
        self.shared.read_committed_page(page_id, self.snapshot_lsn)
    }
}

/// [`ReadTxn`] also implements [`PageIo`] directly (rather than only through
/// [`crate::pageio::ReadOnlyPageIo`]) so `tree()` can hand out a [`Tree`]
/// without an extra wrapper type leaking into the public API; the mutating
/// methods below are unreachable in practice because nothing ever calls
/// `put`/`delete` against a `ReadTxn`'s tree, but they fail loudly rather
/// than silently no-op if that invariant is ever violated.
impl PageIo for ReadTxn<'_> {
    fn page_size(&self) -> usize {
        PageReader::page_size(self)
    }

    fn read_page(&mut self, page_id: u32) -> Result<Vec<u8>> {
        PageReader::read_page(self, page_id)
    }

    fn write_page(&mut self, _page_id: u32, _bytes: Vec<u8>) -> Result<()> {
        Err(DecentError::Corrupted("write attempted through a read transaction".into()))
    }

    fn alloc_page(&mut self) -> Result<u32> {
        Err(DecentError::Corrupted("page allocation attempted through a read transaction".into()))
    }

    fn free_page(&mut self, _page_id: u32) -> Result<()> {
        Err(DecentError::Corrupted("page free attempted through a read transaction".into()))
    }
}

impl Drop for ReadTxn<'_> {
    fn drop(&mut self) {
        self.shared.wal.lock().release_snapshot(self.snapshot_lsn);
    }
}

/// The single in-flight write transaction, holding the writer mutex for its
/// entire lifetime. Every page it touches is staged in `dirty` until
/// [`WriteTxn::commit`] appends one WAL batch; `rollback`/drop without
/// commit discards `dirty` and leaves the database untouched.
pub struct WriteTxn<'db> {
    shared: &'db Shared,
    _guard: MutexGuard<'db, ()>,
    header: Header,
    dirty: HashMap<u32, Vec<u8>>,
    lsn: u64,
}

impl<'db> WriteTxn<'db> {
    pub(crate) fn begin(shared: &'db Shared) -> Result<Self> {
        let guard = shared.writer.lock();
        let wal_end_lsn = shared.wal.lock().wal_end_lsn();
        let header = shared.read_header(wal_end_lsn)?;
        let lsn = shared.wal.lock().allocate_txn_lsn();
        Ok(Self { shared, _guard: guard, header, dirty: HashMap::new(), lsn })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// A [`Tree`] handle reading/writing the B+Tree rooted at `root` within
    /// this transaction. The caller is responsible for persisting a changed
    /// root (e.g. into a [`crate::catalog::TableDef`]) after a `put`/`delete`
    /// that splits the root page.
    pub fn tree(&mut self, root: u32) -> Tree<'_> {
        Tree { io: self, root }
    }

    /// Stage the header page and append every dirty page plus a commit frame
    /// to the WAL in one fsync. Triggers a passive checkpoint afterward if
    /// the WAL has grown past its configured threshold.
    pub fn commit(mut self) -> Result<()> {
        let page_size = self.page_size();
        let mut header_buf = vec![0u8; page_size];
        let encoded = self.header.encode();
        header_buf[..encoded.len()].copy_from_slice(&encoded);
        self.dirty.insert(HEADER_PAGE_ID, header_buf);

        let pages: Vec<(u32, Vec<u8>)> = self.dirty.drain().collect();
        let shared = self.shared;
        let lsn = self.lsn;
        shared.wal.lock().commit_transaction(lsn, &pages)?;
        drop(self);

        if shared.wal.lock().should_checkpoint() {
            crate::db::checkpoint_passive(shared)?;
        }
        Ok(())
    }

    /// Discard every staged page; the database is left exactly as it was
    /// before this transaction began.
    pub fn rollback(self) {}
}

impl PageIo for WriteTxn<'_> {
    fn page_size(&self) -> usize {
        self.shared.pager.page_size()
    }

    fn read_page(&mut self, page_id: u32) -> Result<Vec<u8>> {
        if let Some(bytes) = self.dirty.get(&page_id) {
            return Ok(bytes.clone());
        }
        // A write transaction is the only writer, so "latest committed" is
        // always the freshest data it should see for a page it hasn't
        // touched yet; `u64::MAX` as the snapshot bound picks the newest
        // overlay entry unconditionally.
        if let Some(bytes) = self.shared.wal.lock().read_overlay(page_id, u64::MAX) {
            return Ok(bytes);
        }
        self.shared.pager.read_page(page_id)
    }

    fn write_page(&mut self, page_id: u32, bytes: Vec<u8>) -> Result<()> {
        self.dirty.insert(page_id, bytes);
        Ok(())
    }

    fn alloc_page(&mut self) -> Result<u32> {
        if self.header.freelist_head != 0 {
            let page_id = self.header.freelist_head;
            let buf = self.read_page(page_id)?;
            let next = u32::from_le_bytes(buf[0..4].try_into().unwrap());
            self.header.freelist_head = next;
            return Ok(page_id);
        }
        Ok(self.shared.pager.allocate_page_id())
    }

    fn free_page(&mut self, page_id: u32) -> Result<()> {
        let mut buf = vec![0u8; self.page_size()];
        buf[0..4].copy_from_slice(&self.header.freelist_head.to_le_bytes());
        self.dirty.insert(page_id, buf);
        self.header.freelist_head = page_id;
        Ok(())
    }
}

/// A B+Tree handle bound to one transaction's [`PageIo`]. `root` tracks the
/// current root page id across `put`/`delete`, which the caller must write
/// back into the owning catalog/table record if it changed.
pub struct Tree<'a> {
    io: &'a mut dyn PageIo,
    root: u32,
}

impl<'a> Tree<'a> {
    pub fn root(&self) -> u32 {
        self.root
    }

    pub fn get(&mut self, key: u64) -> Result<Option<Vec<u8>>> {
        btree::get(self.io, self.root, key)
    }

    pub fn put(&mut self, key: u64, value: Vec<u8>) -> Result<()> {
        self.root = btree::put(self.io, self.root, key, value)?;
        Ok(())
    }

    pub fn delete(&mut self, key: u64) -> Result<bool> {
        btree::delete(self.io, self.root, key)
    }

    pub fn scan(&mut self, start_key: Option<u64>, direction: Direction) -> Result<Vec<(u64, Vec<u8>)>> {
        btree::scan(self.io, self.root, start_key, direction)
    }

    /// First entry with key >= `key`, if any. A convenience atop `scan`
    /// rather than a true persistent cursor: this engine's leaf pages carry
    /// no left-sibling pointer, so there's nothing cheaper to build `seek`/
    /// `prev` on top of.
    pub fn seek(&mut self, key: u64) -> Result<Option<(u64, Vec<u8>)>> {
        Ok(btree::scan(self.io, self.root, Some(key), Direction::Forward)?.into_iter().next())
    }

    /// Last entry with key strictly less than `key`.
    pub fn prev(&mut self, key: u64) -> Result<Option<(u64, Vec<u8>)>> {
        if key == 0 {
            return Ok(None);
        }
        Ok(btree::scan(self.io, self.root, Some(key - 1), Direction::Reverse)?.into_iter().next())
    }
}
