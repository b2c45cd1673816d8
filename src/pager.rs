//! Main-file page I/O and an always-clean LRU page cache (component B).
//!
//! Between checkpoints the main file never changes: every transaction's
//! writes live in the WAL overlay (component D) until [`Wal::checkpoint`]
//! drains them here via [`Pager::write_page`]. That invariant is why this
//! cache carries no dirty bit and no copy-on-write bookkeeping — every page
//! it holds is, by construction, exactly what's on disk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher;
use parking_lot::Mutex;

use crate::error::{DecentError, Result};
use crate::vfs::Vfs;

pub const HEADER_MAGIC: u32 = 0x4444_4231; // "DDB1"
pub const HEADER_FORMAT_VERSION: u16 = 1;
/// magic(4) + version(2) + page_size(4) + wal_end_lsn(8) + freelist_head(4)
/// + catalog_root(4) + schema_cookie(4) + crc(4). `page_size` is `u32`
/// because the maximum supported page size, 65536, does not fit in `u16`.
pub const HEADER_LEN: usize = 4 + 2 + 4 + 8 + 4 + 4 + 4 + 4;
/// Page 0 is reserved for [`Header`]; no B+Tree node ever lives there.
pub const HEADER_PAGE_ID: u32 = 0;

const DEFAULT_CACHE_PAGES: usize = 256;

/// Fixed-layout content of page 0. Everything a fresh `open()` needs to
/// find the rest of the database (catalog root, freelist, schema cookie)
/// lives here. Mutated the same way as any other page: through the WAL
/// overlay during a transaction, and written back to page 0 only at
/// checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub page_size: u32,
    /// WAL end-LSN as of the checkpoint that produced this on-disk header.
    /// Used only as a recovery sanity marker; the live value lives in
    /// `Wal::wal_end_lsn()`.
    pub wal_end_lsn: u64,
    pub freelist_head: u32,
    pub catalog_root: u32,
    pub schema_cookie: u32,
}

impl Header {
    pub fn fresh(page_size: u32) -> Self {
        Self {
            page_size,
            wal_end_lsn: 0,
            freelist_head: 0,
            catalog_root: 0,
            schema_cookie: 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.write_u32::<LittleEndian>(HEADER_MAGIC).unwrap();
        out.write_u16::<LittleEndian>(HEADER_FORMAT_VERSION).unwrap();
        out.write_u32::<LittleEndian>(self.page_size).unwrap();
        out.write_u64::<LittleEndian>(self.wal_end_lsn).unwrap();
        out.write_u32::<LittleEndian>(self.freelist_head).unwrap();
        out.write_u32::<LittleEndian>(self.catalog_root).unwrap();
        out.write_u32::<LittleEndian>(self.schema_cookie).unwrap();
        let mut hasher = Hasher::new();
        hasher.update(&out);
        out.write_u32::<LittleEndian>(hasher.finalize()).unwrap();
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(DecentError::Corrupted("database header truncated".into()));
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != HEADER_MAGIC {
            return Err(DecentError::IncompatibleFormat("bad database magic".into()));
        }
        let version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        if version != HEADER_FORMAT_VERSION {
            return Err(DecentError::IncompatibleFormat(format!(
                "unsupported database format version {version}"
            )));
        }
        let stored_crc = u32::from_le_bytes(buf[30..34].try_into().unwrap());
        let mut hasher = Hasher::new();
        hasher.update(&buf[0..30]);
        if hasher.finalize() != stored_crc {
            return Err(DecentError::Corrupted("database header checksum mismatch".into()));
        }
        Ok(Self {
            page_size: u32::from_le_bytes(buf[6..10].try_into().unwrap()),
            wal_end_lsn: u64::from_le_bytes(buf[10..18].try_into().unwrap()),
            freelist_head: u32::from_le_bytes(buf[18..22].try_into().unwrap()),
            catalog_root: u32::from_le_bytes(buf[22..26].try_into().unwrap()),
            schema_cookie: u32::from_le_bytes(buf[26..30].try_into().unwrap()),
        })
    }
}

#[derive(Debug)]
struct CacheEntry {
    payload: Vec<u8>,
    last_access: u64,
}

/// Plain LRU, no pinning: a cache entry is only ever a clone of what's on
/// disk, so eviction never has to worry about losing an update.
#[derive(Debug)]
struct PageCache {
    capacity: usize,
    entries: HashMap<u32, CacheEntry>,
    access_counter: u64,
}

impl PageCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            access_counter: 0,
        }
    }

    fn next_access(&mut self) -> u64 {
        self.access_counter = self.access_counter.saturating_add(1);
        self.access_counter
    }

    fn get(&mut self, page_id: u32) -> Option<Vec<u8>> {
        let access = self.next_access();
        let entry = self.entries.get_mut(&page_id)?;
        entry.last_access = access;
        Some(entry.payload.clone())
    }

    fn put(&mut self, page_id: u32, payload: Vec<u8>) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&page_id) {
            self.evict_one();
        }
        let access = self.next_access();
        self.entries.insert(page_id, CacheEntry { payload, last_access: access });
    }

    fn invalidate(&mut self, page_id: u32) {
        self.entries.remove(&page_id);
    }

    fn evict_one(&mut self) {
        if let Some((&victim, _)) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
        {
            self.entries.remove(&victim);
        }
    }
}

/// Raw paged access to the main database file, independent of transaction
/// semantics: callers decide whether a page should be served from the WAL
/// overlay first. `Pager` only ever reflects what has been checkpointed.
#[derive(Debug)]
pub struct Pager {
    vfs: Mutex<Box<dyn Vfs>>,
    page_size: usize,
    /// Next unallocated page id. Growing this never touches the file:
    /// the first `write_page` for a new id extends it via seek-past-EOF.
    page_count: AtomicU32,
    cache: Mutex<PageCache>,
    /// Whether `write_page` fsyncs after writing. Default `true`; `Db`
    /// lowers this per `Durability::None`.
    fsync_enabled: AtomicBool,
}

impl Pager {
    pub fn create(mut vfs: Box<dyn Vfs>, page_size: usize, cache_pages: usize) -> Result<Self> {
        let header = Header::fresh(page_size as u32);
        let mut page = vec![0u8; page_size];
        let encoded = header.encode();
        page[..encoded.len()].copy_from_slice(&encoded);
        vfs.write_at(0, &page)?;
        vfs.fsync()?;
        Ok(Self {
            vfs: Mutex::new(vfs),
            page_size,
            page_count: AtomicU32::new(1),
            cache: Mutex::new(PageCache::new(cache_pages.max(1))),
            fsync_enabled: AtomicBool::new(true),
        })
    }

    pub fn open(mut vfs: Box<dyn Vfs>, cache_pages: usize) -> Result<(Self, Header)> {
        let mut probe = vec![0u8; HEADER_LEN];
        vfs.read_at(0, &mut probe)?;
        let header = Header::decode(&probe)?;
        let page_size = header.page_size as usize;
        let file_len = vfs.size()?;
        let page_count = ((file_len + page_size as u64 - 1) / page_size as u64).max(1) as u32;
        let pager = Self {
            vfs: Mutex::new(vfs),
            page_size,
            page_count: AtomicU32::new(page_count),
            cache: Mutex::new(PageCache::new(cache_pages.max(1))),
            fsync_enabled: AtomicBool::new(true),
        };
        Ok((pager, header))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::Acquire)
    }

    /// Reserve the next page id. The id is valid immediately for use in WAL
    /// overlay frames even though the main file hasn't grown yet.
    pub fn allocate_page_id(&self) -> u32 {
        self.page_count.fetch_add(1, Ordering::AcqRel)
    }

    /// Read a page as it exists in the checkpointed main file. A page id at
    /// or beyond what has ever been flushed reads back as all-zero, which
    /// is correct for a page a transaction allocated but hasn't committed
    /// yet: a reader should never reach this path for such a page because
    /// the WAL overlay is checked first.
    pub fn read_page(&self, page_id: u32) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.lock().get(page_id) {
            return Ok(cached);
        }
        let offset = page_id as u64 * self.page_size as u64;
        let mut vfs = self.vfs.lock();
        let file_len = vfs.size()?;
        let mut buf = vec![0u8; self.page_size];
        if offset + self.page_size as u64 <= file_len {
            vfs.read_at(offset, &mut buf)?;
        }
        drop(vfs);
        self.cache.lock().put(page_id, buf.clone());
        Ok(buf)
    }

    /// Write a page back to the main file and, unless durability has traded
    /// it away, fsync. This is the only entry point that mutates the main
    /// file; it is bound as the `flush_page` hook passed to
    /// [`crate::wal::Wal::checkpoint`]. Called rarely relative to
    /// per-transaction commits, so an fsync per call is the simple, durable
    /// default choice rather than batching.
    pub fn write_page(&self, page_id: u32, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.page_size {
            return Err(DecentError::Malformed(format!(
                "page {page_id} payload length {} does not match page size {}",
                bytes.len(),
                self.page_size
            )));
        }
        let offset = page_id as u64 * self.page_size as u64;
        {
            let mut vfs = self.vfs.lock();
            vfs.write_at(offset, bytes)?;
            if self.fsync_enabled.load(Ordering::Acquire) {
                vfs.fsync()?;
            }
        }
        self.cache.lock().put(page_id, bytes.to_vec());
        let next = page_id.saturating_add(1);
        if next > self.page_count.load(Ordering::Acquire) {
            self.page_count.store(next, Ordering::Release);
        }
        Ok(())
    }

    pub fn invalidate(&self, page_id: u32) {
        self.cache.lock().invalidate(page_id);
    }

    /// Set by [`crate::db::Db`] from its `Durability` config. Disabling
    /// trades the main file's durability across a crash for checkpoint
    /// throughput.
    pub fn set_fsync_enabled(&self, enabled: bool) {
        self.fsync_enabled.store(enabled, Ordering::Release);
    }

    /// Widen `page_count` if `at_least` is higher than what the main file's
    /// length implied. Used after WAL recovery: a page allocated by a
    /// committed-but-not-yet-checkpointed transaction only exists in the WAL
    /// overlay, so the main-file-derived count alone would let a fresh
    /// allocation reuse an id still live in that overlay.
    pub fn ensure_page_count_at_least(&self, at_least: u32) {
        let mut current = self.page_count.load(Ordering::Acquire);
        while at_least > current {
            match self.page_count.compare_exchange_weak(
                current,
                at_least,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}
