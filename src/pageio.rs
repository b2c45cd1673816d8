//! The seam every B+Tree, overflow-chain, catalog, and trigram-posting
//! operation mutates pages through. A read transaction only ever implements
//! the read half; `alloc_page`/`write_page`/`free_page` exist so the same
//! tree-walking code in [`crate::btree`] serves both transaction kinds
//! without duplicating traversal logic per mutability.

use crate::error::{DecentError, Result};

pub trait PageIo {
    fn page_size(&self) -> usize;

    fn read_page(&mut self, page_id: u32) -> Result<Vec<u8>>;

    /// Stage a page write. Durable only once the owning transaction commits.
    fn write_page(&mut self, page_id: u32, bytes: Vec<u8>) -> Result<()>;

    /// Allocate a page id, preferring the freelist over growing the file.
    fn alloc_page(&mut self) -> Result<u32>;

    /// Return a page to the freelist. The caller must not reference
    /// `page_id` again within the same transaction.
    fn free_page(&mut self, page_id: u32) -> Result<()>;
}

/// A [`PageIo`] that rejects every mutating call; bound to read-only
/// transactions so a tree-walk that accidentally takes the write path fails
/// loudly instead of corrupting a snapshot.
pub struct ReadOnlyPageIo<'a, R> {
    pub reader: &'a mut R,
}

pub trait PageReader {
    fn page_size(&self) -> usize;
    fn read_page(&mut self, page_id: u32) -> Result<Vec<u8>>;
}

impl<'a, R: PageReader> PageIo for ReadOnlyPageIo<'a, R> {
    fn page_size(&self) -> usize {
        self.reader.page_size()
    }

    fn read_page(&mut self, page_id: u32) -> Result<Vec<u8>> {
        self.reader.read_page(page_id)
    }

    fn write_page(&mut self, _page_id: u32, _bytes: Vec<u8>) -> Result<()> {
        Err(DecentError::Corrupted(
            "attempted write through a read-only transaction".into(),
        ))
    }

    fn alloc_page(&mut self) -> Result<u32> {
        Err(DecentError::Corrupted(
            "attempted page allocation through a read-only transaction".into(),
        ))
    }

    fn free_page(&mut self, _page_id: u32) -> Result<()> {
        Err(DecentError::Corrupted(
            "attempted page free through a read-only transaction".into(),
        ))
    }
}
