//! Overflow chains: linked pages `[next u32][payload]` holding the tail of
//! a value too large for one leaf cell. Allocated and
//! freed as a unit with their owning cell.

use crate::error::{DecentError, Result};
use crate::pageio::PageIo;

const CHAIN_HEADER_LEN: usize = 4;

/// Bytes of payload a value may carry inline before an overflow chain kicks
/// in: a quarter of the leaf's usable space.
pub fn inline_threshold(page_size: usize) -> usize {
    page_size / 4
}

/// Write `data` across as many freshly-allocated pages as needed and return
/// the chain's head page id. Pages are allocated back-to-front so every
/// page's `next` pointer is known before it is written once.
pub fn write_chain(io: &mut dyn PageIo, data: &[u8]) -> Result<u32> {
    let page_size = io.page_size();
    let capacity = page_size - CHAIN_HEADER_LEN;
    debug_assert!(!data.is_empty(), "overflow chain for empty value");
    let n_pages = data.len().div_ceil(capacity);

    let mut page_ids = Vec::with_capacity(n_pages);
    for _ in 0..n_pages {
        page_ids.push(io.alloc_page()?);
    }

    for i in (0..n_pages).rev() {
        let start = i * capacity;
        let end = ((i + 1) * capacity).min(data.len());
        let next = if i + 1 < n_pages { page_ids[i + 1] } else { 0 };
        let mut buf = vec![0u8; page_size];
        buf[0..4].copy_from_slice(&next.to_le_bytes());
        buf[4..4 + (end - start)].copy_from_slice(&data[start..end]);
        io.write_page(page_ids[i], buf)?;
    }
    Ok(page_ids[0])
}

/// Read back `total_len` bytes starting at `head`.
pub fn read_chain(io: &mut dyn PageIo, head: u32, total_len: u64) -> Result<Vec<u8>> {
    let page_size = io.page_size();
    let capacity = page_size - CHAIN_HEADER_LEN;
    let total_len = total_len as usize;
    let mut out = Vec::with_capacity(total_len);
    let mut page_id = head;
    while out.len() < total_len {
        let buf = io.read_page(page_id)?;
        if buf.len() != page_size {
            return Err(DecentError::Corrupted("overflow page short read".into()));
        }
        let next = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let remaining = total_len - out.len();
        let take = remaining.min(capacity);
        out.extend_from_slice(&buf[4..4 + take]);
        if out.len() < total_len {
            if next == 0 {
                return Err(DecentError::Corrupted(
                    "overflow chain ended before total_len reached".into(),
                ));
            }
            page_id = next;
        }
    }
    Ok(out)
}

/// Free every page in the chain rooted at `head`.
pub fn free_chain(io: &mut dyn PageIo, head: u32) -> Result<()> {
    let page_size = io.page_size();
    let mut page_id = head;
    loop {
        let buf = io.read_page(page_id)?;
        if buf.len() != page_size {
            return Err(DecentError::Corrupted("overflow page short read".into()));
        }
        let next = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        io.free_page(page_id)?;
        if next == 0 {
            break;
        }
        page_id = next;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MemIo {
        page_size: usize,
        pages: HashMap<u32, Vec<u8>>,
        next_id: u32,
        freelist: Vec<u32>,
    }

    impl MemIo {
        fn new(page_size: usize) -> Self {
            Self {
                page_size,
                pages: HashMap::new(),
                next_id: 1,
                freelist: Vec::new(),
            }
        }
    }

    impl PageIo for MemIo {
        fn page_size(&self) -> usize {
            self.page_size
        }
        fn read_page(&mut self, page_id: u32) -> Result<Vec<u8>> {
            Ok(self.pages.get(&page_id).cloned().unwrap_or_else(|| vec![0u8; self.page_size]))
        }
        fn write_page(&mut self, page_id: u32, bytes: Vec<u8>) -> Result<()> {
            self.pages.insert(page_id, bytes);
            Ok(())
        }
        fn alloc_page(&mut self) -> Result<u32> {
            if let Some(id) = self.freelist.pop() {
                return Ok(id);
            }
            let id = self.next_id;
            self.next_id += 1;
            Ok(id)
        }
        fn free_page(&mut self, page_id: u32) -> Result<()> {
            self.freelist.push(page_id);
            Ok(())
        }
    }

    #[test]
    fn round_trips_across_multiple_pages() {
        let mut io = MemIo::new(32);
        let data: Vec<u8> = (0..200u32).map(|i| (i % 251) as u8).collect();
        let head = write_chain(&mut io, &data).unwrap();
        let back = read_chain(&mut io, head, data.len() as u64).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn single_page_chain_round_trips() {
        let mut io = MemIo::new(64);
        let data = vec![7u8; 10];
        let head = write_chain(&mut io, &data).unwrap();
        assert_eq!(read_chain(&mut io, head, data.len() as u64).unwrap(), data);
    }

    #[test]
    fn free_chain_returns_every_page() {
        let mut io = MemIo::new(16);
        let data = vec![1u8; 40];
        let head = write_chain(&mut io, &data).unwrap();
        free_chain(&mut io, head).unwrap();
        assert!(!io.freelist.is_empty());
    }
}
