//! Leaf page: `[header][cell, cell, ...]`, cells packed forward from the
//! header in ascending key order with no separate slot directory — the
//! spec's page header carries only `cell-count`/`free-space-offset`, so a
//! cell's start offset is recovered by scanning from the front. `scan_cells`
//! does this once per call and callers binary-search the resulting offset
//! list, trading an O(n) scan for the simplicity of a flat array with no
//! redirection layer to keep consistent on insert/delete.

use crate::error::{DecentError, Result};
use crate::varint::{read_varint_u64, write_varint_u64};

use super::page::{
    self, cell_count, free_space_offset, init_header, page_kind, set_cell_count,
    set_free_space_offset, set_trailer, trailer, PAGE_KIND_LEAF,
};

const FLAG_INLINE: u8 = 0;
const FLAG_OVERFLOW: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafValue {
    Inline(Vec<u8>),
    /// `total_len` is the full logical value length spread across the
    /// overflow chain rooted at `page_id`.
    Overflow { total_len: u64, page_id: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCell {
    pub key: u64,
    pub value: LeafValue,
}

pub struct LeafPage<'a> {
    buf: &'a mut [u8],
}

impl<'a> LeafPage<'a> {
    pub fn init(buf: &'a mut [u8], right_sibling: u32) -> Self {
        init_header(buf, PAGE_KIND_LEAF, right_sibling);
        Self { buf }
    }

    pub fn open(buf: &'a mut [u8]) -> Result<Self> {
        let kind = page_kind(buf)?;
        if kind != PAGE_KIND_LEAF {
            return Err(DecentError::Corrupted(format!(
                "expected leaf page, found kind {kind}"
            )));
        }
        Ok(Self { buf })
    }

    pub fn right_sibling(&self) -> u32 {
        trailer(self.buf)
    }

    pub fn set_right_sibling(&mut self, page_id: u32) {
        set_trailer(self.buf, page_id);
    }

    pub fn cell_count(&self) -> usize {
        cell_count(self.buf)
    }

    pub fn free_bytes(&self) -> usize {
        page::free_bytes(self.buf)
    }

    /// Start offsets of every cell, in order. O(n) in cell count.
    fn offsets(&self) -> Result<Vec<usize>> {
        let mut offsets = Vec::with_capacity(self.cell_count());
        let mut cursor = page::HEADER_LEN;
        let end = free_space_offset(self.buf);
        for _ in 0..self.cell_count() {
            if cursor >= end {
                return Err(DecentError::Corrupted("leaf cell directory truncated".into()));
            }
            offsets.push(cursor);
            cursor += cell_len(self.buf, cursor)?;
        }
        Ok(offsets)
    }

    fn cell_at_offset(&self, off: usize) -> Result<LeafCell> {
        decode_cell(self.buf, off).map(|(cell, _)| cell)
    }

    pub fn cell_at(&self, index: usize) -> Result<LeafCell> {
        let offsets = self.offsets()?;
        let off = *offsets
            .get(index)
            .ok_or_else(|| DecentError::Corrupted(format!("leaf cell index {index} out of range")))?;
        self.cell_at_offset(off)
    }

    pub fn cells(&self) -> Result<Vec<LeafCell>> {
        self.offsets()?
            .into_iter()
            .map(|off| self.cell_at_offset(off))
            .collect()
    }

    /// Binary search by key. `Ok(idx)` if present, `Err(idx)` as the sorted
    /// insertion point otherwise.
    fn find(&self, key: u64) -> Result<std::result::Result<usize, usize>> {
        let offsets = self.offsets()?;
        let mut lo = 0usize;
        let mut hi = offsets.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            let mid_cell = self.cell_at_offset(offsets[mid])?;
            match mid_cell.key.cmp(&key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Equal => return Ok(Ok(mid)),
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        Ok(Err(lo))
    }

    pub fn get(&self, key: u64) -> Result<Option<LeafValue>> {
        match self.find(key)? {
            Ok(idx) => Ok(Some(self.cell_at(idx)?.value)),
            Err(_) => Ok(None),
        }
    }

    /// Insert or replace `key`. Errors with `ResourceExhausted` if the cell
    /// doesn't fit even after the caller's split/overflow decisions — the
    /// caller (btree insert path) is expected to have already routed
    /// oversized values through the overflow chain before calling this.
    pub fn put(&mut self, key: u64, value: LeafValue) -> Result<()> {
        let encoded = encode_cell(&LeafCell { key, value });
        let existing = self.find(key)?;
        let offsets = self.offsets()?;
        let end = free_space_offset(self.buf);

        let old_cell_len = match existing {
            Ok(idx) => cell_len(self.buf, offsets[idx])?,
            Err(_) => 0,
        };
        let needed = encoded.len() as isize - old_cell_len as isize;
        if needed > 0 && self.free_bytes() < needed as usize {
            return Err(DecentError::ResourceExhausted("leaf page full".into()));
        }

        match existing {
            Ok(idx) => {
                let off = offsets[idx];
                self.splice(off, old_cell_len, &encoded, end)?;
            }
            Err(insert_idx) => {
                let off = offsets.get(insert_idx).copied().unwrap_or(end);
                self.splice(off, 0, &encoded, end)?;
                set_cell_count(self.buf, self.cell_count() + 1);
            }
        }
        Ok(())
    }

    /// Replace the byte range `[at, at+old_len)` with `new_bytes`, shifting
    /// everything after it and updating `free-space-offset` accordingly.
    fn splice(&mut self, at: usize, old_len: usize, new_bytes: &[u8], end: usize) -> Result<()> {
        let tail_start = at + old_len;
        let tail_len = end - tail_start;
        let new_end = at + new_bytes.len() + tail_len;
        if new_end > self.buf.len() {
            return Err(DecentError::ResourceExhausted("leaf page full".into()));
        }
        // Move the tail first so overlapping copy_within direction is safe
        // whether the new cell is larger or smaller than the old one.
        let mut tail = vec![0u8; tail_len];
        tail.copy_from_slice(&self.buf[tail_start..end]);
        self.buf[at..at + new_bytes.len()].copy_from_slice(new_bytes);
        self.buf[at + new_bytes.len()..new_end].copy_from_slice(&tail);
        set_free_space_offset(self.buf, new_end);
        Ok(())
    }

    pub fn delete(&mut self, key: u64) -> Result<bool> {
        let idx = match self.find(key)? {
            Ok(idx) => idx,
            Err(_) => return Ok(false),
        };
        let offsets = self.offsets()?;
        let off = offsets[idx];
        let len = cell_len(self.buf, off)?;
        let end = free_space_offset(self.buf);
        self.splice(off, len, &[], end)?;
        set_cell_count(self.buf, self.cell_count() - 1);
        Ok(true)
    }
}

fn cell_len(buf: &[u8], off: usize) -> Result<usize> {
    decode_cell(buf, off).map(|(_, len)| len)
}

fn encode_cell(cell: &LeafCell) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint_u64(&mut out, cell.key);
    match &cell.value {
        LeafValue::Inline(bytes) => {
            out.push(FLAG_INLINE);
            write_varint_u64(&mut out, bytes.len() as u64);
            out.extend_from_slice(bytes);
        }
        LeafValue::Overflow { total_len, page_id } => {
            out.push(FLAG_OVERFLOW);
            write_varint_u64(&mut out, *total_len);
            out.extend_from_slice(&page_id.to_le_bytes());
        }
    }
    out
}

/// Decode the cell starting at `off`, returning it plus its encoded length.
fn decode_cell(buf: &[u8], off: usize) -> Result<(LeafCell, usize)> {
    if off >= buf.len() {
        return Err(DecentError::Corrupted("leaf cell offset out of bounds".into()));
    }
    let (key, n1) = read_varint_u64(&buf[off..])?;
    let mut cursor = off + n1;
    let flags = *buf
        .get(cursor)
        .ok_or_else(|| DecentError::Corrupted("leaf cell missing flags byte".into()))?;
    cursor += 1;
    let (value_len, n2) = read_varint_u64(&buf[cursor..])?;
    cursor += n2;
    let value = match flags {
        FLAG_INLINE => {
            let value_len = value_len as usize;
            let end = cursor + value_len;
            if end > buf.len() {
                return Err(DecentError::Corrupted("leaf inline value exceeds page".into()));
            }
            let bytes = buf[cursor..end].to_vec();
            cursor = end;
            LeafValue::Inline(bytes)
        }
        FLAG_OVERFLOW => {
            let end = cursor + 4;
            if end > buf.len() {
                return Err(DecentError::Corrupted("leaf overflow pointer exceeds page".into()));
            }
            let page_id = u32::from_le_bytes(buf[cursor..end].try_into().unwrap());
            cursor = end;
            LeafValue::Overflow { total_len: value_len, page_id }
        }
        other => return Err(DecentError::Corrupted(format!("unknown leaf cell flag {other}"))),
    };
    Ok((LeafCell { key, value }, cursor - off))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let mut buf = vec![0u8; 256];
        let mut page = LeafPage::init(&mut buf, 0);
        page.put(2, LeafValue::Inline(b"two".to_vec())).unwrap();
        page.put(1, LeafValue::Inline(b"one".to_vec())).unwrap();
        page.put(3, LeafValue::Inline(b"three".to_vec())).unwrap();

        assert_eq!(page.get(1).unwrap(), Some(LeafValue::Inline(b"one".to_vec())));
        assert_eq!(page.get(2).unwrap(), Some(LeafValue::Inline(b"two".to_vec())));
        assert_eq!(page.get(3).unwrap(), Some(LeafValue::Inline(b"three".to_vec())));
        assert_eq!(page.get(4).unwrap(), None);

        let cells = page.cells().unwrap();
        assert_eq!(cells.iter().map(|c| c.key).collect::<Vec<_>>(), vec![1, 2, 3]);

        assert!(page.delete(2).unwrap());
        assert_eq!(page.get(2).unwrap(), None);
        assert!(!page.delete(2).unwrap());
    }

    #[test]
    fn put_replaces_existing_key() {
        let mut buf = vec![0u8; 256];
        let mut page = LeafPage::init(&mut buf, 0);
        page.put(1, LeafValue::Inline(b"a".to_vec())).unwrap();
        page.put(1, LeafValue::Inline(b"bigger-value".to_vec())).unwrap();
        assert_eq!(page.cell_count(), 1);
        assert_eq!(page.get(1).unwrap(), Some(LeafValue::Inline(b"bigger-value".to_vec())));
    }

    #[test]
    fn right_sibling_round_trips() {
        let mut buf = vec![0u8; 64];
        let mut page = LeafPage::init(&mut buf, 0);
        page.set_right_sibling(42);
        assert_eq!(page.right_sibling(), 42);
    }

    #[test]
    fn overflow_cell_round_trips() {
        let mut buf = vec![0u8; 64];
        let mut page = LeafPage::init(&mut buf, 0);
        page.put(9, LeafValue::Overflow { total_len: 9000, page_id: 12 }).unwrap();
        assert_eq!(
            page.get(9).unwrap(),
            Some(LeafValue::Overflow { total_len: 9000, page_id: 12 })
        );
    }

    #[test]
    fn page_full_is_reported() {
        let mut buf = vec![0u8; 32];
        let mut page = LeafPage::init(&mut buf, 0);
        page.put(1, LeafValue::Inline(vec![0u8; 10])).unwrap();
        let err = page.put(2, LeafValue::Inline(vec![0u8; 10])).unwrap_err();
        assert!(matches!(err, DecentError::ResourceExhausted(_)));
    }
}
