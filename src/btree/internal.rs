//! Internal page: `[header][cell, cell, ...]`, same flat-array-with-no-slot-
//! directory layout as [`super::leaf`]. Cells are `[key varint][child u32]`;
//! the header's trailer field (see [`super::page`]) holds the rightmost
//! child pointer rather than a sibling id. Routing for key `k` is: the
//! first cell whose key is `> k` names the child to the LEFT of that
//! separator (i.e. the child one before it in cell order), and if no such
//! cell exists the rightmost child is taken.

use crate::error::{DecentError, Result};
use crate::varint::{read_varint_u64, write_varint_u64};

use super::page::{
    self, cell_count, free_space_offset, init_header, page_kind, set_cell_count,
    set_free_space_offset, set_trailer, trailer, PAGE_KIND_INTERNAL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalCell {
    pub key: u64,
    pub child: u32,
}

pub struct InternalPage<'a> {
    buf: &'a mut [u8],
}

impl<'a> InternalPage<'a> {
    pub fn init(buf: &'a mut [u8], rightmost_child: u32) -> Self {
        init_header(buf, PAGE_KIND_INTERNAL, rightmost_child);
        Self { buf }
    }

    pub fn open(buf: &'a mut [u8]) -> Result<Self> {
        let kind = page_kind(buf)?;
        if kind != PAGE_KIND_INTERNAL {
            return Err(DecentError::Corrupted(format!(
                "expected internal page, found kind {kind}"
            )));
        }
        Ok(Self { buf })
    }

    pub fn rightmost_child(&self) -> u32 {
        trailer(self.buf)
    }

    pub fn set_rightmost_child(&mut self, page_id: u32) {
        set_trailer(self.buf, page_id);
    }

    pub fn cell_count(&self) -> usize {
        cell_count(self.buf)
    }

    pub fn free_bytes(&self) -> usize {
        page::free_bytes(self.buf)
    }

    fn offsets(&self) -> Result<Vec<usize>> {
        let mut offsets = Vec::with_capacity(self.cell_count());
        let mut cursor = page::HEADER_LEN;
        let end = free_space_offset(self.buf);
        for _ in 0..self.cell_count() {
            if cursor >= end {
                return Err(DecentError::Corrupted(
                    "internal cell directory truncated".into(),
                ));
            }
            offsets.push(cursor);
            cursor += cell_len(self.buf, cursor)?;
        }
        Ok(offsets)
    }

    pub fn cell_at(&self, index: usize) -> Result<InternalCell> {
        let offsets = self.offsets()?;
        let off = *offsets.get(index).ok_or_else(|| {
            DecentError::Corrupted(format!("internal cell index {index} out of range"))
        })?;
        Ok(decode_cell(self.buf, off)?.0)
    }

    pub fn cells(&self) -> Result<Vec<InternalCell>> {
        self.offsets()?
            .into_iter()
            .map(|off| decode_cell(self.buf, off).map(|(c, _)| c))
            .collect()
    }

    /// Child page id to descend into for `key`.
    pub fn child_for_key(&self, key: u64) -> Result<u32> {
        let cells = self.cells()?;
        for cell in &cells {
            if key < cell.key {
                return Ok(cell.child);
            }
        }
        Ok(self.rightmost_child())
    }

    /// Insert a new separator `(key, child)`, where `child` is the page to
    /// the LEFT of `key` (it handles every key from the previous separator
    /// up to, but excluding, `key` — see the routing convention at the top
    /// of this file). This never touches the rightmost-child pointer or any
    /// other cell's child: callers that are repointing an existing child
    /// (a page that just split) must call [`InternalPage::replace_child`]
    /// first so the pointer that used to lead to the whole range now leads
    /// to the new right half, before inserting the separator that carves
    /// the old id's narrower range back out.
    pub fn put_separator(&mut self, key: u64, child: u32) -> Result<()> {
        let cells = self.cells()?;
        let insert_idx = cells.partition_point(|c| c.key < key);
        if insert_idx < cells.len() && cells[insert_idx].key == key {
            return Err(DecentError::Corrupted(format!(
                "duplicate internal separator key {key}"
            )));
        }

        let encoded = encode_cell(&InternalCell { key, child });
        if self.free_bytes() < encoded.len() {
            return Err(DecentError::ResourceExhausted("internal page full".into()));
        }

        let offsets = self.offsets()?;
        let end = free_space_offset(self.buf);
        let off = offsets.get(insert_idx).copied().unwrap_or(end);
        self.splice(off, 0, &encoded, end)?;
        set_cell_count(self.buf, self.cell_count() + 1);
        Ok(())
    }

    /// Redirect whichever pointer currently targets `old_child` to
    /// `new_child`, in place (the encoded cell length never changes, since
    /// only the trailing `u32` child differs). Used when `old_child` splits:
    /// the existing pointer that routed its whole range is repointed at the
    /// new right half, and the caller then inserts a fresh separator for
    /// `old_child`'s narrower remaining range via [`InternalPage::put_separator`].
    pub fn replace_child(&mut self, old_child: u32, new_child: u32) -> Result<()> {
        if self.rightmost_child() == old_child {
            self.set_rightmost_child(new_child);
            return Ok(());
        }
        for off in self.offsets()? {
            let (cell, len) = decode_cell(self.buf, off)?;
            if cell.child == old_child {
                let encoded = encode_cell(&InternalCell { key: cell.key, child: new_child });
                debug_assert_eq!(encoded.len(), len);
                self.buf[off..off + encoded.len()].copy_from_slice(&encoded);
                return Ok(());
            }
        }
        Err(DecentError::Corrupted(format!(
            "no pointer to child {old_child} found while repointing to {new_child}"
        )))
    }

    fn splice(&mut self, at: usize, old_len: usize, new_bytes: &[u8], end: usize) -> Result<()> {
        let tail_start = at + old_len;
        let tail_len = end - tail_start;
        let new_end = at + new_bytes.len() + tail_len;
        if new_end > self.buf.len() {
            return Err(DecentError::ResourceExhausted("internal page full".into()));
        }
        let mut tail = vec![0u8; tail_len];
        tail.copy_from_slice(&self.buf[tail_start..end]);
        self.buf[at..at + new_bytes.len()].copy_from_slice(new_bytes);
        self.buf[at + new_bytes.len()..new_end].copy_from_slice(&tail);
        set_free_space_offset(self.buf, new_end);
        Ok(())
    }
}

fn cell_len(buf: &[u8], off: usize) -> Result<usize> {
    decode_cell(buf, off).map(|(_, len)| len)
}

fn encode_cell(cell: &InternalCell) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint_u64(&mut out, cell.key);
    out.extend_from_slice(&cell.child.to_le_bytes());
    out
}

fn decode_cell(buf: &[u8], off: usize) -> Result<(InternalCell, usize)> {
    if off >= buf.len() {
        return Err(DecentError::Corrupted("internal cell offset out of bounds".into()));
    }
    let (key, n1) = read_varint_u64(&buf[off..])?;
    let cursor = off + n1;
    let end = cursor + 4;
    if end > buf.len() {
        return Err(DecentError::Corrupted("internal cell child pointer exceeds page".into()));
    }
    let child = u32::from_le_bytes(buf[cursor..end].try_into().unwrap());
    Ok((InternalCell { key, child }, end - off))
}
