//! Shared page-header layout for both B+Tree page kinds (component E).
//!
//! Both kinds share a 9-byte prefix: `[kind u8][cell-count u16]
//! [free-space-offset u16][trailer u32]`. The trailer's meaning depends on
//! `kind`: a leaf's is its right-sibling page id (0 = none, a leaf page id
//! is always >= 1 since page 0 is the database header); an internal
//! page's is its rightmost child pointer.

use crate::error::{DecentError, Result};

pub const PAGE_KIND_LEAF: u8 = 1;
pub const PAGE_KIND_INTERNAL: u8 = 2;

pub const HEADER_LEN: usize = 1 + 2 + 2 + 4;
const OFF_KIND: usize = 0;
const OFF_CELL_COUNT: usize = 1;
const OFF_FREE_OFFSET: usize = 3;
const OFF_TRAILER: usize = 5;

pub fn page_kind(buf: &[u8]) -> Result<u8> {
    let kind = *buf
        .first()
        .ok_or_else(|| DecentError::Corrupted("empty page buffer".into()))?;
    if kind != PAGE_KIND_LEAF && kind != PAGE_KIND_INTERNAL {
        return Err(DecentError::Corrupted(format!("unknown page kind {kind}")));
    }
    Ok(kind)
}

pub(super) fn init_header(buf: &mut [u8], kind: u8, trailer: u32) {
    buf.fill(0);
    buf[OFF_KIND] = kind;
    write_u16(buf, OFF_CELL_COUNT, 0);
    write_u16(buf, OFF_FREE_OFFSET, HEADER_LEN as u16);
    write_u32(buf, OFF_TRAILER, trailer);
}

pub(super) fn cell_count(buf: &[u8]) -> usize {
    read_u16(buf, OFF_CELL_COUNT) as usize
}

pub(super) fn set_cell_count(buf: &mut [u8], v: usize) {
    write_u16(buf, OFF_CELL_COUNT, v as u16);
}

pub(super) fn free_space_offset(buf: &[u8]) -> usize {
    read_u16(buf, OFF_FREE_OFFSET) as usize
}

pub(super) fn set_free_space_offset(buf: &mut [u8], v: usize) {
    write_u16(buf, OFF_FREE_OFFSET, v as u16);
}

pub(super) fn trailer(buf: &[u8]) -> u32 {
    read_u32(buf, OFF_TRAILER)
}

pub(super) fn set_trailer(buf: &mut [u8], v: u32) {
    write_u32(buf, OFF_TRAILER, v);
}

pub(super) fn free_bytes(buf: &[u8]) -> usize {
    buf.len().saturating_sub(free_space_offset(buf))
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}

fn write_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn write_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}
