//! On-disk posting-list codec: `id_1`, then `id_{i+1} - id_i` for each
//! subsequent id, all as LEB128 varints.

use crate::error::Result;
use crate::varint::{read_varint_u64, write_varint_u64};

pub fn encode_posting(ids: &[u64]) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint_u64(&mut out, ids.len() as u64);
    let mut prev = 0u64;
    for (i, &id) in ids.iter().enumerate() {
        if i == 0 {
            write_varint_u64(&mut out, id);
        } else {
            write_varint_u64(&mut out, id - prev);
        }
        prev = id;
    }
    out
}

pub fn decode_posting(buf: &[u8]) -> Result<Vec<u64>> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    let (count, mut cursor) = read_varint_u64(buf)?;
    let mut ids = Vec::with_capacity(count as usize);
    let mut prev = 0u64;
    for i in 0..count {
        let (delta, n) = read_varint_u64(&buf[cursor..])?;
        cursor += n;
        let id = if i == 0 { delta } else { prev + delta };
        ids.push(id);
        prev = id;
    }
    Ok(ids)
}

/// Apply buffered adds/removes to an existing sorted posting list, returning
/// a fresh sorted, deduplicated list.
pub fn merge_posting(existing: &[u64], added: &[u64], removed: &[u64]) -> Vec<u64> {
    use std::collections::BTreeSet;
    let removed: std::collections::HashSet<u64> = removed.iter().copied().collect();
    let mut set: BTreeSet<u64> = existing.iter().copied().filter(|id| !removed.contains(id)).collect();
    for &id in added {
        set.insert(id);
    }
    set.into_iter().collect()
}
