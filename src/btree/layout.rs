//! Split-point search shared by leaf and internal pages: try candidate
//! indices fanning outward from the midpoint until both halves fit in a
//! fresh page, so split balances payload *bytes* rather than cell count
//! and tolerates a single outsized cell near the middle.

use crate::error::{DecentError, Result};

use super::internal::{InternalCell, InternalPage};
use super::leaf::{LeafCell, LeafPage};

/// Indices to try for a split of `len` items, nearest-midpoint first.
/// `min_index` is the smallest index the caller accepts: leaf splits need
/// both halves non-empty (`min_index = 1`), internal splits may legally
/// promote the very first separator, leaving an empty left cell list
/// (`min_index = 0`).
fn candidate_indices(len: usize, min_index: usize) -> Vec<usize> {
    let mid = len / 2;
    let mut candidates = Vec::with_capacity(len);
    for delta in 0..=len {
        let a = mid.saturating_sub(delta);
        let b = mid + delta;
        if a >= min_index && a < len {
            candidates.push(a);
        }
        if b >= min_index && b < len && b != a {
            candidates.push(b);
        }
    }
    candidates.dedup();
    candidates
}

pub fn build_leaf_page(cells: &[LeafCell], page_size: usize, right_sibling: u32) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; page_size];
    let mut page = LeafPage::init(&mut bytes, right_sibling);
    for cell in cells {
        page.put(cell.key, cell.value.clone())?;
    }
    Ok(bytes)
}

/// Split `cells` (sorted, len >= 2) into two leaf pages whose combined
/// entries reproduce `cells`. Returns `(left_bytes, right_bytes,
/// right_first_key)`; the caller promotes `right_first_key` to the parent.
pub fn split_leaf(
    cells: &[LeafCell],
    page_size: usize,
    right_sibling: u32,
) -> Result<(Vec<u8>, Vec<u8>, u64)> {
    if cells.len() < 2 {
        return Err(DecentError::Corrupted("cannot split leaf with fewer than 2 cells".into()));
    }
    for split_idx in candidate_indices(cells.len(), 1) {
        let left = build_leaf_page(&cells[..split_idx], page_size, 0);
        let right = build_leaf_page(&cells[split_idx..], page_size, right_sibling);
        if let (Ok(l), Ok(r)) = (left, right) {
            return Ok((l, r, cells[split_idx].key));
        }
    }
    Err(DecentError::ResourceExhausted(
        "leaf split impossible: a single cell exceeds page capacity".into(),
    ))
}

pub fn build_internal_page(
    rightmost_child: u32,
    cells: &[InternalCell],
    page_size: usize,
) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; page_size];
    let mut page = InternalPage::init(&mut bytes, rightmost_child);
    for cell in cells {
        page.put_separator(cell.key, cell.child)?;
    }
    Ok(bytes)
}

/// Split an internal node's `cells` (len >= 1) around a promoted separator.
/// Returns `(left_bytes, right_bytes, promoted_key)`. `promoted_key`'s own
/// child becomes `left`'s new rightmost pointer; `right` keeps the original
/// `rightmost_child`. The caller is the one splitting, so its own page id
/// is what `left_bytes` gets written back to: the parent must repoint
/// whatever pointer used to route the whole page at the new right page id,
/// then insert `(promoted_key, this_page_id)` to carve the narrower range
/// back out for the original id (see [`super::internal::InternalPage::replace_child`]).
pub fn split_internal(
    cells: &[InternalCell],
    rightmost_child: u32,
    page_size: usize,
) -> Result<(Vec<u8>, Vec<u8>, u64)> {
    if cells.is_empty() {
        return Err(DecentError::Corrupted("cannot split internal with 0 separators".into()));
    }
    // `cells[i].child` covers the key range just below `cells[i].key`; the
    // node's own `rightmost_child` covers everything above the last
    // separator. Splitting at `promote_idx` promotes that separator: its
    // child becomes the left page's new rightmost pointer (the range it
    // covered folds into "everything left keeps"), and the right page
    // keeps the original rightmost_child unchanged.
    for promote_idx in candidate_indices(cells.len(), 0) {
        let promoted = cells[promote_idx];
        let left_cells = &cells[..promote_idx];
        let right_cells = &cells[promote_idx + 1..];
        let left = build_internal_page(promoted.child, left_cells, page_size);
        let right = build_internal_page(rightmost_child, right_cells, page_size);
        if let (Ok(l), Ok(r)) = (left, right) {
            return Ok((l, r, promoted.key));
        }
    }
    Err(DecentError::ResourceExhausted(
        "internal split impossible: a single cell exceeds page capacity".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::leaf::LeafValue;

    #[test]
    fn splits_balance_by_bytes_not_count() {
        let mut cells = Vec::new();
        for k in 0..6u64 {
            let size = if k == 2 { 40 } else { 4 };
            cells.push(LeafCell { key: k, value: LeafValue::Inline(vec![0u8; size]) });
        }
        let (left, right, sep) = split_leaf(&cells, 128, 0).unwrap();
        let mut left_page = LeafPage::open(&mut left.clone()).unwrap();
        let mut right_page = LeafPage::open(&mut right.clone()).unwrap();
        assert!(left_page.cell_count() >= 1);
        assert!(right_page.cell_count() >= 1);
        assert!(sep > 0);
        let _ = (&mut left_page, &mut right_page);
    }
}
