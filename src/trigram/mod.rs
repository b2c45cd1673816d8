//! Trigram inverted index (component F): canonicalization, extraction,
//! the per-transaction write buffer, and query evaluation with the
//! selectivity guardrails.

pub mod posting;

use std::collections::{HashMap, HashSet};

use unicode_normalization::UnicodeNormalization;

use crate::error::{DecentError, Result};
use crate::pageio::PageIo;

/// Lowercase (full Unicode case folding), NFKC-normalize, and collapse every
/// run of non-alphanumeric characters to a single space.
pub fn canonicalize(text: &str) -> String {
    let lowered: String = text.chars().flat_map(|c| c.to_lowercase()).collect();
    let normalized: String = lowered.nfkc().collect();
    let mut out = String::with_capacity(normalized.len());
    let mut in_run = false;
    for c in normalized.chars() {
        if c.is_alphanumeric() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push(' ');
            in_run = true;
        }
    }
    out
}

/// Every length-3 window of `"  " + canonical + "  "`, so prefix/suffix
/// trigrams exist.
pub fn extract_trigrams(canonical: &str) -> Vec<String> {
    let padded: Vec<char> = format!("  {canonical}  ").chars().collect();
    if padded.len() < 3 {
        return Vec::new();
    }
    (0..=padded.len() - 3).map(|i| padded[i..i + 3].iter().collect()).collect()
}

/// FNV-1a folded to 24 bits. Collisions are tolerated (false positives the
/// caller's literal re-check filters out), never treated as an error.
pub fn hash_trigram(trigram: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in trigram.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash & 0x00FF_FFFF
}

fn trigram_set(text: &str) -> HashSet<String> {
    extract_trigrams(&canonicalize(text)).into_iter().collect()
}

#[derive(Debug, Clone, Copy)]
enum PostingOp {
    Add(u64),
    Remove(u64),
}

/// Accumulates add/remove operations per trigram for one write transaction.
/// Per ADR (recorded in DESIGN.md): buffers never
/// flush mid-transaction; an over-cap buffer fails the transaction with
/// `ResourceExhausted` rather than writing postings that would need
/// unwinding on rollback.
pub struct TrigramBuffer {
    per_trigram_cap_bytes: usize,
    total_cap_bytes: usize,
    used_bytes: usize,
    ops: HashMap<u32, Vec<PostingOp>>,
}

/// Rough per-operation footprint once flushed (tag + up-to-10-byte varint id).
const OP_BYTE_ESTIMATE: usize = 11;

impl TrigramBuffer {
    pub fn new(total_cap_bytes: usize) -> Self {
        Self {
            per_trigram_cap_bytes: 4096,
            total_cap_bytes,
            used_bytes: 0,
            ops: HashMap::new(),
        }
    }

    /// Diff the old and new trigram multisets for one row's indexed text
    /// column and record the add/remove operations each implies.
    pub fn diff_and_record(&mut self, old_text: Option<&str>, new_text: Option<&str>, row_id: u64) -> Result<()> {
        let old_set = old_text.map(trigram_set).unwrap_or_default();
        let new_set = new_text.map(trigram_set).unwrap_or_default();
        for t in new_set.difference(&old_set) {
            self.record(hash_trigram(t), PostingOp::Add(row_id))?;
        }
        for t in old_set.difference(&new_set) {
            self.record(hash_trigram(t), PostingOp::Remove(row_id))?;
        }
        Ok(())
    }

    fn record(&mut self, hash: u32, op: PostingOp) -> Result<()> {
        let entry = self.ops.entry(hash).or_default();
        if (entry.len() + 1) * OP_BYTE_ESTIMATE > self.per_trigram_cap_bytes {
            return Err(DecentError::ResourceExhausted(format!(
                "trigram {hash:#x} buffer exceeds per-trigram cap of {} bytes",
                self.per_trigram_cap_bytes
            )));
        }
        self.used_bytes += OP_BYTE_ESTIMATE;
        if self.used_bytes > self.total_cap_bytes {
            return Err(DecentError::ResourceExhausted(
                "transaction trigram buffer budget exceeded".into(),
            ));
        }
        entry.push(op);
        Ok(())
    }

    /// Merge every buffered op into the posting B+Tree rooted at `root`,
    /// returning the (possibly changed) root page id.
    pub fn flush(self, io: &mut dyn PageIo, root: u32) -> Result<u32> {
        let mut root = root;
        for (hash, ops) in self.ops {
            let key = hash as u64;
            let existing_ids = match crate::btree::get(io, root, key)? {
                Some(bytes) => posting::decode_posting(&bytes)?,
                None => Vec::new(),
            };
            let mut added = Vec::new();
            let mut removed = Vec::new();
            for op in ops {
                match op {
                    PostingOp::Add(id) => added.push(id),
                    PostingOp::Remove(id) => removed.push(id),
                }
            }
            let merged = posting::merge_posting(&existing_ids, &added, &removed);
            if merged.is_empty() {
                crate::btree::delete(io, root, key)?;
            } else {
                let encoded = posting::encode_posting(&merged);
                root = crate::btree::put(io, root, key, encoded)?;
            }
        }
        Ok(root)
    }
}

/// Default `threshold_short`/`threshold_long` fractions.
pub const SHORT_PATTERN_SELECTIVITY: f64 = 0.05;
pub const LONG_PATTERN_SELECTIVITY: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    pub candidates: Vec<u64>,
    pub truncated: bool,
}

/// Evaluate `LIKE '%pattern%'` against the trigram index rooted at `root`.
/// Callers must still re-verify the literal predicate against every
/// candidate row (the index is a superset filter, never ground truth).
pub fn query_pattern(
    io: &mut dyn PageIo,
    root: u32,
    pattern: &str,
    total_row_count: u64,
    has_other_predicate: bool,
) -> Result<QueryOutcome> {
    let pattern_len = pattern.chars().count();
    if pattern_len < 3 {
        return Err(DecentError::Malformed(
            "trigram index requires a pattern of at least 3 characters".into(),
        ));
    }

    let canonical = canonicalize(pattern);
    let mut trigrams = extract_trigrams(&canonical);
    trigrams.sort();
    trigrams.dedup();

    let mut postings: Vec<Vec<u64>> = Vec::with_capacity(trigrams.len());
    for t in &trigrams {
        let hash = hash_trigram(t) as u64;
        let ids = match crate::btree::get(io, root, hash)? {
            Some(bytes) => posting::decode_posting(&bytes)?,
            None => Vec::new(),
        };
        postings.push(ids);
    }

    let f_min = postings.iter().map(|p| p.len()).min().unwrap_or(0);
    let threshold_short = (total_row_count as f64 * SHORT_PATTERN_SELECTIVITY) as usize;
    let threshold_long = (total_row_count as f64 * LONG_PATTERN_SELECTIVITY) as usize;

    if (3..=5).contains(&pattern_len) && f_min > threshold_short && !has_other_predicate {
        return Err(DecentError::NotSelective(format!(
            "pattern {pattern:?} trigram frequency {f_min} exceeds {threshold_short} ({}% of {total_row_count} rows)",
            (SHORT_PATTERN_SELECTIVITY * 100.0) as u32
        )));
    }

    // Multi-way merge ordered by ascending frequency so the smallest
    // candidate stream bounds the whole intersection.
    let mut order: Vec<usize> = (0..postings.len()).collect();
    order.sort_by_key(|&i| postings[i].len());

    let mut candidates: std::collections::BTreeSet<u64> = match order.first() {
        Some(&first) => postings[first].iter().copied().collect(),
        None => std::collections::BTreeSet::new(),
    };
    for &i in order.iter().skip(1) {
        if candidates.is_empty() {
            break;
        }
        let set: HashSet<u64> = postings[i].iter().copied().collect();
        candidates.retain(|id| set.contains(id));
    }

    let mut candidates: Vec<u64> = candidates.into_iter().collect();
    let mut truncated = false;
    if pattern_len > 5 && f_min > threshold_long && candidates.len() > threshold_long {
        candidates.truncate(threshold_long);
        truncated = true;
    }

    Ok(QueryOutcome { candidates, truncated })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{create_empty_tree, put};
    use std::collections::HashMap as StdHashMap;

    struct MemIo {
        page_size: usize,
        pages: StdHashMap<u32, Vec<u8>>,
        next_id: u32,
        freelist: Vec<u32>,
    }

    impl MemIo {
        fn new(page_size: usize) -> Self {
            Self { page_size, pages: StdHashMap::new(), next_id: 1, freelist: Vec::new() }
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
    fn canonicalize_collapses_punctuation_and_case() {
        assert_eq!(canonicalize("The Quick-Fox!!"), "the quick fox ");
    }

    #[test]
    fn extract_trigrams_pads_both_ends() {
        let trigrams = extract_trigrams("ab");
        assert_eq!(trigrams[0], "  a");
        assert_eq!(*trigrams.last().unwrap(), "b  ");
    }

    #[test]
    fn superset_filter_has_no_false_negatives() {
        let mut io = MemIo::new(512);
        let mut root = create_empty_tree(&mut io).unwrap();
        let mut buffer = TrigramBuffer::new(1 << 20);

        let rows: Vec<(u64, &str)> = vec![
            (1, "thermonuclear reaction"),
            (2, "the cat sat"),
            (3, "completely unrelated"),
        ];
        for (id, text) in &rows {
            buffer.diff_and_record(None, Some(text), *id).unwrap();
        }
        root = buffer.flush(&mut io, root).unwrap();

        let outcome = query_pattern(&mut io, root, "thermo", 3, false).unwrap();
        for (id, text) in &rows {
            let literal_match = text.to_lowercase().contains("thermo");
            if literal_match {
                assert!(outcome.candidates.contains(id), "row {id} should be a candidate");
            }
        }
    }

    #[test]
    fn short_highly_frequent_pattern_without_other_predicate_is_not_selective() {
        let mut io = MemIo::new(512);
        let mut root = create_empty_tree(&mut io).unwrap();
        let mut buffer = TrigramBuffer::new(1 << 20);
        let total_rows = 1000u64;
        for id in 0..total_rows {
            buffer.diff_and_record(None, Some("the band played on"), id).unwrap();
        }
        root = buffer.flush(&mut io, root).unwrap();

        let err = query_pattern(&mut io, root, "the", total_rows, false).unwrap_err();
        assert!(matches!(err, DecentError::NotSelective(_)));
    }

    #[test]
    fn short_pattern_with_other_predicate_bypasses_guardrail() {
        let mut io = MemIo::new(512);
        let mut root = create_empty_tree(&mut io).unwrap();
        let mut buffer = TrigramBuffer::new(1 << 20);
        let total_rows = 1000u64;
        for id in 0..total_rows {
            buffer.diff_and_record(None, Some("the band played on"), id).unwrap();
        }
        root = buffer.flush(&mut io, root).unwrap();

        let outcome = query_pattern(&mut io, root, "the", total_rows, true).unwrap();
        assert_eq!(outcome.candidates.len(), total_rows as usize);
    }

    #[test]
    fn long_pattern_over_threshold_is_truncated_with_advisory() {
        let mut io = MemIo::new(512);
        let mut root = create_empty_tree(&mut io).unwrap();
        let mut buffer = TrigramBuffer::new(1 << 20);
        let total_rows = 100u64;
        for id in 0..total_rows {
            buffer.diff_and_record(None, Some("thermonuclear devices"), id).unwrap();
        }
        root = buffer.flush(&mut io, root).unwrap();

        let outcome = query_pattern(&mut io, root, "thermonuclear", total_rows, false).unwrap();
        assert!(outcome.truncated);
        assert!(outcome.candidates.len() <= (total_rows as f64 * LONG_PATTERN_SELECTIVITY) as usize);
    }

    #[test]
    fn pattern_shorter_than_three_is_rejected() {
        let mut io = MemIo::new(512);
        let root = create_empty_tree(&mut io).unwrap();
        let err = query_pattern(&mut io, root, "ab", 10, false).unwrap_err();
        assert!(matches!(err, DecentError::Malformed(_)));
    }

    #[test]
    fn per_trigram_cap_rejects_excess_operations() {
        let mut buffer = TrigramBuffer::new(1 << 30);
        buffer.per_trigram_cap_bytes = 20;
        let mut hit_limit = false;
        for id in 0..100u64 {
            if buffer.record(hash_trigram("the"), PostingOp::Add(id)).is_err() {
                hit_limit = true;
                break;
            }
        }
        assert!(hit_limit);
    }

    #[test]
    fn put_helper_is_reachable() {
        let mut io = MemIo::new(512);
        let root = create_empty_tree(&mut io).unwrap();
        let _ = put(&mut io, root, 1, vec![1]).unwrap();
    }
}
