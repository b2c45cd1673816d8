use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use decentdb::trigram::{query_pattern, TrigramBuffer};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;

const SEED: u64 = 7;
const PAGE_SIZE: usize = 4096;
const ROW_COUNTS: &[usize] = &[1_000, 10_000, 100_000];

const WORDS: &[&str] = &[
    "thermonuclear", "reaction", "quartz", "embedding", "catalog", "trigram", "selectivity",
    "checkpoint", "snapshot", "overflow", "freelist", "recovery", "mutex", "writer", "posting",
];

/// In-memory `PageIo` so the bench measures the B+Tree/posting-list work
/// itself, not file I/O (that's `checkpoint_cost`'s job).
struct MemIo {
    page_size: usize,
    pages: HashMap<u32, Vec<u8>>,
    next_id: u32,
}

impl MemIo {
    fn new(page_size: usize) -> Self {
        Self { page_size, pages: HashMap::new(), next_id: 1 }
    }
}

impl decentdb::PageIo for MemIo {
    fn page_size(&self) -> usize {
        self.page_size
    }
    fn read_page(&mut self, page_id: u32) -> decentdb::Result<Vec<u8>> {
        Ok(self.pages.get(&page_id).cloned().unwrap_or_else(|| vec![0u8; self.page_size]))
    }
    fn write_page(&mut self, page_id: u32, bytes: Vec<u8>) -> decentdb::Result<()> {
        self.pages.insert(page_id, bytes);
        Ok(())
    }
    fn alloc_page(&mut self) -> decentdb::Result<u32> {
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }
    fn free_page(&mut self, _page_id: u32) -> decentdb::Result<()> {
        Ok(())
    }
}

fn random_sentence(rng: &mut StdRng) -> String {
    let len = rng.gen_range(4..10);
    (0..len).map(|_| WORDS[rng.gen_range(0..WORDS.len())]).collect::<Vec<_>>().join(" ")
}

fn build_index(row_count: usize) -> (MemIo, u32) {
    let mut io = MemIo::new(PAGE_SIZE);
    let mut root = decentdb::btree::create_empty_tree(&mut io).expect("tree failed");
    let mut rng = StdRng::seed_from_u64(SEED);
    let mut buffer = TrigramBuffer::new(64 * 1024 * 1024);
    for row_id in 0..row_count as u64 {
        let text = random_sentence(&mut rng);
        buffer.diff_and_record(None, Some(&text), row_id).expect("buffer full");
    }
    root = buffer.flush(&mut io, root).expect("flush failed");
    (io, root)
}

fn trigram_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("trigram_query");
    group.sample_size(20);

    for &row_count in ROW_COUNTS {
        let (mut io, root) = build_index(row_count);

        group.bench_with_input(BenchmarkId::from_parameter(row_count), &row_count, |b, &row_count| {
            b.iter(|| {
                let outcome = query_pattern(&mut io, root, "thermo", row_count as u64, false);
                black_box(outcome.ok());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, trigram_query);
criterion_main!(benches);
