//! A row-insert path through the full `Db` stack, wiring the catalog
//! (component H) and the trigram index (component F) together the way a
//! future SQL executor would: create a table and its trigram index as
//! catalog records, maintain both the primary tree and the trigram
//! posting tree from the same write transaction, and recover everything
//! correctly across a reopen.

use decentdb::catalog::{self, CatalogRecord, IndexDef, IndexKind, TableDef};
use decentdb::db::{Db, DbConfig};
use decentdb::trigram::{query_pattern, TrigramBuffer};
use tempfile::tempdir;

fn config(page_size: usize) -> DbConfig {
    DbConfig { page_size, cache_pages: 32, ..DbConfig::default() }
}

struct Fixture {
    db: Db,
    table_root: u32,
    trigram_root: u32,
}

fn create_tracks_table(db: Db) -> Fixture {
    let mut txn = db.begin_write().unwrap();
    let catalog_root = decentdb::btree::create_empty_tree(&mut txn).unwrap();
    let table_root = decentdb::btree::create_empty_tree(&mut txn).unwrap();
    let trigram_root = decentdb::btree::create_empty_tree(&mut txn).unwrap();

    let catalog_root = catalog::put(
        &mut txn,
        catalog_root,
        &CatalogRecord::Table(TableDef {
            name: "tracks".into(),
            root_page: table_root,
            next_row_id: 0,
            integer_primary_key_column: Some("id".into()),
        }),
    )
    .unwrap();
    let catalog_root = catalog::put(
        &mut txn,
        catalog_root,
        &CatalogRecord::Index(IndexDef {
            name: "idx_tracks_title_trgm".into(),
            table: "tracks".into(),
            kind: IndexKind::Trigram { column: "title".into() },
            root_page: trigram_root,
        }),
    )
    .unwrap();

    txn.header_mut().catalog_root = catalog_root;
    txn.commit().unwrap();
    Fixture { db, table_root, trigram_root }
}

/// Insert a row into `tracks` and maintain its trigram posting in the same
/// transaction, then persist the (possibly split) roots back into the
/// catalog before committing.
fn insert_track(fx: &mut Fixture, row_id: u64, title: &str) {
    let mut txn = fx.db.begin_write().unwrap();
    let catalog_root = txn.header().catalog_root;

    let mut table = catalog::get_table(&mut txn, catalog_root, "tracks").unwrap().unwrap();
    let record = decentdb::encode_record(&vec![decentdb::Value::Text(title.to_string())]);
    {
        let mut table_tree = txn.tree(table.root_page);
        table_tree.put(row_id, record).unwrap();
        table.root_page = table_tree.root();
    }

    let mut index =
        match catalog::get(&mut txn, catalog_root, "idx_tracks_title_trgm").unwrap().unwrap() {
            CatalogRecord::Index(i) => i,
            _ => unreachable!(),
        };
    let mut buffer = TrigramBuffer::new(1 << 20);
    buffer.diff_and_record(None, Some(title), row_id).unwrap();
    index.root_page = buffer.flush(&mut txn, index.root_page).unwrap();

    let catalog_root = catalog::put(&mut txn, catalog_root, &CatalogRecord::Table(table)).unwrap();
    let catalog_root =
        catalog::put(&mut txn, catalog_root, &CatalogRecord::Index(index)).unwrap();
    txn.header_mut().catalog_root = catalog_root;
    txn.commit().unwrap();

    fx.table_root = fx.db.table_root("tracks").unwrap().unwrap();
    let mut reader = fx.db.begin_read();
    let catalog_root = reader.header().unwrap().catalog_root;
    fx.trigram_root = match catalog::get(&mut reader, catalog_root, "idx_tracks_title_trgm")
        .unwrap()
        .unwrap()
    {
        CatalogRecord::Index(i) => i.root_page,
        _ => unreachable!(),
    };
}

#[test]
fn row_insert_maintains_both_table_and_trigram_index() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tracks.db");
    let db = Db::create(&path, config(4096)).unwrap();
    let mut fx = create_tracks_table(db);

    insert_track(&mut fx, 1, "Thermonuclear Reaction");
    insert_track(&mut fx, 2, "The Cat Sat");
    insert_track(&mut fx, 3, "Completely Unrelated");

    let mut reader = fx.db.begin_read();
    let row = reader.tree(fx.table_root).get(1).unwrap().unwrap();
    let decoded = decentdb::decode_record(&row).unwrap();
    assert_eq!(decoded, vec![decentdb::Value::Text("Thermonuclear Reaction".into())]);

    let outcome = query_pattern(&mut reader, fx.trigram_root, "thermo", 3, false).unwrap();
    assert_eq!(outcome.candidates, vec![1]);
    drop(reader);

    // Reopen and confirm both the table data and the trigram index survive.
    drop(fx.db);
    let db = Db::open(&path, config(4096)).unwrap();
    let table_root = db.table_root("tracks").unwrap().unwrap();
    let mut reader = db.begin_read();
    assert!(reader.tree(table_root).get(2).unwrap().is_some());

    let catalog_root = reader.header().unwrap().catalog_root;
    let trigram_root = match catalog::get(&mut reader, catalog_root, "idx_tracks_title_trgm").unwrap().unwrap() {
        CatalogRecord::Index(i) => i.root_page,
        _ => unreachable!(),
    };
    let outcome = query_pattern(&mut reader, trigram_root, "thermo", 3, false).unwrap();
    assert_eq!(outcome.candidates, vec![1]);
}

#[test]
fn catalog_list_all_reflects_table_and_index_definitions() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("list_all.db");
    let db = Db::create(&path, config(4096)).unwrap();
    let fx = create_tracks_table(db);

    let mut reader = fx.db.begin_read();
    let catalog_root = reader.header().unwrap().catalog_root;
    let records = catalog::list_all(&mut reader, catalog_root).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| matches!(r, CatalogRecord::Table(t) if t.name == "tracks")));
    assert!(records
        .iter()
        .any(|r| matches!(r, CatalogRecord::Index(i) if i.name == "idx_tracks_title_trgm")));
}
