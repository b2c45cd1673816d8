//! The catalog (component H): a distinguished table of tagged records
//! describing user tables, indexes, foreign keys, and views (duck-typed
//! catalog records). Stored through the same B+Tree
//! (component E) that backs user data, rooted at `Header::catalog_root`.
//!
//! Each variant is modeled as an explicit Rust enum, never inferred from
//! field presence: the first field of every encoded record is a tag that
//! picks the decode arm.

use crate::btree::{self, Direction};
use crate::codec::{decode_record, encode_record, Record, Value};
use crate::error::{DecentError, Result};
use crate::pageio::PageIo;
use crate::varint::{read_varint_u64, write_varint_u64};

const TAG_TABLE: i64 = 1;
const TAG_INDEX: i64 = 2;
const TAG_FK: i64 = 3;
const TAG_VIEW: i64 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub root_page: u32,
    pub next_row_id: u64,
    /// Set when the table declared `INT64 PRIMARY KEY`: the column whose
    /// value is used directly as the tree key, suppressing a redundant
    /// secondary index.
    pub integer_primary_key_column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKind {
    Trigram { column: String },
    Secondary { columns: Vec<String> },
    PrimaryKeyInline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub kind: IndexKind,
    pub root_page: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FkDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub ref_table: String,
    pub ref_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewDef {
    pub name: String,
    /// Opaque raw view-definition text; the catalog never interprets it
    /// (view/trigger/CTE machinery is out of scope here).
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogRecord {
    Table(TableDef),
    Index(IndexDef),
    ForeignKey(FkDef),
    View(ViewDef),
}

impl CatalogRecord {
    pub fn name(&self) -> &str {
        match self {
            CatalogRecord::Table(t) => &t.name,
            CatalogRecord::Index(i) => &i.name,
            CatalogRecord::ForeignKey(f) => &f.name,
            CatalogRecord::View(v) => &v.name,
        }
    }
}

fn encode_string_list(items: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint_u64(&mut out, items.len() as u64);
    for item in items {
        let bytes = item.as_bytes();
        write_varint_u64(&mut out, bytes.len() as u64);
        out.extend_from_slice(bytes);
    }
    out
}

fn decode_string_list(buf: &[u8]) -> Result<Vec<String>> {
    let (count, mut cursor) = read_varint_u64(buf)?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (len, n) = read_varint_u64(&buf[cursor..])?;
        cursor += n;
        let len = len as usize;
        let end = cursor + len;
        if end > buf.len() {
            return Err(DecentError::Malformed("catalog string list truncated".into()));
        }
        let s = std::str::from_utf8(&buf[cursor..end])
            .map_err(|e| DecentError::Malformed(format!("catalog string not UTF-8: {e}")))?;
        out.push(s.to_string());
        cursor = end;
    }
    Ok(out)
}

fn encode_catalog_record(record: &CatalogRecord) -> Vec<u8> {
    let values: Record = match record {
        CatalogRecord::Table(t) => vec![
            Value::Int64(TAG_TABLE),
            Value::Text(t.name.clone()),
            Value::Int64(t.root_page as i64),
            Value::Int64(t.next_row_id as i64),
            match &t.integer_primary_key_column {
                Some(col) => Value::Text(col.clone()),
                None => Value::Null,
            },
        ],
        CatalogRecord::Index(i) => {
            let (kind_tag, kind_payload): (i64, Vec<u8>) = match &i.kind {
                IndexKind::Trigram { column } => (0, column.clone().into_bytes()),
                IndexKind::Secondary { columns } => (1, encode_string_list(columns)),
                IndexKind::PrimaryKeyInline => (2, Vec::new()),
            };
            vec![
                Value::Int64(TAG_INDEX),
                Value::Text(i.name.clone()),
                Value::Text(i.table.clone()),
                Value::Int64(kind_tag),
                Value::Blob(kind_payload),
                Value::Int64(i.root_page as i64),
            ]
        }
        CatalogRecord::ForeignKey(f) => vec![
            Value::Int64(TAG_FK),
            Value::Text(f.name.clone()),
            Value::Text(f.table.clone()),
            Value::Blob(encode_string_list(&f.columns)),
            Value::Text(f.ref_table.clone()),
            Value::Blob(encode_string_list(&f.ref_columns)),
        ],
        CatalogRecord::View(v) => vec![
            Value::Int64(TAG_VIEW),
            Value::Text(v.name.clone()),
            Value::Text(v.body.clone()),
        ],
    };
    encode_record(&values)
}

fn decode_catalog_record(bytes: &[u8]) -> Result<CatalogRecord> {
    let fields = decode_record(bytes)?;
    let tag = match fields.first() {
        Some(Value::Int64(t)) => *t,
        _ => return Err(DecentError::Malformed("catalog record missing tag".into())),
    };
    let text = |v: &Value| -> Result<String> {
        match v {
            Value::Text(s) => Ok(s.clone()),
            _ => Err(DecentError::Malformed("expected TEXT field in catalog record".into())),
        }
    };
    let int = |v: &Value| -> Result<i64> {
        match v {
            Value::Int64(i) => Ok(*i),
            _ => Err(DecentError::Malformed("expected INT64 field in catalog record".into())),
        }
    };
    let blob = |v: &Value| -> Result<Vec<u8>> {
        match v {
            Value::Blob(b) => Ok(b.clone()),
            _ => Err(DecentError::Malformed("expected BLOB field in catalog record".into())),
        }
    };

    match tag {
        TAG_TABLE => {
            if fields.len() != 5 {
                return Err(DecentError::Malformed("malformed TableDef record".into()));
            }
            let integer_primary_key_column = match &fields[4] {
                Value::Null => None,
                Value::Text(s) => Some(s.clone()),
                _ => return Err(DecentError::Malformed("malformed TableDef pk column".into())),
            };
            Ok(CatalogRecord::Table(TableDef {
                name: text(&fields[1])?,
                root_page: int(&fields[2])? as u32,
                next_row_id: int(&fields[3])? as u64,
                integer_primary_key_column,
            }))
        }
        TAG_INDEX => {
            if fields.len() != 6 {
                return Err(DecentError::Malformed("malformed IndexDef record".into()));
            }
            let kind_tag = int(&fields[3])?;
            let payload = blob(&fields[4])?;
            let kind = match kind_tag {
                0 => IndexKind::Trigram {
                    column: String::from_utf8(payload)
                        .map_err(|e| DecentError::Malformed(format!("{e}")))?,
                },
                1 => IndexKind::Secondary { columns: decode_string_list(&payload)? },
                2 => IndexKind::PrimaryKeyInline,
                other => return Err(DecentError::Malformed(format!("unknown index kind tag {other}"))),
            };
            Ok(CatalogRecord::Index(IndexDef {
                name: text(&fields[1])?,
                table: text(&fields[2])?,
                kind,
                root_page: int(&fields[5])? as u32,
            }))
        }
        TAG_FK => {
            if fields.len() != 6 {
                return Err(DecentError::Malformed("malformed FkDef record".into()));
            }
            Ok(CatalogRecord::ForeignKey(FkDef {
                name: text(&fields[1])?,
                table: text(&fields[2])?,
                columns: decode_string_list(&blob(&fields[3])?)?,
                ref_table: text(&fields[4])?,
                ref_columns: decode_string_list(&blob(&fields[5])?)?,
            }))
        }
        TAG_VIEW => {
            if fields.len() != 3 {
                return Err(DecentError::Malformed("malformed ViewDef record".into()));
            }
            Ok(CatalogRecord::View(ViewDef { name: text(&fields[1])?, body: text(&fields[2])? }))
        }
        other => Err(DecentError::Malformed(format!("unknown catalog record tag {other}"))),
    }
}

/// FNV-1a 64-bit over the UTF-8 name, used as the catalog B+Tree key. The
/// catalog is expected to hold at most a few thousand definitions, so a
/// 64-bit hash collision is not a practical concern.
fn catalog_key(name: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
    }
    hash
}

/// Insert or replace a catalog record, keyed by its name. Returns the
/// (possibly new) catalog tree root.
pub fn put(io: &mut dyn PageIo, root: u32, record: &CatalogRecord) -> Result<u32> {
    let key = catalog_key(record.name());
    btree::put(io, root, key, encode_catalog_record(record))
}

pub fn get(io: &mut dyn PageIo, root: u32, name: &str) -> Result<Option<CatalogRecord>> {
    match btree::get(io, root, catalog_key(name))? {
        Some(bytes) => Ok(Some(decode_catalog_record(&bytes)?)),
        None => Ok(None),
    }
}

pub fn remove(io: &mut dyn PageIo, root: u32, name: &str) -> Result<bool> {
    btree::delete(io, root, catalog_key(name))
}

/// Every catalog record, in an unspecified order (the catalog keys by hash,
/// not by insertion order).
pub fn list_all(io: &mut dyn PageIo, root: u32) -> Result<Vec<CatalogRecord>> {
    btree::scan(io, root, None, Direction::Forward)?
        .into_iter()
        .map(|(_, bytes)| decode_catalog_record(&bytes))
        .collect()
}

pub fn get_table(io: &mut dyn PageIo, root: u32, name: &str) -> Result<Option<TableDef>> {
    match get(io, root, name)? {
        Some(CatalogRecord::Table(t)) => Ok(Some(t)),
        Some(_) => Err(DecentError::Malformed(format!("catalog entry {name:?} is not a table"))),
        None => Ok(None),
    }
}
