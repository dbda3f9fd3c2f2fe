//! Query execution: QUERY body assembly and RESULT body parsing.
//!
//! The executor never decodes cell values; it returns column metadata plus
//! rows of raw, nullable payloads for the cursor to convert lazily.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::error::{CqlError, CqlResult};
use crate::proto::wire::{self, WireReader};
use crate::proto::{parse_type, Consistency, CqlType};

/// Rows-metadata flag: one global (keyspace, table) pair precedes the
/// column specs; when clear, each column carries its own pair.
const FLAG_GLOBAL_TABLES_SPEC: u32 = 0x0001;
/// Rows-metadata flag: a paging-state blob follows the column count.
const FLAG_HAS_MORE_PAGES: u32 = 0x0002;
/// Rows-metadata flag: no column specs at all.
const FLAG_NO_METADATA: u32 = 0x0004;

/// The 4-byte discriminator at the start of every RESULT body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// Nothing to report.
    Void,
    /// Column metadata and row data follow.
    Rows,
    /// A `USE` query took effect.
    SetKeyspace,
    /// A statement was prepared (never requested by this driver).
    Prepared,
    /// A schema-altering query took effect.
    SchemaChange,
}

impl ResultKind {
    fn from_i32(kind: i32) -> CqlResult<Self> {
        match kind {
            1 => Ok(Self::Void),
            2 => Ok(Self::Rows),
            3 => Ok(Self::SetKeyspace),
            4 => Ok(Self::Prepared),
            5 => Ok(Self::SchemaChange),
            other => Err(CqlError::internal(format!("unknown result kind {other}"))),
        }
    }
}

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    /// Owning keyspace, when the server sent table specs.
    pub keyspace: Option<String>,
    /// Owning table, when the server sent table specs.
    pub table: Option<String>,
    /// Column name.
    pub name: String,
    /// Fully parsed column type.
    pub data_type: CqlType,
}

/// One parsed result page: ordered column specs plus ordered rows of raw,
/// nullable cell payloads, drained head-first by the cursor.
#[derive(Debug, Default)]
pub struct ResultPage {
    /// What the RESULT body announced.
    pub kind: Option<ResultKind>,
    /// Column metadata, empty for non-Rows kinds.
    pub columns: Vec<ColumnSpec>,
    /// Raw rows; `None` cells are nulls.
    pub rows: VecDeque<Vec<Option<Vec<u8>>>>,
    /// Continuation token when the server has more pages.
    pub paging_state: Option<Vec<u8>>,
}

impl ResultPage {
    fn empty(kind: ResultKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }
}

/// Assemble a QUERY body: the query text as a long string, the consistency
/// code, and a zero flags byte (no bound values, metadata requested).
/// Bind parameters are rendered into `text` before it reaches this layer.
pub(crate) fn build_query_body(text: &str, consistency: Consistency) -> CqlResult<Bytes> {
    let mut body = BytesMut::with_capacity(4 + text.len() + 3);
    wire::write_long_string(&mut body, text)?;
    body.extend_from_slice(&consistency.code().to_be_bytes());
    body.extend_from_slice(&[0x00]);
    Ok(body.freeze())
}

/// Parse a RESULT body.
///
/// Only kind 2 (Rows) yields data. The other kinds are still parsed far
/// enough to consume what they announce, then return an empty page.
pub(crate) fn parse_result(body: &[u8]) -> CqlResult<ResultPage> {
    let mut reader = WireReader::new(body);
    let kind = ResultKind::from_i32(reader.read_i32()?)?;

    match kind {
        ResultKind::Void => Ok(ResultPage::empty(kind)),
        ResultKind::Rows => parse_rows(&mut reader),
        ResultKind::SetKeyspace => {
            reader.read_short_string()?;
            Ok(ResultPage::empty(kind))
        }
        ResultKind::Prepared => {
            // [short bytes] statement id
            let len = reader.read_u16()? as usize;
            reader.skip(len)?;
            Ok(ResultPage::empty(kind))
        }
        ResultKind::SchemaChange => {
            parse_schema_change(&mut reader)?;
            Ok(ResultPage::empty(kind))
        }
    }
}

fn parse_rows(reader: &mut WireReader<'_>) -> CqlResult<ResultPage> {
    let flags = reader.read_u32()?;
    let column_count = reader.read_u32()? as usize;

    let paging_state = if flags & FLAG_HAS_MORE_PAGES != 0 {
        reader.read_bytes()?.map(|b| b.to_vec())
    } else {
        None
    };

    let global_spec = if flags & FLAG_NO_METADATA == 0 && flags & FLAG_GLOBAL_TABLES_SPEC != 0 {
        let keyspace = reader.read_short_string()?;
        let table = reader.read_short_string()?;
        Some((keyspace, table))
    } else {
        None
    };

    let mut columns = Vec::with_capacity(column_count.min(1024));
    if flags & FLAG_NO_METADATA == 0 {
        for _ in 0..column_count {
            let (keyspace, table) = match &global_spec {
                Some((ks, table)) => (Some(ks.clone()), Some(table.clone())),
                None => (
                    Some(reader.read_short_string()?),
                    Some(reader.read_short_string()?),
                ),
            };
            let name = reader.read_short_string()?;
            let data_type = parse_type(reader)?;
            columns.push(ColumnSpec {
                keyspace,
                table,
                name,
                data_type,
            });
        }
    }

    let row_count = reader.read_u32()? as usize;
    let mut rows = VecDeque::with_capacity(row_count.min(4096));
    for _ in 0..row_count {
        let mut row = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            row.push(reader.read_bytes()?.map(|b| b.to_vec()));
        }
        rows.push_back(row);
    }

    Ok(ResultPage {
        kind: Some(ResultKind::Rows),
        columns,
        rows,
        paging_state,
    })
}

/// Consume a schema-change body: change type, target, and the arguments the
/// target implies.
fn parse_schema_change(reader: &mut WireReader<'_>) -> CqlResult<()> {
    let _change_type = reader.read_short_string()?;
    let target = reader.read_short_string()?;
    match target.as_str() {
        "KEYSPACE" => {
            reader.read_short_string()?;
        }
        "TABLE" | "TYPE" => {
            reader.read_short_string()?;
            reader.read_short_string()?;
        }
        "FUNCTION" | "AGGREGATE" => {
            reader.read_short_string()?;
            reader.read_short_string()?;
            reader.read_string_list()?;
        }
        other => {
            return Err(CqlError::internal(format!(
                "unknown schema change target {other}"
            )))
        }
    }
    Ok(())
}
