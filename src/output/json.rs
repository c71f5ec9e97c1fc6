use std::io::Write;

use serde::Serialize;

use crate::error::SmcError;
use crate::model::ConnSnapshot;
use crate::table::ConnectionTable;
use crate::table::cursor::{CursorPositioner, Entry};

use super::RecordFilter;

/// A connection snapshot together with its report ordinal.
#[derive(Clone, Debug, Serialize)]
pub struct ConnRow {
    pub sl: u64,
    #[serde(flatten)]
    pub conn: ConnSnapshot,
}

/// Walk the whole table once and snapshot every matching connection.
pub fn collect_rows(table: &ConnectionTable, filter: RecordFilter<'_>) -> Vec<ConnRow> {
    let mut cursor = CursorPositioner::new(table, filter);
    let mut pos = 0;
    let mut rows = Vec::new();
    let mut entry = cursor.start(pos);
    while let Some(e) = entry {
        if let Entry::Record(r) = &e {
            if r.clc_sock().is_some() {
                rows.push(ConnRow {
                    sl: cursor.num(),
                    conn: r.snapshot(),
                });
            }
        }
        entry = cursor.advance(&e, &mut pos);
    }
    rows
}

/// Write connection rows as a pretty-printed JSON array.
pub fn write_json(rows: &[ConnRow], writer: &mut impl Write) -> Result<(), SmcError> {
    serde_json::to_writer_pretty(&mut *writer, rows)
        .map_err(|e| SmcError::Serialization(std::io::Error::other(e.to_string())))?;
    writeln!(writer).map_err(SmcError::Serialization)
}
