use std::collections::BTreeMap;

use crate::value::{CellValue, Row, Timestamp};

#[derive(Debug, Clone)]
struct CellEntry {
    column: String,
    value: CellValue,
    ts: Timestamp,
    seq: u64,
}

/// Append-only store of `(row, column, value, timestamp)` facts.
///
/// Rows are keyed by name in a `BTreeMap`, so enumeration is in ascending
/// lexical row-name order. Reads collapse each column to its latest cell at or
/// before the requested time; equal timestamps resolve to the later insertion.
#[derive(Debug, Clone, Default)]
pub struct CellStore {
    rows: BTreeMap<String, Vec<CellEntry>>,
    next_seq: u64,
    approx_bytes: usize,
}

impl CellStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, row: &str, column: &str, value: CellValue, ts: Timestamp) {
        self.approx_bytes += column.len() + approx_value_bytes(&value) + 16;
        let entry = CellEntry {
            column: column.to_string(),
            value,
            ts,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        if let Some(entries) = self.rows.get_mut(row) {
            entries.push(entry);
        } else {
            self.approx_bytes += row.len();
            self.rows.insert(row.to_string(), vec![entry]);
        }
    }

    pub fn approx_bytes(&self) -> usize {
        self.approx_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn cell_count(&self) -> usize {
        self.rows.values().map(Vec::len).sum()
    }

    pub fn row_names(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    pub fn contains_row(&self, row: &str) -> bool {
        self.rows.contains_key(row)
    }

    /// Collapsed view of `row` as of `as_of` (latest when `None`).
    ///
    /// Returns `None` when the row is unknown or has no cells visible at that time.
    pub fn visible_row(&self, row: &str, as_of: Option<Timestamp>) -> Option<Row> {
        let entries = self.rows.get(row)?;
        collapse(entries, as_of)
    }

    /// All rows visible as of `as_of`, in row-name order.
    pub fn scan_visible(&self, as_of: Option<Timestamp>) -> Vec<(String, Row)> {
        self.rows
            .iter()
            .filter_map(|(name, entries)| collapse(entries, as_of).map(|row| (name.clone(), row)))
            .collect()
    }

    /// Distinct column names in first-recorded order.
    pub fn column_names(&self) -> Vec<String> {
        let mut seen: BTreeMap<&str, u64> = BTreeMap::new();
        for entries in self.rows.values() {
            for e in entries {
                seen.entry(e.column.as_str())
                    .and_modify(|s| *s = (*s).min(e.seq))
                    .or_insert(e.seq);
            }
        }
        let mut cols: Vec<(&str, u64)> = seen.into_iter().collect();
        cols.sort_by_key(|(_, seq)| *seq);
        cols.into_iter().map(|(c, _)| c.to_string()).collect()
    }
}

fn collapse(entries: &[CellEntry], as_of: Option<Timestamp>) -> Option<Row> {
    // winning entry per column, plus column order of first sighting
    let mut order: Vec<&str> = Vec::new();
    let mut best: BTreeMap<&str, &CellEntry> = BTreeMap::new();
    for e in entries {
        if matches!(as_of, Some(limit) if e.ts > limit) {
            continue;
        }
        let col = e.column.as_str();
        let replace = match best.get(col) {
            Some(cur) => (e.ts, e.seq) >= (cur.ts, cur.seq),
            None => {
                order.push(col);
                true
            }
        };
        if replace {
            best.insert(col, e);
        }
    }
    if order.is_empty() {
        return None;
    }
    let mut row = Row::new();
    for col in order {
        if let Some(e) = best.get(col) {
            row.set(col, e.value.clone(), e.ts);
        }
    }
    Some(row)
}

fn approx_value_bytes(v: &CellValue) -> usize {
    match v {
        CellValue::Text(s) => s.len(),
        CellValue::Blob(b) => b.len(),
        _ => 8,
    }
}
