use parking_lot::RwLock;

use crate::dataset::{Dataset, DatasetState, SPARSE_MUTABLE};
use crate::error::{CellDbError, Result};
use crate::storage::cell_store::CellStore;
use crate::value::{CellValue, Row, Timestamp};

#[derive(Debug, Default)]
struct SparseState {
    store: CellStore,
    committed: bool,
}

/// Dataset backed by a single [`CellStore`]: writable until `commit`, then
/// read-only and queryable.
#[derive(Debug)]
pub struct SparseDataset {
    id: String,
    inner: RwLock<SparseState>,
}

impl SparseDataset {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: RwLock::new(SparseState::default()),
        }
    }

    pub fn record_row<I, K>(&self, row_name: &str, cells: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, CellValue, Timestamp)>,
        K: AsRef<str>,
    {
        self.record_rows([(row_name, cells)])
    }

    /// Records several rows as one batch. Every row and column name is
    /// checked before the first cell is stored, so a rejected batch leaves
    /// the dataset unchanged.
    pub fn record_rows<I, N, R, K>(&self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = (N, R)>,
        N: AsRef<str>,
        R: IntoIterator<Item = (K, CellValue, Timestamp)>,
        K: AsRef<str>,
    {
        let mut batch = Vec::new();
        for (row_name, cells) in rows {
            let cells: Vec<(K, CellValue, Timestamp)> = cells.into_iter().collect();
            let row_name = row_name.as_ref();
            if row_name.is_empty() {
                return Err(CellDbError::config(&self.id, "row name must not be empty"));
            }
            if cells.iter().any(|(column, _, _)| column.as_ref().is_empty()) {
                return Err(CellDbError::config(
                    &self.id,
                    format!("empty column name in row {row_name}"),
                ));
            }
            batch.push((row_name.to_string(), cells));
        }

        let mut inner = self.inner.write();
        if inner.committed {
            return Err(CellDbError::state(
                &self.id,
                "dataset is committed and no longer accepts rows",
            ));
        }
        for (row_name, cells) in batch {
            for (column, value, ts) in cells {
                inner.store.insert(&row_name, column.as_ref(), value, ts);
            }
        }
        Ok(())
    }

    /// Marks the dataset committed. Returns `false` if it already was.
    pub fn commit(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.committed {
            return false;
        }
        inner.committed = true;
        tracing::info!(
            "committed dataset {} ({} rows, {} cells, ~{} bytes)",
            self.id,
            inner.store.row_count(),
            inner.store.cell_count(),
            inner.store.approx_bytes()
        );
        true
    }

    pub fn is_committed(&self) -> bool {
        self.inner.read().committed
    }

    pub fn cell_count(&self) -> usize {
        self.inner.read().store.cell_count()
    }
}

impl Dataset for SparseDataset {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_tag(&self) -> &'static str {
        SPARSE_MUTABLE
    }

    fn state(&self) -> DatasetState {
        if self.is_committed() {
            DatasetState::Committed
        } else {
            DatasetState::Open
        }
    }

    fn row_names(&self) -> Vec<String> {
        self.inner
            .read()
            .store
            .row_names()
            .map(str::to_string)
            .collect()
    }

    fn row_as_of(&self, name: &str, as_of: Option<Timestamp>) -> Option<Row> {
        self.inner.read().store.visible_row(name, as_of)
    }

    fn column_names(&self) -> Vec<String> {
        self.inner.read().store.column_names()
    }

    fn row_count(&self) -> usize {
        self.inner.read().store.row_count()
    }

    fn scan_as_of(&self, as_of: Option<Timestamp>) -> Vec<(String, Row)> {
        self.inner.read().store.scan_visible(as_of)
    }
}
