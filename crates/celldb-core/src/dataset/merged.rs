use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;

use crate::dataset::{Dataset, DatasetRef, DatasetState, MERGED};
use crate::error::{CellDbError, Result};
use crate::value::{Row, Timestamp};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct MergedParams {
    pub datasets: Vec<DatasetRef>,
}

impl MergedParams {
    pub(crate) fn parse(id: &str, params: &serde_json::Value) -> Result<Self> {
        let parsed: MergedParams = serde_json::from_value(params.clone())
            .map_err(|e| CellDbError::config(id, format!("invalid merged params: {e}")))?;
        if parsed.datasets.is_empty() {
            return Err(CellDbError::config(id, "merged dataset needs at least one member"));
        }
        Ok(parsed)
    }
}

/// Virtual union of member datasets.
///
/// Members are bound when the view is created. For a row present in several
/// members, the first listed member's value wins on column collisions.
#[derive(Debug)]
pub struct MergedDataset {
    id: String,
    members: Vec<Arc<dyn Dataset>>,
}

impl MergedDataset {
    pub fn new(id: impl Into<String>, members: Vec<Arc<dyn Dataset>>) -> Self {
        Self {
            id: id.into(),
            members,
        }
    }

    pub fn member_ids(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.id()).collect()
    }
}

impl Dataset for MergedDataset {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_tag(&self) -> &'static str {
        MERGED
    }

    fn state(&self) -> DatasetState {
        if self
            .members
            .iter()
            .all(|m| m.state() == DatasetState::Committed)
        {
            DatasetState::Committed
        } else {
            DatasetState::Open
        }
    }

    fn row_names(&self) -> Vec<String> {
        let names: BTreeSet<String> = self
            .members
            .iter()
            .flat_map(|m| m.row_names())
            .collect();
        names.into_iter().collect()
    }

    fn row_as_of(&self, name: &str, as_of: Option<Timestamp>) -> Option<Row> {
        let mut merged: Option<Row> = None;
        for member in &self.members {
            let Some(row) = member.row_as_of(name, as_of) else {
                continue;
            };
            match merged.as_mut() {
                None => merged = Some(row),
                Some(acc) => {
                    for col in row {
                        acc.set_if_absent(&col.name, col.value, col.ts);
                    }
                }
            }
        }
        merged
    }

    fn column_names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for member in &self.members {
            for col in member.column_names() {
                if !out.contains(&col) {
                    out.push(col);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SparseDataset;
    use crate::value::CellValue;

    fn member(id: &str, rows: &[(&str, &str, i64)]) -> Arc<dyn Dataset> {
        let ds = SparseDataset::new(id);
        for (row, col, v) in rows {
            ds.record_row(row, [(*col, CellValue::Integer(*v), 1)]).unwrap();
        }
        ds.commit();
        Arc::new(ds)
    }

    #[test]
    fn first_member_wins_on_collision() {
        let a = member("a", &[("r1", "c", 1), ("r2", "only_a", 5)]);
        let b = member("b", &[("r1", "c", 2), ("r1", "d", 3), ("r3", "c", 7)]);
        let view = MergedDataset::new("m", vec![a, b]);

        assert_eq!(view.row_names(), vec!["r1", "r2", "r3"]);
        let r1 = view.row("r1").unwrap();
        assert_eq!(r1.get("c"), Some(&CellValue::Integer(1)));
        assert_eq!(r1.get("d"), Some(&CellValue::Integer(3)));
        assert_eq!(view.row("r3").unwrap().get("c"), Some(&CellValue::Integer(7)));
        assert!(view.row("nope").is_none());
        assert_eq!(view.column_names(), vec!["c", "only_a", "d"]);
    }

    #[test]
    fn members_are_read_as_of_the_same_time() {
        let a = SparseDataset::new("a");
        a.record_row("r1", [("c", CellValue::Integer(1), 50)]).unwrap();
        a.commit();
        let b = SparseDataset::new("b");
        b.record_row("r1", [("c", CellValue::Integer(2), 10)]).unwrap();
        b.commit();
        let view = MergedDataset::new("m", vec![Arc::new(a), Arc::new(b)]);

        // before a's cell exists, b supplies the column
        let early = view.row_as_of("r1", Some(20)).unwrap();
        assert_eq!(early.get("c"), Some(&CellValue::Integer(2)));
        assert_eq!(view.row("r1").unwrap().get("c"), Some(&CellValue::Integer(1)));
        assert!(view.scan_as_of(Some(5)).is_empty());
    }

    #[test]
    fn open_member_keeps_view_open() {
        let a = member("a", &[("r1", "c", 1)]);
        let open: Arc<dyn Dataset> = Arc::new(SparseDataset::new("open"));
        let view = MergedDataset::new("m", vec![a, open]);
        assert_eq!(view.state(), DatasetState::Open);
    }

    #[test]
    fn params_need_members() {
        let err = MergedParams::parse("m", &serde_json::json!({ "datasets": [] })).unwrap_err();
        assert!(format!("{err}").contains("at least one member"));
        let ok = MergedParams::parse("m", &serde_json::json!({ "datasets": [{ "id": "a" }, "b"] }))
            .unwrap();
        assert_eq!(ok.datasets.len(), 2);
    }
}
