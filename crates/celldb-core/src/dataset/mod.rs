pub mod catalog;
pub mod merged;
pub mod sparse;

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::value::{Row, Timestamp};

pub use catalog::{Catalog, StagedDataset};
pub use merged::MergedDataset;
pub use sparse::SparseDataset;

pub const SPARSE_MUTABLE: &str = "sparse.mutable";
pub const MERGED: &str = "merged";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetState {
    /// Accepting writes; not yet queryable.
    Open,
    Committed,
}

/// Read capability shared by stored and virtual datasets.
///
/// The query processor only needs row enumeration and row lookup, so merged
/// views need no special casing above this trait.
pub trait Dataset: Debug + Send + Sync {
    fn id(&self) -> &str;

    fn type_tag(&self) -> &'static str;

    fn state(&self) -> DatasetState;

    /// Visible row names in ascending lexical order.
    fn row_names(&self) -> Vec<String>;

    /// The row collapsed to its latest cells at or before `as_of`, or at
    /// the latest time when `None`.
    fn row_as_of(&self, name: &str, as_of: Option<Timestamp>) -> Option<Row>;

    fn row(&self, name: &str) -> Option<Row> {
        self.row_as_of(name, None)
    }

    fn column_names(&self) -> Vec<String>;

    fn row_count(&self) -> usize {
        self.row_names().len()
    }

    /// Every row with a cell visible at `as_of`, in row-name order.
    fn scan_as_of(&self, as_of: Option<Timestamp>) -> Vec<(String, Row)> {
        self.row_names()
            .into_iter()
            .filter_map(|name| self.row_as_of(&name, as_of).map(|row| (name, row)))
            .collect()
    }

    fn scan(&self) -> Vec<(String, Row)> {
        self.scan_as_of(None)
    }
}

/// `{type, id, params}` as accepted by `createDataset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    #[serde(rename = "type", default = "default_dataset_type")]
    pub type_tag: String,
    pub id: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

fn default_dataset_type() -> String {
    SPARSE_MUTABLE.to_string()
}

impl DatasetConfig {
    pub fn sparse(id: impl Into<String>) -> Self {
        Self {
            type_tag: SPARSE_MUTABLE.to_string(),
            id: id.into(),
            params: serde_json::Value::Null,
        }
    }

    pub fn merged<I, S>(id: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let datasets: Vec<serde_json::Value> = members
            .into_iter()
            .map(|m| serde_json::json!({ "id": m.into() }))
            .collect();
        Self {
            type_tag: MERGED.to_string(),
            id: id.into(),
            params: serde_json::json!({ "datasets": datasets }),
        }
    }
}

/// A dataset named either by bare id or by `{ "id": .., "type": .. }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasetRef {
    Id(String),
    Config(DatasetRefConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetRefConfig {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl DatasetRef {
    pub fn id(&self) -> &str {
        match self {
            DatasetRef::Id(id) => id,
            DatasetRef::Config(cfg) => &cfg.id,
        }
    }

    pub fn type_tag(&self) -> Option<&str> {
        match self {
            DatasetRef::Id(_) => None,
            DatasetRef::Config(cfg) => cfg.type_tag.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub state: DatasetState,
    pub row_count: usize,
    pub column_count: usize,
}

impl DatasetInfo {
    pub fn of(dataset: &dyn Dataset) -> Self {
        Self {
            id: dataset.id().to_string(),
            type_tag: dataset.type_tag().to_string(),
            state: dataset.state(),
            row_count: dataset.row_count(),
            column_count: dataset.column_names().len(),
        }
    }
}
