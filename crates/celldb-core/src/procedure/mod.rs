pub mod export_csv;
pub mod registry;
pub mod run;
pub mod transform;

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::dataset::Catalog;
use crate::error::{CellDbError, Result};
use crate::function::FunctionRegistry;
use crate::sql::query::{Query, QueryRequest};

pub use export_csv::ExportCsvProcedure;
pub use registry::{ProcedureFactory, ProcedureRegistry};
pub use run::{RunInfo, RunResult, RunState};
pub use transform::TransformProcedure;

pub const TRANSFORM: &str = "transform";
pub const EXPORT_CSV: &str = "export.csv";

/// A configured procedure body. Instances are built from validated params,
/// so `run` only fails on data or execution problems.
pub trait Procedure: Debug + Send + Sync {
    fn id(&self) -> &str;

    fn type_tag(&self) -> &str;

    /// Executes one run and returns its outputs object.
    fn run(&self, ctx: &RunContext<'_>) -> Result<serde_json::Value>;
}

/// `{type, params}` as accepted by `createProcedure`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcedureConfig {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ProcedureConfig {
    pub fn new(type_tag: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            type_tag: type_tag.into(),
            params,
        }
    }
}

/// Engine services a run may use.
#[derive(Clone, Copy)]
pub struct RunEnv<'a> {
    pub catalog: &'a Catalog,
    pub functions: &'a FunctionRegistry,
    pub config: &'a Config,
}

pub struct RunContext<'a> {
    pub procedure_id: &'a str,
    pub run_id: &'a str,
    pub catalog: &'a Catalog,
    pub functions: &'a FunctionRegistry,
    pub config: &'a Config,
}

/// Overlays the top-level keys of `overrides` onto `base`.
pub fn merge_params(base: &serde_json::Value, overrides: &serde_json::Value) -> serde_json::Value {
    match (base, overrides) {
        (_, serde_json::Value::Null) => base.clone(),
        (serde_json::Value::Object(base), serde_json::Value::Object(over)) => {
            let mut merged = base.clone();
            for (k, v) in over {
                merged.insert(k.clone(), v.clone());
            }
            serde_json::Value::Object(merged)
        }
        (_, over) => over.clone(),
    }
}

/// Deserializes procedure params, reporting failures against the procedure id.
pub(crate) fn parse_params<T: serde::de::DeserializeOwned>(
    id: &str,
    params: &serde_json::Value,
) -> Result<T> {
    let params = match params {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(params).map_err(|e| CellDbError::config(id, e.to_string()))
}

/// Compiles query clauses carried in procedure params.
pub(crate) fn compile_query(id: &str, request: &QueryRequest) -> Result<Query> {
    Query::from_request(request)
        .map_err(|e| CellDbError::config(id, format!("invalid query clause: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_params_shallow_merge() {
        let base = json!({ "select": "*", "limit": 3, "outputDataset": { "id": "a" } });
        let merged = merge_params(&base, &json!({ "limit": 1, "outputDataset": "b" }));
        assert_eq!(
            merged,
            json!({ "select": "*", "limit": 1, "outputDataset": "b" })
        );
        assert_eq!(merge_params(&base, &serde_json::Value::Null), base);
        assert_eq!(merge_params(&base, &json!({})), base);
    }
}
