use std::sync::Arc;

use serde::Deserialize;

use crate::dataset::{DatasetRef, SPARSE_MUTABLE};
use crate::error::{CellDbError, Result};
use crate::procedure::{compile_query, parse_params, Procedure, RunContext, TRANSFORM};
use crate::sql::exec::{execute_query, ExecOptions};
use crate::sql::query::{Query, QueryRequest};
use crate::util::time::{unix_millis, TimeSpec};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TransformParams {
    input_dataset: DatasetRef,
    output_dataset: DatasetRef,
    #[serde(default)]
    select: Option<String>,
    #[serde(rename = "where", default)]
    filter: Option<String>,
    #[serde(default)]
    group_by: Option<String>,
    #[serde(default)]
    having: Option<String>,
    #[serde(default)]
    order_by: Option<String>,
    #[serde(default)]
    row_name: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    as_of: Option<TimeSpec>,
}

/// Materializes a query over `inputDataset` into a freshly committed
/// `outputDataset`. The output replaces any previous dataset of that id only
/// once every row has been written.
#[derive(Debug)]
pub struct TransformProcedure {
    id: String,
    input: String,
    output: String,
    query: Query,
}

impl TransformProcedure {
    pub(crate) fn build(id: &str, params: &serde_json::Value) -> Result<Arc<dyn Procedure>> {
        let params: TransformParams = parse_params(id, params)?;
        if let Some(tag) = params.output_dataset.type_tag() {
            if tag != SPARSE_MUTABLE {
                return Err(CellDbError::config(
                    id,
                    format!("transform output must be {SPARSE_MUTABLE}, got {tag}"),
                ));
            }
        }
        let request = QueryRequest {
            select: params.select,
            filter: params.filter,
            group_by: params.group_by,
            having: params.having,
            order_by: params.order_by,
            row_name: params.row_name,
            limit: params.limit,
            offset: params.offset,
            as_of: params.as_of,
            ..QueryRequest::default()
        };
        let query = compile_query(id, &request)?;
        Ok(Arc::new(Self {
            id: id.to_string(),
            input: params.input_dataset.id().to_string(),
            output: params.output_dataset.id().to_string(),
            query,
        }))
    }
}

impl Procedure for TransformProcedure {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_tag(&self) -> &str {
        TRANSFORM
    }

    fn run(&self, ctx: &RunContext<'_>) -> Result<serde_json::Value> {
        let input = ctx.catalog.readable(&self.input)?;
        let staged = ctx.catalog.stage(&self.output)?;

        let opts = ExecOptions {
            functions: Some(ctx.functions),
            max_rows: ctx.config.max_query_rows,
        };
        let rows = execute_query(input.as_ref(), &self.query, &opts)?;

        let ts = unix_millis();
        let mut written = 0usize;
        for row in &rows {
            // rows whose every projected cell was absent have nothing to store
            if row.columns.is_empty() {
                continue;
            }
            written += 1;
            staged.record_row(
                &row.row_name,
                row.columns
                    .iter()
                    .map(|c| (c.name.as_str(), c.value.clone(), ts)),
            )?;
        }
        let output = staged.publish()?;
        tracing::info!(
            "transform {} wrote {} rows from {} into {}",
            self.id,
            written,
            self.input,
            output.id()
        );
        Ok(serde_json::json!({
            "outputDataset": { "id": output.id(), "type": output.type_tag() },
            "rowCount": written,
        }))
    }
}
