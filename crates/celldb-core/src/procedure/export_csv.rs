use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::dataset::DatasetRef;
use crate::error::{CellDbError, Result};
use crate::procedure::{compile_query, parse_params, Procedure, RunContext, EXPORT_CSV};
use crate::sql::exec::{execute_query, ExecOptions, OutputRow};
use crate::sql::format::{column_header, ROW_NAME_HEADER};
use crate::sql::query::{Query, QueryRequest};
use crate::util::artifact::resolve_artifact_path;
use crate::util::time::TimeSpec;
use crate::value::CellValue;

fn default_headers() -> bool {
    true
}

fn default_delimiter() -> String {
    ",".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ExportCsvParams {
    input_dataset: DatasetRef,
    data_file_url: String,
    #[serde(default)]
    select: Option<String>,
    #[serde(rename = "where", default)]
    filter: Option<String>,
    #[serde(default)]
    order_by: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    as_of: Option<TimeSpec>,
    #[serde(default = "default_headers")]
    headers: bool,
    #[serde(default = "default_delimiter")]
    delimiter: String,
}

/// Writes a query result as CSV: `_rowName` then the output columns in
/// first-appearance order, missing cells left empty.
#[derive(Debug)]
pub struct ExportCsvProcedure {
    id: String,
    input: String,
    data_file_url: String,
    query: Query,
    headers: bool,
    delimiter: u8,
}

impl ExportCsvProcedure {
    pub(crate) fn build(id: &str, params: &serde_json::Value) -> Result<Arc<dyn Procedure>> {
        let params: ExportCsvParams = parse_params(id, params)?;
        if params.data_file_url.trim().is_empty() {
            return Err(CellDbError::config(id, "dataFileUrl must not be empty"));
        }
        let delimiter = match params.delimiter.as_bytes() {
            [b] if b.is_ascii() => *b,
            _ => {
                return Err(CellDbError::config(
                    id,
                    format!("delimiter must be one ASCII character, got {:?}", params.delimiter),
                ))
            }
        };
        let request = QueryRequest {
            select: params.select,
            filter: params.filter,
            order_by: params.order_by,
            limit: params.limit,
            offset: params.offset,
            as_of: params.as_of,
            ..QueryRequest::default()
        };
        let query = compile_query(id, &request)?;
        Ok(Arc::new(Self {
            id: id.to_string(),
            input: params.input_dataset.id().to_string(),
            data_file_url: params.data_file_url,
            query,
            headers: params.headers,
            delimiter,
        }))
    }

    fn write(&self, path: &Path, rows: &[OutputRow]) -> Result<()> {
        let columns = column_header(rows);
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_path(path)?;
        if self.headers {
            let mut header = Vec::with_capacity(columns.len() + 1);
            header.push(ROW_NAME_HEADER);
            header.extend(columns.iter().map(String::as_str));
            wtr.write_record(&header)?;
        }
        for row in rows {
            let mut record = Vec::with_capacity(columns.len() + 1);
            record.push(row.row_name.clone());
            for name in &columns {
                record.push(match row.columns.get(name) {
                    None | Some(CellValue::Null) => String::new(),
                    Some(v) => v.to_display_string(),
                });
            }
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl Procedure for ExportCsvProcedure {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_tag(&self) -> &str {
        EXPORT_CSV
    }

    fn run(&self, ctx: &RunContext<'_>) -> Result<serde_json::Value> {
        let input = ctx.catalog.readable(&self.input)?;
        let opts = ExecOptions {
            functions: Some(ctx.functions),
            max_rows: ctx.config.max_query_rows,
        };
        let rows = execute_query(input.as_ref(), &self.query, &opts)?;

        let path = resolve_artifact_path(&self.data_file_url, ctx.config.artifact_root.as_deref());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        // write beside the target and rename so readers never see a partial file
        let partial = path.with_file_name(format!(
            ".{}.partial",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
        if let Err(e) = self.write(&partial, &rows) {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
        std::fs::rename(&partial, &path)?;

        tracing::info!(
            "export {} wrote {} rows from {} to {}",
            self.id,
            rows.len(),
            self.input,
            path.display()
        );
        Ok(serde_json::json!({
            "dataFileUrl": self.data_file_url,
            "rowCount": rows.len(),
        }))
    }
}
