use serde::Deserialize;
use serde_json::{json, Value};

use celldb_core::util::time::parse_timestamp;
use celldb_core::{
    CellValue, DatasetConfig, Engine, FunctionConfig, OutputFormat, ProcedureConfig,
    QueryRequest, Result, Row, Timestamp,
};

/// `[column, value, timestamp]`
type CellSpec = (String, Value, Value);

/// One script step, tagged by `"op"`.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Step {
    CreateDataset {
        id: String,
        #[serde(rename = "type", default)]
        type_tag: Option<String>,
        #[serde(default)]
        params: Value,
    },
    RecordRow {
        dataset: String,
        #[serde(rename = "rowName")]
        row_name: String,
        columns: Vec<CellSpec>,
    },
    RecordRows {
        dataset: String,
        rows: Vec<(String, Vec<CellSpec>)>,
    },
    Commit {
        dataset: String,
    },
    CreateProcedure {
        id: String,
        #[serde(rename = "type")]
        type_tag: String,
        #[serde(default)]
        params: Value,
    },
    CreateRun {
        procedure: String,
        #[serde(rename = "runId", default)]
        run_id: String,
        #[serde(default)]
        params: Value,
    },
    RegisterFunction {
        id: String,
        #[serde(rename = "type")]
        type_tag: String,
        #[serde(default)]
        params: Value,
    },
    InvokeFunction {
        function: String,
        #[serde(default)]
        args: serde_json::Map<String, Value>,
    },
    Query {
        dataset: String,
        #[serde(default)]
        query: QueryRequest,
    },
    Sql {
        statement: String,
        #[serde(default)]
        format: OutputFormat,
    },
}

pub fn parse_script(text: &str) -> Result<Vec<Step>> {
    Ok(serde_json::from_str(text)?)
}

fn cells(specs: Vec<CellSpec>) -> Result<Vec<(String, CellValue, Timestamp)>> {
    let mut out = Vec::with_capacity(specs.len());
    for (column, value, ts) in specs {
        out.push((column, CellValue::from_json(&value), parse_timestamp(&ts)?));
    }
    Ok(out)
}

/// Applies one step and returns its printable result.
pub fn apply_step(engine: &Engine, step: Step) -> Result<Value> {
    match step {
        Step::CreateDataset {
            id,
            type_tag,
            params,
        } => {
            let mut config = DatasetConfig::sparse(id);
            if let Some(type_tag) = type_tag {
                config.type_tag = type_tag;
            }
            config.params = params;
            let handle = engine.create_dataset(config)?;
            Ok(serde_json::to_value(handle.info()?)?)
        }
        Step::RecordRow {
            dataset,
            row_name,
            columns,
        } => {
            let cells = cells(columns)?;
            let count = cells.len();
            engine.dataset(&dataset)?.record_row(&row_name, cells)?;
            Ok(json!({ "dataset": dataset, "rows": 1, "cells": count }))
        }
        Step::RecordRows { dataset, rows } => {
            let handle = engine.dataset(&dataset)?;
            let mut parsed = Vec::with_capacity(rows.len());
            for (row_name, columns) in rows {
                parsed.push((row_name, cells(columns)?));
            }
            let count = parsed.len();
            handle.record_rows(parsed)?;
            Ok(json!({ "dataset": dataset, "rows": count }))
        }
        Step::Commit { dataset } => {
            let handle = engine.dataset(&dataset)?;
            handle.commit()?;
            Ok(serde_json::to_value(handle.info()?)?)
        }
        Step::CreateProcedure {
            id,
            type_tag,
            params,
        } => {
            engine.create_procedure(&id, ProcedureConfig::new(type_tag.clone(), params))?;
            Ok(json!({ "id": id, "type": type_tag }))
        }
        Step::CreateRun {
            procedure,
            run_id,
            params,
        } => Ok(serde_json::to_value(engine.create_run(&procedure, &run_id, params)?)?),
        Step::RegisterFunction {
            id,
            type_tag,
            params,
        } => {
            let handle = engine.register_function(&id, FunctionConfig::new(type_tag, params))?;
            Ok(serde_json::to_value(handle.info()?)?)
        }
        Step::InvokeFunction { function, args } => {
            let mut bundle = Row::new();
            for (name, value) in &args {
                bundle.set(name.clone(), CellValue::from_json(value), 0);
            }
            Ok(engine.invoke_function(&function, &bundle)?.to_json_object())
        }
        Step::Query { dataset, query } => engine.query(&dataset, &query),
        Step::Sql { statement, format } => {
            let rows = engine.sql(&statement)?;
            Ok(celldb_core::sql::render(&rows, format))
        }
    }
}
