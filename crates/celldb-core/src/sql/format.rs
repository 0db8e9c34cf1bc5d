use serde::{Deserialize, Serialize};

use crate::sql::exec::OutputRow;

/// Response shape for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `[["_rowName", cols...], [name, values...], ...]`
    Table,
    /// `[{"rowName": n, "columns": [[col, value, ts], ...]}, ...]`
    #[default]
    Full,
    /// `[{"_rowName": n, col: value, ...}, ...]`
    Objects,
}

pub const ROW_NAME_HEADER: &str = "_rowName";

/// Union of output column names in first-appearance order.
pub fn column_header(rows: &[OutputRow]) -> Vec<String> {
    let mut header: Vec<String> = Vec::new();
    for row in rows {
        for name in row.columns.names() {
            if !header.iter().any(|h| h == name) {
                header.push(name.to_string());
            }
        }
    }
    header
}

pub fn render(rows: &[OutputRow], format: OutputFormat) -> serde_json::Value {
    use serde_json::Value;

    match format {
        OutputFormat::Table => {
            let header = column_header(rows);
            let mut out = Vec::with_capacity(rows.len() + 1);
            let mut head = vec![Value::String(ROW_NAME_HEADER.to_string())];
            head.extend(header.iter().map(|h| Value::String(h.clone())));
            out.push(Value::Array(head));
            for row in rows {
                let mut line = vec![Value::String(row.row_name.clone())];
                line.extend(header.iter().map(|h| {
                    row.columns
                        .get(h)
                        .map(|v| v.to_json())
                        .unwrap_or(Value::Null)
                }));
                out.push(Value::Array(line));
            }
            Value::Array(out)
        }
        OutputFormat::Full => Value::Array(
            rows.iter()
                .map(|row| {
                    let columns: Vec<Value> = row
                        .columns
                        .iter()
                        .map(|c| serde_json::json!([c.name, c.value.to_json(), c.ts]))
                        .collect();
                    serde_json::json!({ "rowName": row.row_name, "columns": columns })
                })
                .collect(),
        ),
        OutputFormat::Objects => Value::Array(
            rows.iter()
                .map(|row| {
                    let mut obj = serde_json::Map::new();
                    obj.insert(
                        ROW_NAME_HEADER.to_string(),
                        Value::String(row.row_name.clone()),
                    );
                    for c in row.columns.iter() {
                        obj.insert(c.name.clone(), c.value.to_json());
                    }
                    Value::Object(obj)
                })
                .collect(),
        ),
    }
}
