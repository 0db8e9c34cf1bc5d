use std::sync::Arc;

use serde::Deserialize;

use crate::dataset::DatasetRef;
use crate::error::{CellDbError, Result};
use crate::function::{Function, FunctionRegistry, TOKENSPLIT};
use crate::sql::eval::FunctionResolver;
use crate::sql::exec::{execute_query, ExecOptions};
use crate::sql::query::{Query, QueryRequest};
use crate::util::time::TimeSpec;
use crate::value::{CellValue, Row};

/// Input column holding the text to split.
pub const TEXT_ARG: &str = "text";
/// Output column holding the separated text.
pub const OUTPUT_COLUMN: &str = "output";

fn default_splitchars() -> String {
    " ,".to_string()
}

fn default_insert() -> String {
    " ".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TokenSplitParams {
    #[serde(default)]
    dictionary_dataset: Option<DatasetRef>,
    #[serde(default)]
    select: Option<String>,
    #[serde(rename = "where", default)]
    filter: Option<String>,
    #[serde(default)]
    as_of: Option<TimeSpec>,
    #[serde(default)]
    tokens: Option<Vec<String>>,
    #[serde(default = "default_splitchars")]
    splitchars: String,
    #[serde(default = "default_insert")]
    splitchar_to_insert: String,
}

/// `tokensplit`: surrounds every dictionary token found in `text` with
/// `splitcharToInsert`, unless a split character already borders it.
///
/// The dictionary is every non-null cell of `dictionaryDataset` filtered by
/// `select`/`where`, read once when the function is registered. A literal
/// `tokens` list may be given instead.
#[derive(Debug)]
pub struct TokenSplitFunction {
    id: String,
    /// Longest first, so overlapping tokens match greedily.
    dictionary: Vec<String>,
    splitchars: Vec<char>,
    insert: String,
    strict: bool,
}

impl TokenSplitFunction {
    pub fn new(
        id: &str,
        tokens: impl IntoIterator<Item = String>,
        splitchars: &str,
        insert: &str,
    ) -> Self {
        let mut dictionary: Vec<String> = tokens.into_iter().filter(|t| !t.is_empty()).collect();
        dictionary.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        dictionary.dedup();
        Self {
            id: id.to_string(),
            dictionary,
            splitchars: splitchars.chars().collect(),
            insert: insert.to_string(),
            strict: false,
        }
    }

    pub(crate) fn build(
        id: &str,
        params: &serde_json::Value,
        registry: &FunctionRegistry,
    ) -> Result<Arc<dyn Function>> {
        let params: TokenSplitParams = serde_json::from_value(params.clone())
            .map_err(|e| CellDbError::config(id, e.to_string()))?;
        let tokens = match (&params.dictionary_dataset, params.tokens) {
            (Some(_), Some(_)) => {
                return Err(CellDbError::config(
                    id,
                    "give either dictionaryDataset or tokens, not both",
                ))
            }
            (None, None) => {
                return Err(CellDbError::config(
                    id,
                    "tokensplit needs a dictionaryDataset or a tokens list",
                ))
            }
            (None, Some(tokens)) => tokens,
            (Some(dataset), None) => {
                let request = QueryRequest {
                    select: params.select,
                    filter: params.filter,
                    as_of: params.as_of,
                    ..QueryRequest::default()
                };
                load_dictionary(id, dataset.id(), &request, registry)?
            }
        };
        let mut function = Self::new(id, tokens, &params.splitchars, &params.splitchar_to_insert);
        function.strict = registry.strict_args();
        tracing::debug!(
            "tokensplit {id} loaded {} dictionary token(s)",
            function.dictionary.len()
        );
        Ok(Arc::new(function))
    }

    pub fn dictionary(&self) -> &[String] {
        &self.dictionary
    }

    fn is_split(&self, c: char) -> bool {
        self.splitchars.contains(&c)
    }

    /// `text` with separators inserted around each dictionary token.
    pub fn split(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut pos = 0;
        while pos < text.len() {
            let rest = &text[pos..];
            match self.dictionary.iter().find(|t| rest.starts_with(t.as_str())) {
                Some(token) => {
                    if self.needs_separator(&out) {
                        out.push_str(&self.insert);
                    }
                    out.push_str(token);
                    pos += token.len();
                    let next = text[pos..].chars().next();
                    if next.is_some_and(|c| !self.is_split(c)) {
                        out.push_str(&self.insert);
                    }
                }
                None => {
                    let Some(c) = rest.chars().next() else { break };
                    out.push(c);
                    pos += c.len_utf8();
                }
            }
        }
        out
    }

    fn needs_separator(&self, out: &str) -> bool {
        match out.chars().next_back() {
            None => false,
            Some(c) => !self.is_split(c) && !out.ends_with(self.insert.as_str()),
        }
    }
}

impl Function for TokenSplitFunction {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_tag(&self) -> &str {
        TOKENSPLIT
    }

    fn apply(&self, args: &Row, _resolver: &dyn FunctionResolver) -> Result<Row> {
        let mut out = Row::new();
        let Some(column) = args.column(TEXT_ARG) else {
            if self.strict {
                return Err(CellDbError::eval(format!(
                    "function {} needs argument {TEXT_ARG}",
                    self.id
                )));
            }
            return Ok(out);
        };
        match &column.value {
            CellValue::Null => {}
            CellValue::Text(text) => {
                out.set(OUTPUT_COLUMN, CellValue::Text(self.split(text)), column.ts);
            }
            other => {
                return Err(CellDbError::eval(format!(
                    "function {} expects text, got {}",
                    self.id,
                    other.type_name()
                )))
            }
        }
        Ok(out)
    }
}

fn load_dictionary(
    id: &str,
    dataset: &str,
    request: &QueryRequest,
    registry: &FunctionRegistry,
) -> Result<Vec<String>> {
    let catalog = registry
        .catalog()
        .ok_or_else(|| CellDbError::config(id, "no datasets are available to this registry"))?;
    let query = Query::from_request(request)
        .map_err(|e| CellDbError::config(id, format!("invalid dictionary query: {e}")))?;
    let source = catalog.readable(dataset)?;
    let opts = ExecOptions {
        functions: Some(registry),
        ..ExecOptions::default()
    };
    let rows = execute_query(source.as_ref(), &query, &opts)?;
    Ok(rows
        .iter()
        .flat_map(|row| row.columns.iter())
        .filter(|c| !c.value.is_null())
        .map(|c| c.value.to_display_string())
        .collect())
}
