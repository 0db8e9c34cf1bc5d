use std::sync::Arc;

use serde::Deserialize;

use crate::error::{CellDbError, Result};
use crate::function::{Function, FunctionRegistry, SQL_EXPRESSION};
use crate::sql::eval::{referenced_columns, EvalContext, FunctionResolver};
use crate::sql::parser::{parse_select_list, SelectItem};
use crate::value::Row;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpressionParams {
    expression: String,
}

/// `sql.expression`: a select list evaluated with the argument bundle as the row.
#[derive(Debug)]
pub struct ExpressionFunction {
    id: String,
    items: Vec<SelectItem>,
    referenced: Vec<String>,
    strict: bool,
}

impl ExpressionFunction {
    pub fn new(id: &str, expression: &str, strict: bool) -> Result<Self> {
        let items = parse_select_list(expression)
            .map_err(|e| CellDbError::config(id, format!("invalid expression: {e}")))?;
        let mut referenced = Vec::new();
        for item in &items {
            if let SelectItem::Expr { expr, .. } = item {
                referenced_columns(expr, &mut referenced);
            }
        }
        Ok(Self {
            id: id.to_string(),
            items,
            referenced,
            strict,
        })
    }

    pub(crate) fn build(
        id: &str,
        params: &serde_json::Value,
        registry: &FunctionRegistry,
    ) -> Result<Arc<dyn Function>> {
        let params: ExpressionParams = serde_json::from_value(params.clone())
            .map_err(|e| CellDbError::config(id, e.to_string()))?;
        Ok(Arc::new(Self::new(
            id,
            &params.expression,
            registry.strict_args(),
        )?))
    }
}

impl Function for ExpressionFunction {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_tag(&self) -> &str {
        SQL_EXPRESSION
    }

    fn apply(&self, args: &Row, resolver: &dyn FunctionResolver) -> Result<Row> {
        if self.strict {
            if let Some(missing) = self.referenced.iter().find(|c| !args.contains(c)) {
                return Err(CellDbError::eval(format!(
                    "function {} needs argument {missing}",
                    self.id
                )));
            }
        }
        EvalContext::new(&self.id, args)
            .with_functions(Some(resolver))
            .project(&self.items)
    }
}
