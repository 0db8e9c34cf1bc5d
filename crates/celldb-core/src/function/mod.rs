pub mod expression;
pub mod registry;
pub mod serial;
pub mod tokensplit;

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sql::eval::FunctionResolver;
use crate::value::Row;

pub use expression::ExpressionFunction;
pub use registry::{FunctionFactory, FunctionRegistry};
pub use serial::SerialFunction;
pub use tokensplit::TokenSplitFunction;

pub const SERIAL: &str = "serial";
pub const SQL_EXPRESSION: &str = "sql.expression";
pub const TOKENSPLIT: &str = "tokensplit";

/// A registered, invocable function: argument bundle in, output row out.
///
/// `resolver` lets a body call other registered functions (expressions such
/// as `classifier({...})[score]` inside a `sql.expression`).
pub trait Function: Debug + Send + Sync {
    fn id(&self) -> &str;

    fn type_tag(&self) -> &str;

    fn apply(&self, args: &Row, resolver: &dyn FunctionResolver) -> Result<Row>;
}

/// `{type, params}` as accepted by `registerFunction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionConfig {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl FunctionConfig {
    pub fn new(type_tag: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            type_tag: type_tag.into(),
            params,
        }
    }

    pub fn expression(expression: &str) -> Self {
        Self::new(
            SQL_EXPRESSION,
            serde_json::json!({ "expression": expression }),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub params: serde_json::Value,
}
