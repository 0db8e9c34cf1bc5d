pub mod eval;
pub mod exec;
pub mod format;
pub mod parser;
pub mod query;

pub use eval::{EvalContext, ExprValue, FunctionResolver};
pub use exec::{execute_query, ExecOptions, OutputRow};
pub use format::{render, OutputFormat};
pub use parser::{parse_expression, parse_select_list, parse_sql, Expr, SelectItem};
pub use query::{Query, QueryRequest};
