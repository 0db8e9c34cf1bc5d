pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod function;
pub mod procedure;
pub mod sql;
pub mod storage;
pub mod util;
pub mod value;

pub use crate::config::Config;
pub use crate::dataset::{Dataset, DatasetConfig, DatasetInfo, DatasetRef, DatasetState};
pub use crate::engine::{DatasetHandle, Engine, FunctionHandle, ProcedureHandle, RunHandle};
pub use crate::error::{CellDbError, ErrorKind, Result};
pub use crate::function::{Function, FunctionConfig, FunctionFactory, FunctionInfo};
pub use crate::procedure::{
    Procedure, ProcedureConfig, ProcedureFactory, RunContext, RunInfo, RunResult, RunState,
};
pub use crate::sql::{OutputFormat, OutputRow, QueryRequest};
pub use crate::value::{CellValue, Column, Row, Timestamp};
