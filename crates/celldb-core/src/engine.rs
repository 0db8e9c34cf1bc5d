use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};

use crate::config::Config;
use crate::dataset::{Catalog, DatasetConfig, DatasetInfo};
use crate::error::{CellDbError, Result};
use crate::function::{FunctionConfig, FunctionFactory, FunctionInfo, FunctionRegistry};
use crate::procedure::{
    ProcedureConfig, ProcedureFactory, ProcedureRegistry, RunEnv, RunInfo, RunResult,
};
use crate::sql::exec::{execute_query, ExecOptions, OutputRow};
use crate::sql::format::render;
use crate::sql::parser::parse_sql;
use crate::sql::query::{Query, QueryRequest};
use crate::value::{CellValue, Row, Timestamp};

struct EngineInner {
    config: Config,
    catalog: Arc<Catalog>,
    functions: FunctionRegistry,
    procedures: ProcedureRegistry,
}

/// Entry point: owns the dataset catalog, the function registry and the
/// procedure runtime. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(Catalog::new());
        let functions =
            FunctionRegistry::new(config.strict_function_args).with_catalog(catalog.clone());
        let procedures = ProcedureRegistry::new(config.run_history_limit);
        tracing::debug!("engine started with {:?}", config);
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                catalog,
                functions,
                procedures,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.inner.functions
    }

    pub fn procedures(&self) -> &ProcedureRegistry {
        &self.inner.procedures
    }

    fn env(&self) -> RunEnv<'_> {
        RunEnv {
            catalog: &self.inner.catalog,
            functions: &self.inner.functions,
            config: &self.inner.config,
        }
    }

    fn exec_options(&self) -> ExecOptions<'_> {
        ExecOptions {
            functions: Some(&self.inner.functions),
            max_rows: self.inner.config.max_query_rows,
        }
    }

    // ---------------------------------------------------------------- datasets

    pub fn create_dataset(&self, config: DatasetConfig) -> Result<DatasetHandle> {
        let dataset = self.inner.catalog.create(&config)?;
        Ok(DatasetHandle {
            engine: self.clone(),
            id: dataset.id().to_string(),
        })
    }

    /// Handle on an existing dataset.
    pub fn dataset(&self, id: &str) -> Result<DatasetHandle> {
        self.inner.catalog.get(id)?;
        Ok(DatasetHandle {
            engine: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn drop_dataset(&self, id: &str) -> Result<()> {
        self.inner.catalog.drop_dataset(id)
    }

    pub fn list_datasets(&self) -> Vec<String> {
        self.inner.catalog.list()
    }

    pub fn dataset_info(&self, id: &str) -> Result<DatasetInfo> {
        self.inner.catalog.info(id)
    }

    // -------------------------------------------------------------- procedures

    pub fn create_procedure(&self, id: &str, config: ProcedureConfig) -> Result<ProcedureHandle> {
        self.inner.procedures.create(id, config)?;
        Ok(ProcedureHandle {
            engine: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn procedure(&self, id: &str) -> Result<ProcedureHandle> {
        if !self.inner.procedures.contains(id) {
            return Err(CellDbError::not_found("procedure", id));
        }
        Ok(ProcedureHandle {
            engine: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn delete_procedure(&self, id: &str) -> Result<()> {
        self.inner.procedures.delete(id)
    }

    pub fn list_procedures(&self) -> Vec<String> {
        self.inner.procedures.list()
    }

    pub fn register_procedure_type(&self, type_tag: &str, factory: ProcedureFactory) {
        self.inner.procedures.register_type(type_tag, factory);
    }

    /// Runs a procedure on the calling thread and returns once it has
    /// succeeded or failed. `params` are shallow-merged over the procedure's
    /// own; an empty `run_id` is generated.
    pub fn create_run(
        &self,
        procedure_id: &str,
        run_id: &str,
        params: serde_json::Value,
    ) -> Result<RunResult> {
        let pending = self.inner.procedures.prepare(procedure_id, run_id, &params)?;
        self.inner.procedures.execute(pending, self.env())
    }

    /// Like [`Engine::create_run`] but on a background thread.
    pub fn spawn_run(
        &self,
        procedure_id: &str,
        run_id: &str,
        params: serde_json::Value,
    ) -> Result<RunHandle> {
        let pending = self.inner.procedures.prepare(procedure_id, run_id, &params)?;
        let procedure_id = pending.procedure_id.clone();
        let run_id = pending.run_id.clone();

        let (tx, rx) = bounded(1);
        let engine = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("celldb-run-{procedure_id}-{run_id}"))
            .spawn(move || {
                let result = engine.inner.procedures.execute(pending, engine.env());
                let _ = tx.send(result);
            });
        match spawned {
            Ok(thread) => Ok(RunHandle {
                procedure_id,
                run_id,
                rx,
                thread,
            }),
            Err(e) => {
                self.inner
                    .procedures
                    .abandon(&procedure_id, &run_id, &e.to_string());
                Err(e.into())
            }
        }
    }

    pub fn run_info(&self, procedure_id: &str, run_id: &str) -> Result<RunInfo> {
        self.inner.procedures.run_info(procedure_id, run_id)
    }

    pub fn list_runs(&self, procedure_id: &str) -> Result<Vec<RunInfo>> {
        self.inner.procedures.list_runs(procedure_id)
    }

    // --------------------------------------------------------------- functions

    pub fn register_function(&self, id: &str, config: FunctionConfig) -> Result<FunctionHandle> {
        self.inner.functions.register(id, config)?;
        Ok(FunctionHandle {
            engine: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn function(&self, id: &str) -> Result<FunctionHandle> {
        self.inner.functions.get(id)?;
        Ok(FunctionHandle {
            engine: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn invoke_function(&self, id: &str, args: &Row) -> Result<Row> {
        self.inner.functions.invoke(id, args)
    }

    pub fn function_info(&self, id: &str) -> Result<FunctionInfo> {
        self.inner.functions.info(id)
    }

    pub fn list_functions(&self) -> Vec<String> {
        self.inner.functions.list()
    }

    pub fn delete_function(&self, id: &str) -> Result<()> {
        self.inner.functions.delete(id)
    }

    pub fn register_function_type(&self, type_tag: &str, factory: FunctionFactory) {
        self.inner.functions.register_type(type_tag, factory);
    }

    // ----------------------------------------------------------------- queries

    /// Runs a query against a committed dataset.
    pub fn execute(&self, dataset_id: &str, request: &QueryRequest) -> Result<Vec<OutputRow>> {
        let query = Query::from_request(request)?;
        let dataset = self.inner.catalog.readable(dataset_id)?;
        execute_query(dataset.as_ref(), &query, &self.exec_options())
    }

    /// [`Engine::execute`] rendered in the request's format.
    pub fn query(&self, dataset_id: &str, request: &QueryRequest) -> Result<serde_json::Value> {
        let rows = self.execute(dataset_id, request)?;
        Ok(render(&rows, request.format))
    }

    /// Runs a `SELECT ... FROM dataset ...` statement.
    pub fn sql(&self, statement: &str) -> Result<Vec<OutputRow>> {
        let (from, query) = Query::from_statement(parse_sql(statement)?);
        let dataset = self.inner.catalog.readable(&from)?;
        execute_query(dataset.as_ref(), &query, &self.exec_options())
    }
}

/// Handle returned by [`Engine::create_dataset`].
#[derive(Clone)]
pub struct DatasetHandle {
    engine: Engine,
    id: String,
}

impl DatasetHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record_row<I, K>(&self, row_name: &str, cells: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, CellValue, Timestamp)>,
        K: AsRef<str>,
    {
        self.engine.inner.catalog.sparse(&self.id)?.record_row(row_name, cells)
    }

    /// Records all rows or, if any row is rejected, none of them.
    pub fn record_rows<I, N, R, K>(&self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = (N, R)>,
        N: AsRef<str>,
        R: IntoIterator<Item = (K, CellValue, Timestamp)>,
        K: AsRef<str>,
    {
        self.engine.inner.catalog.sparse(&self.id)?.record_rows(rows)
    }

    /// Commits the dataset; committing twice is a no-op.
    pub fn commit(&self) -> Result<()> {
        self.engine.inner.catalog.sparse(&self.id)?.commit();
        Ok(())
    }

    pub fn info(&self) -> Result<DatasetInfo> {
        self.engine.dataset_info(&self.id)
    }
}

#[derive(Clone)]
pub struct ProcedureHandle {
    engine: Engine,
    id: String,
}

impl ProcedureHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn create_run(&self, run_id: &str, params: serde_json::Value) -> Result<RunResult> {
        self.engine.create_run(&self.id, run_id, params)
    }

    pub fn spawn_run(&self, run_id: &str, params: serde_json::Value) -> Result<RunHandle> {
        self.engine.spawn_run(&self.id, run_id, params)
    }

    pub fn run_info(&self, run_id: &str) -> Result<RunInfo> {
        self.engine.run_info(&self.id, run_id)
    }

    pub fn list_runs(&self) -> Result<Vec<RunInfo>> {
        self.engine.list_runs(&self.id)
    }
}

#[derive(Clone)]
pub struct FunctionHandle {
    engine: Engine,
    id: String,
}

impl FunctionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn invoke(&self, args: &Row) -> Result<Row> {
        self.engine.invoke_function(&self.id, args)
    }

    pub fn info(&self) -> Result<FunctionInfo> {
        self.engine.function_info(&self.id)
    }
}

/// A run executing on its own thread.
pub struct RunHandle {
    procedure_id: String,
    run_id: String,
    rx: Receiver<Result<RunResult>>,
    thread: JoinHandle<()>,
}

impl RunHandle {
    pub fn procedure_id(&self) -> &str {
        &self.procedure_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Blocks until the run finishes.
    pub fn wait(self) -> Result<RunResult> {
        let result = self.rx.recv().map_err(|_| {
            CellDbError::execution(
                format!("{}/{}", self.procedure_id, self.run_id),
                "run thread exited without reporting a result",
            )
        });
        let _ = self.thread.join();
        result?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::procedure::RunState;
    use serde_json::json;

    fn setup_engine() -> Engine {
        let engine = Engine::new(Config::default()).unwrap();
        let ds = engine.create_dataset(DatasetConfig::sparse("test")).unwrap();
        ds.record_row("r1", [("x", CellValue::Integer(1), 10)]).unwrap();
        ds.record_row("r2", [("x", CellValue::Integer(2), 10)]).unwrap();
        ds.commit().unwrap();
        engine
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = Config {
            max_query_rows: 0,
            ..Config::default()
        };
        assert!(Engine::new(cfg).is_err());
    }

    #[test]
    fn commit_is_idempotent() {
        let engine = setup_engine();
        let ds = engine.dataset("test").unwrap();
        ds.commit().unwrap();
        ds.commit().unwrap();
        assert_eq!(ds.info().unwrap().row_count, 2);
        let err = ds
            .record_row("r3", [("x", CellValue::Integer(3), 10)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn open_datasets_cannot_be_queried() {
        let engine = setup_engine();
        engine.create_dataset(DatasetConfig::sparse("open")).unwrap();
        let err = engine.execute("open", &QueryRequest::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn sql_statement_runs() {
        let engine = setup_engine();
        let rows = engine
            .sql("SELECT x * 10 AS y FROM test WHERE x > 1")
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row_name, "r2");
        assert_eq!(rows[0].columns.get("y"), Some(&CellValue::Integer(20)));
    }

    #[test]
    fn spawned_run_reports_through_handle() {
        let engine = setup_engine();
        let procedure = engine
            .create_procedure(
                "copy",
                ProcedureConfig::new(
                    "transform",
                    json!({ "inputDataset": "test", "outputDataset": "copy_out" }),
                ),
            )
            .unwrap();
        let handle = procedure.spawn_run("bg", json!({})).unwrap();
        assert_eq!(handle.run_id(), "bg");
        let result = handle.wait().unwrap();
        assert_eq!(result.status, RunState::Succeeded);
        assert_eq!(procedure.run_info("bg").unwrap().state, RunState::Succeeded);
        assert_eq!(engine.dataset_info("copy_out").unwrap().row_count, 2);
    }
}
