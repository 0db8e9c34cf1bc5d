use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::error::{CellDbError, Result};
use crate::procedure::export_csv::ExportCsvProcedure;
use crate::procedure::run::{RunInfo, RunResult, RunState};
use crate::procedure::transform::TransformProcedure;
use crate::procedure::{
    merge_params, Procedure, ProcedureConfig, RunContext, RunEnv, EXPORT_CSV, TRANSFORM,
};
use crate::util::time::unix_millis;

/// Builds a procedure of one type from `(id, params)`, validating the params.
pub type ProcedureFactory =
    Arc<dyn Fn(&str, &serde_json::Value) -> Result<Arc<dyn Procedure>> + Send + Sync>;

struct Registered {
    config: ProcedureConfig,
    procedure: Arc<dyn Procedure>,
}

/// A run that has been recorded as `created` but not executed yet.
pub struct PendingRun {
    pub procedure_id: String,
    pub run_id: String,
    procedure: Arc<dyn Procedure>,
}

/// Procedure types, configured procedures and their run history.
pub struct ProcedureRegistry {
    factories: RwLock<HashMap<String, ProcedureFactory>>,
    procedures: RwLock<BTreeMap<String, Registered>>,
    runs: Mutex<HashMap<String, Vec<RunInfo>>>,
    run_seq: AtomicU64,
    history_limit: usize,
}

impl ProcedureRegistry {
    pub fn new(history_limit: usize) -> Self {
        let registry = Self {
            factories: RwLock::new(HashMap::new()),
            procedures: RwLock::new(BTreeMap::new()),
            runs: Mutex::new(HashMap::new()),
            run_seq: AtomicU64::new(1),
            history_limit: history_limit.max(1),
        };
        registry.register_type(TRANSFORM, Arc::new(TransformProcedure::build));
        registry.register_type(EXPORT_CSV, Arc::new(ExportCsvProcedure::build));
        registry
    }

    pub fn register_type(&self, type_tag: &str, factory: ProcedureFactory) {
        self.factories.write().insert(type_tag.to_string(), factory);
    }

    pub fn has_type(&self, type_tag: &str) -> bool {
        self.factories.read().contains_key(type_tag)
    }

    fn build(&self, id: &str, config: &ProcedureConfig) -> Result<Arc<dyn Procedure>> {
        let factory = self
            .factories
            .read()
            .get(&config.type_tag)
            .cloned()
            .ok_or_else(|| {
                CellDbError::config(id, format!("unknown procedure type {}", config.type_tag))
            })?;
        factory(id, &config.params)
    }

    /// Validates and stores a procedure, replacing any previous one of that id.
    pub fn create(&self, id: &str, config: ProcedureConfig) -> Result<Arc<dyn Procedure>> {
        if id.is_empty() {
            return Err(CellDbError::config("procedure", "procedure id must not be empty"));
        }
        let procedure = self.build(id, &config)?;
        let replaced = self
            .procedures
            .write()
            .insert(
                id.to_string(),
                Registered {
                    config: config.clone(),
                    procedure: procedure.clone(),
                },
            )
            .is_some();
        if replaced {
            tracing::info!("replaced procedure {id} with type {}", config.type_tag);
        } else {
            tracing::info!("created procedure {id} of type {}", config.type_tag);
        }
        Ok(procedure)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.procedures.read().contains_key(id)
    }

    pub fn config(&self, id: &str) -> Result<ProcedureConfig> {
        self.procedures
            .read()
            .get(id)
            .map(|r| r.config.clone())
            .ok_or_else(|| CellDbError::not_found("procedure", id))
    }

    pub fn list(&self) -> Vec<String> {
        self.procedures.read().keys().cloned().collect()
    }

    /// Removes a procedure and its finished run history.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut runs = self.runs.lock();
        if runs
            .get(id)
            .is_some_and(|history| history.iter().any(|r| !r.state.is_finished()))
        {
            return Err(CellDbError::state(id, "procedure has a run in progress"));
        }
        if self.procedures.write().remove(id).is_none() {
            return Err(CellDbError::not_found("procedure", id));
        }
        runs.remove(id);
        tracing::info!("deleted procedure {id}");
        Ok(())
    }

    /// Records a new run as `created`.
    ///
    /// Per-run `overrides` are shallow-merged over the stored params and
    /// revalidated here, so a bad override fails before anything runs.
    /// An empty `run_id` gets a generated one.
    pub fn prepare(
        &self,
        procedure_id: &str,
        run_id: &str,
        overrides: &serde_json::Value,
    ) -> Result<PendingRun> {
        let (config, stored) = {
            let procedures = self.procedures.read();
            let registered = procedures
                .get(procedure_id)
                .ok_or_else(|| CellDbError::not_found("procedure", procedure_id))?;
            (registered.config.clone(), registered.procedure.clone())
        };
        let procedure = if is_empty_params(overrides) {
            stored
        } else {
            let merged = ProcedureConfig::new(
                config.type_tag.clone(),
                merge_params(&config.params, overrides),
            );
            self.build(procedure_id, &merged)?
        };

        let run_id = if run_id.is_empty() {
            self.run_seq.fetch_add(1, Ordering::Relaxed).to_string()
        } else {
            run_id.to_string()
        };

        let mut runs = self.runs.lock();
        let history = runs.entry(procedure_id.to_string()).or_default();
        if let Some(pos) = history.iter().position(|r| r.run_id == run_id) {
            if !history[pos].state.is_finished() {
                return Err(CellDbError::Conflict {
                    id: format!("{procedure_id}/{run_id}"),
                });
            }
            history.remove(pos);
        }
        history.push(RunInfo {
            procedure_id: procedure_id.to_string(),
            run_id: run_id.clone(),
            state: RunState::Created,
            started_ms: unix_millis(),
            finished_ms: None,
            outputs: None,
            error: None,
        });
        Ok(PendingRun {
            procedure_id: procedure_id.to_string(),
            run_id,
            procedure,
        })
    }

    /// Executes a prepared run to completion and records the outcome.
    pub fn execute(&self, pending: PendingRun, env: RunEnv<'_>) -> Result<RunResult> {
        let PendingRun {
            procedure_id,
            run_id,
            procedure,
        } = pending;
        self.update(&procedure_id, &run_id, |info| {
            info.state = RunState::Running;
            info.started_ms = unix_millis();
        });
        tracing::info!("run {procedure_id}/{run_id} started");
        let start = Instant::now();

        let ctx = RunContext {
            procedure_id: &procedure_id,
            run_id: &run_id,
            catalog: env.catalog,
            functions: env.functions,
            config: env.config,
        };
        // a panicking procedure still leaves a finished run behind
        let result =
            catch_unwind(AssertUnwindSafe(|| procedure.run(&ctx))).unwrap_or_else(|panic| {
                Err(CellDbError::execution(
                    format!("{procedure_id}/{run_id}"),
                    format!("procedure panicked: {}", panic_message(panic.as_ref())),
                ))
            });
        let elapsed = start.elapsed();

        match result {
            Ok(outputs) => {
                tracing::info!(
                    "run {procedure_id}/{run_id} succeeded in {:.3}s",
                    elapsed.as_secs_f64()
                );
                self.finish(&procedure_id, &run_id, RunState::Succeeded, Some(outputs.clone()), None);
                Ok(RunResult {
                    id: run_id,
                    status: RunState::Succeeded,
                    outputs,
                })
            }
            Err(e) => {
                tracing::warn!(
                    "run {procedure_id}/{run_id} failed after {:.3}s: {e}",
                    elapsed.as_secs_f64()
                );
                self.finish(&procedure_id, &run_id, RunState::Failed, None, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Marks a prepared run failed without executing it.
    pub fn abandon(&self, procedure_id: &str, run_id: &str, reason: &str) {
        tracing::warn!("run {procedure_id}/{run_id} abandoned: {reason}");
        self.finish(procedure_id, run_id, RunState::Failed, None, Some(reason.to_string()));
    }

    pub fn run_info(&self, procedure_id: &str, run_id: &str) -> Result<RunInfo> {
        self.runs
            .lock()
            .get(procedure_id)
            .and_then(|history| history.iter().find(|r| r.run_id == run_id).cloned())
            .ok_or_else(|| CellDbError::not_found("run", format!("{procedure_id}/{run_id}")))
    }

    /// Runs of a procedure in start order.
    pub fn list_runs(&self, procedure_id: &str) -> Result<Vec<RunInfo>> {
        if !self.contains(procedure_id) {
            return Err(CellDbError::not_found("procedure", procedure_id));
        }
        Ok(self
            .runs
            .lock()
            .get(procedure_id)
            .cloned()
            .unwrap_or_default())
    }

    fn update(&self, procedure_id: &str, run_id: &str, f: impl FnOnce(&mut RunInfo)) {
        let mut runs = self.runs.lock();
        if let Some(info) = runs
            .get_mut(procedure_id)
            .and_then(|history| history.iter_mut().find(|r| r.run_id == run_id))
        {
            f(info);
        }
    }

    fn finish(
        &self,
        procedure_id: &str,
        run_id: &str,
        state: RunState,
        outputs: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        self.update(procedure_id, run_id, |info| {
            info.state = state;
            info.finished_ms = Some(unix_millis());
            info.outputs = outputs;
            info.error = error;
        });
        let mut runs = self.runs.lock();
        if let Some(history) = runs.get_mut(procedure_id) {
            let mut finished = history.iter().filter(|r| r.state.is_finished()).count();
            while finished > self.history_limit {
                match history.iter().position(|r| r.state.is_finished()) {
                    Some(pos) => {
                        let evicted = history.remove(pos);
                        tracing::debug!("evicted run {procedure_id}/{}", evicted.run_id);
                        finished -= 1;
                    }
                    None => break,
                }
            }
        }
    }
}

fn is_empty_params(params: &serde_json::Value) -> bool {
    match params {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown cause"
    }
}
