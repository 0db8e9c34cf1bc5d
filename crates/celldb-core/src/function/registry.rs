use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::dataset::Catalog;
use crate::error::{CellDbError, Result};
use crate::function::expression::ExpressionFunction;
use crate::function::serial::SerialFunction;
use crate::function::tokensplit::TokenSplitFunction;
use crate::function::{
    Function, FunctionConfig, FunctionInfo, SERIAL, SQL_EXPRESSION, TOKENSPLIT,
};
use crate::sql::eval::FunctionResolver;
use crate::value::Row;

/// Nested invocations allowed on one thread before a call is refused.
pub const MAX_CALL_DEPTH: usize = 16;

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Holds one level of the current thread's call depth until dropped.
struct CallDepthGuard;

impl CallDepthGuard {
    fn enter(id: &str) -> Result<Self> {
        CALL_DEPTH.with(|depth| {
            let current = depth.get();
            if current >= MAX_CALL_DEPTH {
                return Err(CellDbError::eval(format!(
                    "function {id} exceeded the maximum call depth of {MAX_CALL_DEPTH}"
                )));
            }
            depth.set(current + 1);
            Ok(CallDepthGuard)
        })
    }
}

impl Drop for CallDepthGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Builds a function of one type from `(id, params, registry)`.
pub type FunctionFactory =
    Arc<dyn Fn(&str, &serde_json::Value, &FunctionRegistry) -> Result<Arc<dyn Function>> + Send + Sync>;

struct Registered {
    function: Arc<dyn Function>,
    config: FunctionConfig,
}

/// Function types and registered function instances.
pub struct FunctionRegistry {
    factories: RwLock<HashMap<String, FunctionFactory>>,
    functions: RwLock<BTreeMap<String, Registered>>,
    strict_args: bool,
    catalog: Option<Arc<Catalog>>,
}

impl FunctionRegistry {
    pub fn new(strict_args: bool) -> Self {
        let registry = Self {
            factories: RwLock::new(HashMap::new()),
            functions: RwLock::new(BTreeMap::new()),
            strict_args,
            catalog: None,
        };
        registry.register_type(SERIAL, Arc::new(SerialFunction::build));
        registry.register_type(SQL_EXPRESSION, Arc::new(ExpressionFunction::build));
        registry.register_type(TOKENSPLIT, Arc::new(TokenSplitFunction::build));
        registry
    }

    /// Lets factories read datasets while building a function.
    pub fn with_catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_deref()
    }

    /// Whether `sql.expression` bodies reject bundles missing a referenced column.
    pub fn strict_args(&self) -> bool {
        self.strict_args
    }

    /// Adds or replaces the factory for `type_tag`.
    pub fn register_type(&self, type_tag: &str, factory: FunctionFactory) {
        self.factories.write().insert(type_tag.to_string(), factory);
    }

    pub fn has_type(&self, type_tag: &str) -> bool {
        self.factories.read().contains_key(type_tag)
    }

    /// Constructs a function without registering it.
    pub fn build(&self, id: &str, config: &FunctionConfig) -> Result<Arc<dyn Function>> {
        let factory = self
            .factories
            .read()
            .get(&config.type_tag)
            .cloned()
            .ok_or_else(|| {
                CellDbError::config(id, format!("unknown function type {}", config.type_tag))
            })?;
        factory(id, &config.params, self)
    }

    pub fn register(&self, id: &str, config: FunctionConfig) -> Result<Arc<dyn Function>> {
        if id.is_empty() {
            return Err(CellDbError::config("function", "function id must not be empty"));
        }
        if self.contains(id) {
            return Err(CellDbError::config(id, "function already registered"));
        }
        let function = self.build(id, &config)?;
        let mut functions = self.functions.write();
        if functions.contains_key(id) {
            return Err(CellDbError::config(id, "function already registered"));
        }
        tracing::info!("registered function {id} of type {}", config.type_tag);
        functions.insert(
            id.to_string(),
            Registered {
                function: function.clone(),
                config,
            },
        );
        Ok(function)
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Function>> {
        self.functions
            .read()
            .get(id)
            .map(|r| r.function.clone())
            .ok_or_else(|| CellDbError::not_found("function", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.functions.read().contains_key(id)
    }

    /// Applies a registered function. Bodies that call back into the
    /// registry, directly or through each other, fail once nesting passes
    /// [`MAX_CALL_DEPTH`].
    pub fn invoke(&self, id: &str, args: &Row) -> Result<Row> {
        let function = self.get(id)?;
        let _depth = CallDepthGuard::enter(id)?;
        tracing::debug!("invoking function {id} with {} argument(s)", args.len());
        function.apply(args, self)
    }

    /// Removes a function. Serial functions that captured it keep their copy.
    pub fn delete(&self, id: &str) -> Result<()> {
        match self.functions.write().remove(id) {
            Some(_) => {
                tracing::info!("deleted function {id}");
                Ok(())
            }
            None => Err(CellDbError::not_found("function", id)),
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.functions.read().keys().cloned().collect()
    }

    pub fn info(&self, id: &str) -> Result<FunctionInfo> {
        self.functions
            .read()
            .get(id)
            .map(|r| FunctionInfo {
                id: id.to_string(),
                type_tag: r.config.type_tag.clone(),
                params: r.config.params.clone(),
            })
            .ok_or_else(|| CellDbError::not_found("function", id))
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new(false)
    }
}

impl FunctionResolver for FunctionRegistry {
    fn has_function(&self, name: &str) -> bool {
        self.contains(name)
    }

    fn call_function(&self, name: &str, args: &Row) -> Result<Row> {
        self.invoke(name, args)
    }
}
