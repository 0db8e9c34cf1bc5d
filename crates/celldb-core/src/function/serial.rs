use std::sync::Arc;

use serde::Deserialize;

use crate::error::{CellDbError, Result};
use crate::function::{Function, FunctionConfig, FunctionRegistry, SERIAL};
use crate::sql::eval::FunctionResolver;
use crate::value::Row;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SerialParams {
    steps: Vec<StepConfig>,
}

/// `{id}` names a registered function; `{id, type, params}` defines one inline.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepConfig {
    id: String,
    #[serde(rename = "type", default)]
    type_tag: Option<String>,
    #[serde(default)]
    params: Option<serde_json::Value>,
}

#[derive(Debug)]
struct Step {
    id: String,
    function: Arc<dyn Function>,
}

/// Runs its steps in order. Each step sees the original arguments plus the
/// outputs of earlier steps as `step.column`; the result holds every step's
/// output under the same names.
#[derive(Debug)]
pub struct SerialFunction {
    id: String,
    steps: Vec<Step>,
}

impl SerialFunction {
    pub(crate) fn build(
        id: &str,
        params: &serde_json::Value,
        registry: &FunctionRegistry,
    ) -> Result<Arc<dyn Function>> {
        let params: SerialParams = serde_json::from_value(params.clone())
            .map_err(|e| CellDbError::config(id, e.to_string()))?;
        if params.steps.is_empty() {
            return Err(CellDbError::config(id, "serial function needs at least one step"));
        }

        let mut steps: Vec<Step> = Vec::with_capacity(params.steps.len());
        for step in params.steps {
            if steps.iter().any(|s| s.id == step.id) {
                return Err(CellDbError::config(
                    id,
                    format!("duplicate step id {}", step.id),
                ));
            }
            let function = match step.type_tag {
                Some(type_tag) => {
                    let config = FunctionConfig::new(
                        type_tag,
                        step.params.unwrap_or(serde_json::Value::Null),
                    );
                    registry.build(&step.id, &config)?
                }
                None if step.params.is_some() => {
                    return Err(CellDbError::config(
                        id,
                        format!("step {} has params but no type", step.id),
                    ))
                }
                None => registry.get(&step.id)?,
            };
            steps.push(Step {
                id: step.id,
                function,
            });
        }
        Ok(Arc::new(Self {
            id: id.to_string(),
            steps,
        }))
    }

    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }
}

impl Function for SerialFunction {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_tag(&self) -> &str {
        SERIAL
    }

    fn apply(&self, args: &Row, resolver: &dyn FunctionResolver) -> Result<Row> {
        let mut bundle = args.clone();
        let mut output = Row::new();
        for step in &self.steps {
            let produced =
                step.function
                    .apply(&bundle, resolver)
                    .map_err(|e| CellDbError::StepFailed {
                        function: self.id.clone(),
                        step: step.id.clone(),
                        source: Box::new(e),
                    })?;
            for col in produced {
                let name = format!("{}.{}", step.id, col.name);
                bundle.set(name.clone(), col.value.clone(), col.ts);
                output.set(name, col.value, col.ts);
            }
        }
        Ok(output)
    }
}
