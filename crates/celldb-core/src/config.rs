use std::path::PathBuf;

use crate::error::{CellDbError, Result};

#[derive(Clone, Debug)]
pub struct Config {
    /// Upper bound on the rows a single query may produce before offset/limit.
    pub max_query_rows: usize,
    /// Base directory for relative artifact URLs written by procedures.
    pub artifact_root: Option<PathBuf>,
    /// Finished runs kept per procedure; oldest are evicted first.
    pub run_history_limit: usize,
    /// Reject `sql.expression` calls whose argument bundle lacks a referenced column.
    pub strict_function_args: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_query_rows: usize::MAX,
            artifact_root: None,
            run_history_limit: 64,
            strict_function_args: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_query_rows == 0 {
            return Err(CellDbError::config(
                "engine",
                "max_query_rows must be > 0",
            ));
        }
        if self.run_history_limit == 0 {
            return Err(CellDbError::config(
                "engine",
                "run_history_limit must be > 0",
            ));
        }
        if let Some(root) = &self.artifact_root {
            if root.as_os_str().is_empty() {
                return Err(CellDbError::config(
                    "engine",
                    "artifact_root must not be empty when set",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_history() {
        let cfg = Config {
            run_history_limit: 0,
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err}").contains("run_history_limit"));
    }
}
