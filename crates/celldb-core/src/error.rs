use thiserror::Error;

/// Broad failure category reported alongside every error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    State,
    Evaluation,
    NotFound,
    Execution,
    Io,
}

#[derive(Debug, Error)]
pub enum CellDbError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("configuration error for {id}: {message}")]
    Configuration { id: String, message: String },
    #[error("invalid state for {id}: {message}")]
    State { id: String, message: String },
    #[error("write conflict: {id} is already open for writing")]
    Conflict { id: String },
    #[error("sql parse error: {0}")]
    SqlParse(String),
    #[error("evaluation error: {0}")]
    Evaluation(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("execution of {id} failed: {message}")]
    Execution { id: String, message: String },
    #[error("function {function} failed at step {step}: {source}")]
    StepFailed {
        function: String,
        step: String,
        #[source]
        source: Box<CellDbError>,
    },
}

impl CellDbError {
    pub fn config(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn state(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::State {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn execution(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self::Evaluation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::SerdeJson(_) | Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Csv(_) | Self::Execution { .. } => ErrorKind::Execution,
            Self::State { .. } | Self::Conflict { .. } => ErrorKind::State,
            Self::SqlParse(_) | Self::Evaluation(_) => ErrorKind::Evaluation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::StepFailed { source, .. } => source.kind(),
        }
    }

    /// Identifier of the dataset, procedure, function or row the error is about.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Configuration { id, .. }
            | Self::State { id, .. }
            | Self::Conflict { id }
            | Self::NotFound { id, .. }
            | Self::Execution { id, .. } => Some(id),
            Self::StepFailed { function, .. } => Some(function),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CellDbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_failure_reports_inner_kind() {
        let err = CellDbError::StepFailed {
            function: "pipeline".to_string(),
            step: "score".to_string(),
            source: Box::new(CellDbError::execution("score", "model missing")),
        };
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.id(), Some("pipeline"));
        let msg = format!("{err}");
        assert!(msg.contains("step score"));
        assert!(msg.contains("model missing"));
    }

    #[test]
    fn conflict_is_a_state_error() {
        let err = CellDbError::Conflict {
            id: "out".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(err.id(), Some("out"));
    }
}
