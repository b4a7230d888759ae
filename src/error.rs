//! Library error type

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("node '{0}' not found in workflow")]
    UnknownNode(String),
    #[error("node '{0}' already exists in workflow")]
    DuplicateNode(String),
    #[error("workflow '{0}' contains a cycle")]
    Cycle(String),
    #[error("node '{node}' has no input '{field}'")]
    MissingInput { node: String, field: String },
    #[error("input '{field}' of node '{node}' is already connected")]
    InputConnected { node: String, field: String },
    #[error("node '{node}' did not produce output '{field}'")]
    MissingOutput { node: String, field: String },
    #[error("input '{field}' of node '{node}' has the wrong type: {expected} expected")]
    InputType {
        node: String,
        field: String,
        expected: &'static str,
    },
    #[error("subject '{0}' not found in input bundle")]
    MissingSubject(String),
    #[error("{program} exited with code {code}: {stderr}")]
    ToolFailed {
        program: String,
        code: i32,
        stderr: String,
    },
    #[error("could not parse output of {program}: {detail}")]
    ToolOutput { program: String, detail: String },
    #[error("{path}: {detail}")]
    Table { path: String, detail: String },
    #[error("contrast '{name}': {detail}")]
    Contrast { name: String, detail: String },
    #[error("no files matching '{pattern}' under {base}")]
    NoMatch { pattern: String, base: String },
    #[error("{0} is not supported")]
    Unsupported(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_failed_format() {
        let err = FlowError::ToolFailed {
            program: "flameo".into(),
            code: 1,
            stderr: "bad mask".into(),
        };
        assert_eq!(err.to_string(), "flameo exited with code 1: bad mask");
    }

    #[test]
    fn test_io_from() {
        let err: FlowError = std::io::Error::other("disk full").into();
        assert_eq!(err.to_string(), "I/O error: disk full");
    }

    #[test]
    fn test_unsupported_format() {
        let err = FlowError::Unsupported("FDR correction".into());
        assert_eq!(err.to_string(), "FDR correction is not supported");
    }
}
