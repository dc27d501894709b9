use thiserror::Error;

/// An error encountered while building or loading a control-flow automaton
#[derive(Debug, Error)]
pub enum CfaError {
    /// An edge or function entry referenced a node index that the function does not declare
    #[error("function `{function}` has no node {node}")]
    UnknownNode { function: String, node: usize },
    /// Two functions in one description share a name
    #[error("function `{0}` is defined more than once")]
    DuplicateFunction(String),
    /// The description names an entry function that it never defines
    #[error("entry function `{0}` is not defined")]
    MissingEntry(String),
    /// A function was declared with zero nodes
    #[error("function `{0}` has no nodes")]
    EmptyFunction(String),
    /// The JSON text could not be decoded into a description
    #[error("malformed CFA description")]
    Json(#[from] serde_json::Error),
}
