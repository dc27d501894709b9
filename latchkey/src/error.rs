use crate::analysis::identifier::Identifier;
use crate::analysis::waitlist::WaitlistError;
use crate::config::ConfigError;
use latchkey_cfa::CfaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LatchkeyError {
    /// The program description could not be turned into a CFA
    #[error("error loading the control-flow automaton")]
    Cfa(#[from] CfaError),
    /// A configuration value was rejected at startup
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
    /// A domain was handed an edge it has no semantics for. This is a front-end/domain mismatch
    /// and ends the analysis run.
    #[error("{domain} cannot handle {kind} edge `{edge}`")]
    UnrecognizedEdge {
        domain: &'static str,
        kind: &'static str,
        edge: String,
    },
    /// The exploration loop asked the waitlist for a state it could not provide
    #[error("waitlist invariant violated")]
    Waitlist(#[from] WaitlistError),
    /// An identifier was promoted to refined while it was not an unrefined unsafe
    #[error("`{0}` is not an unrefined unsafe")]
    NotUnsafe(Identifier),
    /// The unsafe detector could not produce a witness for an identifier it reported unsafe
    #[error("no unsafe pair for `{0}`")]
    MissingUnsafePair(Identifier),
    #[error("failed to serialize analysis output")]
    Json(#[from] serde_json::Error),
}

impl LatchkeyError {
    pub(crate) fn unrecognized(domain: &'static str, edge: &latchkey_cfa::CfaEdge) -> Self {
        LatchkeyError::UnrecognizedEdge {
            domain,
            kind: edge.kind.name(),
            edge: edge.to_string(),
        }
    }
}
