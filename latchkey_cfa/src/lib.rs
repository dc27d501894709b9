pub(crate) mod cfa;
pub(crate) mod description;
pub(crate) mod edge;
pub(crate) mod error;
pub(crate) mod expr;
pub(crate) mod types;

pub use cfa::{Cfa, CfaBuilder, CfaNode, FunctionEntry};
pub use description::{CfaDescription, EdgeDescription, EdgeKindDescription, FunctionDescription};
pub use edge::{CfaEdge, EdgeKind};
pub use error::CfaError;
pub use expr::{BinaryOp, CallExpr, Expr, Statement};
pub use petgraph::graph::NodeIndex;
pub use types::{Type, Variable};
