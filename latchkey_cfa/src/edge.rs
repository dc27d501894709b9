use crate::expr::{CallExpr, Expr, Statement};
use crate::types::Variable;
use petgraph::graph::NodeIndex;
use std::fmt::{Display, Formatter};

/// The label of a CFA transition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Blank,
    Declaration {
        var: Variable,
        init: Option<Expr>,
    },
    Statement(Statement),
    Assume {
        condition: Expr,
        truth: bool,
    },
    /// Enters the body of `call.function`; `params` are the callee's formals
    FunctionCall {
        call: CallExpr,
        params: Vec<Variable>,
        result: Option<Expr>,
    },
    /// Leaves the callee body and lands after the call `caller` made at `call_site`
    FunctionReturn {
        call: CallExpr,
        caller: String,
        call_site: NodeIndex,
        result: Option<Expr>,
    },
    /// The summary edge running alongside a call into a function body
    CallToReturn {
        call: CallExpr,
        result: Option<Expr>,
    },
    Return {
        value: Option<Expr>,
    },
    /// A front-end construct with no structured representation
    Opaque {
        raw: String,
    },
}

impl EdgeKind {
    /// A short name for the kind of edge, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            EdgeKind::Blank => "blank",
            EdgeKind::Declaration { .. } => "declaration",
            EdgeKind::Statement(_) => "statement",
            EdgeKind::Assume { .. } => "assume",
            EdgeKind::FunctionCall { .. } => "function call",
            EdgeKind::FunctionReturn { .. } => "function return",
            EdgeKind::CallToReturn { .. } => "call to return",
            EdgeKind::Return { .. } => "return",
            EdgeKind::Opaque { .. } => "opaque",
        }
    }
}

impl Display for EdgeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Blank => write!(f, ""),
            EdgeKind::Declaration { var, init } => match init {
                Some(init) => write!(f, "{} {} = {init};", var.ty, var.name),
                None => write!(f, "{} {};", var.ty, var.name),
            },
            EdgeKind::Statement(s) => write!(f, "{s}"),
            EdgeKind::Assume { condition, truth } => {
                if *truth {
                    write!(f, "[{condition}]")
                } else {
                    write!(f, "[!({condition})]")
                }
            }
            EdgeKind::FunctionCall { call, .. } | EdgeKind::CallToReturn { call, .. } => {
                write!(f, "{call}")
            }
            EdgeKind::FunctionReturn { call, .. } => write!(f, "return from {}", call.function),
            EdgeKind::Return { value } => match value {
                Some(v) => write!(f, "return {v};"),
                None => write!(f, "return;"),
            },
            EdgeKind::Opaque { raw } => write!(f, "{raw}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CfaEdge {
    pub source: NodeIndex,
    pub target: NodeIndex,
    /// The function containing `source`
    pub function: String,
    pub line: u32,
    pub kind: EdgeKind,
}

impl CfaEdge {
    /// The name of the function called by this edge, whether it enters a body or not.
    pub fn called_function(&self) -> Option<&str> {
        match &self.kind {
            EdgeKind::Statement(s) => s.call().map(|c| c.function.as_str()),
            EdgeKind::FunctionCall { call, .. }
            | EdgeKind::FunctionReturn { call, .. }
            | EdgeKind::CallToReturn { call, .. } => Some(call.function.as_str()),
            _ => None,
        }
    }
}

impl Display for CfaEdge {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "N{} -{{{}}}-> N{} (line {})",
            self.source.index(),
            self.kind,
            self.target.index(),
            self.line
        )
    }
}
