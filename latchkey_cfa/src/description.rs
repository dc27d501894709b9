use crate::cfa::{Cfa, CfaBuilder};
use crate::edge::EdgeKind;
use crate::error::CfaError;
use crate::expr::{CallExpr, Expr, Statement};
use crate::types::Variable;
use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// The serialized form of a [`Cfa`], as emitted by the front end.
///
/// Node numbers are local to each function. Calls are written as `call` edges and are expanded
/// into call/return edge pairs when the callee has a body in the same description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfaDescription {
    pub entry: String,
    pub functions: Vec<FunctionDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescription {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Variable>,
    pub nodes: usize,
    pub entry: usize,
    pub exit: usize,
    #[serde(default)]
    pub edges: Vec<EdgeDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDescription {
    pub from: usize,
    pub to: usize,
    #[serde(default)]
    pub line: u32,
    #[serde(flatten)]
    pub kind: EdgeKindDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EdgeKindDescription {
    Blank,
    Declaration {
        var: Variable,
        #[serde(default)]
        init: Option<Expr>,
    },
    Statement {
        statement: Statement,
    },
    Assume {
        condition: Expr,
        #[serde(default = "truth_default")]
        truth: bool,
    },
    Call {
        call: CallExpr,
        #[serde(default)]
        result: Option<Expr>,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
    },
    Opaque {
        raw: String,
    },
}

fn truth_default() -> bool {
    true
}

impl CfaDescription {
    pub fn build(self) -> Result<Cfa, CfaError> {
        let mut builder = CfaBuilder::new(self.entry);
        let mut layouts = Vec::with_capacity(self.functions.len());
        for f in &self.functions {
            if f.nodes == 0 {
                return Err(CfaError::EmptyFunction(f.name.clone()));
            }
            for local in [f.entry, f.exit] {
                if local >= f.nodes {
                    return Err(CfaError::UnknownNode {
                        function: f.name.clone(),
                        node: local,
                    });
                }
            }
            let entry = builder.add_function(f.name.clone(), f.params.clone())?;
            let nodes: Vec<NodeIndex> = (0..f.nodes)
                .map(|i| {
                    if i == f.entry {
                        entry.entry
                    } else if i == f.exit {
                        entry.exit
                    } else {
                        builder.add_node(&f.name)
                    }
                })
                .collect();
            layouts.push(nodes);
        }
        for (f, nodes) in self.functions.into_iter().zip(layouts) {
            let lookup = |local: usize| {
                nodes.get(local).copied().ok_or_else(|| CfaError::UnknownNode {
                    function: f.name.clone(),
                    node: local,
                })
            };
            for edge in &f.edges {
                let source = lookup(edge.from)?;
                let target = lookup(edge.to)?;
                let kind = match edge.kind.clone() {
                    EdgeKindDescription::Call { call, result } => {
                        builder.add_call(source, target, edge.line, call, result)?;
                        continue;
                    }
                    EdgeKindDescription::Blank => EdgeKind::Blank,
                    EdgeKindDescription::Declaration { var, init } => {
                        EdgeKind::Declaration { var, init }
                    }
                    EdgeKindDescription::Statement { statement } => EdgeKind::Statement(statement),
                    EdgeKindDescription::Assume { condition, truth } => {
                        EdgeKind::Assume { condition, truth }
                    }
                    EdgeKindDescription::Return { value } => EdgeKind::Return { value },
                    EdgeKindDescription::Opaque { raw } => EdgeKind::Opaque { raw },
                };
                builder.add_edge(source, target, edge.line, kind)?;
            }
        }
        builder.build()
    }
}

impl Cfa {
    pub fn from_json(text: &str) -> Result<Cfa, CfaError> {
        let description: CfaDescription = serde_json::from_str(text)?;
        description.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = r#"{
        "entry": "main",
        "functions": [
            {
                "name": "main",
                "nodes": 3,
                "entry": 0,
                "exit": 2,
                "edges": [
                    {"from": 0, "to": 1, "line": 3, "kind": "declaration",
                     "var": {"name": "x", "ty": {"scalar": "int"}}},
                    {"from": 1, "to": 2, "line": 4, "kind": "call",
                     "call": {"function": "helper", "args": [{"const": 1}]}}
                ]
            },
            {
                "name": "helper",
                "params": [{"name": "a", "ty": {"scalar": "int"}}],
                "nodes": 2,
                "entry": 0,
                "exit": 1,
                "edges": [
                    {"from": 0, "to": 1, "kind": "statement",
                     "statement": {"assign": {
                        "lhs": {"var": {"name": "g", "ty": {"scalar": "int"}, "global": true}},
                        "rhs": {"var": {"name": "a", "ty": {"scalar": "int"}}}}}}
                ]
            }
        ]
    }"#;

    #[test]
    fn loads_functions_and_expands_calls() {
        let cfa = Cfa::from_json(PROGRAM).unwrap();
        assert_eq!(cfa.node_count(), 5);
        // declaration, call, return, and the helper's assignment
        assert_eq!(cfa.edge_count(), 4);
        let helper = cfa.function("helper").unwrap();
        assert_eq!(helper.params.len(), 1);
        assert_eq!(cfa.entry_node(), cfa.function("main").unwrap().entry);
    }

    #[test]
    fn unknown_nodes_are_reported() {
        let text = r#"{"entry": "main", "functions": [
            {"name": "main", "nodes": 2, "entry": 0, "exit": 1,
             "edges": [{"from": 0, "to": 7, "kind": "blank"}]}]}"#;
        assert!(matches!(
            Cfa::from_json(text),
            Err(CfaError::UnknownNode { node: 7, .. })
        ));
    }
}
