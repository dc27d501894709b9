use crate::edge::{CfaEdge, EdgeKind};
use crate::error::CfaError;
use crate::expr::{CallExpr, Expr, Statement};
use crate::types::Variable;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CfaNode {
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionEntry {
    pub name: String,
    pub entry: NodeIndex,
    pub exit: NodeIndex,
    pub params: Vec<Variable>,
}

/// A control-flow automaton for a whole program.
///
/// Nodes are program locations and edges are labeled with the operation performed when moving
/// between them. Calls into functions with a body are represented by a [`EdgeKind::FunctionCall`]
/// edge into the callee and a [`EdgeKind::FunctionReturn`] edge back out of it. The matching
/// [`EdgeKind::CallToReturn`] summary edge is stored on the side and is not returned by
/// [`Cfa::leaving_edges`], so that exploration always walks through the callee.
#[derive(Debug, Clone)]
pub struct Cfa {
    graph: DiGraph<CfaNode, CfaEdge>,
    functions: BTreeMap<String, FunctionEntry>,
    summaries: HashMap<NodeIndex, CfaEdge>,
    entry_function: String,
}

impl Cfa {
    pub fn entry_function(&self) -> &FunctionEntry {
        // The builder refuses to produce a CFA whose entry function does not exist.
        &self.functions[&self.entry_function]
    }

    pub fn entry_node(&self) -> NodeIndex {
        self.entry_function().entry
    }

    pub fn function(&self, name: &str) -> Option<&FunctionEntry> {
        self.functions.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionEntry> {
        self.functions.values()
    }

    pub fn node(&self, idx: NodeIndex) -> Option<&CfaNode> {
        self.graph.node_weight(idx)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// The edges leaving `node`, excluding call summary edges.
    pub fn leaving_edges(&self, node: NodeIndex) -> impl Iterator<Item = &CfaEdge> {
        self.graph.edges(node).map(|e| e.weight())
    }

    /// The call summary edge leaving `node`, if `node` precedes a call into a function body.
    pub fn summary_edge(&self, node: NodeIndex) -> Option<&CfaEdge> {
        self.summaries.get(&node)
    }

    pub fn graph(&self) -> &DiGraph<CfaNode, CfaEdge> {
        &self.graph
    }
}

#[derive(Debug)]
struct PendingCall {
    source: NodeIndex,
    target: NodeIndex,
    function: String,
    line: u32,
    call: CallExpr,
    result: Option<Expr>,
}

/// Incrementally constructs a [`Cfa`].
///
/// Calls are recorded with [`CfaBuilder::add_call`] and resolved in [`CfaBuilder::build`], once
/// every function body is known.
#[derive(Debug)]
pub struct CfaBuilder {
    graph: DiGraph<CfaNode, CfaEdge>,
    functions: BTreeMap<String, FunctionEntry>,
    calls: Vec<PendingCall>,
    entry_function: String,
}

impl CfaBuilder {
    pub fn new<S: Into<String>>(entry_function: S) -> Self {
        Self {
            graph: DiGraph::new(),
            functions: BTreeMap::new(),
            calls: Vec::new(),
            entry_function: entry_function.into(),
        }
    }

    /// Declares a function with a body, creating its entry and exit nodes.
    pub fn add_function<S: Into<String>>(
        &mut self,
        name: S,
        params: Vec<Variable>,
    ) -> Result<FunctionEntry, CfaError> {
        let name = name.into();
        if self.functions.contains_key(&name) {
            return Err(CfaError::DuplicateFunction(name));
        }
        let entry = self.graph.add_node(CfaNode {
            function: name.clone(),
        });
        let exit = self.graph.add_node(CfaNode {
            function: name.clone(),
        });
        let f = FunctionEntry {
            name: name.clone(),
            entry,
            exit,
            params,
        };
        self.functions.insert(name, f.clone());
        Ok(f)
    }

    pub fn add_node(&mut self, function: &str) -> NodeIndex {
        self.graph.add_node(CfaNode {
            function: function.to_string(),
        })
    }

    fn function_of(&self, node: NodeIndex) -> Result<String, CfaError> {
        self.graph
            .node_weight(node)
            .map(|n| n.function.clone())
            .ok_or_else(|| CfaError::UnknownNode {
                function: String::new(),
                node: node.index(),
            })
    }

    pub fn add_edge(
        &mut self,
        source: NodeIndex,
        target: NodeIndex,
        line: u32,
        kind: EdgeKind,
    ) -> Result<(), CfaError> {
        let function = self.function_of(source)?;
        self.function_of(target)?;
        self.graph.add_edge(
            source,
            target,
            CfaEdge {
                source,
                target,
                function,
                line,
                kind,
            },
        );
        Ok(())
    }

    /// Records a call from `source` that resumes at `target`.
    pub fn add_call(
        &mut self,
        source: NodeIndex,
        target: NodeIndex,
        line: u32,
        call: CallExpr,
        result: Option<Expr>,
    ) -> Result<(), CfaError> {
        let function = self.function_of(source)?;
        self.function_of(target)?;
        self.calls.push(PendingCall {
            source,
            target,
            function,
            line,
            call,
            result,
        });
        Ok(())
    }

    pub fn build(mut self) -> Result<Cfa, CfaError> {
        if !self.functions.contains_key(&self.entry_function) {
            return Err(CfaError::MissingEntry(self.entry_function));
        }
        let mut summaries = HashMap::new();
        for pending in std::mem::take(&mut self.calls) {
            let PendingCall {
                source,
                target,
                function,
                line,
                call,
                result,
            } = pending;
            match self.functions.get(&call.function) {
                Some(callee) => {
                    let (entry, exit, params) = (callee.entry, callee.exit, callee.params.clone());
                    let callee_name = callee.name.clone();
                    self.graph.add_edge(
                        source,
                        entry,
                        CfaEdge {
                            source,
                            target: entry,
                            function: function.clone(),
                            line,
                            kind: EdgeKind::FunctionCall {
                                call: call.clone(),
                                params,
                                result: result.clone(),
                            },
                        },
                    );
                    self.graph.add_edge(
                        exit,
                        target,
                        CfaEdge {
                            source: exit,
                            target,
                            function: callee_name,
                            line,
                            kind: EdgeKind::FunctionReturn {
                                call: call.clone(),
                                caller: function.clone(),
                                call_site: source,
                                result: result.clone(),
                            },
                        },
                    );
                    summaries.insert(
                        source,
                        CfaEdge {
                            source,
                            target,
                            function,
                            line,
                            kind: EdgeKind::CallToReturn { call, result },
                        },
                    );
                }
                None => {
                    let statement = match result {
                        Some(lhs) => Statement::CallAssign { lhs, call },
                        None => Statement::Call(call),
                    };
                    self.graph.add_edge(
                        source,
                        target,
                        CfaEdge {
                            source,
                            target,
                            function,
                            line,
                            kind: EdgeKind::Statement(statement),
                        },
                    );
                }
            }
        }
        tracing::debug!(
            functions = self.functions.len(),
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            "built CFA"
        );
        Ok(Cfa {
            graph: self.graph,
            functions: self.functions,
            summaries,
            entry_function: self.entry_function,
        })
    }
}
