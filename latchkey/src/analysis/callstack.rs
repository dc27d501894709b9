use crate::analysis::cpa::lattice::JoinSemiLattice;
use crate::analysis::cpa::state::{AbstractState, CallstackProvider, MergeOutcome, StateDisplay, Successor};
use crate::error::LatchkeyError;
use latchkey_cfa::{CfaEdge, EdgeKind, NodeIndex};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::Formatter;
use std::iter::once;
use std::sync::Arc;

#[derive(Debug, PartialEq, Eq, Hash)]
struct Frame {
    function: String,
    /// The node the call was made from; `None` for the entry function
    call_node: Option<NodeIndex>,
    depth: usize,
    previous: Option<CallstackState>,
}

/// The chain of active function calls.
///
/// Frames are shared between all states whose stacks have a common prefix, so pushing a frame
/// is O(1) and popping one is a pointer copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallstackState(Arc<Frame>);

impl CallstackState {
    /// A stack holding only the entry function.
    pub fn new<S: Into<String>>(function: S) -> Self {
        Self(Arc::new(Frame {
            function: function.into(),
            call_node: None,
            depth: 1,
            previous: None,
        }))
    }

    pub fn push(&self, function: &str, call_node: NodeIndex) -> Self {
        Self(Arc::new(Frame {
            function: function.to_string(),
            call_node: Some(call_node),
            depth: self.0.depth + 1,
            previous: Some(self.clone()),
        }))
    }

    pub fn current_function(&self) -> &str {
        &self.0.function
    }

    pub fn call_node(&self) -> Option<NodeIndex> {
        self.0.call_node
    }

    pub fn depth(&self) -> usize {
        self.0.depth
    }

    /// The caller's stack.
    pub fn previous(&self) -> Option<&CallstackState> {
        self.0.previous.as_ref()
    }

    pub fn frames(&self) -> impl Iterator<Item = &CallstackState> {
        std::iter::successors(Some(self), |s| s.previous())
    }

    pub fn contains_function(&self, function: &str) -> bool {
        self.frames().any(|f| f.current_function() == function)
    }
}

impl PartialOrd for CallstackState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (self == other).then_some(Ordering::Equal)
    }
}

impl JoinSemiLattice for CallstackState {
    fn join(&mut self, _other: &Self) {}
}

impl StateDisplay for CallstackState {
    fn fmt_state(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.frames().map(|s| s.current_function()).collect();
        write!(f, "[{}]", names.join(" <- "))
    }
}

impl CallstackProvider for CallstackState {
    fn callstack(&self) -> Option<&CallstackState> {
        Some(self)
    }
}

impl AbstractState for CallstackState {
    fn merge(&mut self, other: &Self) -> MergeOutcome {
        self.merge_sep(other)
    }

    fn stop<'a, T: Iterator<Item = &'a Self>>(&'a self, states: T) -> bool {
        self.stop_sep(states)
    }

    fn transfer<'a, B: Borrow<CfaEdge>>(
        &'a self,
        edge: B,
    ) -> Result<Successor<'a, Self>, LatchkeyError> {
        let edge = edge.borrow();
        Ok(match &edge.kind {
            EdgeKind::FunctionCall { call, .. } => {
                if self.contains_function(&call.function) {
                    tracing::warn!(function = %call.function, "skipping recursive call");
                    Successor::empty()
                } else {
                    once(self.push(&call.function, edge.source)).into()
                }
            }
            EdgeKind::FunctionReturn {
                call, call_site, ..
            } => {
                let returns_here = self.current_function() == call.function
                    && self.call_node() == Some(*call_site);
                match self.previous() {
                    Some(caller) if returns_here => once(caller.clone()).into(),
                    _ => Successor::empty(),
                }
            }
            _ => once(self.clone()).into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_cfa::CallExpr;

    fn call_edge(function: &str, source: usize, target: usize) -> CfaEdge {
        CfaEdge {
            source: NodeIndex::new(source),
            target: NodeIndex::new(target),
            function: "main".into(),
            line: 1,
            kind: EdgeKind::FunctionCall {
                call: CallExpr::new(function, vec![]),
                params: vec![],
                result: None,
            },
        }
    }

    fn return_edge(function: &str, call_site: usize) -> CfaEdge {
        CfaEdge {
            source: NodeIndex::new(100),
            target: NodeIndex::new(101),
            function: function.into(),
            line: 1,
            kind: EdgeKind::FunctionReturn {
                call: CallExpr::new(function, vec![]),
                caller: "main".into(),
                call_site: NodeIndex::new(call_site),
                result: None,
            },
        }
    }

    #[test]
    fn calls_push_and_returns_pop() {
        let main = CallstackState::new("main");
        let inner: Vec<_> = main
            .transfer(call_edge("worker", 3, 10))
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].current_function(), "worker");
        assert_eq!(inner[0].depth(), 2);
        assert_eq!(inner[0].previous(), Some(&main));

        let back: Vec<_> = inner[0]
            .transfer(return_edge("worker", 3))
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(back, vec![main]);
    }

    #[test]
    fn returns_must_match_the_call_site() {
        let inner = CallstackState::new("main").push("worker", NodeIndex::new(3));
        assert_eq!(
            inner.transfer(return_edge("worker", 4)).unwrap().into_iter().count(),
            0
        );
        assert_eq!(
            inner.transfer(return_edge("other", 3)).unwrap().into_iter().count(),
            0
        );
    }

    #[test]
    fn recursion_is_cut() {
        let inner = CallstackState::new("main").push("worker", NodeIndex::new(3));
        assert_eq!(
            inner.transfer(call_edge("worker", 5, 6)).unwrap().into_iter().count(),
            0
        );
    }
}
