//! Control-flow tracking: where in the CFA a state is, and how it got there.

use crate::analysis::callstack::CallstackState;
use crate::analysis::compound::{CompoundState, Strengthen};
use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::cpa::lattice::JoinSemiLattice;
use crate::analysis::cpa::state::{
    AbstractState, CallstackProvider, LocationState, MergeOutcome, StateDisplay, Successor,
};
use crate::error::LatchkeyError;
use latchkey_cfa::{Cfa, CfaEdge, NodeIndex};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::Formatter;
use std::iter::once;

/// A single CFA node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CfaLocation(pub NodeIndex);

impl PartialOrd for CfaLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (self == other).then_some(Ordering::Equal)
    }
}

impl JoinSemiLattice for CfaLocation {
    fn join(&mut self, _other: &Self) {}
}

impl StateDisplay for CfaLocation {
    fn fmt_state(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "N{}", self.0.index())
    }
}

impl CallstackProvider for CfaLocation {
    fn callstack(&self) -> Option<&CallstackState> {
        None
    }
}

impl AbstractState for CfaLocation {
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
        if edge.source == self.0 {
            Ok(once(CfaLocation(edge.target)).into())
        } else {
            Ok(Successor::empty())
        }
    }
}

impl LocationState for CfaLocation {
    fn location(&self) -> Option<NodeIndex> {
        Some(self.0)
    }
}

impl Strengthen<CallstackState> for CfaLocation {}

/// A program location together with the call stack that reached it.
pub type ControlState = CompoundState<CfaLocation, CallstackState>;

impl ControlState {
    pub fn entry(cfa: &Cfa) -> Self {
        CompoundState(
            CfaLocation(cfa.entry_node()),
            CallstackState::new(cfa.entry_function().name.clone()),
        )
    }

    pub fn node(&self) -> NodeIndex {
        self.0.0
    }

    pub fn stack(&self) -> &CallstackState {
        &self.1
    }
}

/// Plain interprocedural reachability over a CFA.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationAnalysis;

impl ConfigurableProgramAnalysis for LocationAnalysis {
    type State = ControlState;

    fn initial_state(&self, cfa: &Cfa) -> Result<Self::State, LatchkeyError> {
        Ok(ControlState::entry(cfa))
    }
}
