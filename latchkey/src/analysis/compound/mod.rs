//! Composition of abstract domains.
//!
//! A [`CompoundState`] runs two domains side by side. Its transfer is the cartesian product of
//! the components' successors, after which the left component may be strengthened with what the
//! right component learned on the same edge. Larger compositions nest pairs.

use crate::analysis::callstack::CallstackState;
use crate::analysis::cpa::lattice::JoinSemiLattice;
use crate::analysis::cpa::state::{
    AbstractState, CallstackProvider, LocationState, MergeOutcome, StateDisplay, Successor,
};
use crate::error::LatchkeyError;
use latchkey_cfa::{CfaEdge, NodeIndex};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::Formatter;

pub enum StrengthenOutcome {
    Changed,
    Unchanged,
}

/// Refines a state using a sibling state of another domain.
///
/// `original` is the compound state the successors were computed from and `other` is the
/// sibling successor being paired with `self`.
pub trait Strengthen<O: AbstractState>: AbstractState {
    fn strengthen(
        &mut self,
        _original: &CompoundState<Self, O>,
        _other: &O,
        _edge: &CfaEdge,
    ) -> StrengthenOutcome {
        StrengthenOutcome::Unchanged
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompoundState<S1, S2>(pub S1, pub S2);

/// The product order: a compound state is below another iff both components are.
impl<S1: PartialOrd, S2: PartialOrd> PartialOrd for CompoundState<S1, S2> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.0.partial_cmp(&other.0)?, self.1.partial_cmp(&other.1)?) {
            (a, b) if a == b => Some(a),
            (Ordering::Equal, b) => Some(b),
            (a, Ordering::Equal) => Some(a),
            _ => None,
        }
    }
}

impl<S1: JoinSemiLattice, S2: JoinSemiLattice> JoinSemiLattice for CompoundState<S1, S2> {
    fn join(&mut self, other: &Self) {
        self.0.join(&other.0);
        self.1.join(&other.1);
    }
}

impl<S1: StateDisplay, S2: StateDisplay> StateDisplay for CompoundState<S1, S2> {
    fn fmt_state(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        self.0.fmt_state(f)?;
        write!(f, ", ")?;
        self.1.fmt_state(f)?;
        write!(f, ")")
    }
}

impl<S1, S2> AbstractState for CompoundState<S1, S2>
where
    S1: Strengthen<S2>,
    S2: AbstractState,
{
    /// The right component is only merged once the left components agree.
    fn merge(&mut self, other: &Self) -> MergeOutcome {
        let outcome_left = self.0.merge(&other.0);
        if outcome_left.merged() || self.0 == other.0 {
            outcome_left + self.1.merge(&other.1)
        } else {
            MergeOutcome::NoOp
        }
    }

    fn stop<'a, T: Iterator<Item = &'a Self>>(&'a self, states: T) -> bool {
        self.stop_sep(states)
    }

    fn transfer<'a, B: Borrow<CfaEdge>>(
        &'a self,
        edge: B,
    ) -> Result<Successor<'a, Self>, LatchkeyError> {
        let edge = edge.borrow();
        let successors_left: Vec<S1> = self.0.transfer(edge)?.into_iter().collect();
        if successors_left.is_empty() {
            return Ok(Successor::empty());
        }
        let successors_right: Vec<S2> = self.1.transfer(edge)?.into_iter().collect();

        let mut result = Vec::with_capacity(successors_left.len() * successors_right.len());
        for left in &successors_left {
            for right in &successors_right {
                let mut new_left = left.clone();
                new_left.strengthen(self, right, edge);
                result.push(CompoundState(new_left, right.clone()));
            }
        }
        Ok(result.into_iter().into())
    }
}

/// The location comes from the left component.
impl<S1, S2> LocationState for CompoundState<S1, S2>
where
    S1: LocationState + Strengthen<S2>,
    S2: AbstractState,
{
    fn location(&self) -> Option<NodeIndex> {
        self.0.location()
    }
}

impl<S1: CallstackProvider, S2: CallstackProvider> CallstackProvider for CompoundState<S1, S2> {
    fn callstack(&self) -> Option<&CallstackState> {
        self.0.callstack().or_else(|| self.1.callstack())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cpa::lattice::flat::FlatLattice;

    #[test]
    fn product_order() {
        let low = CompoundState(FlatLattice::Value(1), FlatLattice::Value(2));
        let mixed = CompoundState(FlatLattice::Top, FlatLattice::Value(2));
        let high = CompoundState(FlatLattice::<i32>::Top, FlatLattice::<i32>::Top);
        let other = CompoundState(FlatLattice::Value(1), FlatLattice::Value(3));
        assert_eq!(low.partial_cmp(&mixed), Some(Ordering::Less));
        assert_eq!(high.partial_cmp(&low), Some(Ordering::Greater));
        assert_eq!(low.partial_cmp(&low.clone()), Some(Ordering::Equal));
        assert_eq!(low.partial_cmp(&other), None);
        let crossed = CompoundState(FlatLattice::Top, FlatLattice::Value(3));
        assert_eq!(mixed.partial_cmp(&other), None);
        assert_eq!(crossed.partial_cmp(&other), Some(Ordering::Greater));
    }
}
