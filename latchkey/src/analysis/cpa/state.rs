use crate::analysis::callstack::CallstackState;
use crate::analysis::cpa::lattice::JoinSemiLattice;
use crate::error::LatchkeyError;
use latchkey_cfa::{CfaEdge, NodeIndex};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::ops::Add;

/// Whether a merge widened the reached state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MergeOutcome {
    NoOp,
    Merged,
}

impl MergeOutcome {
    pub fn merged(&self) -> bool {
        *self == MergeOutcome::Merged
    }
}

/// Combines the outcomes of merging several components.
impl Add for MergeOutcome {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        if self.merged() || rhs.merged() {
            Self::Merged
        } else {
            Self::NoOp
        }
    }
}

trait BoxedSuccessors<'a, T>: Iterator<Item = T> {
    fn boxed_clone(&self) -> Box<dyn BoxedSuccessors<'a, T> + 'a>;
}

impl<'a, T, I: Iterator<Item = T> + Clone + 'a> BoxedSuccessors<'a, T> for I {
    fn boxed_clone(&self) -> Box<dyn BoxedSuccessors<'a, T> + 'a> {
        Box::new(self.clone())
    }
}

/// The iterator behind a [`Successor`]. It stays `Clone`, which `iproduct` relies on when
/// combining the successors of several domains.
pub struct SuccessorIter<'a, T>(Box<dyn BoxedSuccessors<'a, T> + 'a>);

impl<T> Clone for SuccessorIter<'_, T> {
    fn clone(&self) -> Self {
        SuccessorIter(self.0.boxed_clone())
    }
}

impl<T> Iterator for SuccessorIter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.0.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl<T> Debug for SuccessorIter<'_, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("SuccessorIter")
    }
}

/// The states produced by a transfer function, built from any cloneable iterator.
#[derive(Clone, Debug)]
pub struct Successor<'a, T>(SuccessorIter<'a, T>);

impl<'a, T: 'a> Successor<'a, T> {
    pub fn empty() -> Self {
        std::iter::empty().into()
    }
}

impl<'a, T: 'a> IntoIterator for Successor<'a, T> {
    type Item = T;
    type IntoIter = SuccessorIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0
    }
}

impl<'a, T: 'a, I: Iterator<Item = T> + Clone + 'a> From<I> for Successor<'a, T> {
    fn from(iter: I) -> Self {
        Self(SuccessorIter(Box::new(iter)))
    }
}

/// Formatting for abstract states, kept apart from `Display` so that compound states can
/// implement it generically.
pub trait StateDisplay {
    fn fmt_state(&self, f: &mut Formatter<'_>) -> FmtResult;
}

/// Adapter rendering any [`StateDisplay`] through `Display`, for log fields.
pub struct DisplayState<'a, S: ?Sized>(pub &'a S);

impl<S: StateDisplay + ?Sized> Display for DisplayState<'_, S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        self.0.fmt_state(f)
    }
}

/// Core trait for abstract states used by the CPA.
pub trait AbstractState: JoinSemiLattice + Clone + Debug + StateDisplay {
    /// Widens `self` with `other`. After a merge `self` is at least as large as before.
    fn merge(&mut self, other: &Self) -> MergeOutcome;

    /// Merge by joining.
    fn merge_join(&mut self, new_state: &Self) -> MergeOutcome {
        if self == new_state {
            MergeOutcome::NoOp
        } else {
            self.join(new_state);
            MergeOutcome::Merged
        }
    }

    /// Keep states apart.
    fn merge_sep(&mut self, _: &Self) -> MergeOutcome {
        MergeOutcome::NoOp
    }

    /// Stop predicate: is `self` covered by any of `states`?
    fn stop<'a, T: Iterator<Item = &'a Self>>(&'a self, states: T) -> bool;

    /// Covered when some reached state is at least as large in the lattice order.
    fn stop_sep<'a, T: Iterator<Item = &'a Self>>(&'a self, mut states: T) -> bool {
        states.any(|s| {
            matches!(
                PartialOrd::partial_cmp(self, s),
                Some(Ordering::Less) | Some(Ordering::Equal)
            )
        })
    }

    /// Transfer function: the successors of this state along `edge`.
    ///
    /// An empty successor set means the edge is infeasible for this domain. Edges the domain
    /// has no semantics for are reported as [`LatchkeyError::UnrecognizedEdge`].
    fn transfer<'a, B: Borrow<CfaEdge>>(
        &'a self,
        edge: B,
    ) -> Result<Successor<'a, Self>, LatchkeyError>;
}

/// States that know their program location.
pub trait LocationState: AbstractState {
    fn location(&self) -> Option<NodeIndex>;
}

/// States that carry a call stack, used to partition the block waitlist.
pub trait CallstackProvider {
    fn callstack(&self) -> Option<&CallstackState>;
}
