//! Data-race detection: exploration that records shared usages, driven by a refinement loop.

mod algorithm;
mod precision;
mod refinement;
mod report;

pub use algorithm::UsageAlgorithm;
pub use precision::RacePrecision;
pub use refinement::{
    AssumeTrueRefiner, IdentifierIterator, IterationOutcome, RefinementResult, UsageRefiner,
};
pub use report::{UnsafeEntry, UnsafeStatus, UsageEntry, UsageReport};

use crate::analysis::callstack::CallstackState;
use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::cpa::lattice::JoinSemiLattice;
use crate::analysis::cpa::reached::ReachedEntry;
use crate::analysis::cpa::state::{
    AbstractState, CallstackProvider, LocationState, MergeOutcome, StateDisplay, Successor,
};
use crate::analysis::location::ControlState;
use crate::analysis::lock::LockState;
use crate::analysis::pointer::PointerState;
use crate::analysis::usage::{UsageContainer, UsageExtractor, UsageInfo, UsageState};
use crate::config::{LatchkeyConfig, MergeOperator};
use crate::error::LatchkeyError;
use itertools::iproduct;
use latchkey_cfa::{Cfa, CfaEdge, NodeIndex};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::Formatter;
use std::sync::Arc;

/// The abstract state of the race analysis: one component per domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RaceState {
    pub control: ControlState,
    pub locks: LockState,
    pub pointer: PointerState,
    pub usage: UsageState,
}

impl RaceState {
    /// Coverage for the stop operator: same control point and locks, with no more points-to
    /// facts and bindings than `other`.
    pub fn is_covered_by(&self, other: &Self) -> bool {
        self.control == other.control
            && self.locks == other.locks
            && self.pointer <= other.pointer
            && self.usage.is_less_or_equal(&other.usage)
    }
}

/// The product order over all four components.
impl PartialOrd for RaceState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        [
            self.control.partial_cmp(&other.control)?,
            self.locks.partial_cmp(&other.locks)?,
            self.pointer.partial_cmp(&other.pointer)?,
            self.usage.partial_cmp(&other.usage)?,
        ]
        .into_iter()
        .try_fold(Ordering::Equal, |acc, o| match (acc, o) {
            (a, Ordering::Equal) => Some(a),
            (Ordering::Equal, o) => Some(o),
            (a, o) if a == o => Some(a),
            _ => None,
        })
    }
}

impl JoinSemiLattice for RaceState {
    fn join(&mut self, other: &Self) {
        self.control.join(&other.control);
        self.locks.join(&other.locks);
        self.pointer.join(&other.pointer);
        self.usage.join(&other.usage);
    }
}

impl StateDisplay for RaceState {
    fn fmt_state(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.control.fmt_state(f)?;
        write!(f, " locks ")?;
        self.locks.fmt_state(f)?;
        write!(f, " pointers ")?;
        self.pointer.fmt_state(f)?;
        write!(f, " bindings ")?;
        self.usage.fmt_state(f)
    }
}

impl CallstackProvider for RaceState {
    fn callstack(&self) -> Option<&CallstackState> {
        self.control.callstack()
    }
}

impl AbstractState for RaceState {
    fn merge(&mut self, other: &Self) -> MergeOutcome {
        self.merge_sep(other)
    }

    fn stop<'a, T: Iterator<Item = &'a Self>>(&'a self, mut states: T) -> bool {
        states.any(|s| self.is_covered_by(s))
    }

    fn transfer<'a, B: Borrow<CfaEdge>>(
        &'a self,
        edge: B,
    ) -> Result<Successor<'a, Self>, LatchkeyError> {
        let edge = edge.borrow();
        let control = self.control.transfer(edge)?;
        let locks = self.locks.transfer(edge)?;
        let pointer = self.pointer.transfer(edge)?;
        let usage = self.usage.transfer(edge)?;
        let successors: Vec<RaceState> = iproduct!(control, locks, pointer, usage)
            .map(|(control, locks, pointer, usage)| RaceState {
                control,
                locks,
                pointer,
                usage,
            })
            .collect();
        Ok(successors.into_iter().into())
    }
}

impl LocationState for RaceState {
    fn location(&self) -> Option<NodeIndex> {
        self.control.location()
    }
}

/// Explores the program while recording every shared usage into a [`UsageContainer`].
///
/// The analysis owns the container so that usages survive restarts of the exploration; the
/// precision is swapped in by the refinement loop between runs.
#[derive(Debug)]
pub struct RaceAnalysis {
    config: Arc<LatchkeyConfig>,
    precision: Arc<RacePrecision>,
    container: UsageContainer,
}

impl RaceAnalysis {
    pub fn new(config: Arc<LatchkeyConfig>) -> Self {
        let container = UsageContainer::new(&config.usage);
        Self {
            config,
            precision: Arc::new(RacePrecision::new()),
            container,
        }
    }

    pub fn precision(&self) -> &Arc<RacePrecision> {
        &self.precision
    }

    pub fn set_precision(&mut self, precision: Arc<RacePrecision>) {
        self.precision = precision;
    }

    pub fn container(&self) -> &UsageContainer {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut UsageContainer {
        &mut self.container
    }

    pub fn into_container(self) -> UsageContainer {
        self.container
    }
}

impl ConfigurableProgramAnalysis for RaceAnalysis {
    type State = RaceState;

    fn initial_state(&self, cfa: &Cfa) -> Result<Self::State, LatchkeyError> {
        Ok(RaceState {
            control: ControlState::entry(cfa),
            locks: LockState::new(Arc::new(self.config.lock.clone())),
            pointer: PointerState::new(Arc::new(self.config.pointer.clone())),
            usage: UsageState::new(),
        })
    }

    fn successors<'a>(
        &self,
        state: &'a Self::State,
        edge: &'a CfaEdge,
    ) -> Result<Successor<'a, Self::State>, LatchkeyError> {
        if self.precision.excludes(edge) {
            tracing::trace!(%edge, "edge excluded by precision");
            return Ok(Successor::empty());
        }
        state.transfer(edge)
    }

    fn merge(&self, reached: &mut Self::State, new: &Self::State) -> MergeOutcome {
        match self.config.cpa.merge {
            MergeOperator::Sep => reached.merge_sep(new),
            MergeOperator::Join => {
                if reached.control != new.control || reached.locks != new.locks {
                    return MergeOutcome::NoOp;
                }
                reached.pointer.merge_join(&new.pointer) + reached.usage.merge_join(&new.usage)
            }
        }
    }

    /// Records the usages of `edge` with the locks held in the source state.
    fn reduce(&mut self, state: &ReachedEntry<Self::State>, _dest_state: &Self::State, edge: &CfaEdge) {
        let source = &state.state;
        let accesses = UsageExtractor::new(&self.config.usage).extract(
            edge,
            &source.usage,
            &source.pointer,
        );
        if accesses.is_empty() {
            return;
        }
        let locks = source.locks.lock_set();
        for (id, access) in accesses {
            tracing::trace!(identifier = %id, %access, line = edge.line, "usage");
            let info = UsageInfo::new(access, locks.clone(), edge.source, edge.line, edge.function.clone())
                .with_key_state(state.id);
            self.container.add(id, info);
        }
    }
}
