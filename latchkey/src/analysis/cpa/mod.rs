pub mod lattice;
pub mod reached;
pub mod shutdown;
pub mod state;

use crate::analysis::cpa::reached::{ReachedEntry, ReachedSet};
use crate::analysis::cpa::shutdown::ShutdownNotifier;
use crate::analysis::cpa::state::{AbstractState, DisplayState, LocationState, MergeOutcome, Successor};
use crate::analysis::waitlist::Waitlist;
use crate::error::LatchkeyError;
use latchkey_cfa::{Cfa, CfaEdge};
use serde::Serialize;
use std::fmt::Debug;
use std::ops::AddAssign;
use std::time::{Duration, Instant};

/// How a call to [`ConfigurableProgramAnalysis::run_cpa`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The waitlist was drained: the reached set is a fixpoint
    Completed,
    /// The shutdown flag was raised; the reached set holds the partial result
    Interrupted,
}

/// Counters collected by one exploration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub popped: usize,
    pub successors: usize,
    pub merges: usize,
    pub stopped: usize,
    pub merge_time: Duration,
    pub stop_time: Duration,
}

impl AddAssign for RunStatistics {
    fn add_assign(&mut self, rhs: Self) {
        self.popped += rhs.popped;
        self.successors += rhs.successors;
        self.merges += rhs.merges;
        self.stopped += rhs.stopped;
        self.merge_time += rhs.merge_time;
        self.stop_time += rhs.stop_time;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub statistics: RunStatistics,
}

/**
A trait representing Configurable Program Analysis, a tunable unified framework for
dataflow and model checking algorithms. This implementation is based on the presentation of
CPA contained in Chapter 16 of
[The Handbook of Model Checking](https://link.springer.com/book/10.1007/978-3-319-10575-8)

CPA operates on abstract states, which are required to form a lattice, specifically a
[JoinSemiLattice](lattice::JoinSemiLattice). CPA applies CFA edges to abstract states,
producing more abstract states. These states can be merged when control flow merges
(potentially losing information) or kept separate. The algorithm terminates when no reached
abstract state produces any unreached abstract state, indicating a fixed point over the given
domain.

The order in which pending states are explored is delegated to a [`Waitlist`], so the same
analysis can be run breadth-first, depth-first, or partitioned into resource-bounded blocks.
*/
pub trait ConfigurableProgramAnalysis {
    /// An abstract state. Usually (but not necessarily) represents a single program location.
    type State: LocationState + Debug;

    fn initial_state(&self, cfa: &Cfa) -> Result<Self::State, LatchkeyError>;

    /// The abstract successors of `state` along `edge`.
    ///
    /// Defaults to the state's own transfer function. Analyses override this to consult
    /// information that lives outside of individual states, such as a precision.
    fn successors<'a>(
        &self,
        state: &'a Self::State,
        edge: &'a CfaEdge,
    ) -> Result<Successor<'a, Self::State>, LatchkeyError> {
        state.transfer(edge)
    }

    /// Merge `new` into `reached`. Defaults to the state's own merge operator.
    fn merge(&self, reached: &mut Self::State, new: &Self::State) -> MergeOutcome {
        reached.merge(new)
    }

    /// Is `state` covered by one of `reached`? Defaults to the state's own stop operator.
    fn stop<'a, T: Iterator<Item = &'a Self::State>>(&self, state: &'a Self::State, reached: T) -> bool
    where
        Self::State: 'a,
    {
        state.stop(reached)
    }

    /// Allows for accumulating information about a program not specific to particular abstract
    /// states.
    ///
    /// This method will be called for every visited transition, before merging. So, for every
    /// pair of states A,B visited by the CPA where A => B along `edge`, this function will be
    /// called with arguments (A, B, edge). A carries its reached-set id so that side
    /// information can later be invalidated together with the state.
    ///
    /// Note that this should be used with caution if a CPA has a non-sep merge definition;
    /// states may be widened after the CPA has made some side effect.
    fn reduce(
        &mut self,
        _state: &ReachedEntry<Self::State>,
        _dest_state: &Self::State,
        _edge: &CfaEdge,
    ) {
    }

    /// A hook for when a reached state is widened by a merge.
    fn merged(
        &mut self,
        _curr_state: &ReachedEntry<Self::State>,
        _dest_state: &Self::State,
        _merged_state: &ReachedEntry<Self::State>,
    ) {
    }

    /// The CPA algorithm. Implementors should not need to customize this function.
    ///
    /// Explores from whatever `waitlist` holds until it is empty or `shutdown` is raised. All
    /// successors of a popped state are computed before any of them is applied, so a transfer
    /// error never leaves `reached` half-updated.
    fn run_cpa<W: Waitlist<ReachedEntry<Self::State>>>(
        &mut self,
        cfa: &Cfa,
        reached: &mut ReachedSet<Self::State>,
        waitlist: &mut W,
        shutdown: &ShutdownNotifier,
    ) -> Result<RunOutcome, LatchkeyError> {
        let mut statistics = RunStatistics::default();
        while !waitlist.is_empty() {
            if shutdown.should_shutdown() {
                tracing::debug!(pending = waitlist.size(), "exploration interrupted");
                return Ok(RunOutcome {
                    status: RunStatus::Interrupted,
                    statistics,
                });
            }
            let entry = waitlist.pop()?;
            statistics.popped += 1;
            let Some(node) = entry.state.location() else {
                continue;
            };
            tracing::trace!(id = %entry.id, state = %DisplayState(&entry.state), "popped");

            let mut pending: Vec<(&CfaEdge, Vec<Self::State>)> = Vec::new();
            for edge in cfa.leaving_edges(node) {
                let successors: Vec<Self::State> =
                    self.successors(&entry.state, edge)?.into_iter().collect();
                pending.push((edge, successors));
            }

            for (edge, successors) in pending {
                for dest_state in successors {
                    statistics.successors += 1;
                    self.reduce(&entry, &dest_state, edge);

                    let start = Instant::now();
                    let location = dest_state.location();
                    for id in reached.ids_at(location) {
                        let Some(current) = reached.get(id).cloned() else {
                            continue;
                        };
                        let mut merged = current.clone();
                        if self.merge(&mut merged, &dest_state).merged() && merged != current {
                            statistics.merges += 1;
                            let merged_entry = ReachedEntry { id, state: merged };
                            self.merged(&entry, &dest_state, &merged_entry);
                            waitlist.remove(&merged_entry);
                            reached.replace(id, merged_entry.state.clone());
                            waitlist.add(merged_entry);
                        }
                    }
                    statistics.merge_time += start.elapsed();

                    let start = Instant::now();
                    let covered = self.stop(
                        &dest_state,
                        reached.at_location(location).map(|(_, s)| s),
                    );
                    statistics.stop_time += start.elapsed();
                    if covered {
                        statistics.stopped += 1;
                    } else {
                        let id = reached.add(dest_state.clone());
                        waitlist.add(ReachedEntry {
                            id,
                            state: dest_state,
                        });
                    }
                }
            }
        }
        Ok(RunOutcome {
            status: RunStatus::Completed,
            statistics,
        })
    }
}

/// Adds `state` to `reached` and queues it for exploration.
pub fn seed<S: LocationState, W: Waitlist<ReachedEntry<S>>>(
    reached: &mut ReachedSet<S>,
    waitlist: &mut W,
    state: S,
) -> ReachedEntry<S> {
    let id = reached.add(state.clone());
    let entry = ReachedEntry { id, state };
    waitlist.add(entry.clone());
    entry
}
