use crate::analysis::cpa::reached::ReachedSet;
use crate::analysis::cpa::shutdown::ShutdownNotifier;
use crate::analysis::cpa::{ConfigurableProgramAnalysis, RunOutcome, seed};
use crate::analysis::waitlist::SimpleWaitlist;
use crate::config::TraversalOrder;
use crate::error::LatchkeyError;
use latchkey_cfa::Cfa;

pub mod alias;
pub mod callstack;
pub mod compound;
pub mod cpa;
pub mod identifier;
pub mod location;
pub mod lock;
pub mod persistent_map;
pub mod pointer;
pub mod race;
pub mod rcu;
pub mod usage;
pub mod waitlist;

/// The reached states of a finished (or interrupted) run.
#[derive(Debug)]
pub struct AnalysisResult<S> {
    pub reached: ReachedSet<S>,
    pub outcome: RunOutcome,
}

/// A trait for analyses that can be run from the CFA entry point with no further setup. This is
/// automatically implemented for every [`ConfigurableProgramAnalysis`].
///
/// Types can override the default `run` implementation to provide custom behavior.
pub trait Analysis: ConfigurableProgramAnalysis {
    /// Run the [Analysis] breadth-first to a fixpoint and return the reached states.
    fn run(&mut self, cfa: &Cfa) -> Result<AnalysisResult<Self::State>, LatchkeyError> {
        let initial = self.initial_state(cfa)?;
        let mut reached = ReachedSet::new();
        let mut waitlist = SimpleWaitlist::new(TraversalOrder::Bfs);
        seed(&mut reached, &mut waitlist, initial);
        let outcome = self.run_cpa(cfa, &mut reached, &mut waitlist, &ShutdownNotifier::new())?;
        Ok(AnalysisResult { reached, outcome })
    }
}

impl<T: ConfigurableProgramAnalysis> Analysis for T {}
