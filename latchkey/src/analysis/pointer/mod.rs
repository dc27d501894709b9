//! Flow-insensitive points-to analysis.

mod location_set;
mod state;
mod statistics;

pub use location_set::LocationSet;
pub use state::{PointerState, PointsTo, RETURN_VALUE};
pub use statistics::{LOCATION_SET_BOT, LOCATION_SET_TOP, PointsToDump, PointsToStatistics};

use crate::analysis::compound::{CompoundState, Strengthen};
use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::cpa::lattice::JoinSemiLattice;
use crate::analysis::cpa::reached::ReachedSet;
use crate::analysis::location::ControlState;
use crate::config::PointerConfig;
use crate::error::LatchkeyError;
use latchkey_cfa::Cfa;
use std::sync::Arc;

impl Strengthen<PointerState> for ControlState {}

pub type PointerAnalysisState = CompoundState<ControlState, PointerState>;

/// Computes points-to information for every reachable program location. States at the same
/// location are joined.
#[derive(Debug, Clone)]
pub struct PointerAnalysis {
    config: Arc<PointerConfig>,
}

impl PointerAnalysis {
    pub fn new(config: PointerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// The join of the points-to maps of all reached states.
    pub fn summarize(&self, reached: &ReachedSet<PointerAnalysisState>) -> PointerState {
        let mut summary = PointerState::new(self.config.clone());
        for state in reached.states() {
            summary.join(&state.1);
        }
        summary
    }
}

impl ConfigurableProgramAnalysis for PointerAnalysis {
    type State = PointerAnalysisState;

    fn initial_state(&self, cfa: &Cfa) -> Result<Self::State, LatchkeyError> {
        Ok(CompoundState(
            ControlState::entry(cfa),
            PointerState::new(self.config.clone()),
        ))
    }
}
