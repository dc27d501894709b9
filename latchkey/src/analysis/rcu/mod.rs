//! RCU pointer discovery and read-side tracking.

mod lock;
mod search;

pub use lock::{RcuLockMode, RcuLockState};
pub use search::RcuSearchState;

use crate::analysis::alias::{AliasState, AliasStatistics};
use crate::analysis::compound::{CompoundState, Strengthen};
use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::cpa::reached::ReachedSet;
use crate::analysis::identifier::{Identifier, MemoryLocation};
use crate::analysis::location::ControlState;
use crate::analysis::pointer::PointerState;
use crate::config::{PointerConfig, RcuConfig};
use crate::error::LatchkeyError;
use latchkey_cfa::Cfa;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

impl Strengthen<RcuSearchState> for ControlState {}
impl Strengthen<RcuLockState> for AliasState {}
impl Strengthen<CompoundState<AliasState, RcuLockState>> for ControlState {}

pub type RcuSearchAnalysisState = CompoundState<ControlState, RcuSearchState>;

/// Collects the memory locations passed to the instrumented RCU primitives.
#[derive(Debug, Clone)]
pub struct RcuSearchAnalysis {
    rcu: Arc<RcuConfig>,
    pointer: Arc<PointerConfig>,
}

impl RcuSearchAnalysis {
    pub fn new(rcu: RcuConfig, pointer: PointerConfig) -> Self {
        Self {
            rcu: Arc::new(rcu),
            pointer: Arc::new(pointer),
        }
    }

    pub fn rcu_pointers(reached: &ReachedSet<RcuSearchAnalysisState>) -> BTreeSet<MemoryLocation> {
        reached
            .states()
            .flat_map(|state| state.1.rcu_pointers().cloned())
            .collect()
    }
}

impl ConfigurableProgramAnalysis for RcuSearchAnalysis {
    type State = RcuSearchAnalysisState;

    fn initial_state(&self, cfa: &Cfa) -> Result<Self::State, LatchkeyError> {
        Ok(CompoundState(
            ControlState::entry(cfa),
            RcuSearchState::new(PointerState::new(self.pointer.clone()), self.rcu.clone()),
        ))
    }
}

pub type RcuAnalysisState = CompoundState<ControlState, CompoundState<AliasState, RcuLockState>>;

/// Aliasing of RCU pointers together with the read-side lock state.
#[derive(Debug, Clone)]
pub struct RcuAnalysis {
    config: Arc<RcuConfig>,
}

impl RcuAnalysis {
    pub fn new(config: RcuConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl ConfigurableProgramAnalysis for RcuAnalysis {
    type State = RcuAnalysisState;

    fn initial_state(&self, cfa: &Cfa) -> Result<Self::State, LatchkeyError> {
        Ok(CompoundState(
            ControlState::entry(cfa),
            CompoundState(
                AliasState::new(self.config.clone()),
                RcuLockState::new(self.config.clone()),
            ),
        ))
    }
}

/// What the RCU analyses found, in printable form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RcuReport {
    pub rcu_pointers: Vec<String>,
    pub rcu_identifiers: Vec<String>,
    pub outdated: Vec<String>,
    pub statistics: AliasStatistics,
}

impl RcuReport {
    pub fn new(
        search: &ReachedSet<RcuSearchAnalysisState>,
        rcu: &ReachedSet<RcuAnalysisState>,
    ) -> Self {
        let identifiers: BTreeSet<&Identifier> =
            rcu.states().flat_map(|state| state.1.0.rcu()).collect();
        let outdated: BTreeSet<&Identifier> =
            rcu.states().flat_map(|state| state.1.1.outdated()).collect();
        Self {
            rcu_pointers: RcuSearchAnalysis::rcu_pointers(search)
                .iter()
                .map(ToString::to_string)
                .collect(),
            rcu_identifiers: identifiers.iter().map(ToString::to_string).collect(),
            outdated: outdated.iter().map(ToString::to_string).collect(),
            statistics: AliasStatistics::collect(rcu.states().map(|state| &state.1.0)),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
