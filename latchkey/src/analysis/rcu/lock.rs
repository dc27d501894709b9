use crate::analysis::callstack::CallstackState;
use crate::analysis::cpa::lattice::JoinSemiLattice;
use crate::analysis::cpa::lattice::flat::FlatLattice;
use crate::analysis::cpa::state::{
    AbstractState, CallstackProvider, MergeOutcome, StateDisplay, Successor,
};
use crate::analysis::identifier::{Identifier, IdentifierCreator};
use crate::config::RcuConfig;
use crate::error::LatchkeyError;
use im::OrdSet;
use latchkey_cfa::{CfaEdge, EdgeKind};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::iter::once;
use std::sync::Arc;

/// The fictional lock the instrumentation places around RCU pointer accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RcuLockMode {
    Unlocked,
    Read,
    Write,
}

impl Display for RcuLockMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RcuLockMode::Unlocked => write!(f, "unlocked"),
            RcuLockMode::Read => write!(f, "read"),
            RcuLockMode::Write => write!(f, "write"),
        }
    }
}

/// RCU read-side nesting, the fictional lock mode, and the pointers reassigned since the last
/// grace period.
#[derive(Debug, Clone)]
pub struct RcuLockState {
    read_depth: FlatLattice<usize>,
    mode: FlatLattice<RcuLockMode>,
    outdated: OrdSet<Identifier>,
    config: Arc<RcuConfig>,
}

impl RcuLockState {
    pub fn new(config: Arc<RcuConfig>) -> Self {
        Self {
            read_depth: FlatLattice::Value(0),
            mode: FlatLattice::Value(RcuLockMode::Unlocked),
            outdated: OrdSet::new(),
            config,
        }
    }

    pub fn read_depth(&self) -> &FlatLattice<usize> {
        &self.read_depth
    }

    pub fn mode(&self) -> &FlatLattice<RcuLockMode> {
        &self.mode
    }

    pub fn is_outdated(&self, id: &Identifier) -> bool {
        self.outdated.contains(id)
    }

    pub fn outdated(&self) -> impl Iterator<Item = &Identifier> {
        self.outdated.iter()
    }

    fn handle_edge(&self, edge: &CfaEdge) -> Result<Self, LatchkeyError> {
        let call = match &edge.kind {
            EdgeKind::Statement(statement) => statement.call(),
            EdgeKind::FunctionCall { call, .. } => Some(call),
            EdgeKind::Opaque { .. } => return Err(LatchkeyError::unrecognized("rcu", edge)),
            _ => None,
        };
        let mut next = self.clone();
        let Some(call) = call else {
            return Ok(next);
        };
        let config = &self.config;
        let name = call.function.as_str();
        if name == config.read_lock {
            next.read_depth = self.read_depth.map(|d| d + 1);
        } else if name == config.read_unlock {
            next.read_depth = self.read_depth.map(|d| d.saturating_sub(1));
        } else if name == config.fict_read_lock {
            next.mode = FlatLattice::Value(RcuLockMode::Read);
        } else if name == config.fict_write_lock {
            next.mode = FlatLattice::Value(RcuLockMode::Write);
        } else if name == config.fict_read_unlock || name == config.fict_write_unlock {
            next.mode = FlatLattice::Value(RcuLockMode::Unlocked);
        } else if name == config.synchronize {
            next.outdated = OrdSet::new();
        } else if name == config.assign {
            if let Some(target) = call.args.first() {
                next.outdated
                    .insert(IdentifierCreator::new(edge.function.clone()).create(target));
            }
        }
        Ok(next)
    }
}

impl PartialEq for RcuLockState {
    fn eq(&self, other: &Self) -> bool {
        self.read_depth == other.read_depth
            && self.mode == other.mode
            && self.outdated == other.outdated
    }
}

impl Eq for RcuLockState {}

impl Hash for RcuLockState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.read_depth.hash(state);
        self.mode.hash(state);
        self.outdated.hash(state);
    }
}

impl PartialOrd for RcuLockState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let depth = self.read_depth.partial_cmp(&other.read_depth)?;
        let mode = self.mode.partial_cmp(&other.mode)?;
        let outdated = if self.outdated == other.outdated {
            Ordering::Equal
        } else if self.outdated.is_subset(&other.outdated) {
            Ordering::Less
        } else if other.outdated.is_subset(&self.outdated) {
            Ordering::Greater
        } else {
            return None;
        };
        [depth, mode, outdated]
            .into_iter()
            .try_fold(Ordering::Equal, |acc, o| match (acc, o) {
                (a, Ordering::Equal) => Some(a),
                (Ordering::Equal, o) => Some(o),
                (a, o) if a == o => Some(a),
                _ => None,
            })
    }
}

impl JoinSemiLattice for RcuLockState {
    fn join(&mut self, other: &Self) {
        self.read_depth.join(&other.read_depth);
        self.mode.join(&other.mode);
        self.outdated = self.outdated.clone().union(other.outdated.clone());
    }
}

impl StateDisplay for RcuLockState {
    fn fmt_state(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "rcu(depth {}, {}, outdated [", self.read_depth, self.mode)?;
        for (i, id) in self.outdated.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{id}")?;
        }
        write!(f, "])")
    }
}

impl CallstackProvider for RcuLockState {
    fn callstack(&self) -> Option<&CallstackState> {
        None
    }
}

impl AbstractState for RcuLockState {
    fn merge(&mut self, other: &Self) -> MergeOutcome {
        self.merge_join(other)
    }

    fn stop<'a, T: Iterator<Item = &'a Self>>(&'a self, states: T) -> bool {
        self.stop_sep(states)
    }

    fn transfer<'a, B: Borrow<CfaEdge>>(
        &'a self,
        edge: B,
    ) -> Result<Successor<'a, Self>, LatchkeyError> {
        Ok(once(self.handle_edge(edge.borrow())?).into())
    }
}
