//! Lock tracking: which locks are held, and how many times.

mod set;

pub use set::LockSet;

use crate::analysis::callstack::CallstackState;
use crate::analysis::cpa::lattice::JoinSemiLattice;
use crate::analysis::cpa::state::{
    AbstractState, CallstackProvider, MergeOutcome, StateDisplay, Successor,
};
use crate::analysis::persistent_map::PersistentMap;
use crate::config::LockConfig;
use crate::error::LatchkeyError;
use latchkey_cfa::{CfaEdge, EdgeKind};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::Formatter;
use std::hash::{Hash, Hasher};
use std::iter::once;
use std::sync::Arc;
use tracing::debug;

/// The held locks, each with its acquisition depth.
///
/// Only calls named in the [`LockConfig`] change the state; every other edge is the identity.
#[derive(Debug, Clone)]
pub struct LockState {
    locks: PersistentMap<String, usize>,
    config: Arc<LockConfig>,
}

impl LockState {
    pub fn new(config: Arc<LockConfig>) -> Self {
        Self {
            locks: PersistentMap::new(),
            config,
        }
    }

    pub fn depth(&self, lock: &str) -> usize {
        self.locks.get(lock).copied().unwrap_or(0)
    }

    pub fn is_held(&self, lock: &str) -> bool {
        self.locks.contains_key(lock)
    }

    pub fn lock_set(&self) -> LockSet {
        self.locks.keys().cloned().collect()
    }

    /// Applies the effect of calling `function`. `None` means the call would exceed the
    /// maximum depth of some lock.
    fn call(&self, function: &str) -> Option<Self> {
        let mut locks = self.locks.clone();
        for info in &self.config.locks {
            let depth = locks.get(&info.name).copied().unwrap_or(0);
            if info.lock.contains(function) {
                if depth + 1 > info.max_depth {
                    debug!(lock = %info.name, depth, "lock depth exceeded");
                    return None;
                }
                locks = locks.put_and_copy(info.name.clone(), depth + 1);
            } else if info.unlock.contains(function) {
                locks = match depth {
                    0 => locks,
                    1 => locks.remove_and_copy(&info.name),
                    _ => locks.put_and_copy(info.name.clone(), depth - 1),
                };
            } else if info.reset.contains(function) {
                locks = locks.remove_and_copy(&info.name);
            }
        }
        Some(Self {
            locks,
            config: self.config.clone(),
        })
    }
}

impl PartialEq for LockState {
    fn eq(&self, other: &Self) -> bool {
        self.locks == other.locks
    }
}

impl Eq for LockState {}

impl Hash for LockState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.locks.hash(state)
    }
}

impl PartialOrd for LockState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (self == other).then_some(Ordering::Equal)
    }
}

impl JoinSemiLattice for LockState {
    fn join(&mut self, _other: &Self) {}
}

impl StateDisplay for LockState {
    fn fmt_state(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, (lock, depth)) in self.locks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{lock}({depth})")?;
        }
        write!(f, "]")
    }
}

impl CallstackProvider for LockState {
    fn callstack(&self) -> Option<&CallstackState> {
        None
    }
}

impl AbstractState for LockState {
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
        let function = match &edge.kind {
            EdgeKind::Statement(statement) => statement.call().map(|c| c.function.as_str()),
            EdgeKind::FunctionCall { call, .. } => Some(call.function.as_str()),
            _ => None,
        };
        match function {
            None => Ok(once(self.clone()).into()),
            Some(function) => Ok(self.call(function).into_iter().into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockInfo;
    use latchkey_cfa::{CallExpr, NodeIndex, Statement};

    fn config(max_depth: usize) -> Arc<LockConfig> {
        Arc::new(LockConfig {
            locks: vec![LockInfo {
                name: "mutex".into(),
                lock: ["mutex_lock".to_string()].into(),
                unlock: ["mutex_unlock".to_string()].into(),
                reset: ["mutex_reset".to_string()].into(),
                max_depth,
            }],
        })
    }

    fn call(function: &str) -> CfaEdge {
        CfaEdge {
            source: NodeIndex::new(0),
            target: NodeIndex::new(1),
            function: "main".into(),
            line: 1,
            kind: EdgeKind::Statement(Statement::Call(CallExpr::new(function, vec![]))),
        }
    }

    fn step(state: &LockState, function: &str) -> Vec<LockState> {
        state.transfer(call(function)).unwrap().into_iter().collect()
    }

    #[test]
    fn lock_and_unlock_nest() {
        let s = LockState::new(config(10));
        let once = step(&s, "mutex_lock").pop().unwrap();
        let twice = step(&once, "mutex_lock").pop().unwrap();
        assert_eq!(twice.depth("mutex"), 2);
        let back = step(&twice, "mutex_unlock").pop().unwrap();
        assert_eq!(back, once);
        let released = step(&back, "mutex_unlock").pop().unwrap();
        assert!(!released.is_held("mutex"));
        assert_eq!(step(&released, "mutex_unlock").pop().unwrap(), s);
    }

    #[test]
    fn reset_drops_every_level() {
        let s = LockState::new(config(10));
        let held = step(&step(&s, "mutex_lock")[0], "mutex_lock").pop().unwrap();
        let reset = step(&held, "mutex_reset").pop().unwrap();
        assert_eq!(reset.lock_set(), LockSet::new());
    }

    #[test]
    fn max_depth_bounds_exploration() {
        let s = LockState::new(config(1));
        let held = step(&s, "mutex_lock").pop().unwrap();
        assert!(step(&held, "mutex_lock").is_empty());
    }

    #[test]
    fn other_calls_are_ignored() {
        let s = LockState::new(config(1));
        assert_eq!(step(&s, "printk"), vec![s.clone()]);
    }
}
