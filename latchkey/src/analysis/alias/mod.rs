//! Alias tracking for RCU-protected pointers.

mod state;
mod transfer;

pub use state::AliasState;
pub use transfer::AliasTransfer;

use crate::analysis::compound::{CompoundState, Strengthen};
use crate::analysis::cpa::ConfigurableProgramAnalysis;
use crate::analysis::cpa::reached::ReachedSet;
use crate::analysis::cpa::state::{AbstractState, MergeOutcome, Successor};
use crate::analysis::identifier::Identifier;
use crate::analysis::location::ControlState;
use crate::config::RcuConfig;
use crate::error::LatchkeyError;
use latchkey_cfa::{Cfa, CfaEdge};
use serde::Serialize;
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::iter::once;
use std::sync::Arc;

impl AbstractState for AliasState {
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
        let next = AliasTransfer::new(self.config().clone()).apply(self, edge.borrow())?;
        Ok(once(next).into())
    }
}

impl Strengthen<AliasState> for ControlState {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AliasStatistics {
    pub alias_size: usize,
    pub rcu_size: usize,
}

impl AliasStatistics {
    /// The largest alias map and RCU set among `states`.
    pub fn collect<'a, I: IntoIterator<Item = &'a AliasState>>(states: I) -> Self {
        states
            .into_iter()
            .fold(Self::default(), |acc, state| AliasStatistics {
                alias_size: acc.alias_size.max(state.alias_size()),
                rcu_size: acc.rcu_size.max(state.rcu_size()),
            })
    }
}

pub type AliasAnalysisState = CompoundState<ControlState, AliasState>;

/// Finds the identifiers that hold RCU-protected pointers, directly or through aliases.
#[derive(Debug, Clone)]
pub struct AliasAnalysis {
    config: Arc<RcuConfig>,
}

impl AliasAnalysis {
    pub fn new(config: RcuConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn rcu_identifiers(reached: &ReachedSet<AliasAnalysisState>) -> BTreeSet<Identifier> {
        reached
            .states()
            .flat_map(|state| state.1.rcu().cloned())
            .collect()
    }

    pub fn statistics(reached: &ReachedSet<AliasAnalysisState>) -> AliasStatistics {
        AliasStatistics::collect(reached.states().map(|state| &state.1))
    }
}

impl ConfigurableProgramAnalysis for AliasAnalysis {
    type State = AliasAnalysisState;

    fn initial_state(&self, cfa: &Cfa) -> Result<Self::State, LatchkeyError> {
        Ok(CompoundState(
            ControlState::entry(cfa),
            AliasState::new(self.config.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analysis;
    use latchkey_cfa::{CallExpr, CfaBuilder, EdgeKind, Expr, Statement, Type, Variable};

    #[test]
    fn rcu_pointers_are_found_across_calls() {
        let int_ptr = Type::pointer_to(Type::int());
        let gp = Variable::global("gp", int_ptr.clone());
        let p = Variable::local("p", int_ptr.clone());
        let local = Variable::local("local", int_ptr.clone());

        let mut b = CfaBuilder::new("main");
        let main = b.add_function("main", vec![]).unwrap();
        let reader = b.add_function("reader", vec![]).unwrap();
        let mid = b.add_node("main");
        b.add_edge(
            reader.entry,
            reader.exit,
            10,
            EdgeKind::Statement(Statement::CallAssign {
                lhs: Expr::var(p.clone()),
                call: CallExpr::new("rcu_dereference", vec![Expr::var(gp.clone())]),
            }),
        )
        .unwrap();
        b.add_edge(
            main.entry,
            mid,
            1,
            EdgeKind::Declaration {
                var: local.clone(),
                init: Some(Expr::var(gp)),
            },
        )
        .unwrap();
        b.add_call(mid, main.exit, 2, CallExpr::new("reader", vec![]), None)
            .unwrap();
        let cfa = b.build().unwrap();

        let mut analysis = AliasAnalysis::new(RcuConfig::default());
        let result = analysis.run(&cfa).unwrap();
        let rcu = AliasAnalysis::rcu_identifiers(&result.reached);
        assert!(rcu.contains(&Identifier::local("reader", "p", int_ptr.clone())));
        assert!(rcu.contains(&Identifier::global("gp", int_ptr.clone())));
        assert!(rcu.contains(&Identifier::local("main", "local", int_ptr)));
        let stats = AliasAnalysis::statistics(&result.reached);
        assert_eq!(stats.alias_size, 2);
        assert!(stats.rcu_size >= 2);
    }
}
