use crate::analysis::callstack::CallstackState;
use crate::analysis::cpa::lattice::JoinSemiLattice;
use crate::analysis::cpa::state::{
    AbstractState, CallstackProvider, MergeOutcome, StateDisplay, Successor,
};
use crate::analysis::identifier::{IdentifierCreator, MemoryLocation};
use crate::analysis::pointer::PointerState;
use crate::config::RcuConfig;
use crate::error::LatchkeyError;
use im::OrdSet;
use latchkey_cfa::{CallExpr, CfaEdge, EdgeKind, Expr, Statement};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::Formatter;
use std::hash::{Hash, Hasher};
use std::iter::once;
use std::sync::Arc;
use tracing::debug;

/// Searches for pointers passed to the RCU primitives, on top of a points-to analysis that
/// provides the set of known memory locations.
#[derive(Debug, Clone)]
pub struct RcuSearchState {
    pointer: PointerState,
    rcu_pointers: OrdSet<MemoryLocation>,
    config: Arc<RcuConfig>,
}

impl RcuSearchState {
    pub fn new(pointer: PointerState, config: Arc<RcuConfig>) -> Self {
        Self {
            pointer,
            rcu_pointers: OrdSet::new(),
            config,
        }
    }

    pub fn pointer(&self) -> &PointerState {
        &self.pointer
    }

    pub fn rcu_pointers(&self) -> impl Iterator<Item = &MemoryLocation> {
        self.rcu_pointers.iter()
    }

    pub fn is_rcu_pointer(&self, location: &MemoryLocation) -> bool {
        self.rcu_pointers.contains(location)
    }

    /// The location of `expr`, scoped to `function` when the points-to analysis knows it
    /// that way and global otherwise.
    fn location(&self, function: &str, expr: &Expr) -> Option<MemoryLocation> {
        let location = IdentifierCreator::new(function)
            .create(expr)
            .memory_location()?;
        if self.pointer.known_locations().contains(&location) {
            Some(location)
        } else {
            Some(location.to_global())
        }
    }

    fn with_locations<'e, I>(&self, function: &str, exprs: I) -> Self
    where
        I: IntoIterator<Item = &'e Expr>,
    {
        let mut next = self.clone();
        for location in exprs.into_iter().filter_map(|e| self.location(function, e)) {
            debug!(%location, "rcu pointer");
            next.rcu_pointers.insert(location);
        }
        next
    }

    fn search_assign<'c>(&self, call: &'c CallExpr) -> Option<&'c [Expr]> {
        (call.function.contains(&self.config.search_assign) && call.args.len() >= 2)
            .then(|| &call.args[..2])
    }

    fn handle_edge(&self, edge: &CfaEdge) -> Result<Self, LatchkeyError> {
        let function = edge.function.as_str();
        match &edge.kind {
            // ldv_rcu_assign_pointer(gp, p)
            EdgeKind::Statement(Statement::Call(call)) => {
                if let Some(args) = self.search_assign(call) {
                    return Ok(self.with_locations(function, args));
                }
            }
            EdgeKind::FunctionCall { call, .. } => {
                if let Some(args) = self.search_assign(call) {
                    let mut next = self.with_locations(function, args);
                    next.pointer = self.pointer_step(edge)?;
                    return Ok(next);
                }
            }
            // p = ldv_rcu_dereference(gp)
            EdgeKind::Statement(Statement::CallAssign { lhs, call })
                if lhs.is_pointer() && call.function.contains(&self.config.search_deref) =>
            {
                let exprs = call.args.first().into_iter().chain(once(lhs));
                return Ok(self.with_locations(function, exprs));
            }
            // the same, when the dereference primitive has a body
            EdgeKind::FunctionReturn {
                call,
                caller,
                result: Some(lhs),
                ..
            } if lhs.is_pointer() && call.function.contains(&self.config.search_deref) => {
                let exprs = call.args.first().into_iter().chain(once(lhs));
                let mut next = self.with_locations(caller, exprs);
                next.pointer = self.pointer_step(edge)?;
                return Ok(next);
            }
            _ => {}
        }
        let mut next = self.clone();
        next.pointer = self.pointer_step(edge)?;
        Ok(next)
    }

    fn pointer_step(&self, edge: &CfaEdge) -> Result<PointerState, LatchkeyError> {
        Ok(self
            .pointer
            .transfer(edge)?
            .into_iter()
            .next()
            .unwrap_or_else(|| self.pointer.clone()))
    }
}

impl PartialEq for RcuSearchState {
    fn eq(&self, other: &Self) -> bool {
        self.pointer == other.pointer && self.rcu_pointers == other.rcu_pointers
    }
}

impl Eq for RcuSearchState {}

impl Hash for RcuSearchState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pointer.hash(state);
        self.rcu_pointers.hash(state);
    }
}

impl PartialOrd for RcuSearchState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let pointer = self.pointer.partial_cmp(&other.pointer)?;
        let subset = self.rcu_pointers.is_subset(&other.rcu_pointers);
        let superset = other.rcu_pointers.is_subset(&self.rcu_pointers);
        match (pointer, subset, superset) {
            (Ordering::Equal, true, true) => Some(Ordering::Equal),
            (Ordering::Less | Ordering::Equal, true, _) => Some(Ordering::Less),
            (Ordering::Greater | Ordering::Equal, _, true) => Some(Ordering::Greater),
            _ => None,
        }
    }
}

impl JoinSemiLattice for RcuSearchState {
    fn join(&mut self, other: &Self) {
        self.pointer.join(&other.pointer);
        self.rcu_pointers = self.rcu_pointers.clone().union(other.rcu_pointers.clone());
    }
}

impl StateDisplay for RcuSearchState {
    fn fmt_state(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.pointer.fmt_state(f)?;
        write!(f, " rcu {{")?;
        for (i, location) in self.rcu_pointers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{location}")?;
        }
        write!(f, "}}")
    }
}

impl CallstackProvider for RcuSearchState {
    fn callstack(&self) -> Option<&CallstackState> {
        None
    }
}

impl AbstractState for RcuSearchState {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PointerConfig;
    use latchkey_cfa::{NodeIndex, Type, Variable};

    fn int_ptr() -> Type {
        Type::pointer_to(Type::int())
    }

    fn start() -> RcuSearchState {
        RcuSearchState::new(
            PointerState::new(Arc::new(PointerConfig::default())),
            Arc::new(RcuConfig::default()),
        )
    }

    fn step(state: &RcuSearchState, kind: EdgeKind) -> RcuSearchState {
        let edge = CfaEdge {
            source: NodeIndex::new(0),
            target: NodeIndex::new(1),
            function: "writer".into(),
            line: 1,
            kind,
        };
        state.transfer(edge).unwrap().into_iter().next().unwrap()
    }

    #[test]
    fn search_calls_collect_locations() {
        let gp = Variable::global("gp", int_ptr());
        let p = Variable::local("p", int_ptr());
        let x = Variable::global("x", Type::int());
        // p is known to the points-to analysis once it has been assigned
        let s = step(
            &start(),
            EdgeKind::Declaration {
                var: p.clone(),
                init: Some(Expr::addr_of(Expr::var(x))),
            },
        );
        let s = step(
            &s,
            EdgeKind::Statement(Statement::Call(CallExpr::new(
                "ldv_rcu_assign_pointer",
                vec![Expr::var(gp.clone()), Expr::var(p.clone())],
            ))),
        );
        assert!(s.is_rcu_pointer(&MemoryLocation::global("gp")));
        assert!(s.is_rcu_pointer(&MemoryLocation::local("writer", "p")));
        assert!(s.pointer().size() > 0);

        let q = Variable::local("q", int_ptr());
        let s = step(
            &s,
            EdgeKind::Statement(Statement::CallAssign {
                lhs: Expr::var(q),
                call: CallExpr::new("ldv_rcu_dereference", vec![Expr::var(gp)]),
            }),
        );
        // q is unknown to the pointer state, so it falls back to the global scope
        assert!(s.is_rcu_pointer(&MemoryLocation::global("q")));
        assert_eq!(s.rcu_pointers().count(), 3);
    }

    #[test]
    fn other_edges_run_the_pointer_transfer() {
        let g = Variable::global("g", int_ptr());
        let y = Variable::global("y", Type::int());
        let s = step(
            &start(),
            EdgeKind::Statement(Statement::Assign {
                lhs: Expr::var(g),
                rhs: Expr::addr_of(Expr::var(y)),
            }),
        );
        assert!(
            s.pointer()
                .definitely_points_to(&MemoryLocation::global("g"), &MemoryLocation::global("y"))
        );
        assert_eq!(s.rcu_pointers().count(), 0);
    }
}
