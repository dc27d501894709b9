use crate::analysis::callstack::CallstackState;
use crate::analysis::cpa::lattice::JoinSemiLattice;
use crate::analysis::cpa::state::{
    AbstractState, CallstackProvider, MergeOutcome, StateDisplay, Successor,
};
use crate::analysis::identifier::{Identifier, IdentifierCreator};
use crate::analysis::persistent_map::PersistentMap;
use crate::error::LatchkeyError;
use latchkey_cfa::{CfaEdge, EdgeKind, Expr, Statement};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt::Formatter;
use std::iter::once;

/// Local pointer variables bound to the identifiers they were assigned from.
///
/// A binding `p -> q` lets a later access to `*p` be attributed to `*q`, so that usages made
/// through local aliases land on the shared identifier they really touch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UsageState {
    bindings: PersistentMap<Identifier, Identifier>,
}

impl UsageState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn get(&self, id: &Identifier) -> Option<&Identifier> {
        self.bindings.get(id)
    }

    pub fn put(&self, from: Identifier, to: Identifier) -> Self {
        if from == to {
            return self.clone();
        }
        Self {
            bindings: self.bindings.put_and_copy(from, to),
        }
    }

    pub fn unbind(&self, from: &Identifier) -> Self {
        Self {
            bindings: self.bindings.remove_and_copy(from),
        }
    }

    /// Whether some dereferenced form of `id` has a binding: with `*b -> c` bound, `**b` is
    /// linked as well.
    pub fn contains_links(&self, id: &Identifier) -> bool {
        id.dereferenced_identifiers()
            .iter()
            .any(|i| self.bindings.contains_key(i))
    }

    /// Resolves `id` through the bindings. With `*b -> c` bound, `**b` resolves to `*c`: the
    /// extra dereferences carry over to the bound identifier.
    pub fn links_if_necessary(&self, id: &Identifier) -> Identifier {
        let mut current = id.clone();
        // bounded, since bindings may form a cycle
        for _ in 0..=self.bindings.len() {
            let linked = current
                .dereferenced_identifiers()
                .into_iter()
                .find_map(|from| self.bindings.get(&from).map(|to| (from.deref(), to)));
            match linked {
                Some((from_deref, to)) => {
                    current = to.with_deref(to.deref() + current.deref() - from_deref);
                }
                None => return current,
            }
        }
        current
    }

    /// Stop order: a state is covered by any state binding at least the same keys.
    pub fn is_less_or_equal(&self, other: &Self) -> bool {
        self.bindings.len() <= other.bindings.len()
            && self.bindings.keys().all(|key| other.bindings.contains_key(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &Identifier)> {
        self.bindings.iter()
    }

    fn bind_pointer(&self, creator: &IdentifierCreator, lhs: Identifier, rhs: &Expr) -> Self {
        if !lhs.is_pointer() || lhs.is_global() || lhs.deref() != 0 {
            return self.clone();
        }
        let target = self.links_if_necessary(&creator.create(rhs));
        if target.is_single() && target != lhs {
            self.put(lhs, target)
        } else {
            self.unbind(&lhs)
        }
    }

    fn handle_edge(&self, edge: &CfaEdge) -> Self {
        let creator = IdentifierCreator::new(edge.function.clone());
        match &edge.kind {
            EdgeKind::Declaration {
                var,
                init: Some(init),
            } => self.bind_pointer(&creator, creator.create(&Expr::var(var.clone())), init),
            EdgeKind::Statement(Statement::Assign { lhs, rhs }) => {
                self.bind_pointer(&creator, creator.create(lhs), rhs)
            }
            EdgeKind::Statement(Statement::CallAssign { lhs, .. }) => {
                self.unbind(&creator.create(lhs))
            }
            EdgeKind::FunctionCall { call, params, .. } => {
                let callee = IdentifierCreator::new(call.function.clone());
                params
                    .iter()
                    .zip(&call.args)
                    .fold(self.clone(), |state, (param, arg)| {
                        let formal = callee.create(&Expr::var(param.clone()));
                        state.bind_pointer(&creator, formal, arg)
                    })
            }
            _ => self.clone(),
        }
    }
}

/// Equal states are `Equal`; otherwise the order is strict key containment.
impl PartialOrd for UsageState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.len() < other.len() && self.is_less_or_equal(other) {
            Some(Ordering::Less)
        } else if other.len() < self.len() && other.is_less_or_equal(self) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl JoinSemiLattice for UsageState {
    fn join(&mut self, other: &Self) {
        let mut bindings = self.bindings.clone();
        for (key, value) in other.bindings.iter() {
            if !bindings.contains_key(key) {
                bindings = bindings.put_and_copy(key.clone(), value.clone());
            }
        }
        self.bindings = bindings;
    }
}

impl StateDisplay for UsageState {
    fn fmt_state(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, (from, to)) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{from}->{to}")?;
        }
        write!(f, "]")
    }
}

impl CallstackProvider for UsageState {
    fn callstack(&self) -> Option<&CallstackState> {
        None
    }
}

impl AbstractState for UsageState {
    fn merge(&mut self, other: &Self) -> MergeOutcome {
        self.merge_sep(other)
    }

    fn stop<'a, T: Iterator<Item = &'a Self>>(&'a self, mut states: T) -> bool {
        states.any(|s| self.is_less_or_equal(s))
    }

    fn transfer<'a, B: Borrow<CfaEdge>>(
        &'a self,
        edge: B,
    ) -> Result<Successor<'a, Self>, LatchkeyError> {
        Ok(once(self.handle_edge(edge.borrow())).into())
    }
}
