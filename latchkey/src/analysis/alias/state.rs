use crate::analysis::callstack::CallstackState;
use crate::analysis::cpa::lattice::JoinSemiLattice;
use crate::analysis::cpa::state::{CallstackProvider, StateDisplay};
use crate::analysis::identifier::Identifier;
use crate::analysis::persistent_map::PersistentMap;
use crate::config::RcuConfig;
use im::OrdSet;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::Formatter;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::trace;

type IdentifierMap = PersistentMap<Identifier, BTreeSet<Identifier>>;

/// Pointer aliasing, and the identifiers known to hold RCU-protected pointers.
///
/// `alias[p]` holds every expression `p` was assigned from. The RCU set is closed under
/// aliasing in both directions whenever something is added to it.
#[derive(Debug, Clone)]
pub struct AliasState {
    alias: IdentifierMap,
    points_to: IdentifierMap,
    rcu: OrdSet<Identifier>,
    config: Arc<RcuConfig>,
}

impl AliasState {
    pub fn new(config: Arc<RcuConfig>) -> Self {
        Self {
            alias: PersistentMap::new(),
            points_to: PersistentMap::new(),
            rcu: OrdSet::new(),
            config,
        }
    }

    pub(crate) fn config(&self) -> &Arc<RcuConfig> {
        &self.config
    }

    /// Records that `key` may hold the value of `value`. A `None` value only registers `key`.
    pub fn add_alias(&mut self, key: Identifier, value: Option<Identifier>) {
        let mut set = self.alias.get(&key).cloned().unwrap_or_default();
        if let Some(value) = value {
            trace!(%key, %value, "alias");
            set.insert(value);
        }
        self.alias = self.alias.put_and_copy(key, set);
    }

    pub fn clear_alias(&mut self, key: &Identifier) {
        if self.alias.contains_key(key) {
            self.alias = self.alias.put_and_copy(key.clone(), BTreeSet::new());
        }
    }

    pub fn add_points_to(&mut self, key: Identifier, target: Identifier) {
        let mut set = self.points_to.get(&key).cloned().unwrap_or_default();
        set.insert(target);
        self.points_to = self.points_to.put_and_copy(key, set);
    }

    pub fn clear_points_to(&mut self, key: &Identifier) {
        if self.points_to.contains_key(key) {
            self.points_to = self.points_to.put_and_copy(key.clone(), BTreeSet::new());
        }
    }

    /// Adds `id` to the RCU set, together with everything it aliases and everything aliasing
    /// it, transitively.
    pub fn add_to_rcu(&mut self, id: Identifier) {
        let mut worklist = vec![id];
        while let Some(id) = worklist.pop() {
            if self.rcu.contains(&id) {
                continue;
            }
            self.rcu.insert(id.clone());
            // reverse aliases have no index, so each new id rescans the alias map
            if let Some(aliases) = self.alias.get(&id) {
                worklist.extend(aliases.iter().filter(|a| !self.rcu.contains(*a)).cloned());
            }
            worklist.extend(
                self.alias
                    .iter()
                    .filter(|(key, aliases)| aliases.contains(&id) && !self.rcu.contains(*key))
                    .map(|(key, _)| key.clone()),
            );
        }
    }

    pub fn aliases(&self, key: &Identifier) -> Option<&BTreeSet<Identifier>> {
        self.alias.get(key)
    }

    pub fn points_to(&self, key: &Identifier) -> Option<&BTreeSet<Identifier>> {
        self.points_to.get(key)
    }

    pub fn is_rcu(&self, id: &Identifier) -> bool {
        self.rcu.contains(id)
    }

    pub fn rcu(&self) -> impl Iterator<Item = &Identifier> {
        self.rcu.iter()
    }

    pub fn alias_size(&self) -> usize {
        self.alias.len()
    }

    pub fn rcu_size(&self) -> usize {
        self.rcu.len()
    }

    /// Alias sets and the RCU set are contained in `other`'s; the points-to map is not
    /// compared.
    pub fn is_less_or_equal(&self, other: &Self) -> bool {
        self.alias.iter().all(|(key, aliases)| {
            other
                .alias
                .get(key)
                .is_some_and(|theirs| aliases.is_subset(theirs))
        }) && self.rcu.is_subset(&other.rcu)
    }
}

fn union(one: &IdentifierMap, other: &IdentifierMap) -> IdentifierMap {
    let mut result = one.clone();
    for (key, values) in other.iter() {
        let mut set = one.get(key).cloned().unwrap_or_default();
        set.extend(values.iter().cloned());
        result = result.put_and_copy(key.clone(), set);
    }
    result
}

impl PartialEq for AliasState {
    fn eq(&self, other: &Self) -> bool {
        self.alias == other.alias && self.points_to == other.points_to && self.rcu == other.rcu
    }
}

impl Eq for AliasState {}

impl Hash for AliasState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.alias.hash(state);
        self.points_to.hash(state);
        self.rcu.hash(state);
    }
}

impl PartialOrd for AliasState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.is_less_or_equal(other), other.is_less_or_equal(self)) {
            _ if self == other => Some(Ordering::Equal),
            (true, _) => Some(Ordering::Less),
            (_, true) => Some(Ordering::Greater),
            _ => None,
        }
    }
}

impl JoinSemiLattice for AliasState {
    fn join(&mut self, other: &Self) {
        self.alias = union(&self.alias, &other.alias);
        self.points_to = union(&self.points_to, &other.points_to);
        self.rcu = self.rcu.clone().union(other.rcu.clone());
    }
}

impl StateDisplay for AliasState {
    fn fmt_state(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "alias {{")?;
        for (i, (key, aliases)) in self.alias.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key} -> [")?;
            for (j, alias) in aliases.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{alias}")?;
            }
            write!(f, "]")?;
        }
        write!(f, "}} rcu {{")?;
        for (i, id) in self.rcu.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{id}")?;
        }
        write!(f, "}}")
    }
}

impl CallstackProvider for AliasState {
    fn callstack(&self) -> Option<&CallstackState> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_cfa::Type;

    fn empty() -> AliasState {
        AliasState::new(Arc::new(RcuConfig::default()))
    }

    fn ptr(name: &str) -> Identifier {
        Identifier::global(name, Type::pointer_to(Type::int()))
    }

    #[test]
    fn rcu_closure_reaches_reverse_aliases() {
        let mut s = empty();
        // p = q; r = p; q = s
        s.add_alias(ptr("p"), Some(ptr("q")));
        s.add_alias(ptr("r"), Some(ptr("p")));
        s.add_alias(ptr("q"), Some(ptr("s")));
        s.add_alias(ptr("unrelated"), Some(ptr("u")));
        s.add_to_rcu(ptr("p"));
        for id in ["p", "q", "r", "s"] {
            assert!(s.is_rcu(&ptr(id)), "{id}");
        }
        assert!(!s.is_rcu(&ptr("unrelated")));
        assert!(!s.is_rcu(&ptr("u")));
    }

    #[test]
    fn alias_cycles_terminate() {
        let mut s = empty();
        s.add_alias(ptr("a"), Some(ptr("b")));
        s.add_alias(ptr("b"), Some(ptr("a")));
        s.add_to_rcu(ptr("a"));
        assert_eq!(s.rcu_size(), 2);
    }

    #[test]
    fn join_is_an_upper_bound() {
        let mut a = empty();
        a.add_alias(ptr("p"), Some(ptr("x")));
        let mut b = empty();
        b.add_alias(ptr("p"), Some(ptr("y")));
        b.add_to_rcu(ptr("z"));
        let mut joined = a.clone();
        joined.join(&b);
        assert!(a.is_less_or_equal(&joined));
        assert!(b.is_less_or_equal(&joined));
        assert_eq!(joined.aliases(&ptr("p")).unwrap().len(), 2);
        assert_eq!(a.partial_cmp(&b), None);
        assert_eq!(a.partial_cmp(&joined), Some(Ordering::Less));
    }

    #[test]
    fn clearing_keeps_the_key() {
        let mut s = empty();
        s.add_alias(ptr("p"), Some(ptr("x")));
        s.clear_alias(&ptr("p"));
        assert!(s.aliases(&ptr("p")).unwrap().is_empty());
        s.clear_alias(&ptr("missing"));
        assert!(s.aliases(&ptr("missing")).is_none());
    }
}
