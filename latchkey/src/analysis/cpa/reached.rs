use crate::analysis::callstack::CallstackState;
use crate::analysis::cpa::state::{CallstackProvider, LocationState};
use latchkey_cfa::NodeIndex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

/// Identity of a state in a [`ReachedSet`].
///
/// Ids are never reused, even across [`ReachedSet::clear`], so usages keyed by an id can be
/// invalidated precisely after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(u64);

impl StateId {
    pub fn index(&self) -> u64 {
        self.0
    }
}

impl Display for StateId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A reached state together with its id. This is what travels through the waitlist.
///
/// Equality and hashing only look at the id: a waitlist entry for a state that has since been
/// widened by a merge is still "the same" entry.
#[derive(Debug, Clone)]
pub struct ReachedEntry<S> {
    pub id: StateId,
    pub state: S,
}

impl<S> PartialEq for ReachedEntry<S> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<S> Eq for ReachedEntry<S> {}

impl<S> Hash for ReachedEntry<S> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl<S: CallstackProvider> CallstackProvider for ReachedEntry<S> {
    fn callstack(&self) -> Option<&CallstackState> {
        self.state.callstack()
    }
}

/// The set of states reached so far, indexed by CFA location.
#[derive(Debug, Clone)]
pub struct ReachedSet<S> {
    states: BTreeMap<StateId, S>,
    by_location: HashMap<Option<NodeIndex>, BTreeSet<StateId>>,
    next_id: u64,
}

impl<S> Default for ReachedSet<S> {
    fn default() -> Self {
        Self {
            states: BTreeMap::new(),
            by_location: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<S: LocationState> ReachedSet<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, state: S) -> StateId {
        let id = StateId(self.next_id);
        self.next_id += 1;
        self.by_location
            .entry(state.location())
            .or_default()
            .insert(id);
        self.states.insert(id, state);
        id
    }

    /// Replaces the state stored under `id`, returning the previous one.
    pub fn replace(&mut self, id: StateId, state: S) -> Option<S> {
        let old = self.states.insert(id, state)?;
        let new_location = self.states.get(&id).and_then(|s| s.location());
        if old.location() != new_location {
            if let Some(ids) = self.by_location.get_mut(&old.location()) {
                ids.remove(&id);
            }
            self.by_location.entry(new_location).or_default().insert(id);
        }
        Some(old)
    }

    pub fn remove(&mut self, id: StateId) -> Option<S> {
        let old = self.states.remove(&id)?;
        if let Some(ids) = self.by_location.get_mut(&old.location()) {
            ids.remove(&id);
        }
        Some(old)
    }

    pub fn get(&self, id: StateId) -> Option<&S> {
        self.states.get(&id)
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.states.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// All states in order of insertion.
    pub fn iter(&self) -> impl Iterator<Item = (StateId, &S)> {
        self.states.iter().map(|(id, s)| (*id, s))
    }

    pub fn states(&self) -> impl Iterator<Item = &S> {
        self.states.values()
    }

    pub fn ids_at(&self, location: Option<NodeIndex>) -> Vec<StateId> {
        self.by_location
            .get(&location)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn at_location(&self, location: Option<NodeIndex>) -> impl Iterator<Item = (StateId, &S)> {
        self.by_location
            .get(&location)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.states.get(id).map(|s| (*id, s)))
    }

    /// Drops every state, returning the ids that were removed.
    pub fn clear(&mut self) -> Vec<StateId> {
        self.by_location.clear();
        let ids = self.states.keys().copied().collect();
        self.states.clear();
        ids
    }
}
