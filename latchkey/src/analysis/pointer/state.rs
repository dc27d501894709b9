use crate::analysis::callstack::CallstackState;
use crate::analysis::cpa::lattice::JoinSemiLattice;
use crate::analysis::cpa::state::{
    AbstractState, CallstackProvider, DisplayState, MergeOutcome, StateDisplay, Successor,
};
use crate::analysis::identifier::MemoryLocation;
use crate::analysis::persistent_map::PersistentMap;
use crate::analysis::pointer::location_set::LocationSet;
use crate::config::PointerConfig;
use crate::error::LatchkeyError;
use latchkey_cfa::{CfaEdge, EdgeKind, Expr, Statement};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::Formatter;
use std::hash::{Hash, Hasher};
use std::iter::once;
use std::sync::Arc;

static BOT: LocationSet = LocationSet::Bot;

/// The name under which a function's return value is tracked.
pub const RETURN_VALUE: &str = "__retval__";

/// Whether a pointer points to a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointsTo {
    Yes,
    No,
    Maybe,
}

/// A flow-insensitive points-to map: every location the analysis has seen written with a
/// pointer maps to the union of all targets written to it.
#[derive(Debug, Clone)]
pub struct PointerState {
    points_to: PersistentMap<MemoryLocation, LocationSet>,
    config: Arc<PointerConfig>,
}

impl PointerState {
    pub fn new(config: Arc<PointerConfig>) -> Self {
        Self {
            points_to: PersistentMap::new(),
            config,
        }
    }

    pub fn add_points_to(&self, source: MemoryLocation, target: MemoryLocation) -> Self {
        let set = self.points_to_set(&source).add_element(target);
        self.with(self.points_to.put_and_copy(source, set))
    }

    pub fn add_points_to_all<I: IntoIterator<Item = MemoryLocation>>(
        &self,
        source: MemoryLocation,
        targets: I,
    ) -> Self {
        let set = self.points_to_set(&source).add_elements(targets);
        if set.is_bot() {
            return self.clone();
        }
        self.with(self.points_to.put_and_copy(source, set))
    }

    pub fn add_points_to_set(&self, source: MemoryLocation, targets: &LocationSet) -> Self {
        match targets {
            LocationSet::Bot => self.clone(),
            LocationSet::Top => self.with(self.points_to.put_and_copy(source, LocationSet::Top)),
            LocationSet::Explicit(set) => self.add_points_to_all(source, set.iter().cloned()),
        }
    }

    /// The targets of `source`; `Bot` when nothing was recorded.
    pub fn points_to_set(&self, source: &MemoryLocation) -> &LocationSet {
        self.points_to.get_or(source, &BOT)
    }

    pub fn points_to(&self, source: &MemoryLocation, target: &MemoryLocation) -> PointsTo {
        match self.points_to_set(source) {
            LocationSet::Bot => PointsTo::No,
            LocationSet::Top => PointsTo::Maybe,
            explicit if !explicit.may_point_to(target) => PointsTo::No,
            explicit if explicit.size() == 1 => PointsTo::Yes,
            _ => PointsTo::Maybe,
        }
    }

    pub fn definitely_points_to(&self, source: &MemoryLocation, target: &MemoryLocation) -> bool {
        self.points_to(source, target) == PointsTo::Yes
    }

    pub fn definitely_not_points_to(
        &self,
        source: &MemoryLocation,
        target: &MemoryLocation,
    ) -> bool {
        self.points_to(source, target) == PointsTo::No
    }

    pub fn may_point_to(&self, source: &MemoryLocation, target: &MemoryLocation) -> bool {
        self.points_to(source, target) != PointsTo::No
    }

    /// The single target of `source`, if it has exactly one.
    pub fn definite_target(&self, source: &MemoryLocation) -> Option<&MemoryLocation> {
        let set = self.points_to_set(source);
        if set.size() == 1 { set.iter().next() } else { None }
    }

    /// Every location mentioned by the map, as a key or as an explicit target.
    pub fn known_locations(&self) -> BTreeSet<MemoryLocation> {
        self.points_to
            .keys()
            .cloned()
            .chain(self.points_to.values().flat_map(|set| set.iter().cloned()))
            .collect()
    }

    pub fn tracked_locations(&self) -> impl Iterator<Item = &MemoryLocation> {
        self.points_to.keys()
    }

    pub fn forget(&self, location: &MemoryLocation) -> Self {
        self.with(self.points_to.remove_and_copy(location))
    }

    pub fn size(&self) -> usize {
        self.points_to.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemoryLocation, &LocationSet)> {
        self.points_to.iter()
    }

    fn with(&self, points_to: PersistentMap<MemoryLocation, LocationSet>) -> Self {
        Self {
            points_to,
            config: self.config.clone(),
        }
    }

    /// The location a variable named in `function` resolves to.
    pub fn variable_location(function: &str, var: &latchkey_cfa::Variable) -> MemoryLocation {
        if var.global {
            MemoryLocation::global(var.name.clone())
        } else {
            MemoryLocation::local(function, var.name.clone())
        }
    }

    /// The locations the lvalue `expr` denotes.
    pub fn lvalue_locations(&self, function: &str, expr: &Expr) -> LocationSet {
        match expr {
            Expr::Var(var) => LocationSet::singleton(Self::variable_location(function, var)),
            Expr::Deref(inner) => self.value_targets(function, inner),
            Expr::Field {
                base, field, arrow, ..
            } => {
                let owners = if *arrow {
                    self.value_targets(function, base)
                } else {
                    self.lvalue_locations(function, base)
                };
                owners.map(|owner| field_location(owner, field))
            }
            Expr::Binary { .. } => LocationSet::Top,
            Expr::Const(_) | Expr::AddrOf(_) | Expr::FunctionName(_) => LocationSet::Bot,
        }
    }

    /// The locations the pointer value of `expr` may point to.
    pub fn value_targets(&self, function: &str, expr: &Expr) -> LocationSet {
        match expr {
            Expr::AddrOf(inner) => self.lvalue_locations(function, inner),
            Expr::FunctionName(name) => LocationSet::singleton(MemoryLocation::global(name.clone())),
            Expr::Const(_) => LocationSet::Bot,
            Expr::Binary { left, right, .. } => {
                if !left.is_pointer() && right.is_pointer() {
                    self.value_targets(function, right)
                } else {
                    self.value_targets(function, left)
                }
            }
            Expr::Var(_) | Expr::Deref(_) | Expr::Field { .. } => {
                let mut result = LocationSet::Bot;
                match self.lvalue_locations(function, expr) {
                    LocationSet::Top => return LocationSet::Top,
                    locations => {
                        for location in locations.iter() {
                            result.join(self.points_to_set(location));
                        }
                    }
                }
                result
            }
        }
    }

    /// Records that every location denoted by `lhs` may hold `targets`.
    fn assign(&self, lhs_function: &str, lhs: &Expr, targets: &LocationSet) -> Self {
        let mut state = self.clone();
        for location in self.lvalue_locations(lhs_function, lhs).iter() {
            state = state.add_points_to_set(location.clone(), targets);
        }
        state
    }

    fn handle_edge(&self, edge: &CfaEdge) -> Result<Self, LatchkeyError> {
        let function = edge.function.as_str();
        Ok(match &edge.kind {
            EdgeKind::Declaration {
                var,
                init: Some(init),
            } => {
                let targets = self.value_targets(function, init);
                self.add_points_to_set(Self::variable_location(function, var), &targets)
            }
            EdgeKind::Statement(Statement::Assign { lhs, rhs }) => {
                let targets = self.value_targets(function, rhs);
                self.assign(function, lhs, &targets)
            }
            EdgeKind::Statement(Statement::CallAssign { lhs, call }) => {
                let targets = if self.config.allocation_functions.contains(&call.function) {
                    LocationSet::singleton(MemoryLocation::global(format!(
                        "##alloc_{}_{}",
                        call.function,
                        edge.source.index()
                    )))
                } else {
                    LocationSet::Top
                };
                self.assign(function, lhs, &targets)
            }
            EdgeKind::FunctionCall { call, params, .. } => {
                let mut state = self.clone();
                for (param, arg) in params.iter().zip(&call.args) {
                    let targets = self.value_targets(function, arg);
                    state = state.add_points_to_set(
                        Self::variable_location(&call.function, param),
                        &targets,
                    );
                }
                state
            }
            EdgeKind::Return { value: Some(value) } => {
                let targets = self.value_targets(function, value);
                self.add_points_to_set(MemoryLocation::local(function, RETURN_VALUE), &targets)
            }
            EdgeKind::FunctionReturn {
                caller,
                result: Some(lhs),
                ..
            } => {
                let targets = self
                    .points_to_set(&MemoryLocation::local(function, RETURN_VALUE))
                    .clone();
                self.assign(caller, lhs, &targets)
            }
            EdgeKind::Opaque { .. } => return Err(LatchkeyError::unrecognized("pointer", edge)),
            _ => self.clone(),
        })
    }
}

fn field_location(owner: &MemoryLocation, field: &str) -> MemoryLocation {
    let identifier = format!("{}.{}", owner.identifier(), field);
    match owner.function() {
        Some(function) => MemoryLocation::local(function, identifier),
        None => MemoryLocation::global(identifier),
    }
}

impl PartialEq for PointerState {
    fn eq(&self, other: &Self) -> bool {
        self.points_to == other.points_to
    }
}

impl Eq for PointerState {}

impl Hash for PointerState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.points_to.hash(state)
    }
}

/// Pointwise order on the points-to sets; a missing key is `Bot`.
impl PartialOrd for PointerState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        let below = |a: &Self, b: &Self| {
            a.points_to
                .iter()
                .all(|(key, set)| set <= b.points_to_set(key))
        };
        if below(self, other) {
            Some(Ordering::Less)
        } else if below(other, self) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl JoinSemiLattice for PointerState {
    fn join(&mut self, other: &Self) {
        let mut points_to = self.points_to.clone();
        for (key, set) in other.points_to.iter() {
            let mut joined = self.points_to_set(key).clone();
            joined.join(set);
            points_to = points_to.put_and_copy(key.clone(), joined);
        }
        self.points_to = points_to;
    }
}

impl StateDisplay for PointerState {
    fn fmt_state(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (key, set)) in self.points_to.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key} -> {set}")?;
        }
        write!(f, "}}")
    }
}

impl CallstackProvider for PointerState {
    fn callstack(&self) -> Option<&CallstackState> {
        None
    }
}

impl AbstractState for PointerState {
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
        let next = self.handle_edge(edge.borrow())?;
        tracing::trace!(state = %DisplayState(&next), "pointer successor");
        Ok(once(next).into())
    }
}
