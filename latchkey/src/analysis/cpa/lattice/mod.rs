pub mod flat;

/// A partial order with a least upper bound for every pair of elements.
///
/// `PartialOrd` supplies the order; `join` must produce a state that is `>=` both inputs.
pub trait JoinSemiLattice: Eq + PartialOrd {
    fn join(&mut self, other: &Self);
}
