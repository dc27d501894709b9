use crate::analysis::cpa::lattice::JoinSemiLattice;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::Hash;

/// A single known value, or `Top` once two different values meet.
#[derive(PartialEq, Eq, Copy, Clone, Hash, Debug)]
pub enum FlatLattice<C> {
    Value(C),
    Top,
}

impl<C> From<C> for FlatLattice<C> {
    fn from(value: C) -> Self {
        FlatLattice::Value(value)
    }
}

impl<C: Display> Display for FlatLattice<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FlatLattice::Value(a) => write!(f, "{a}"),
            FlatLattice::Top => write!(f, "T"),
        }
    }
}

impl<C> FlatLattice<C> {
    pub fn is_top(&self) -> bool {
        matches!(self, FlatLattice::Top)
    }

    pub fn value(&self) -> Option<&C> {
        match self {
            FlatLattice::Value(c) => Some(c),
            FlatLattice::Top => None,
        }
    }

    /// Applies `f` to a known value; `Top` stays `Top`.
    pub fn map<F: FnOnce(&C) -> C>(&self, f: F) -> Self {
        match self {
            FlatLattice::Value(c) => FlatLattice::Value(f(c)),
            FlatLattice::Top => FlatLattice::Top,
        }
    }
}

impl<C: PartialEq> PartialOrd for FlatLattice<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Top, Self::Top) => Some(Ordering::Equal),
            (Self::Top, Self::Value(_)) => Some(Ordering::Greater),
            (Self::Value(_), Self::Top) => Some(Ordering::Less),
            (Self::Value(a), Self::Value(b)) => (a == b).then_some(Ordering::Equal),
        }
    }
}

impl<C: Eq> JoinSemiLattice for FlatLattice<C> {
    fn join(&mut self, other: &Self) {
        if self != other {
            *self = Self::Top;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_flat_lattice() {
        let mut a = FlatLattice::Value(1);
        let b = FlatLattice::Value(1);
        a.join(&b);
        assert_eq!(a, FlatLattice::Value(1));
        a.join(&FlatLattice::Value(2));
        assert!(a.is_top());
        assert!(FlatLattice::Value(3) < FlatLattice::Top);
        assert_eq!(FlatLattice::Value(3).partial_cmp(&FlatLattice::Value(4)), None);
        assert_eq!(FlatLattice::Value(3).map(|v| v + 1), FlatLattice::Value(4));
    }
}
