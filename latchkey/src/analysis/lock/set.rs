use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// The locks held at one program point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct LockSet(BTreeSet<String>);

impl LockSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, lock: &str) -> bool {
        self.0.contains(lock)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Two accesses under compatible lock sets may run concurrently: no lock protects both.
    pub fn is_compatible_with(&self, other: &LockSet) -> bool {
        self.0.is_disjoint(&other.0)
    }

    pub fn is_subset_of(&self, other: &LockSet) -> bool {
        self.0.is_subset(&other.0)
    }
}

impl<S: Into<String>> FromIterator<S> for LockSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Smaller sets first, then by contents.
impl Ord for LockSet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.len().cmp(&other.len()).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for LockSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for LockSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, lock) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{lock}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_is_disjointness() {
        let a: LockSet = ["m"].into_iter().collect();
        let b: LockSet = ["m", "s"].into_iter().collect();
        let c: LockSet = ["s"].into_iter().collect();
        assert!(!a.is_compatible_with(&b));
        assert!(a.is_compatible_with(&c));
        assert!(LockSet::new().is_compatible_with(&LockSet::new()));
        assert!(a.is_subset_of(&b));
    }

    #[test]
    fn smaller_sets_sort_first() {
        let big: LockSet = ["a", "b"].into_iter().collect();
        let small: LockSet = ["z"].into_iter().collect();
        assert!(small < big);
        assert!(LockSet::new() < small);
        assert_eq!(big.to_string(), "[a, b]");
    }
}
