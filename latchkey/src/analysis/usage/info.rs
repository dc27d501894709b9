use crate::analysis::cpa::reached::StateId;
use crate::analysis::lock::LockSet;
use latchkey_cfa::NodeIndex;
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Whether an access reads or writes its identifier.
///
/// Writes sort before reads: the stronger access comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Write,
    Read,
}

impl Display for Access {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Write => write!(f, "WRITE"),
            Access::Read => write!(f, "READ"),
        }
    }
}

/// One recorded access to a shared identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UsageInfo {
    pub access: Access,
    pub locks: LockSet,
    pub node: NodeIndex,
    pub line: u32,
    pub function: String,
    /// The reached state the access was made from
    pub key_state: Option<StateId>,
    /// The witness path of this usage runs through a loop
    pub looped: bool,
}

impl UsageInfo {
    pub fn new<S: Into<String>>(
        access: Access,
        locks: LockSet,
        node: NodeIndex,
        line: u32,
        function: S,
    ) -> Self {
        Self {
            access,
            locks,
            node,
            line,
            function: function.into(),
            key_state: None,
            looped: false,
        }
    }

    pub fn with_key_state(mut self, id: StateId) -> Self {
        self.key_state = Some(id);
        self
    }

    pub fn point(&self) -> UsagePoint {
        UsagePoint {
            access: self.access,
            locks: self.locks.clone(),
        }
    }
}

impl Display for UsageInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} in {} at line {} (N{}) with {}",
            self.access,
            self.function,
            self.line,
            self.node.index(),
            self.locks
        )
    }
}

/// The abstraction of a usage that race detection works on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UsagePoint {
    pub access: Access,
    pub locks: LockSet,
}

impl UsagePoint {
    pub fn new(access: Access, locks: LockSet) -> Self {
        Self { access, locks }
    }

    /// Whether every race `other` takes part in is also a race of `self`: the access is at
    /// least as strong and fewer locks are held.
    pub fn covers(&self, other: &UsagePoint) -> bool {
        self != other && self.access <= other.access && self.locks.is_subset_of(&other.locks)
    }
}

impl Display for UsagePoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.access, self.locks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(access: Access, locks: &[&str]) -> UsagePoint {
        UsagePoint::new(access, locks.iter().copied().collect())
    }

    #[test]
    fn writes_sort_first() {
        let mut points = vec![
            point(Access::Read, &[]),
            point(Access::Write, &["a", "b"]),
            point(Access::Write, &["c"]),
            point(Access::Read, &["a"]),
        ];
        points.sort();
        assert_eq!(
            points,
            vec![
                point(Access::Write, &["c"]),
                point(Access::Write, &["a", "b"]),
                point(Access::Read, &[]),
                point(Access::Read, &["a"]),
            ]
        );
    }

    #[test]
    fn covering() {
        let write_free = point(Access::Write, &[]);
        let read_locked = point(Access::Read, &["m"]);
        let write_locked = point(Access::Write, &["m"]);
        assert!(write_free.covers(&read_locked));
        assert!(write_free.covers(&write_locked));
        assert!(write_locked.covers(&read_locked));
        assert!(!read_locked.covers(&write_locked));
        assert!(!write_free.covers(&write_free.clone()));
        assert!(!point(Access::Write, &["a"]).covers(&point(Access::Read, &["b"])));
    }
}
