use crate::analysis::cpa::lattice::JoinSemiLattice;
use crate::analysis::identifier::MemoryLocation;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// The possible targets of a pointer.
///
/// `Bot` means nothing is known to be pointed to yet, `Top` that the pointer may point
/// anywhere. An explicit set is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum LocationSet {
    #[default]
    Bot,
    Explicit(BTreeSet<MemoryLocation>),
    Top,
}

impl LocationSet {
    pub fn singleton(location: MemoryLocation) -> Self {
        LocationSet::Explicit(BTreeSet::from([location]))
    }

    pub fn is_bot(&self) -> bool {
        matches!(self, LocationSet::Bot)
    }

    pub fn is_top(&self) -> bool {
        matches!(self, LocationSet::Top)
    }

    /// Number of explicit targets; 0 for `Bot` and `Top`.
    pub fn size(&self) -> usize {
        match self {
            LocationSet::Explicit(set) => set.len(),
            _ => 0,
        }
    }

    pub fn may_point_to(&self, location: &MemoryLocation) -> bool {
        match self {
            LocationSet::Bot => false,
            LocationSet::Explicit(set) => set.contains(location),
            LocationSet::Top => true,
        }
    }

    pub fn add_element(&self, location: MemoryLocation) -> Self {
        self.add_elements(std::iter::once(location))
    }

    pub fn add_elements<I: IntoIterator<Item = MemoryLocation>>(&self, locations: I) -> Self {
        match self {
            LocationSet::Top => LocationSet::Top,
            LocationSet::Bot => {
                let set: BTreeSet<_> = locations.into_iter().collect();
                if set.is_empty() {
                    LocationSet::Bot
                } else {
                    LocationSet::Explicit(set)
                }
            }
            LocationSet::Explicit(set) => {
                let mut set = set.clone();
                set.extend(locations);
                LocationSet::Explicit(set)
            }
        }
    }

    /// The explicit targets, empty for `Bot` and `Top`.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryLocation> {
        let set = match self {
            LocationSet::Explicit(set) => Some(set),
            _ => None,
        };
        set.into_iter().flatten()
    }

    /// Applies `f` to every explicit target.
    pub fn map<F: FnMut(&MemoryLocation) -> MemoryLocation>(&self, f: F) -> Self {
        match self {
            LocationSet::Explicit(set) => LocationSet::Explicit(set.iter().map(f).collect()),
            other => other.clone(),
        }
    }
}

impl JoinSemiLattice for LocationSet {
    fn join(&mut self, other: &Self) {
        *self = match (&*self, other) {
            (LocationSet::Top, _) | (_, LocationSet::Top) => LocationSet::Top,
            (LocationSet::Bot, o) => o.clone(),
            (s, LocationSet::Bot) => s.clone(),
            (LocationSet::Explicit(_), LocationSet::Explicit(o)) => {
                self.add_elements(o.iter().cloned())
            }
        }
    }
}

impl PartialOrd for LocationSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            _ if self == other => Some(Ordering::Equal),
            (LocationSet::Bot, _) | (_, LocationSet::Top) => Some(Ordering::Less),
            (_, LocationSet::Bot) | (LocationSet::Top, _) => Some(Ordering::Greater),
            (LocationSet::Explicit(a), LocationSet::Explicit(b)) => {
                if a.is_subset(b) {
                    Some(Ordering::Less)
                } else if b.is_subset(a) {
                    Some(Ordering::Greater)
                } else {
                    None
                }
            }
        }
    }
}

impl Display for LocationSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationSet::Bot => write!(f, "⊥"),
            LocationSet::Top => write!(f, "⊤"),
            LocationSet::Explicit(set) => {
                write!(f, "{{")?;
                for (i, location) in set.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{location}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
