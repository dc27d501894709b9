//! Canonical names for the memory an expression touches.

mod creator;

pub use creator::IdentifierCreator;

use internment::Intern;
use latchkey_cfa::Type;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

/// A program entity an expression refers to, with a dereference depth.
///
/// `deref` counts how many times the base entity is dereferenced: `*p` is `p` with depth 1 and
/// `&x` is `x` with depth -1. Structure fields point to their owner, forming a chain
/// `field -> owner -> owner...`; owners are interned so that the chain is shared by every
/// identifier mentioning it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    Global {
        name: String,
        ty: Type,
        deref: i32,
    },
    Local {
        name: String,
        function: String,
        ty: Type,
        deref: i32,
    },
    Structure {
        field: String,
        ty: Type,
        deref: i32,
        owner: Intern<Identifier>,
    },
    Function {
        name: String,
        deref: i32,
    },
    Constant {
        value: i64,
        deref: i32,
    },
}

impl Identifier {
    pub fn global<S: Into<String>>(name: S, ty: Type) -> Self {
        Identifier::Global {
            name: name.into(),
            ty,
            deref: 0,
        }
    }

    pub fn local<S: Into<String>, F: Into<String>>(function: F, name: S, ty: Type) -> Self {
        Identifier::Local {
            name: name.into(),
            function: function.into(),
            ty,
            deref: 0,
        }
    }

    pub fn field<S: Into<String>>(owner: Identifier, field: S, ty: Type) -> Self {
        Identifier::Structure {
            field: field.into(),
            ty,
            deref: 0,
            owner: Intern::new(owner),
        }
    }

    pub fn deref(&self) -> i32 {
        match self {
            Identifier::Global { deref, .. }
            | Identifier::Local { deref, .. }
            | Identifier::Structure { deref, .. }
            | Identifier::Function { deref, .. }
            | Identifier::Constant { deref, .. } => *deref,
        }
    }

    /// The same entity at dereference depth `deref`.
    pub fn with_deref(&self, deref: i32) -> Self {
        let mut id = self.clone();
        match &mut id {
            Identifier::Global { deref: d, .. }
            | Identifier::Local { deref: d, .. }
            | Identifier::Structure { deref: d, .. }
            | Identifier::Function { deref: d, .. }
            | Identifier::Constant { deref: d, .. } => *d = deref,
        }
        id
    }

    pub fn clear_deref(&self) -> Self {
        self.with_deref(0)
    }

    /// Whether this names a variable or field, as opposed to a function or constant.
    pub fn is_single(&self) -> bool {
        matches!(
            self,
            Identifier::Global { .. } | Identifier::Local { .. } | Identifier::Structure { .. }
        )
    }

    pub fn is_global(&self) -> bool {
        match self {
            Identifier::Global { .. } => true,
            Identifier::Structure { owner, .. } => owner.is_global(),
            _ => false,
        }
    }

    /// Whether reaching this entity goes through a pointer.
    pub fn is_dereferenced(&self) -> bool {
        match self {
            Identifier::Structure { deref, owner, .. } => *deref > 0 || owner.is_dereferenced(),
            other => other.deref() > 0,
        }
    }

    /// Whether accesses to this entity may be visible to other threads.
    pub fn is_shared(&self) -> bool {
        self.is_single() && (self.is_global() || self.is_dereferenced())
    }

    /// The declared type of the base entity, before dereferencing.
    pub fn declared_type(&self) -> Option<&Type> {
        match self {
            Identifier::Global { ty, .. }
            | Identifier::Local { ty, .. }
            | Identifier::Structure { ty, .. } => Some(ty),
            _ => None,
        }
    }

    /// Whether the value denoted by this identifier is a pointer.
    pub fn is_pointer(&self) -> bool {
        match self {
            Identifier::Function { .. } => self.deref() < 0,
            Identifier::Constant { .. } => false,
            _ => self
                .declared_type()
                .and_then(|ty| ty.dereferenced(self.deref()))
                .is_some_and(|ty| ty.is_pointer()),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Identifier::Global { name, .. }
            | Identifier::Local { name, .. }
            | Identifier::Function { name, .. } => name.clone(),
            Identifier::Structure { field, .. } => field.clone(),
            Identifier::Constant { value, .. } => value.to_string(),
        }
    }

    pub fn owner(&self) -> Option<&Identifier> {
        match self {
            Identifier::Structure { owner, .. } => Some(owner),
            _ => None,
        }
    }

    /// This identifier at every depth from its own down to 0, outermost first: `**p` gives
    /// `**p`, `*p`, `p`.
    pub fn dereferenced_identifiers(&self) -> Vec<Identifier> {
        (0..=self.deref().max(0))
            .rev()
            .map(|d| self.with_deref(d))
            .collect()
    }

    /// The storage location of the base entity, ignoring the dereference depth.
    pub fn memory_location(&self) -> Option<MemoryLocation> {
        match self {
            Identifier::Global { name, .. } | Identifier::Function { name, .. } => {
                Some(MemoryLocation::global(name.clone()))
            }
            Identifier::Local { name, function, .. } => {
                Some(MemoryLocation::local(function.clone(), name.clone()))
            }
            Identifier::Structure { field, owner, .. } => {
                let base = owner.memory_location()?;
                Some(MemoryLocation {
                    identifier: format!("{}.{}", base.identifier, field),
                    function: base.function,
                })
            }
            Identifier::Constant { .. } => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Identifier::Global { .. } => 0,
            Identifier::Local { .. } => 1,
            Identifier::Structure { .. } => 2,
            Identifier::Function { .. } => 3,
            Identifier::Constant { .. } => 4,
        }
    }
}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        self.deref().hash(state);
        match self {
            Identifier::Global { name, ty, .. } => (name, ty).hash(state),
            Identifier::Local {
                name, function, ty, ..
            } => (name, function, ty).hash(state),
            Identifier::Structure {
                field, ty, owner, ..
            } => {
                (field, ty).hash(state);
                Identifier::hash(owner, state)
            }
            Identifier::Function { name, .. } => name.hash(state),
            Identifier::Constant { value, .. } => value.hash(state),
        }
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> Ordering {
        use Identifier::*;
        let by_kind = match (self, other) {
            (Global { name: a, ty: ta, .. }, Global { name: b, ty: tb, .. }) => {
                a.cmp(b).then_with(|| ta.cmp(tb))
            }
            (
                Local {
                    name: a,
                    function: fa,
                    ty: ta,
                    ..
                },
                Local {
                    name: b,
                    function: fb,
                    ty: tb,
                    ..
                },
            ) => fa.cmp(fb).then_with(|| a.cmp(b)).then_with(|| ta.cmp(tb)),
            (
                Structure {
                    field: a,
                    ty: ta,
                    owner: oa,
                    ..
                },
                Structure {
                    field: b,
                    ty: tb,
                    owner: ob,
                    ..
                },
            ) => Identifier::cmp(oa, ob)
                .then_with(|| a.cmp(b))
                .then_with(|| ta.cmp(tb)),
            (Function { name: a, .. }, Function { name: b, .. }) => a.cmp(b),
            (Constant { value: a, .. }, Constant { value: b, .. }) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        };
        by_kind.then_with(|| self.deref().cmp(&other.deref()))
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let deref = self.deref();
        if deref > 0 {
            write!(f, "{}", "*".repeat(deref.unsigned_abs() as usize))?;
        } else if deref < 0 {
            write!(f, "{}", "&".repeat(deref.unsigned_abs() as usize))?;
        }
        match self {
            Identifier::Structure { field, owner, .. } => write!(f, "({owner}).{field}"),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// A storable location: a global, or a local of some function.
///
/// Rendered as `function::name` for locals.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryLocation {
    function: Option<String>,
    identifier: String,
}

impl MemoryLocation {
    pub fn global<S: Into<String>>(identifier: S) -> Self {
        Self {
            function: None,
            identifier: identifier.into(),
        }
    }

    pub fn local<F: Into<String>, S: Into<String>>(function: F, identifier: S) -> Self {
        Self {
            function: Some(function.into()),
            identifier: identifier.into(),
        }
    }

    pub fn function(&self) -> Option<&str> {
        self.function.as_deref()
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// This location's name without its function scope.
    pub fn to_global(&self) -> Self {
        Self::global(self.identifier.clone())
    }

    /// Fictional locations stand for memory with no name in the program, such as heap
    /// allocations.
    pub fn is_fictional(&self) -> bool {
        self.identifier.contains("##")
    }
}

impl Display for MemoryLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.function {
            Some(function) => write!(f, "{function}::{}", self.identifier),
            None => write!(f, "{}", self.identifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ptr() -> Type {
        Type::pointer_to(Type::Struct("dev".into()))
    }

    #[test]
    fn display_shows_dereferences_and_owners() {
        let p = Identifier::local("f", "p", ptr());
        assert_eq!(p.with_deref(2).to_string(), "**p");
        assert_eq!(p.with_deref(-1).to_string(), "&p");
        let field = Identifier::field(p.with_deref(1), "lock", Type::int());
        assert_eq!(field.to_string(), "(*p).lock");
        assert_eq!(
            field.memory_location().unwrap().to_string(),
            "f::p.lock"
        );
    }

    #[test]
    fn sharing_follows_ownership() {
        let g = Identifier::global("g", ptr());
        let l = Identifier::local("f", "l", ptr());
        assert!(g.is_shared());
        assert!(!l.is_shared());
        assert!(l.with_deref(1).is_shared());
        assert!(Identifier::field(g.clone(), "x", Type::int()).is_shared());
        assert!(!Identifier::field(l.clone(), "x", Type::int()).is_shared());
        assert!(Identifier::field(l.with_deref(1), "x", Type::int()).is_shared());
    }

    #[test]
    fn ordering_is_structural() {
        let a = Identifier::field(Identifier::global("a", ptr()), "x", Type::int());
        let b = Identifier::field(Identifier::global("b", ptr()), "x", Type::int());
        assert!(a < b);
        assert_eq!(a.clone().cmp(&a), Ordering::Equal);
        assert!(Identifier::global("z", ptr()) < Identifier::local("f", "a", ptr()));
        let g = Identifier::global("g", ptr());
        assert!(g < g.with_deref(1));
    }

    #[test]
    fn dereferenced_identifiers_walk_down_to_zero() {
        let p = Identifier::global("p", Type::pointer_to(ptr())).with_deref(2);
        let ids: Vec<String> = p
            .dereferenced_identifiers()
            .iter()
            .map(|i| i.to_string())
            .collect();
        assert_eq!(ids, vec!["**p", "*p", "p"]);
        assert!(p.with_deref(1).is_pointer());
        assert!(!p.is_pointer());
    }

    #[test]
    fn fictional_locations() {
        assert!(MemoryLocation::global("##alloc_malloc_3").is_fictional());
        assert!(!MemoryLocation::local("main", "x").is_fictional());
        assert_eq!(MemoryLocation::local("main", "x").to_string(), "main::x");
    }
}
