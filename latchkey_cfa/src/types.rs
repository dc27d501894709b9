use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The C types the analyses care about.
///
/// Only the pointer structure matters to the domains; scalar and struct types keep their
/// name for display purposes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Scalar(String),
    Pointer(Box<Type>),
    Struct(String),
    Function,
}

impl Type {
    pub fn int() -> Self {
        Type::Scalar("int".to_string())
    }

    pub fn pointer_to(ty: Type) -> Self {
        Type::Pointer(Box::new(ty))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    /// The type obtained by dereferencing this type once, if it is a pointer.
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    /// Applies `deref` dereferences (negative values take the address instead).
    ///
    /// Returns `None` when the type runs out of pointer levels.
    pub fn dereferenced(&self, deref: i32) -> Option<Type> {
        let mut ty = self.clone();
        if deref < 0 {
            for _ in 0..deref.unsigned_abs() {
                ty = Type::pointer_to(ty);
            }
            return Some(ty);
        }
        for _ in 0..deref {
            ty = ty.pointee()?.clone();
        }
        Some(ty)
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Scalar(name) => write!(f, "{name}"),
            Type::Pointer(inner) => write!(f, "{inner}*"),
            Type::Struct(name) => write!(f, "struct {name}"),
            Type::Function => write!(f, "fn"),
        }
    }
}

/// A declared variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
    #[serde(default)]
    pub global: bool,
}

impl Variable {
    pub fn global<S: Into<String>>(name: S, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            global: true,
        }
    }

    pub fn local<S: Into<String>>(name: S, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            global: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dereferencing_walks_pointer_levels() {
        let pp = Type::pointer_to(Type::pointer_to(Type::int()));
        assert_eq!(pp.dereferenced(1), Some(Type::pointer_to(Type::int())));
        assert_eq!(pp.dereferenced(2), Some(Type::int()));
        assert_eq!(pp.dereferenced(3), None);
        assert_eq!(
            Type::int().dereferenced(-1),
            Some(Type::pointer_to(Type::int()))
        );
    }
}
