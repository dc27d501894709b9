use crate::analysis::identifier::Identifier;
use internment::Intern;
use latchkey_cfa::Expr;

/// Builds identifiers for the expressions of one function.
///
/// Local variables are scoped by the function the creator was made for.
#[derive(Debug, Clone)]
pub struct IdentifierCreator {
    function: String,
}

impl IdentifierCreator {
    pub fn new<S: Into<String>>(function: S) -> Self {
        Self {
            function: function.into(),
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    /// Rescopes this creator to another function.
    pub fn clear<S: Into<String>>(&mut self, function: S) {
        self.function = function.into();
    }

    pub fn create(&self, expr: &Expr) -> Identifier {
        self.create_with_deref(expr, 0)
    }

    /// Builds the identifier of `expr` dereferenced `deref` more times.
    pub fn create_with_deref(&self, expr: &Expr, deref: i32) -> Identifier {
        match expr {
            Expr::Var(v) if v.global => Identifier::Global {
                name: v.name.clone(),
                ty: v.ty.clone(),
                deref,
            },
            Expr::Var(v) => Identifier::Local {
                name: v.name.clone(),
                function: self.function.clone(),
                ty: v.ty.clone(),
                deref,
            },
            Expr::Const(value) => Identifier::Constant {
                value: *value,
                deref,
            },
            Expr::Deref(inner) => self.create_with_deref(inner, deref + 1),
            Expr::AddrOf(inner) => self.create_with_deref(inner, deref - 1),
            Expr::Field {
                base,
                field,
                ty,
                arrow,
            } => {
                let owner = self.create_with_deref(base, if *arrow { 1 } else { 0 });
                Identifier::Structure {
                    field: field.clone(),
                    ty: ty.clone(),
                    deref,
                    owner: Intern::new(owner),
                }
            }
            // pointer arithmetic stays within the object the pointer operand refers to
            Expr::Binary { left, right, .. } => {
                if !left.is_pointer() && right.is_pointer() {
                    self.create_with_deref(right, deref)
                } else {
                    self.create_with_deref(left, deref)
                }
            }
            Expr::FunctionName(name) => Identifier::Function {
                name: name.clone(),
                deref,
            },
        }
    }
}
