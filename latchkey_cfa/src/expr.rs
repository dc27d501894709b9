use crate::types::{Type, Variable};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    And,
    Or,
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        f.write_str(s)
    }
}

/// A side-effect free C expression, as produced by the front end.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Var(Variable),
    Const(i64),
    Deref(Box<Expr>),
    AddrOf(Box<Expr>),
    /// `base.field`, or `base->field` when `arrow` is set
    Field {
        base: Box<Expr>,
        field: String,
        ty: Type,
        #[serde(default)]
        arrow: bool,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// A function designator, e.g. the right hand side of `fp = handler`
    FunctionName(String),
}

impl Expr {
    pub fn var(v: Variable) -> Self {
        Expr::Var(v)
    }

    pub fn deref(e: Expr) -> Self {
        Expr::Deref(Box::new(e))
    }

    pub fn addr_of(e: Expr) -> Self {
        Expr::AddrOf(Box::new(e))
    }

    pub fn arrow<S: Into<String>>(base: Expr, field: S, ty: Type) -> Self {
        Expr::Field {
            base: Box::new(base),
            field: field.into(),
            ty,
            arrow: true,
        }
    }

    pub fn dot<S: Into<String>>(base: Expr, field: S, ty: Type) -> Self {
        Expr::Field {
            base: Box::new(base),
            field: field.into(),
            ty,
            arrow: false,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// The static type of this expression.
    ///
    /// Dereferencing a non-pointer yields the inner type unchanged; the front end is trusted
    /// to have rejected such programs already.
    pub fn ty(&self) -> Type {
        match self {
            Expr::Var(v) => v.ty.clone(),
            Expr::Const(_) => Type::int(),
            Expr::Deref(inner) => {
                let ty = inner.ty();
                ty.pointee().cloned().unwrap_or(ty)
            }
            Expr::AddrOf(inner) => Type::pointer_to(inner.ty()),
            Expr::Field { ty, .. } => ty.clone(),
            Expr::Binary { left, right, .. } => {
                let l = left.ty();
                if l.is_pointer() { l } else { right.ty() }
            }
            Expr::FunctionName(_) => Type::Function,
        }
    }

    pub fn is_pointer(&self) -> bool {
        self.ty().is_pointer()
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Var(v) => write!(f, "{}", v.name),
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Deref(e) => write!(f, "*({e})"),
            Expr::AddrOf(e) => write!(f, "&({e})"),
            Expr::Field {
                base, field, arrow, ..
            } => {
                if *arrow {
                    write!(f, "{base}->{field}")
                } else {
                    write!(f, "{base}.{field}")
                }
            }
            Expr::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::FunctionName(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallExpr {
    pub function: String,
    #[serde(default)]
    pub args: Vec<Expr>,
}

impl CallExpr {
    pub fn new<S: Into<String>>(function: S, args: Vec<Expr>) -> Self {
        Self {
            function: function.into(),
            args,
        }
    }
}

impl Display for CallExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.function)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    Assign { lhs: Expr, rhs: Expr },
    Call(CallExpr),
    CallAssign { lhs: Expr, call: CallExpr },
    Expr(Expr),
}

impl Statement {
    /// The call performed by this statement, if any.
    pub fn call(&self) -> Option<&CallExpr> {
        match self {
            Statement::Call(call) | Statement::CallAssign { call, .. } => Some(call),
            _ => None,
        }
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Statement::Assign { lhs, rhs } => write!(f, "{lhs} = {rhs};"),
            Statement::Call(call) => write!(f, "{call};"),
            Statement::CallAssign { lhs, call } => write!(f, "{lhs} = {call};"),
            Statement::Expr(e) => write!(f, "{e};"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_types_follow_pointer_structure() {
        let p = Variable::local("p", Type::pointer_to(Type::int()));
        let deref = Expr::deref(Expr::var(p.clone()));
        assert_eq!(deref.ty(), Type::int());
        assert!(Expr::addr_of(deref).is_pointer());
        let sum = Expr::binary(BinaryOp::Add, Expr::Const(1), Expr::var(p));
        assert!(sum.is_pointer());
    }

    #[test]
    fn field_access_display() {
        let s = Variable::global("s", Type::pointer_to(Type::Struct("dev".into())));
        let e = Expr::arrow(Expr::var(s), "count", Type::int());
        assert_eq!(e.to_string(), "s->count");
    }
}
