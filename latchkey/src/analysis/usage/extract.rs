use crate::analysis::identifier::{Identifier, IdentifierCreator, MemoryLocation};
use crate::analysis::pointer::PointerState;
use crate::analysis::usage::info::Access;
use crate::analysis::usage::state::UsageState;
use crate::config::UsageConfig;
use internment::Intern;
use latchkey_cfa::{CallExpr, CfaEdge, EdgeKind, Expr, Statement, Type};

/// Turns CFA edges into the accesses to shared identifiers they perform.
#[derive(Debug, Clone, Copy)]
pub struct UsageExtractor<'a> {
    config: &'a UsageConfig,
}

impl<'a> UsageExtractor<'a> {
    pub fn new(config: &'a UsageConfig) -> Self {
        Self { config }
    }

    /// The shared accesses of `edge`, resolved through the local `bindings` first and then through
    /// the definite targets of `pointer`.
    pub fn extract(
        &self,
        edge: &CfaEdge,
        bindings: &UsageState,
        pointer: &PointerState,
    ) -> Vec<(Identifier, Access)> {
        if self.config.skipped_functions.contains(&edge.function) {
            return Vec::new();
        }
        let mut collector = Collector {
            creator: IdentifierCreator::new(edge.function.clone()),
            accesses: Vec::new(),
        };
        match &edge.kind {
            EdgeKind::Declaration {
                init: Some(init), ..
            } => collector.read(init),
            EdgeKind::Statement(statement) => match statement {
                Statement::Assign { lhs, rhs } => {
                    collector.write(lhs);
                    collector.read(rhs);
                }
                Statement::Call(call) => self.call_arguments(&mut collector, call),
                Statement::CallAssign { lhs, call } => {
                    collector.write(lhs);
                    self.call_arguments(&mut collector, call);
                }
                Statement::Expr(expr) => collector.read(expr),
            },
            EdgeKind::Assume { condition, .. } => collector.read(condition),
            EdgeKind::FunctionCall { call, .. } => self.call_arguments(&mut collector, call),
            EdgeKind::FunctionReturn {
                caller,
                result: Some(lhs),
                ..
            } => {
                collector.creator.clear(caller.clone());
                collector.write(lhs);
            }
            EdgeKind::Return { value: Some(value) } => collector.read(value),
            _ => {}
        }

        let mut accesses: Vec<(Identifier, Access)> = collector
            .accesses
            .into_iter()
            .map(|(id, access)| (resolve(&id, bindings, pointer), access))
            .filter(|(id, _)| id.is_shared() && !self.is_skipped(id))
            .collect();
        accesses.sort();
        accesses.dedup();
        accesses
    }

    fn call_arguments(&self, collector: &mut Collector, call: &CallExpr) {
        if self.config.skipped_functions.contains(&call.function) {
            return;
        }
        for arg in &call.args {
            collector.read(arg);
        }
    }

    fn is_skipped(&self, id: &Identifier) -> bool {
        let mut current = Some(id);
        while let Some(id) = current {
            if self.config.skipped_variables.contains(&id.name()) {
                return true;
            }
            current = id.owner();
        }
        false
    }
}

struct Collector {
    creator: IdentifierCreator,
    accesses: Vec<(Identifier, Access)>,
}

impl Collector {
    fn push(&mut self, expr: &Expr, access: Access) {
        self.accesses.push((self.creator.create(expr), access));
    }

    /// Records `expr` as written, and everything read to find its address.
    fn write(&mut self, expr: &Expr) {
        match expr {
            Expr::Var(_) | Expr::Deref(_) | Expr::Field { .. } => {
                self.push(expr, Access::Write);
                self.address(expr);
            }
            other => self.read(other),
        }
    }

    fn read(&mut self, expr: &Expr) {
        match expr {
            Expr::Var(_) => self.push(expr, Access::Read),
            Expr::Deref(_) | Expr::Field { .. } => {
                self.push(expr, Access::Read);
                self.address(expr);
            }
            Expr::AddrOf(inner) => self.address(inner),
            Expr::Binary { left, right, .. } => {
                self.read(left);
                self.read(right);
            }
            Expr::Const(_) | Expr::FunctionName(_) => {}
        }
    }

    /// The reads needed to compute the address of the lvalue `expr`.
    fn address(&mut self, expr: &Expr) {
        match expr {
            Expr::Deref(inner) => self.read(inner),
            Expr::Field {
                base, arrow: true, ..
            } => self.read(base),
            Expr::Field { base, .. } => self.address(base),
            Expr::Var(_) | Expr::Const(_) | Expr::FunctionName(_) => {}
            Expr::AddrOf(inner) => self.address(inner),
            Expr::Binary { .. } => self.read(expr),
        }
    }
}

/// Attributes an access made through local pointers to the entity it reaches.
fn resolve(id: &Identifier, bindings: &UsageState, pointer: &PointerState) -> Identifier {
    let id = match id {
        Identifier::Structure {
            field,
            ty,
            deref,
            owner,
        } => Identifier::Structure {
            field: field.clone(),
            ty: ty.clone(),
            deref: *deref,
            owner: Intern::new(resolve(owner, bindings, pointer)),
        },
        other => other.clone(),
    };
    let linked = bindings.links_if_necessary(&id);
    definite_pointee(&linked, pointer).unwrap_or(linked)
}

/// The entity a dereferenced local pointer reaches, when the pointer has a single target.
fn definite_pointee(id: &Identifier, pointer: &PointerState) -> Option<Identifier> {
    let Identifier::Local {
        function,
        name,
        ty,
        deref,
    } = id
    else {
        return None;
    };
    if *deref <= 0 {
        return None;
    }
    let target = pointer.definite_target(&MemoryLocation::local(function.clone(), name.clone()))?;
    if target.is_fictional() || target.identifier().contains('.') {
        return None;
    }
    let pointee = ty.pointee().cloned().unwrap_or_else(Type::int);
    Some(located(target, pointee, deref - 1))
}

fn located(location: &MemoryLocation, ty: Type, deref: i32) -> Identifier {
    match location.function() {
        Some(function) => Identifier::Local {
            name: location.identifier().to_string(),
            function: function.to_string(),
            ty,
            deref,
        },
        None => Identifier::Global {
            name: location.identifier().to_string(),
            ty,
            deref,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PointerConfig;
    use latchkey_cfa::{BinaryOp, NodeIndex, Variable};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn edge(kind: EdgeKind) -> CfaEdge {
        CfaEdge {
            source: NodeIndex::new(0),
            target: NodeIndex::new(1),
            function: "worker".into(),
            line: 3,
            kind,
        }
    }

    fn pointer() -> PointerState {
        PointerState::new(Arc::new(PointerConfig::default()))
    }

    fn names(accesses: &[(Identifier, Access)]) -> Vec<(String, Access)> {
        accesses
            .iter()
            .map(|(id, access)| (id.to_string(), *access))
            .collect()
    }

    fn int_ptr() -> Type {
        Type::pointer_to(Type::int())
    }

    #[test]
    fn assignments_write_the_lhs_and_read_the_rhs() {
        let config = UsageConfig::default();
        let g = Variable::global("g", Type::int());
        let h = Variable::global("h", Type::int());
        let local = Variable::local("tmp", Type::int());
        let assign = edge(EdgeKind::Statement(Statement::Assign {
            lhs: Expr::var(g.clone()),
            rhs: Expr::binary(BinaryOp::Add, Expr::var(h), Expr::var(local)),
        }));
        let accesses = UsageExtractor::new(&config).extract(&assign, &UsageState::new(), &pointer());
        assert_eq!(
            names(&accesses),
            vec![("g".to_string(), Access::Write), ("h".to_string(), Access::Read)]
        );

        let assume = edge(EdgeKind::Assume {
            condition: Expr::binary(BinaryOp::Eq, Expr::var(g), Expr::Const(1)),
            truth: false,
        });
        let accesses = UsageExtractor::new(&config).extract(&assume, &UsageState::new(), &pointer());
        assert_eq!(names(&accesses), vec![("g".to_string(), Access::Read)]);
    }

    #[test]
    fn dereferences_are_shared_until_resolved() {
        let config = UsageConfig::default();
        let p = Variable::local("p", int_ptr());
        let store = edge(EdgeKind::Statement(Statement::Assign {
            lhs: Expr::deref(Expr::var(p)),
            rhs: Expr::Const(0),
        }));
        let extractor = UsageExtractor::new(&config);

        let accesses = extractor.extract(&store, &UsageState::new(), &pointer());
        assert_eq!(names(&accesses), vec![("*p".to_string(), Access::Write)]);

        let bound = UsageState::new().put(
            Identifier::local("worker", "p", int_ptr()),
            Identifier::global("g", int_ptr()),
        );
        // the bound pointer itself is read to find the target
        let accesses = names(&extractor.extract(&store, &bound, &pointer()));
        assert_eq!(accesses.len(), 2);
        assert!(accesses.contains(&("g".to_string(), Access::Read)));
        assert!(accesses.contains(&("*g".to_string(), Access::Write)));

        let to_local = pointer().add_points_to(
            MemoryLocation::local("worker", "p"),
            MemoryLocation::local("worker", "x"),
        );
        assert!(extractor.extract(&store, &UsageState::new(), &to_local).is_empty());

        let to_global = pointer().add_points_to(
            MemoryLocation::local("worker", "p"),
            MemoryLocation::global("counter"),
        );
        let accesses = extractor.extract(&store, &UsageState::new(), &to_global);
        assert_eq!(names(&accesses), vec![("counter".to_string(), Access::Write)]);
    }

    #[test]
    fn fields_of_shared_owners() {
        let config = UsageConfig::default();
        let dev = Type::Struct("dev".into());
        let d = Variable::local("d", Type::pointer_to(dev.clone()));
        let s = Variable::local("s", dev);
        let extractor = UsageExtractor::new(&config);

        let through_pointer = edge(EdgeKind::Statement(Statement::Expr(Expr::arrow(
            Expr::var(d),
            "count",
            Type::int(),
        ))));
        let accesses = extractor.extract(&through_pointer, &UsageState::new(), &pointer());
        assert_eq!(names(&accesses), vec![("(*d).count".to_string(), Access::Read)]);

        let on_stack = edge(EdgeKind::Statement(Statement::Expr(Expr::dot(
            Expr::var(s),
            "count",
            Type::int(),
        ))));
        assert!(extractor.extract(&on_stack, &UsageState::new(), &pointer()).is_empty());
    }

    #[test]
    fn skipped_names_and_functions() {
        let config = UsageConfig {
            skipped_variables: BTreeSet::from(["jiffies".to_string()]),
            skipped_functions: BTreeSet::from(["printk".to_string()]),
            ..UsageConfig::default()
        };
        let extractor = UsageExtractor::new(&config);
        let jiffies = Variable::global("jiffies", Type::int());
        let g = Variable::global("g", Type::int());

        let read = edge(EdgeKind::Statement(Statement::Expr(Expr::var(jiffies))));
        assert!(extractor.extract(&read, &UsageState::new(), &pointer()).is_empty());

        let print = edge(EdgeKind::Statement(Statement::Call(CallExpr::new(
            "printk",
            vec![Expr::var(g.clone())],
        ))));
        assert!(extractor.extract(&print, &UsageState::new(), &pointer()).is_empty());

        let mut inside = edge(EdgeKind::Statement(Statement::Expr(Expr::var(g))));
        inside.function = "printk".into();
        assert!(extractor.extract(&inside, &UsageState::new(), &pointer()).is_empty());
    }

    #[test]
    fn call_results_are_written_in_the_caller() {
        let config = UsageConfig::default();
        let g = Variable::global("g", Type::int());
        let ret = edge(EdgeKind::FunctionReturn {
            call: CallExpr::new("worker", vec![]),
            caller: "main".into(),
            call_site: NodeIndex::new(0),
            result: Some(Expr::var(g)),
        });
        let accesses = UsageExtractor::new(&config).extract(&ret, &UsageState::new(), &pointer());
        assert_eq!(names(&accesses), vec![("g".to_string(), Access::Write)]);
    }
}
