use crate::analysis::alias::state::AliasState;
use crate::analysis::identifier::{Identifier, IdentifierCreator};
use crate::config::RcuConfig;
use crate::error::LatchkeyError;
use latchkey_cfa::{CallExpr, CfaEdge, EdgeKind, Expr, Statement, Variable};
use std::sync::Arc;

/// The alias transfer relation, parameterized by the RCU function names.
#[derive(Debug, Clone)]
pub struct AliasTransfer {
    config: Arc<RcuConfig>,
}

impl AliasTransfer {
    pub fn new(config: Arc<RcuConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RcuConfig {
        &self.config
    }

    pub fn apply(&self, state: &AliasState, edge: &CfaEdge) -> Result<AliasState, LatchkeyError> {
        let mut result = state.clone();
        let creator = IdentifierCreator::new(edge.function.clone());
        match &edge.kind {
            EdgeKind::Declaration { var, init } => {
                self.declaration(&mut result, &creator, var, init.as_ref())
            }
            EdgeKind::Statement(statement) => self.statement(&mut result, &creator, statement),
            EdgeKind::FunctionCall { call, params, .. } => {
                self.function_call(&mut result, &creator, call, params)
            }
            EdgeKind::Assume { .. }
            | EdgeKind::CallToReturn { .. }
            | EdgeKind::FunctionReturn { .. }
            | EdgeKind::Return { .. }
            | EdgeKind::Blank => {}
            EdgeKind::Opaque { .. } => return Err(LatchkeyError::unrecognized("alias", edge)),
        }
        Ok(result)
    }

    fn declared(creator: &IdentifierCreator, var: &Variable) -> Identifier {
        creator.create(&Expr::var(var.clone()))
    }

    fn declaration(
        &self,
        state: &mut AliasState,
        creator: &IdentifierCreator,
        var: &Variable,
        init: Option<&Expr>,
    ) {
        let declared = Self::declared(creator, var);
        if !declared.is_pointer() {
            return;
        }
        let value = init.map(|init| creator.create(init));
        if let Some(target) = value.as_ref().filter(|v| v.deref() < 0) {
            state.add_points_to(declared.clone(), target.with_deref(target.deref() + 1));
        }
        state.add_alias(declared, value);
    }

    fn assign(&self, state: &mut AliasState, lhs: Identifier, rhs: Identifier) {
        if self.config.flow_sense {
            state.clear_alias(&lhs);
            state.clear_points_to(&lhs);
        }
        if rhs.deref() < 0 {
            state.add_points_to(lhs.clone(), rhs.with_deref(rhs.deref() + 1));
        }
        state.add_alias(lhs, Some(rhs));
    }

    fn statement(&self, state: &mut AliasState, creator: &IdentifierCreator, statement: &Statement) {
        match statement {
            Statement::Assign { lhs, rhs } => {
                let lhs = creator.create(lhs);
                if lhs.is_pointer() {
                    self.assign(state, lhs, creator.create(rhs));
                }
            }
            Statement::CallAssign { lhs, call } => {
                let lhs = creator.create(lhs);
                if lhs.is_pointer() {
                    let callee = creator.create(&Expr::FunctionName(call.function.clone()));
                    self.assign(state, lhs.clone(), callee);
                    // p = rcu_dereference(gp)
                    if call.function.contains(&self.config.deref) {
                        state.add_to_rcu(lhs);
                    }
                }
                if self.marks_rcu(call) {
                    for arg in &call.args {
                        state.add_to_rcu(creator.create(arg));
                    }
                }
            }
            // rcu_assign_pointer(gp, p) without a body
            Statement::Call(call) if call.function.contains(&self.config.assign) => {
                if let [target, value, ..] = call.args.as_slice() {
                    let target = creator.create(target);
                    self.assign(state, target.clone(), creator.create(value));
                    state.add_to_rcu(target);
                }
            }
            Statement::Call(_) | Statement::Expr(_) => {}
        }
    }

    fn marks_rcu(&self, call: &CallExpr) -> bool {
        call.function.contains(&self.config.assign) || call.function.contains(&self.config.deref)
    }

    fn function_call(
        &self,
        state: &mut AliasState,
        caller: &IdentifierCreator,
        call: &CallExpr,
        params: &[Variable],
    ) {
        let callee = IdentifierCreator::new(call.function.clone());
        let marks_rcu = self.marks_rcu(call);
        for (param, arg) in params.iter().zip(&call.args) {
            let formal = Self::declared(&callee, param);
            if !formal.is_pointer() {
                continue;
            }
            let actual = caller.create(arg);
            self.assign(state, formal, actual.clone());
            if marks_rcu {
                state.add_to_rcu(actual);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_cfa::{NodeIndex, Type};

    fn int_ptr() -> Type {
        Type::pointer_to(Type::int())
    }

    fn edge(kind: EdgeKind) -> CfaEdge {
        CfaEdge {
            source: NodeIndex::new(0),
            target: NodeIndex::new(1),
            function: "reader".into(),
            line: 3,
            kind,
        }
    }

    fn transfer(flow_sense: bool) -> AliasTransfer {
        AliasTransfer::new(Arc::new(RcuConfig {
            flow_sense,
            ..RcuConfig::default()
        }))
    }

    fn empty() -> AliasState {
        AliasState::new(Arc::new(RcuConfig::default()))
    }

    #[test]
    fn dereferenced_pointers_join_the_rcu_set() {
        let t = transfer(false);
        let gp = Variable::global("gp", int_ptr());
        let p = Variable::local("p", int_ptr());
        let q = Variable::local("q", int_ptr());
        let s = t
            .apply(
                &empty(),
                &edge(EdgeKind::Declaration {
                    var: q.clone(),
                    init: None,
                }),
            )
            .unwrap();
        let s = t
            .apply(
                &s,
                &edge(EdgeKind::Statement(Statement::Assign {
                    lhs: Expr::var(q.clone()),
                    rhs: Expr::var(p.clone()),
                })),
            )
            .unwrap();
        let s = t
            .apply(
                &s,
                &edge(EdgeKind::Statement(Statement::CallAssign {
                    lhs: Expr::var(p),
                    call: CallExpr::new("rcu_dereference", vec![Expr::var(gp)]),
                })),
            )
            .unwrap();
        let creator = IdentifierCreator::new("reader");
        assert!(s.is_rcu(&Identifier::local("reader", "p", int_ptr())));
        assert!(s.is_rcu(&Identifier::local("reader", "q", int_ptr())));
        assert!(s.is_rcu(&creator.create(&Expr::FunctionName("rcu_dereference".into()))));
        assert!(s.is_rcu(&Identifier::global("gp", int_ptr())));
    }

    #[test]
    fn call_assign_through_assign_marks_its_arguments() {
        let t = transfer(false);
        let gp = Variable::global("gp", int_ptr());
        let p = Variable::local("p", int_ptr());
        let old = Variable::local("old", int_ptr());
        let kind = EdgeKind::Statement(Statement::CallAssign {
            lhs: Expr::var(old),
            call: CallExpr::new("rcu_assign_pointer", vec![Expr::var(gp), Expr::var(p)]),
        });
        let s = t.apply(&empty(), &edge(kind)).unwrap();
        assert!(s.is_rcu(&Identifier::global("gp", int_ptr())));
        assert!(s.is_rcu(&Identifier::local("reader", "p", int_ptr())));
        assert!(!s.is_rcu(&Identifier::local("reader", "old", int_ptr())));
    }

    #[test]
    fn flow_sensitivity_replaces_aliases() {
        let p = Variable::local("p", int_ptr());
        let assign = |rhs: &str| {
            edge(EdgeKind::Statement(Statement::Assign {
                lhs: Expr::var(p.clone()),
                rhs: Expr::var(Variable::global(rhs, int_ptr())),
            }))
        };
        let key = Identifier::local("reader", "p", int_ptr());
        for (flow_sense, expected) in [(false, 2), (true, 1)] {
            let t = transfer(flow_sense);
            let s = t.apply(&empty(), &assign("a")).unwrap();
            let s = t.apply(&s, &assign("b")).unwrap();
            assert_eq!(s.aliases(&key).unwrap().len(), expected);
        }
    }

    #[test]
    fn calls_bind_pointer_formals() {
        let t = transfer(false);
        let gp = Variable::global("gp", int_ptr());
        let kind = EdgeKind::FunctionCall {
            call: CallExpr::new("my_rcu_assign_pointer_wrapper", vec![Expr::var(gp), Expr::Const(0)]),
            params: vec![
                Variable::local("ptr", int_ptr()),
                Variable::local("flags", Type::int()),
            ],
            result: None,
        };
        let s = t.apply(&empty(), &edge(kind)).unwrap();
        let formal = Identifier::local("my_rcu_assign_pointer_wrapper", "ptr", int_ptr());
        assert!(s.aliases(&formal).unwrap().contains(&Identifier::global("gp", int_ptr())));
        assert!(s.is_rcu(&Identifier::global("gp", int_ptr())));
        assert!(s.is_rcu(&formal));
        assert_eq!(s.alias_size(), 1);
    }

    #[test]
    fn external_assign_marks_its_target() {
        let t = transfer(false);
        let gp = Variable::global("gp", int_ptr());
        let p = Variable::local("p", int_ptr());
        let kind = EdgeKind::Statement(Statement::Call(CallExpr::new(
            "rcu_assign_pointer",
            vec![Expr::var(gp), Expr::var(p)],
        )));
        let s = t.apply(&empty(), &edge(kind)).unwrap();
        assert!(s.is_rcu(&Identifier::global("gp", int_ptr())));
        assert!(s.is_rcu(&Identifier::local("reader", "p", int_ptr())));
    }

    #[test]
    fn opaque_edges_are_rejected() {
        let err = transfer(false)
            .apply(&empty(), &edge(EdgeKind::Opaque { raw: "?".into() }))
            .unwrap_err();
        assert!(matches!(err, LatchkeyError::UnrecognizedEdge { domain: "alias", .. }));
    }
}
