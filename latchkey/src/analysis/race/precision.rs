use latchkey_cfa::{CfaEdge, EdgeKind};
use serde::Serialize;
use std::collections::BTreeSet;

/// The facts refinement has established so far.
///
/// Each fact is the rendered predicate of an assume edge, e.g. `[(flag == 1)]`, that refinement
/// found infeasible along every path to a spurious race. Exploration does not follow such edges.
/// A precision is never modified in place: refinement builds a new one and the analysis swaps it
/// in before restarting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RacePrecision {
    facts: BTreeSet<String>,
}

impl RacePrecision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn contains(&self, fact: &str) -> bool {
        self.facts.contains(fact)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.facts.iter().map(String::as_str)
    }

    /// This precision extended by `facts`, and whether any of them was new.
    pub fn with_facts<I: IntoIterator<Item = String>>(&self, facts: I) -> (Self, bool) {
        let mut extended = self.clone();
        let mut added = false;
        for fact in facts {
            added |= extended.facts.insert(fact);
        }
        (extended, added)
    }

    /// Whether exploration must not follow `edge`.
    pub fn excludes(&self, edge: &CfaEdge) -> bool {
        matches!(edge.kind, EdgeKind::Assume { .. }) && self.facts.contains(&edge.kind.to_string())
    }
}

impl<S: Into<String>> FromIterator<S> for RacePrecision {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            facts: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use latchkey_cfa::{BinaryOp, Expr, NodeIndex, Type, Variable};

    fn assume(truth: bool) -> CfaEdge {
        let flag = Variable::global("flag", Type::int());
        CfaEdge {
            source: NodeIndex::new(0),
            target: NodeIndex::new(1),
            function: "main".into(),
            line: 4,
            kind: EdgeKind::Assume {
                condition: Expr::binary(BinaryOp::Eq, Expr::var(flag), Expr::Const(1)),
                truth,
            },
        }
    }

    #[test]
    fn excludes_only_the_recorded_branch() {
        let precision: RacePrecision = ["[(flag == 1)]"].into_iter().collect();
        assert!(precision.excludes(&assume(true)));
        assert!(!precision.excludes(&assume(false)));
        assert!(!RacePrecision::new().excludes(&assume(true)));
    }

    #[test]
    fn extension_reports_new_facts() {
        let (one, added) = RacePrecision::new().with_facts(["a".to_string()]);
        assert!(added);
        let (same, added) = one.with_facts(["a".to_string()]);
        assert!(!added);
        assert_eq!(same, one);
        let (two, added) = one.with_facts(["a".to_string(), "b".to_string()]);
        assert!(added);
        assert_eq!(two.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
