use crate::analysis::cpa::reached::ReachedSet;
use crate::analysis::identifier::Identifier;
use crate::analysis::race::{RacePrecision, RaceState};
use crate::analysis::usage::{UsageContainer, UsageInfo};
use crate::error::LatchkeyError;
use tracing::{debug, info};

/// The verdict of a refiner on one candidate race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefinementResult {
    /// The race is real; the pair is its witness
    True(UsageInfo, UsageInfo),
    /// The race is spurious, and `precision` holds the facts that rule it out
    False { precision: Vec<String> },
    /// The refiner could not decide; the candidate stays unrefined
    Unknown,
}

/// Decides whether a candidate race is feasible.
pub trait UsageRefiner {
    fn refine(
        &mut self,
        id: &Identifier,
        pair: (&UsageInfo, &UsageInfo),
        reached: &ReachedSet<RaceState>,
    ) -> Result<RefinementResult, LatchkeyError>;
}

/// Confirms every candidate with its detected witness pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeTrueRefiner;

impl UsageRefiner for AssumeTrueRefiner {
    fn refine(
        &mut self,
        _id: &Identifier,
        pair: (&UsageInfo, &UsageInfo),
        _reached: &ReachedSet<RaceState>,
    ) -> Result<RefinementResult, LatchkeyError> {
        Ok(RefinementResult::True(pair.0.clone(), pair.1.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationOutcome {
    pub new_precision_found: bool,
    pub precision: RacePrecision,
}

/// Runs a refiner over every unrefined unsafe identifier and applies its verdicts.
#[derive(Debug, Clone, Default)]
pub struct IdentifierIterator {
    precision_reset: Option<usize>,
    precision_found: usize,
    resets: usize,
}

impl IdentifierIterator {
    pub fn new(precision_reset: Option<usize>) -> Self {
        Self {
            precision_reset,
            precision_found: 0,
            resets: 0,
        }
    }

    /// How many times the precision was dropped back to empty.
    pub fn resets(&self) -> usize {
        self.resets
    }

    pub fn iterate<R: UsageRefiner + ?Sized>(
        &mut self,
        refiner: &mut R,
        container: &mut UsageContainer,
        reached: &ReachedSet<RaceState>,
        precision: &RacePrecision,
    ) -> Result<IterationOutcome, LatchkeyError> {
        let mut precision = precision.clone();
        let mut new_precision_found = false;
        for id in container.unrefined_unsafe_ids() {
            let pair = container
                .get_usages(&id)
                .and_then(|set| container.detector().unsafe_pair(set));
            let Some((first, second)) = pair else {
                tracing::error!(identifier = %id, "unsafe identifier has no witness");
                return Err(LatchkeyError::MissingUnsafePair(id));
            };
            match refiner.refine(&id, (&first, &second), reached)? {
                RefinementResult::True(first, second) => {
                    debug!(identifier = %id, "race confirmed");
                    container.set_as_refined(&id, first, second)?;
                }
                RefinementResult::False { precision: facts } => {
                    let (extended, added) = precision.with_facts(facts);
                    if added {
                        debug!(identifier = %id, "race refuted with new facts");
                        precision = extended;
                        new_precision_found = true;
                    } else {
                        debug!(identifier = %id, "race refuted");
                        container.set_as_false_unsafe(id);
                    }
                }
                RefinementResult::Unknown => {}
            }
        }

        if new_precision_found {
            self.precision_found += 1;
            if self
                .precision_reset
                .is_some_and(|limit| self.precision_found >= limit)
            {
                info!(after = self.precision_found, "resetting precision");
                precision = RacePrecision::new();
                self.precision_found = 0;
                self.resets += 1;
            }
        }
        Ok(IterationOutcome {
            new_precision_found,
            precision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::usage::Access;
    use crate::config::UsageConfig;
    use latchkey_cfa::{NodeIndex, Type};
    use std::collections::VecDeque;

    struct Scripted(VecDeque<RefinementResult>);

    impl UsageRefiner for Scripted {
        fn refine(
            &mut self,
            _id: &Identifier,
            _pair: (&UsageInfo, &UsageInfo),
            _reached: &ReachedSet<RaceState>,
        ) -> Result<RefinementResult, LatchkeyError> {
            Ok(self.0.pop_front().unwrap_or(RefinementResult::Unknown))
        }
    }

    fn racy_container(names: &[&str]) -> UsageContainer {
        let mut container = UsageContainer::new(&UsageConfig::default());
        for name in names {
            let id = Identifier::global(*name, Type::int());
            container.add(
                id.clone(),
                UsageInfo::new(Access::Write, ["m"].into_iter().collect(), NodeIndex::new(1), 1, "a"),
            );
            container.add(
                id,
                UsageInfo::new(Access::Read, Default::default(), NodeIndex::new(2), 2, "b"),
            );
        }
        container
    }

    fn global(name: &str) -> Identifier {
        Identifier::global(name, Type::int())
    }

    #[test]
    fn verdicts_are_applied() {
        let mut container = racy_container(&["a", "b", "c", "d"]);
        let mut refiner = Scripted(VecDeque::from([
            RefinementResult::Unknown,
            RefinementResult::False {
                precision: vec!["[(x == 0)]".into()],
            },
            RefinementResult::False { precision: vec![] },
        ]));
        let reached = ReachedSet::new();
        let precision = RacePrecision::new();
        let mut iterator = IdentifierIterator::new(None);
        let outcome = iterator
            .iterate(&mut refiner, &mut container, &reached, &precision)
            .unwrap();

        assert!(outcome.new_precision_found);
        assert!(outcome.precision.contains("[(x == 0)]"));
        assert!(container.is_false_unsafe(&global("c")));
        assert_eq!(
            container.unrefined_unsafe_ids(),
            vec![global("a"), global("b"), global("d")]
        );

        let mut confirm = AssumeTrueRefiner;
        let outcome = iterator
            .iterate(&mut confirm, &mut container, &reached, &outcome.precision)
            .unwrap();
        assert!(!outcome.new_precision_found);
        assert_eq!(container.true_unsafe_ids().count(), 3);
    }

    #[test]
    fn precision_resets_after_the_limit() {
        let reached = ReachedSet::new();
        let mut iterator = IdentifierIterator::new(Some(2));
        let mut precision = RacePrecision::new();
        for (round, fact) in ["p", "q"].into_iter().enumerate() {
            let mut container = racy_container(&["g"]);
            let mut refiner = Scripted(VecDeque::from([RefinementResult::False {
                precision: vec![fact.to_string()],
            }]));
            let outcome = iterator
                .iterate(&mut refiner, &mut container, &reached, &precision)
                .unwrap();
            assert!(outcome.new_precision_found);
            precision = outcome.precision;
            if round == 0 {
                assert_eq!(precision.len(), 1);
            }
        }
        assert!(precision.is_empty());
        assert_eq!(iterator.resets(), 1);
    }
}
