use crate::analysis::cpa::reached::StateId;
use crate::analysis::identifier::Identifier;
use crate::analysis::usage::detector::UnsafeDetector;
use crate::analysis::usage::info::UsageInfo;
use crate::analysis::usage::point_set::{
    AbstractUsagePointSet, RefinedUsagePointSet, UnrefinedUsagePointSet,
};
use crate::config::UsageConfig;
use crate::error::LatchkeyError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Counters describing the contents of a [`UsageContainer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContainerStatistics {
    /// Usage points of the unsafe identifiers
    pub usages: usize,
    pub unsafes: usize,
    pub refined: usize,
    pub failed: usize,
    pub false_unsafes: usize,
    pub unrefined_points: usize,
    pub top_points: usize,
    pub initial_unsafes: usize,
    pub initial_usages: usize,
}

/// The usages of every shared identifier, sorted into buckets by refinement status.
///
/// Unsafe detection is memoized: the unsafe count is computed on demand and dropped whenever
/// the unrefined buckets change.
#[derive(Debug, Clone)]
pub struct UsageContainer {
    unrefined: BTreeMap<Identifier, UnrefinedUsagePointSet>,
    refined: BTreeMap<Identifier, RefinedUsagePointSet>,
    failed: BTreeMap<Identifier, RefinedUsagePointSet>,
    false_unsafes: BTreeSet<Identifier>,
    processed: BTreeSet<Identifier>,
    unsafe_usages: Option<usize>,
    initial_unsafes: Option<BTreeSet<Identifier>>,
    initial_usages: usize,
    detector: UnsafeDetector,
    print_only_true_unsafes: bool,
}

impl UsageContainer {
    pub fn new(config: &UsageConfig) -> Self {
        Self {
            unrefined: BTreeMap::new(),
            refined: BTreeMap::new(),
            failed: BTreeMap::new(),
            false_unsafes: BTreeSet::new(),
            processed: BTreeSet::new(),
            unsafe_usages: None,
            initial_unsafes: None,
            initial_usages: 0,
            detector: UnsafeDetector::new(config),
            print_only_true_unsafes: config.print_only_true_unsafes,
        }
    }

    pub fn detector(&self) -> &UnsafeDetector {
        &self.detector
    }

    /// Records a usage. Identifiers already proven safe or refined take no new usages.
    pub fn add(&mut self, id: Identifier, info: UsageInfo) {
        if self.false_unsafes.contains(&id) || self.refined.contains_key(&id) {
            return;
        }
        self.unrefined.entry(id).or_default().add(info);
        self.unsafe_usages = None;
    }

    fn compute_unsafes_if_necessary(&mut self) {
        if self.unsafe_usages.is_some() {
            return;
        }
        self.processed.clear();
        let verdicts = self.unrefined_verdicts();
        let mut usages = 0;
        for (id, is_unsafe) in verdicts {
            if is_unsafe {
                usages += self.unrefined.get(&id).map_or(0, UnrefinedUsagePointSet::size);
            } else {
                debug!(identifier = %id, "no unsafe pair, dropping usages");
                self.unrefined.remove(&id);
                self.processed.insert(id.clone());
                self.false_unsafes.insert(id);
            }
        }
        usages += self.refined.values().map(RefinedUsagePointSet::size).sum::<usize>();
        self.unsafe_usages = Some(usages);
        if self.initial_unsafes.is_none() {
            self.initial_unsafes = Some(self.unrefined.keys().cloned().collect());
            self.initial_usages = usages;
        }
    }

    #[cfg(not(feature = "rayon"))]
    fn unrefined_verdicts(&self) -> Vec<(Identifier, bool)> {
        self.unrefined
            .iter()
            .map(|(id, set)| (id.clone(), self.detector.is_unsafe_unrefined(set)))
            .collect()
    }

    #[cfg(feature = "rayon")]
    fn unrefined_verdicts(&self) -> Vec<(Identifier, bool)> {
        use rayon::prelude::*;
        let detector = self.detector;
        self.unrefined
            .par_iter()
            .map(|(id, set)| (id.clone(), detector.is_unsafe_unrefined(set)))
            .collect()
    }

    /// Every identifier currently considered unsafe, in any bucket.
    pub fn all_unsafes(&mut self) -> BTreeSet<Identifier> {
        self.compute_unsafes_if_necessary();
        self.unrefined
            .keys()
            .chain(self.refined.keys())
            .chain(self.failed.keys())
            .cloned()
            .collect()
    }

    pub fn unrefined_unsafe_ids(&mut self) -> Vec<Identifier> {
        self.compute_unsafes_if_necessary();
        self.unrefined.keys().cloned().collect()
    }

    pub fn true_unsafe_ids(&self) -> impl Iterator<Item = &Identifier> {
        self.refined.keys()
    }

    pub fn failed_ids(&self) -> impl Iterator<Item = &Identifier> {
        self.failed.keys()
    }

    pub fn false_unsafe_ids(&self) -> impl Iterator<Item = &Identifier> {
        self.false_unsafes.iter()
    }

    /// The identifiers a report should list.
    pub fn unsafe_iter(&mut self) -> Vec<Identifier> {
        if self.print_only_true_unsafes {
            self.refined.keys().cloned().collect()
        } else {
            self.all_unsafes().into_iter().collect()
        }
    }

    pub fn unsafe_size(&mut self) -> usize {
        if self.print_only_true_unsafes {
            self.refined.len()
        } else {
            self.total_unsafe_size()
        }
    }

    pub fn total_unsafe_size(&mut self) -> usize {
        self.compute_unsafes_if_necessary();
        self.unrefined.len() + self.refined.len() + self.failed.len()
    }

    pub fn processed_unsafe_size(&self) -> usize {
        self.refined.len() + self.failed.len()
    }

    /// The identifiers found unsafe by the first detection, before any refinement.
    pub fn initial_unsafes(&self) -> Option<&BTreeSet<Identifier>> {
        self.initial_unsafes.as_ref()
    }

    /// The identifiers dropped as safe by the last detection.
    pub fn processed_unsafes(&self) -> &BTreeSet<Identifier> {
        &self.processed
    }

    pub fn get_usages(&self, id: &Identifier) -> Option<AbstractUsagePointSet<'_>> {
        if let Some(set) = self.unrefined.get(id) {
            return Some(AbstractUsagePointSet::Unrefined(set));
        }
        self.refined
            .get(id)
            .or_else(|| self.failed.get(id))
            .map(AbstractUsagePointSet::Refined)
    }

    pub fn is_false_unsafe(&self, id: &Identifier) -> bool {
        self.false_unsafes.contains(id)
    }

    pub fn set_as_false_unsafe(&mut self, id: Identifier) {
        self.unrefined.remove(&id);
        self.refined.remove(&id);
        self.failed.remove(&id);
        self.false_unsafes.insert(id);
        self.unsafe_usages = None;
    }

    /// Moves an unrefined unsafe identifier to the refined bucket with its witness pair, or to
    /// the failed bucket when either witness runs through a loop.
    pub fn set_as_refined(
        &mut self,
        id: &Identifier,
        first: UsageInfo,
        second: UsageInfo,
    ) -> Result<(), LatchkeyError> {
        let Some(set) = self.unrefined.get(id) else {
            return Err(LatchkeyError::NotUnsafe(id.clone()));
        };
        if self.detector.unsafe_point_pair(set).is_none() {
            tracing::error!(identifier = %id, "refined identifier has no unsafe pair");
            return Err(LatchkeyError::MissingUnsafePair(id.clone()));
        }
        self.unrefined.remove(id);
        let pair = RefinedUsagePointSet::new(first, second);
        if pair.is_looped() {
            self.failed.insert(id.clone(), pair);
        } else {
            self.refined.insert(id.clone(), pair);
        }
        self.unsafe_usages = None;
        Ok(())
    }

    /// Forgets the memoized detection and recomputes the top points of every unrefined set.
    pub fn reset_unrefined_unsafes(&mut self) {
        self.unsafe_usages = None;
        for set in self.unrefined.values_mut() {
            set.reset();
        }
    }

    /// Drops the usages recorded from reached state `id`. Sets left empty stay in place until
    /// the next detection moves them to the false unsafes.
    pub fn remove_state(&mut self, id: StateId) {
        let mut changed = false;
        for set in self.unrefined.values_mut() {
            changed |= set.remove_state(id);
        }
        if changed {
            self.unsafe_usages = None;
        }
    }

    pub fn remove_states<I: IntoIterator<Item = StateId>>(&mut self, ids: I) {
        for id in ids {
            self.remove_state(id);
        }
    }

    pub fn statistics(&mut self) -> ContainerStatistics {
        self.compute_unsafes_if_necessary();
        ContainerStatistics {
            usages: self.unsafe_usages.unwrap_or(0),
            unsafes: self.total_unsafe_size(),
            refined: self.refined.len(),
            failed: self.failed.len(),
            false_unsafes: self.false_unsafes.len(),
            unrefined_points: self
                .unrefined
                .values()
                .map(UnrefinedUsagePointSet::point_count)
                .sum(),
            top_points: self.unrefined.values().map(UnrefinedUsagePointSet::size).sum(),
            initial_unsafes: self.initial_unsafes.as_ref().map_or(0, BTreeSet::len),
            initial_usages: self.initial_usages,
        }
    }
}
