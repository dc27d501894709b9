use crate::analysis::cpa::reached::StateId;
use crate::analysis::usage::info::{UsageInfo, UsagePoint};
use std::collections::{BTreeMap, BTreeSet};

/// The usages of one identifier that have not been refined yet, grouped by point.
///
/// The top points are the points no other point covers. They size the set for statistics;
/// race detection still walks every point, since an unlocked cover can be ignored while the
/// locked point it covers races with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnrefinedUsagePointSet {
    infos: BTreeMap<UsagePoint, BTreeSet<UsageInfo>>,
    top: BTreeSet<UsagePoint>,
}

impl UnrefinedUsagePointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, info: UsageInfo) {
        let point = info.point();
        let infos = self.infos.entry(point.clone()).or_default();
        let fresh_point = infos.is_empty();
        infos.insert(info);
        if fresh_point {
            self.insert_top(point);
        }
    }

    fn insert_top(&mut self, point: UsagePoint) {
        if self.top.iter().any(|top| top.covers(&point)) {
            return;
        }
        self.top.retain(|top| !point.covers(top));
        self.top.insert(point);
    }

    /// Drops every usage recorded from the reached state `id`. Returns whether anything was
    /// removed.
    pub fn remove_state(&mut self, id: StateId) -> bool {
        let mut changed = false;
        self.infos.retain(|_, infos| {
            let before = infos.len();
            infos.retain(|info| info.key_state != Some(id));
            changed |= infos.len() != before;
            !infos.is_empty()
        });
        if changed {
            self.reset();
        }
        changed
    }

    /// Recomputes the top points from scratch.
    pub fn reset(&mut self) {
        self.top.clear();
        let points: Vec<UsagePoint> = self.infos.keys().cloned().collect();
        for point in points {
            self.insert_top(point);
        }
    }

    /// The number of top points.
    pub fn size(&self) -> usize {
        self.top.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn point_count(&self) -> usize {
        self.infos.len()
    }

    pub fn usage_count(&self) -> usize {
        self.infos.values().map(BTreeSet::len).sum()
    }

    pub fn top_points(&self) -> impl Iterator<Item = &UsagePoint> {
        self.top.iter()
    }

    pub fn points(&self) -> impl Iterator<Item = &UsagePoint> {
        self.infos.keys()
    }

    pub fn infos(&self, point: &UsagePoint) -> Option<&BTreeSet<UsageInfo>> {
        self.infos.get(point)
    }

    /// A representative usage of `point`.
    pub fn one_example(&self, point: &UsagePoint) -> Option<&UsageInfo> {
        self.infos.get(point).and_then(|infos| infos.first())
    }
}

/// A race confirmed by refinement, reduced to its witness pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinedUsagePointSet {
    first: UsageInfo,
    second: UsageInfo,
}

impl RefinedUsagePointSet {
    pub fn new(first: UsageInfo, second: UsageInfo) -> Self {
        Self { first, second }
    }

    pub fn pair(&self) -> (&UsageInfo, &UsageInfo) {
        (&self.first, &self.second)
    }

    pub fn size(&self) -> usize {
        if self.first == self.second { 1 } else { 2 }
    }

    pub fn is_looped(&self) -> bool {
        self.first.looped || self.second.looped
    }
}

/// A borrowed view of the usages of one identifier, whichever bucket it lives in.
#[derive(Debug, Clone, Copy)]
pub enum AbstractUsagePointSet<'a> {
    Unrefined(&'a UnrefinedUsagePointSet),
    Refined(&'a RefinedUsagePointSet),
}

impl AbstractUsagePointSet<'_> {
    pub fn size(&self) -> usize {
        match self {
            AbstractUsagePointSet::Unrefined(set) => set.size(),
            AbstractUsagePointSet::Refined(set) => set.size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cpa::reached::ReachedSet;
    use crate::analysis::location::CfaLocation;
    use crate::analysis::lock::LockSet;
    use crate::analysis::usage::info::Access;
    use latchkey_cfa::NodeIndex;

    fn usage(access: Access, locks: &[&str], line: u32) -> UsageInfo {
        UsageInfo::new(
            access,
            locks.iter().copied().collect::<LockSet>(),
            NodeIndex::new(line as usize),
            line,
            "f",
        )
    }

    fn ids(n: usize) -> Vec<StateId> {
        let mut reached = ReachedSet::new();
        (0..n)
            .map(|i| reached.add(CfaLocation(NodeIndex::new(i))))
            .collect()
    }

    #[test]
    fn covered_points_leave_the_top() {
        let mut set = UnrefinedUsagePointSet::new();
        set.add(usage(Access::Read, &["m"], 1));
        set.add(usage(Access::Write, &["m"], 2));
        assert_eq!(set.size(), 1);
        set.add(usage(Access::Read, &["n"], 3));
        assert_eq!(set.size(), 2);
        set.add(usage(Access::Write, &[], 4));
        assert_eq!(
            set.top_points().cloned().collect::<Vec<_>>(),
            vec![UsagePoint::new(Access::Write, LockSet::new())]
        );
        assert_eq!(set.point_count(), 4);
        assert_eq!(set.usage_count(), 4);
    }

    #[test]
    fn removing_a_state_restores_covered_points() {
        let ids = ids(2);
        let mut set = UnrefinedUsagePointSet::new();
        set.add(usage(Access::Read, &["m"], 1).with_key_state(ids[0]));
        set.add(usage(Access::Write, &[], 2).with_key_state(ids[1]));
        assert_eq!(set.size(), 1);

        assert!(set.remove_state(ids[1]));
        assert!(!set.remove_state(ids[1]));
        assert_eq!(
            set.top_points().cloned().collect::<Vec<_>>(),
            vec![UsagePoint::new(Access::Read, ["m"].into_iter().collect())]
        );
        assert!(set.remove_state(ids[0]));
        assert!(set.is_empty());
    }

    #[test]
    fn refined_pair_size() {
        let a = usage(Access::Write, &[], 1);
        let b = usage(Access::Read, &[], 2);
        assert_eq!(RefinedUsagePointSet::new(a.clone(), b).size(), 2);
        assert_eq!(RefinedUsagePointSet::new(a.clone(), a).size(), 1);
    }
}
