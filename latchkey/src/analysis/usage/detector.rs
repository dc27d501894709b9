use crate::analysis::usage::info::{Access, UsageInfo, UsagePoint};
use crate::analysis::usage::point_set::{AbstractUsagePointSet, UnrefinedUsagePointSet};
use crate::config::UsageConfig;

/// Decides which usage points may race with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsafeDetector {
    ignore_empty_lockset: bool,
}

impl UnsafeDetector {
    pub fn new(config: &UsageConfig) -> Self {
        Self {
            ignore_empty_lockset: config.ignore_empty_lockset,
        }
    }

    /// Two points race when no lock protects both and at least one of them writes.
    ///
    /// With `ignore_empty_lockset`, two accesses that hold no lock at all are not reported.
    pub fn is_unsafe_pair(&self, first: &UsagePoint, second: &UsagePoint) -> bool {
        if !first.locks.is_compatible_with(&second.locks) {
            return false;
        }
        if first.access != Access::Write && second.access != Access::Write {
            return false;
        }
        !(self.ignore_empty_lockset && first.locks.is_empty() && second.locks.is_empty())
    }

    /// Refined sets are unsafe by construction.
    pub fn is_unsafe(&self, set: AbstractUsagePointSet<'_>) -> bool {
        match set {
            AbstractUsagePointSet::Refined(_) => true,
            AbstractUsagePointSet::Unrefined(set) => self.is_unsafe_unrefined(set),
        }
    }

    /// Looks at every point, not only the top ones: a locked point may race with an
    /// unlocked one even though an unlocked point covering it races with nothing.
    pub fn is_unsafe_unrefined(&self, set: &UnrefinedUsagePointSet) -> bool {
        self.unsafe_point_pair(set).is_some()
    }

    /// The first racing pair of points, in ascending order.
    ///
    /// Pairs of distinct points are preferred. A point racing with itself is only reported
    /// when empty lock sets count.
    pub fn unsafe_point_pair<'a>(
        &self,
        set: &'a UnrefinedUsagePointSet,
    ) -> Option<(&'a UsagePoint, &'a UsagePoint)> {
        let points: Vec<&UsagePoint> = set.points().collect();
        for (i, first) in points.iter().enumerate() {
            for second in &points[i + 1..] {
                if self.is_unsafe_pair(first, second) {
                    return Some((first, second));
                }
            }
        }
        if self.ignore_empty_lockset {
            return None;
        }
        points
            .into_iter()
            .find(|point| self.is_unsafe_pair(point, point))
            .map(|point| (point, point))
    }

    /// A concrete witness pair of usages for an unsafe set.
    pub fn unsafe_pair(&self, set: AbstractUsagePointSet<'_>) -> Option<(UsageInfo, UsageInfo)> {
        match set {
            AbstractUsagePointSet::Refined(set) => {
                let (first, second) = set.pair();
                Some((first.clone(), second.clone()))
            }
            AbstractUsagePointSet::Unrefined(set) => self.unsafe_usage_pair(set),
        }
    }

    /// Picks one usage for each point of [`unsafe_point_pair`](Self::unsafe_point_pair).
    pub fn unsafe_usage_pair(&self, set: &UnrefinedUsagePointSet) -> Option<(UsageInfo, UsageInfo)> {
        let (first, second) = self.unsafe_point_pair(set)?;
        let first = set.one_example(first)?;
        let second = set.one_example(second)?;
        Some((first.clone(), second.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::lock::LockSet;
    use crate::analysis::usage::point_set::RefinedUsagePointSet;
    use latchkey_cfa::NodeIndex;
    use proptest::prelude::*;

    fn detector(ignore_empty_lockset: bool) -> UnsafeDetector {
        UnsafeDetector::new(&UsageConfig {
            ignore_empty_lockset,
            ..UsageConfig::default()
        })
    }

    fn usage(access: Access, locks: &[&str], line: u32) -> UsageInfo {
        UsageInfo::new(
            access,
            locks.iter().copied().collect(),
            NodeIndex::new(line as usize),
            line,
            "f",
        )
    }

    fn point(access: Access, locks: &[&str]) -> UsagePoint {
        UsagePoint::new(access, locks.iter().copied().collect())
    }

    #[test]
    fn pairs_need_a_write_and_no_common_lock() {
        let ignoring = detector(true);
        assert!(ignoring.is_unsafe_pair(&point(Access::Write, &["a"]), &point(Access::Read, &[])));
        assert!(!ignoring.is_unsafe_pair(&point(Access::Read, &["a"]), &point(Access::Read, &[])));
        assert!(!ignoring.is_unsafe_pair(&point(Access::Write, &["a"]), &point(Access::Read, &["a"])));
        assert!(!ignoring.is_unsafe_pair(&point(Access::Write, &[]), &point(Access::Write, &[])));
        assert!(detector(false).is_unsafe_pair(&point(Access::Write, &[]), &point(Access::Write, &[])));
    }

    #[test]
    fn write_against_locked_read() {
        let mut set = UnrefinedUsagePointSet::new();
        set.add(usage(Access::Write, &["a"], 1));
        set.add(usage(Access::Read, &["b"], 2));
        let detector = detector(true);
        assert!(detector.is_unsafe(AbstractUsagePointSet::Unrefined(&set)));
        let (first, second) = detector
            .unsafe_pair(AbstractUsagePointSet::Unrefined(&set))
            .unwrap();
        assert_eq!(first.line, 1);
        assert_eq!(second.line, 2);
    }

    #[test]
    fn common_lock_is_safe() {
        let mut set = UnrefinedUsagePointSet::new();
        set.add(usage(Access::Write, &["m"], 1));
        set.add(usage(Access::Write, &["m"], 2));
        set.add(usage(Access::Read, &["m"], 3));
        for ignore in [true, false] {
            let detector = detector(ignore);
            assert!(!detector.is_unsafe_unrefined(&set));
            assert_eq!(detector.unsafe_usage_pair(&set), None);
        }
    }

    #[test]
    fn lone_unlocked_write_is_a_self_race_unless_ignored() {
        let mut set = UnrefinedUsagePointSet::new();
        set.add(usage(Access::Write, &[], 1));

        assert!(!detector(true).is_unsafe_unrefined(&set));
        assert_eq!(detector(true).unsafe_point_pair(&set), None);

        let detector = detector(false);
        assert!(detector.is_unsafe_unrefined(&set));
        let (first, second) = detector.unsafe_point_pair(&set).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, &point(Access::Write, &[]));
    }

    #[test]
    fn covered_locked_write_still_races_with_unlocked_write() {
        let mut set = UnrefinedUsagePointSet::new();
        set.add(usage(Access::Write, &[], 1));
        set.add(usage(Access::Write, &["m"], 2));
        assert_eq!(set.size(), 1);

        for ignore in [true, false] {
            let detector = detector(ignore);
            assert!(detector.is_unsafe_unrefined(&set));
            let (first, second) = detector.unsafe_usage_pair(&set).unwrap();
            assert_eq!((first.line, second.line), (1, 2));
        }
    }

    #[test]
    fn unlocked_read_and_write_race_as_distinct_points() {
        let mut set = UnrefinedUsagePointSet::new();
        set.add(usage(Access::Write, &[], 1));
        set.add(usage(Access::Read, &[], 2));
        assert!(!detector(true).is_unsafe_unrefined(&set));
        let (first, second) = detector(false).unsafe_point_pair(&set).unwrap();
        assert_eq!(first, &point(Access::Write, &[]));
        assert_eq!(second, &point(Access::Read, &[]));
    }

    #[test]
    fn refined_sets_are_unsafe() {
        let refined = RefinedUsagePointSet::new(
            usage(Access::Write, &["m"], 1),
            usage(Access::Write, &["m"], 2),
        );
        let detector = detector(true);
        assert!(detector.is_unsafe(AbstractUsagePointSet::Refined(&refined)));
        let (first, _) = detector
            .unsafe_pair(AbstractUsagePointSet::Refined(&refined))
            .unwrap();
        assert_eq!(first.line, 1);
    }

    fn arb_point() -> impl Strategy<Value = UsagePoint> {
        (
            prop_oneof![Just(Access::Write), Just(Access::Read)],
            proptest::collection::btree_set("[abc]", 0..3),
        )
            .prop_map(|(access, locks)| UsagePoint::new(access, locks.into_iter().collect::<LockSet>()))
    }

    proptest! {
        #[test]
        fn unsafe_pairs_are_symmetric(a in arb_point(), b in arb_point(), ignore in any::<bool>()) {
            let detector = detector(ignore);
            prop_assert_eq!(detector.is_unsafe_pair(&a, &b), detector.is_unsafe_pair(&b, &a));
        }
    }
}
