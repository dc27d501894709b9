use crate::analysis::cpa::{RunStatistics, RunStatus};
use crate::analysis::lock::LockSet;
use crate::analysis::race::RacePrecision;
use crate::analysis::usage::{
    Access, ContainerStatistics, UsageContainer, UsageInfo,
};
use crate::error::LatchkeyError;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsafeStatus {
    /// Detected, but never confirmed or refuted
    Unrefined,
    /// Confirmed by refinement
    Refined,
    /// Confirmed, but the witness runs through a loop
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEntry {
    pub access: Access,
    pub locks: LockSet,
    pub function: String,
    pub line: u32,
    pub node: usize,
    pub looped: bool,
}

impl From<&UsageInfo> for UsageEntry {
    fn from(info: &UsageInfo) -> Self {
        Self {
            access: info.access,
            locks: info.locks.clone(),
            function: info.function.clone(),
            line: info.line,
            node: info.node.index(),
            looped: info.looped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsafeEntry {
    pub identifier: String,
    pub status: UnsafeStatus,
    pub first: UsageEntry,
    pub second: UsageEntry,
}

/// The result of a race analysis run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub status: RunStatus,
    pub iterations: usize,
    pub precision: RacePrecision,
    pub exploration: RunStatistics,
    pub statistics: ContainerStatistics,
    pub unsafes: Vec<UnsafeEntry>,
}

impl UsageReport {
    pub fn new(
        container: &mut UsageContainer,
        status: RunStatus,
        iterations: usize,
        precision: RacePrecision,
        exploration: RunStatistics,
    ) -> Self {
        let refined: BTreeSet<_> = container.true_unsafe_ids().cloned().collect();
        let failed: BTreeSet<_> = container.failed_ids().cloned().collect();
        let mut unsafes = Vec::new();
        for id in container.unsafe_iter() {
            let pair = container
                .get_usages(&id)
                .and_then(|set| container.detector().unsafe_pair(set));
            let Some((first, second)) = pair else {
                continue;
            };
            let status = if refined.contains(&id) {
                UnsafeStatus::Refined
            } else if failed.contains(&id) {
                UnsafeStatus::Failed
            } else {
                UnsafeStatus::Unrefined
            };
            unsafes.push(UnsafeEntry {
                identifier: id.to_string(),
                status,
                first: (&first).into(),
                second: (&second).into(),
            });
        }
        Self {
            status,
            iterations,
            precision,
            exploration,
            statistics: container.statistics(),
            unsafes,
        }
    }

    pub fn entry(&self, identifier: &str) -> Option<&UnsafeEntry> {
        self.unsafes.iter().find(|e| e.identifier == identifier)
    }

    pub fn to_json(&self) -> Result<String, LatchkeyError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::identifier::Identifier;
    use crate::config::UsageConfig;
    use latchkey_cfa::{NodeIndex, Type};

    #[test]
    fn entries_carry_status_and_witnesses() {
        let mut container = UsageContainer::new(&UsageConfig::default());
        for name in ["confirmed", "pending"] {
            let id = Identifier::global(name, Type::int());
            container.add(
                id.clone(),
                UsageInfo::new(Access::Write, ["m"].into_iter().collect(), NodeIndex::new(3), 7, "writer"),
            );
            container.add(
                id,
                UsageInfo::new(Access::Read, LockSet::new(), NodeIndex::new(5), 9, "reader"),
            );
        }
        let confirmed = Identifier::global("confirmed", Type::int());
        let (first, second) = container
            .detector()
            .unsafe_pair(container.get_usages(&confirmed).unwrap())
            .unwrap();
        container.set_as_refined(&confirmed, first, second).unwrap();

        let report = UsageReport::new(
            &mut container,
            RunStatus::Completed,
            1,
            RacePrecision::new(),
            RunStatistics::default(),
        );
        assert_eq!(report.unsafes.len(), 2);
        let entry = report.entry("confirmed").unwrap();
        assert_eq!(entry.status, UnsafeStatus::Refined);
        assert_eq!(entry.first.line, 7);
        assert_eq!(entry.second.function, "reader");
        assert_eq!(report.entry("pending").unwrap().status, UnsafeStatus::Unrefined);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["unsafes"][0]["first"]["access"], "write");
        assert_eq!(json["unsafes"][0]["first"]["locks"][0], "m");
    }
}
