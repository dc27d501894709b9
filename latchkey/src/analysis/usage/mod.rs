//! Accumulation of shared-memory usages and race detection over them.
//!
//! Exploration records every access to a shared [`Identifier`](crate::analysis::identifier::Identifier)
//! together with the locks held at that point into a [`UsageContainer`]. The container groups
//! the accesses into usage points, asks the [`UnsafeDetector`] which identifiers may race, and
//! tracks their refinement status across restarts of the exploration.

mod container;
mod detector;
mod extract;
mod info;
mod point_set;
mod state;

pub use container::{ContainerStatistics, UsageContainer};
pub use detector::UnsafeDetector;
pub use extract::UsageExtractor;
pub use info::{Access, UsageInfo, UsagePoint};
pub use point_set::{AbstractUsagePointSet, RefinedUsagePointSet, UnrefinedUsagePointSet};
pub use state::UsageState;
