use crate::analysis::pointer::location_set::LocationSet;
use crate::analysis::pointer::state::PointerState;
use serde::Serialize;
use std::collections::BTreeMap;

pub const LOCATION_SET_TOP: &str = "_LOCATION_SET_TOP_";
pub const LOCATION_SET_BOT: &str = "_LOCATION_SET_BOT_";

/// The points-to map of a state, flattened to strings for output.
///
/// `Top` and `Bot` sets are written as a single marker element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PointsToDump(BTreeMap<String, Vec<String>>);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PointsToStatistics {
    pub map_size: usize,
    pub values_size: usize,
}

impl PointsToDump {
    pub fn from_state(state: &PointerState) -> Self {
        Self(
            state
                .iter()
                .map(|(key, set)| {
                    let targets = match set {
                        LocationSet::Top => vec![LOCATION_SET_TOP.to_string()],
                        LocationSet::Bot => vec![LOCATION_SET_BOT.to_string()],
                        LocationSet::Explicit(set) => set.iter().map(|l| l.to_string()).collect(),
                    };
                    (key.to_string(), targets)
                })
                .collect(),
        )
    }

    pub fn get(&self, location: &str) -> Option<&[String]> {
        self.0.get(location).map(Vec::as_slice)
    }

    pub fn statistics(&self) -> PointsToStatistics {
        PointsToStatistics {
            map_size: self.0.len(),
            values_size: self.0.values().map(Vec::len).sum(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::identifier::MemoryLocation;
    use crate::config::PointerConfig;
    use std::sync::Arc;

    #[test]
    fn markers_replace_top_and_bot() {
        let state = PointerState::new(Arc::new(PointerConfig::default()))
            .add_points_to(MemoryLocation::global("p"), MemoryLocation::global("x"))
            .add_points_to(MemoryLocation::global("p"), MemoryLocation::local("f", "y"))
            .add_points_to_set(MemoryLocation::global("q"), &LocationSet::Top);
        let dump = PointsToDump::from_state(&state);
        assert_eq!(dump.get("p").unwrap(), &["x".to_string(), "f::y".to_string()]);
        assert_eq!(dump.get("q").unwrap(), &[LOCATION_SET_TOP.to_string()]);
        assert_eq!(
            dump.statistics(),
            PointsToStatistics {
                map_size: 2,
                values_size: 3
            }
        );
        let json: serde_json::Value = serde_json::from_str(&dump.to_json().unwrap()).unwrap();
        assert_eq!(json["q"][0], LOCATION_SET_TOP);
    }
}
