use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// A configuration value that the analysis cannot run with
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The block pattern is not a valid regular expression
    #[error("invalid block pattern `{pattern}`")]
    BlockPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    /// A block resource limit of zero would deactivate every block on its first state
    #[error("block resource limit must be positive")]
    ZeroResourceLimit,
    /// A lock that can never be acquired
    #[error("lock `{0}` has a maximum depth of zero")]
    ZeroLockDepth(String),
    /// A function-name option was set to the empty string
    #[error("option `{0}` must name a function")]
    EmptyFunctionName(&'static str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalOrder {
    /// Explore states in insertion order
    #[default]
    Bfs,
    /// Explore the most recently added state first
    Dfs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    /// Number of states a block may receive before it is deactivated
    pub resource_limit: usize,
    /// Functions whose names match this pattern open a new block
    pub pattern: String,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            resource_limit: 10000,
            pattern: "ldv_.*_instance_.*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitlistConfig {
    pub order: TraversalOrder,
    pub block: Option<BlockConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOperator {
    #[default]
    Sep,
    Join,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpaConfig {
    pub merge: MergeOperator,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    /// Do not report races between accesses that both hold no lock at all. Off by default, so
    /// unlocked writers racing with each other are reported.
    pub ignore_empty_lockset: bool,
    /// Only report confirmed races, hiding unrefined candidates
    pub print_only_true_unsafes: bool,
    pub skipped_variables: BTreeSet<String>,
    /// Usages inside these functions are not recorded
    pub skipped_functions: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockInfo {
    pub name: String,
    pub lock: BTreeSet<String>,
    pub unlock: BTreeSet<String>,
    /// Calls that release every level of the lock at once
    pub reset: BTreeSet<String>,
    pub max_depth: usize,
}

impl Default for LockInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            lock: BTreeSet::new(),
            unlock: BTreeSet::new(),
            reset: BTreeSet::new(),
            max_depth: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub locks: Vec<LockInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointerConfig {
    /// External functions returning fresh memory
    pub allocation_functions: BTreeSet<String>,
}

impl Default for PointerConfig {
    fn default() -> Self {
        Self {
            allocation_functions: ["malloc", "kmalloc", "kzalloc", "calloc"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RcuConfig {
    pub assign: String,
    pub deref: String,
    pub read_lock: String,
    pub read_unlock: String,
    pub synchronize: String,
    pub fict_read_lock: String,
    pub fict_read_unlock: String,
    pub fict_write_lock: String,
    pub fict_write_unlock: String,
    /// Assignment marker used by the RCU pointer search
    pub search_assign: String,
    /// Dereference marker used by the RCU pointer search
    pub search_deref: String,
    /// Forget old aliases of a pointer when it is reassigned
    pub flow_sense: bool,
}

impl Default for RcuConfig {
    fn default() -> Self {
        Self {
            assign: "rcu_assign_pointer".to_string(),
            deref: "rcu_dereference".to_string(),
            read_lock: "rcu_read_lock".to_string(),
            read_unlock: "rcu_read_unlock".to_string(),
            synchronize: "synchronize_rcu".to_string(),
            fict_read_lock: "rlock_rcu".to_string(),
            fict_read_unlock: "runlock_rcu".to_string(),
            fict_write_lock: "wlock_rcu".to_string(),
            fict_write_unlock: "wunlock_rcu".to_string(),
            search_assign: "ldv_rcu_assign_pointer".to_string(),
            search_deref: "ldv_rcu_dereference".to_string(),
            flow_sense: false,
        }
    }
}

impl RcuConfig {
    fn names(&self) -> [(&'static str, &str); 11] {
        [
            ("rcu.assign", &self.assign),
            ("rcu.deref", &self.deref),
            ("rcu.read_lock", &self.read_lock),
            ("rcu.read_unlock", &self.read_unlock),
            ("rcu.synchronize", &self.synchronize),
            ("rcu.fict_read_lock", &self.fict_read_lock),
            ("rcu.fict_read_unlock", &self.fict_read_unlock),
            ("rcu.fict_write_lock", &self.fict_write_lock),
            ("rcu.fict_write_unlock", &self.fict_write_unlock),
            ("rcu.search_assign", &self.search_assign),
            ("rcu.search_deref", &self.search_deref),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    pub enabled: bool,
    /// Reset the precision after this many refinement iterations found new facts
    pub precision_reset: Option<usize>,
    pub max_iterations: usize,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            precision_reset: None,
            max_iterations: 20,
        }
    }
}

/// All tunables of an analysis run.
///
/// Every section falls back to its defaults when absent, so an empty file is a valid
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatchkeyConfig {
    pub waitlist: WaitlistConfig,
    pub cpa: CpaConfig,
    pub usage: UsageConfig,
    pub lock: LockConfig,
    pub pointer: PointerConfig,
    pub rcu: RcuConfig,
    pub refinement: RefinementConfig,
}

impl LatchkeyConfig {
    /// Rejects values the analysis cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(block) = &self.waitlist.block {
            block.compile_pattern()?;
            if block.resource_limit == 0 {
                return Err(ConfigError::ZeroResourceLimit);
            }
        }
        for lock in &self.lock.locks {
            if lock.max_depth == 0 {
                return Err(ConfigError::ZeroLockDepth(lock.name.clone()));
            }
        }
        for (option, name) in self.rcu.names() {
            if name.is_empty() {
                return Err(ConfigError::EmptyFunctionName(option));
            }
        }
        Ok(())
    }
}

impl BlockConfig {
    /// Compiles the block pattern. Function names must match it as a whole.
    pub fn compile_pattern(&self) -> Result<Regex, ConfigError> {
        Regex::new(&format!("^(?:{})$", self.pattern)).map_err(|source| ConfigError::BlockPattern {
            pattern: self.pattern.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        LatchkeyConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: LatchkeyConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LatchkeyConfig::default());
    }

    #[test]
    fn unlocked_accesses_count_unless_ignored() {
        assert!(!UsageConfig::default().ignore_empty_lockset);
        let config: UsageConfig =
            serde_json::from_str(r#"{"print_only_true_unsafes": true}"#).unwrap();
        assert!(!config.ignore_empty_lockset);
        let config: UsageConfig =
            serde_json::from_str(r#"{"ignore_empty_lockset": true}"#).unwrap();
        assert!(config.ignore_empty_lockset);
    }

    #[test]
    fn bad_block_pattern_fails_fast() {
        let mut config = LatchkeyConfig::default();
        config.waitlist.block = Some(BlockConfig {
            pattern: "ldv_(".to_string(),
            ..BlockConfig::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BlockPattern { .. })
        ));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut config = LatchkeyConfig::default();
        config.waitlist.block = Some(BlockConfig {
            resource_limit: 0,
            ..BlockConfig::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroResourceLimit)
        ));

        let mut config = LatchkeyConfig::default();
        config.lock.locks.push(LockInfo {
            name: "mutex".into(),
            max_depth: 0,
            ..LockInfo::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroLockDepth(_))
        ));
    }
}
