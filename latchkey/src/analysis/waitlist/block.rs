use crate::analysis::cpa::state::CallstackProvider;
use crate::analysis::waitlist::{SimpleWaitlist, Waitlist, WaitlistError};
use crate::config::TraversalOrder;
use regex::Regex;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Name of the block holding every state outside of any pattern-matching function.
pub const ENTRY_BLOCK_NAME: &str = "entry_block_main";

/// Identifies a block: the innermost pattern-matching function on a state's call stack and the
/// call-stack depth at which it runs.
///
/// Keys order by depth first, so deeper blocks are explored first, and by name second.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockKey {
    pub depth: usize,
    pub name: String,
}

impl BlockKey {
    pub fn entry() -> Self {
        Self {
            depth: 1,
            name: ENTRY_BLOCK_NAME.to_string(),
        }
    }

    pub fn is_entry(&self) -> bool {
        self.name == ENTRY_BLOCK_NAME
    }
}

impl Display for BlockKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.depth)
    }
}

#[derive(Debug)]
struct Block<T> {
    states: SimpleWaitlist<T>,
    /// Number of states currently queued in `states`
    resources: usize,
}

impl<T> Block<T> {
    fn new(order: TraversalOrder) -> Self {
        Self {
            states: SimpleWaitlist::new(order),
            resources: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockWaitlistStatistics {
    pub blocks_created: usize,
    pub blocks_deactivated: usize,
    pub slow_path_scans: usize,
    pub max_block_resources: usize,
}

/// A waitlist partitioned into blocks by call context.
///
/// Each block gets a budget of `limit` states. A block that exceeds its budget is deactivated:
/// it keeps its states and keeps receiving new ones, but no longer takes part in choosing the
/// next state to explore. The entry block is never deactivated.
#[derive(Debug)]
pub struct BlockWaitlist<T> {
    limit: usize,
    pattern: Regex,
    order: TraversalOrder,
    active: BTreeMap<BlockKey, Block<T>>,
    inactive: BTreeMap<BlockKey, Block<T>>,
    size: usize,
    blocks_created: usize,
    blocks_deactivated: usize,
    max_block_resources: usize,
    slow_path_scans: Cell<usize>,
}

impl<T> BlockWaitlist<T> {
    pub fn new(limit: usize, pattern: Regex, order: TraversalOrder) -> Self {
        Self {
            limit,
            pattern,
            order,
            active: BTreeMap::new(),
            inactive: BTreeMap::new(),
            size: 0,
            blocks_created: 0,
            blocks_deactivated: 0,
            max_block_resources: 0,
            slow_path_scans: Cell::new(0),
        }
    }

    pub fn statistics(&self) -> BlockWaitlistStatistics {
        BlockWaitlistStatistics {
            blocks_created: self.blocks_created,
            blocks_deactivated: self.blocks_deactivated,
            slow_path_scans: self.slow_path_scans.get(),
            max_block_resources: self.max_block_resources,
        }
    }

    pub fn is_active(&self, key: &BlockKey) -> bool {
        self.active.contains_key(key)
    }

    pub fn is_inactive(&self, key: &BlockKey) -> bool {
        self.inactive.contains_key(key)
    }

    pub fn inactive_blocks(&self) -> impl Iterator<Item = &BlockKey> {
        self.inactive.keys()
    }

    /// The resource counter of the block `key`, active or not.
    pub fn block_resources(&self, key: &BlockKey) -> Option<usize> {
        self.active
            .get(key)
            .or_else(|| self.inactive.get(key))
            .map(|b| b.resources)
    }

    /// Whether no state is available to [`Waitlist::pop`].
    ///
    /// Empty blocks are only evicted lazily, so when the top-priority active block is empty
    /// this falls back to scanning every active block.
    pub fn is_active_empty(&self) -> bool {
        match self.active.last_key_value() {
            None => true,
            Some((_, top)) if top.resources > 0 => false,
            Some(_) => {
                self.slow_path_scans.set(self.slow_path_scans.get() + 1);
                self.active.values().all(|b| b.resources == 0)
            }
        }
    }
}

impl<T: CallstackProvider> BlockWaitlist<T> {
    /// Walks the call stack outward until a function matches the block pattern.
    pub fn block_key(&self, state: &T) -> BlockKey {
        let mut frame = state.callstack();
        while let Some(cs) = frame {
            if self.pattern.is_match(cs.current_function()) {
                return BlockKey {
                    depth: cs.depth(),
                    name: cs.current_function().to_string(),
                };
            }
            frame = cs.previous();
        }
        BlockKey::entry()
    }
}

impl<T: PartialEq + CallstackProvider> Waitlist<T> for BlockWaitlist<T> {
    fn add(&mut self, item: T) {
        let key = self.block_key(&item);
        self.size += 1;
        if let Some(block) = self.inactive.get_mut(&key) {
            block.states.add(item);
            block.resources += 1;
            return;
        }
        let order = self.order;
        let block = self.active.entry(key.clone()).or_insert_with(|| {
            self.blocks_created += 1;
            Block::new(order)
        });
        block.states.add(item);
        block.resources += 1;
        self.max_block_resources = self.max_block_resources.max(block.resources);
        if block.resources > self.limit && !key.is_entry() {
            if let Some(block) = self.active.remove(&key) {
                tracing::debug!(block = %key, resources = block.resources, "deactivating block");
                self.inactive.insert(key, block);
                self.blocks_deactivated += 1;
            }
        }
    }

    fn pop(&mut self) -> Result<T, WaitlistError> {
        while let Some(mut top) = self.active.last_entry() {
            let block = top.get_mut();
            match block.states.pop() {
                Ok(item) => {
                    block.resources -= 1;
                    self.size -= 1;
                    return Ok(item);
                }
                Err(_) => {
                    top.remove();
                }
            }
        }
        if self.size == 0 {
            return Err(WaitlistError::Empty);
        }
        let blocks: Vec<String> = self
            .inactive
            .iter()
            .filter(|(_, b)| b.resources > 0)
            .map(|(k, _)| k.to_string())
            .collect();
        tracing::error!(pending = self.size, ?blocks, "only inactive blocks remain");
        Err(WaitlistError::OnlyInactiveBlocks {
            pending: self.size,
            blocks,
        })
    }

    fn remove(&mut self, item: &T) -> bool {
        let key = self.block_key(item);
        let block = match self.active.get_mut(&key) {
            Some(block) => Some(block),
            None => self.inactive.get_mut(&key),
        };
        let Some(block) = block else {
            return false;
        };
        if !block.states.remove(item) {
            return false;
        }
        block.resources -= 1;
        self.size -= 1;
        true
    }

    fn contains(&self, item: &T) -> bool {
        let key = self.block_key(item);
        self.active
            .get(&key)
            .or_else(|| self.inactive.get(&key))
            .is_some_and(|b| b.states.contains(item))
    }

    fn size(&self) -> usize {
        self.size
    }

    fn clear(&mut self) {
        self.active.clear();
        self.inactive.clear();
        self.size = 0;
    }
}
