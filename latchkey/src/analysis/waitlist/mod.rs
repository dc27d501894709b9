mod block;

pub use block::{BlockKey, BlockWaitlist, BlockWaitlistStatistics, ENTRY_BLOCK_NAME};

use crate::analysis::cpa::state::CallstackProvider;
use crate::config::{TraversalOrder, WaitlistConfig};
use crate::error::LatchkeyError;
use std::collections::VecDeque;
use thiserror::Error;

/// The waitlist could not hand out a state. Both cases are defects in the caller or in the
/// configuration and are never recovered from.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitlistError {
    /// `pop` was called on a waitlist holding no states at all
    #[error("pop from an empty waitlist")]
    Empty,
    /// Every remaining state is parked in a deactivated block
    #[error("all {pending} remaining states are in inactive blocks: {blocks:?}")]
    OnlyInactiveBlocks { pending: usize, blocks: Vec<String> },
}

/// The set of states that still have to be explored, and the order in which that happens.
pub trait Waitlist<T> {
    fn add(&mut self, item: T);

    /// Removes and returns the next state to explore. Callers check [`Waitlist::is_empty`]
    /// first; popping an empty waitlist is an error.
    fn pop(&mut self) -> Result<T, WaitlistError>;

    /// Removes `item` if present, reporting whether it was.
    fn remove(&mut self, item: &T) -> bool;

    fn contains(&self, item: &T) -> bool;

    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn clear(&mut self);
}

/// A plain queue or stack of states.
#[derive(Debug, Clone)]
pub struct SimpleWaitlist<T> {
    order: TraversalOrder,
    items: VecDeque<T>,
}

impl<T> SimpleWaitlist<T> {
    pub fn new(order: TraversalOrder) -> Self {
        Self {
            order,
            items: VecDeque::new(),
        }
    }

    pub fn order(&self) -> TraversalOrder {
        self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: PartialEq> Waitlist<T> for SimpleWaitlist<T> {
    fn add(&mut self, item: T) {
        self.items.push_back(item);
    }

    fn pop(&mut self) -> Result<T, WaitlistError> {
        let item = match self.order {
            TraversalOrder::Bfs => self.items.pop_front(),
            TraversalOrder::Dfs => self.items.pop_back(),
        };
        item.ok_or(WaitlistError::Empty)
    }

    fn remove(&mut self, item: &T) -> bool {
        match self.items.iter().position(|i| i == item) {
            Some(pos) => {
                self.items.remove(pos);
                true
            }
            None => false,
        }
    }

    fn contains(&self, item: &T) -> bool {
        self.items.contains(item)
    }

    fn size(&self) -> usize {
        self.items.len()
    }

    fn clear(&mut self) {
        self.items.clear();
    }
}

/// The waitlist selected by a [`WaitlistConfig`].
#[derive(Debug)]
pub enum ConfiguredWaitlist<T> {
    Simple(SimpleWaitlist<T>),
    Block(BlockWaitlist<T>),
}

impl<T> ConfiguredWaitlist<T> {
    pub fn from_config(config: &WaitlistConfig) -> Result<Self, LatchkeyError> {
        Ok(match &config.block {
            Some(block) => ConfiguredWaitlist::Block(BlockWaitlist::new(
                block.resource_limit,
                block.compile_pattern()?,
                config.order,
            )),
            None => ConfiguredWaitlist::Simple(SimpleWaitlist::new(config.order)),
        })
    }

    pub fn block_statistics(&self) -> Option<BlockWaitlistStatistics> {
        match self {
            ConfiguredWaitlist::Simple(_) => None,
            ConfiguredWaitlist::Block(b) => Some(b.statistics()),
        }
    }
}

impl<T: PartialEq + CallstackProvider> Waitlist<T> for ConfiguredWaitlist<T> {
    fn add(&mut self, item: T) {
        match self {
            ConfiguredWaitlist::Simple(w) => w.add(item),
            ConfiguredWaitlist::Block(w) => w.add(item),
        }
    }

    fn pop(&mut self) -> Result<T, WaitlistError> {
        match self {
            ConfiguredWaitlist::Simple(w) => w.pop(),
            ConfiguredWaitlist::Block(w) => w.pop(),
        }
    }

    fn remove(&mut self, item: &T) -> bool {
        match self {
            ConfiguredWaitlist::Simple(w) => w.remove(item),
            ConfiguredWaitlist::Block(w) => w.remove(item),
        }
    }

    fn contains(&self, item: &T) -> bool {
        match self {
            ConfiguredWaitlist::Simple(w) => w.contains(item),
            ConfiguredWaitlist::Block(w) => w.contains(item),
        }
    }

    fn size(&self) -> usize {
        match self {
            ConfiguredWaitlist::Simple(w) => w.size(),
            ConfiguredWaitlist::Block(w) => w.size(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            ConfiguredWaitlist::Simple(w) => w.is_empty(),
            ConfiguredWaitlist::Block(w) => w.is_empty(),
        }
    }

    fn clear(&mut self) {
        match self {
            ConfiguredWaitlist::Simple(w) => w.clear(),
            ConfiguredWaitlist::Block(w) => w.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bfs_and_dfs_orders() {
        let mut bfs = SimpleWaitlist::new(TraversalOrder::Bfs);
        let mut dfs = SimpleWaitlist::new(TraversalOrder::Dfs);
        for i in 0..3 {
            bfs.add(i);
            dfs.add(i);
        }
        assert_eq!(bfs.pop(), Ok(0));
        assert_eq!(dfs.pop(), Ok(2));
        assert!(bfs.remove(&2));
        assert!(!bfs.remove(&2));
        assert_eq!(bfs.size(), 1);
        bfs.clear();
        assert_eq!(bfs.pop(), Err(WaitlistError::Empty));
    }
}
