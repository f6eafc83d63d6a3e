//! Per-node consensus view: block height → voter → [`ConsensusInfo`].
//!
//! The view is bounded to the most recent `max_heights` distinct heights.
//! Heights are kept in a [`BTreeMap`] so "most recent" is an explicit
//! property of the key order, and [`ConsensusView::prune`] always drops the
//! lowest heights first.
//!
//! # Backfill
//!
//! A vote or finalization for height `H` says something about the heights a
//! node stayed silent on. [`ConsensusView::backfill`] walks down from `H - 1`
//! and lets the caller mark the voter's implied state, under three rules:
//!
//! - it never starts across a gap: height `H - 1` must already be tracked,
//! - it stops at the first height where the voter already has an entry,
//! - it never extends below the oldest retained height.

use std::collections::BTreeMap;

use serde::Serialize;
use tally_core::types::{Address, BlockHash};
use tracing::trace;

/// What is known about one voter at one height.
///
/// Explicit flags are never cleared once set. Implicit flags are only set
/// while the matching explicit flag is still false.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ConsensusInfo {
    pub prevote: bool,
    pub precommit: bool,
    pub finalized: bool,
    pub implicit_prevote: bool,
    pub implicit_precommit: bool,
    pub implicit_finalized: bool,
    pub finalized_hash: Option<BlockHash>,
    pub finalized_height: Option<u64>,
    /// Height of the explicit report this implicit entry was derived from.
    pub implicit_pointer: Option<u64>,
}

impl ConsensusInfo {
    pub fn has_prevote(&self) -> bool {
        self.prevote || self.implicit_prevote
    }

    pub fn has_precommit(&self) -> bool {
        self.precommit || self.implicit_precommit
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized || self.implicit_finalized
    }

    /// Record an explicit finalization.
    ///
    /// Finalization is taken to imply that both vote phases happened even if
    /// the vote messages themselves were never received.
    pub fn mark_finalized(&mut self, height: u64, hash: BlockHash) {
        self.finalized = true;
        self.finalized_hash = Some(hash);
        self.finalized_height = Some(height);
        self.prevote = true;
        self.precommit = true;
    }

    /// Backfill step for prevotes. Returns `false` once the voter is already
    /// known to have prevoted here.
    pub fn mark_implicit_prevote(&mut self, pointer: u64) -> bool {
        if self.has_prevote() {
            return false;
        }
        self.implicit_prevote = true;
        self.implicit_pointer = Some(pointer);
        true
    }

    /// Backfill step for precommits.
    pub fn mark_implicit_precommit(&mut self, pointer: u64) -> bool {
        if self.has_precommit() {
            return false;
        }
        self.implicit_precommit = true;
        self.implicit_pointer = Some(pointer);
        true
    }

    /// Backfill step for finalization. Implies both vote phases, marked
    /// implicitly where the explicit flag is not already set.
    pub fn mark_implicitly_finalized(&mut self, pointer: u64) -> bool {
        if self.is_finalized() {
            return false;
        }
        self.implicit_finalized = true;
        if !self.prevote {
            self.implicit_prevote = true;
        }
        if !self.precommit {
            self.implicit_precommit = true;
        }
        self.implicit_pointer = Some(pointer);
        true
    }
}

/// Votes seen at one height, keyed by voter.
pub type ConsensusRow = BTreeMap<Address, ConsensusInfo>;

/// Bounded, height-ordered consensus cache for one node.
#[derive(Serialize, Clone, Debug)]
pub struct ConsensusView {
    #[serde(flatten)]
    rows: BTreeMap<u64, ConsensusRow>,
    #[serde(skip)]
    max_heights: usize,
}

impl ConsensusView {
    /// Create an empty view retaining at most `max_heights` heights (minimum 1).
    pub fn new(max_heights: usize) -> Self {
        Self {
            rows: BTreeMap::new(),
            max_heights: max_heights.max(1),
        }
    }

    /// Lazily create the row for `height` and the voter's record in it.
    pub fn ensure_entry(&mut self, height: u64, voter: &Address) -> &mut ConsensusInfo {
        self.rows
            .entry(height)
            .or_default()
            .entry(voter.clone())
            .or_default()
    }

    pub fn get(&self, height: u64, voter: &Address) -> Option<&ConsensusInfo> {
        self.rows.get(&height).and_then(|row| row.get(voter))
    }

    pub fn row(&self, height: u64) -> Option<&ConsensusRow> {
        self.rows.get(&height)
    }

    pub fn contains_height(&self, height: u64) -> bool {
        self.rows.contains_key(&height)
    }

    /// Tracked heights, ascending.
    pub fn heights(&self) -> impl Iterator<Item = u64> + '_ {
        self.rows.keys().copied()
    }

    pub fn lowest_height(&self) -> Option<u64> {
        self.rows.first_key_value().map(|(h, _)| *h)
    }

    pub fn highest_height(&self) -> Option<u64> {
        self.rows.last_key_value().map(|(h, _)| *h)
    }

    /// Number of distinct tracked heights.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn max_heights(&self) -> usize {
        self.max_heights
    }

    /// Drop the lowest heights until at most `max_heights` remain. Returns the
    /// number of heights removed.
    pub fn prune(&mut self) -> usize {
        let mut removed = 0;
        while self.rows.len() > self.max_heights {
            self.rows.pop_first();
            removed += 1;
        }
        removed
    }

    /// Walk down from `from - 1`, adding the voter's entry to each tracked
    /// height and handing it to `cont`. Returns the last height visited, or
    /// `from` when nothing was visited.
    ///
    /// The walk is a no-op when `voter` is `None`, when fewer than two
    /// heights are tracked, or when `from - 1` is not tracked. It stops at a
    /// height where the voter already has an entry (left untouched), before
    /// the first untracked height, when `cont` returns `false`, or after
    /// visiting the lowest tracked height. Rows are never created.
    pub fn backfill(
        &mut self,
        voter: Option<&Address>,
        from: u64,
        cont: &mut dyn FnMut(u64, &mut ConsensusInfo) -> bool,
    ) -> u64 {
        let Some(voter) = voter else {
            return from;
        };
        if self.rows.len() <= 1 {
            return from;
        }
        if from == 0 || !self.rows.contains_key(&(from - 1)) {
            return from;
        }
        let lowest = self.lowest_height().unwrap_or(0);

        let mut i = from;
        let mut created = 0usize;
        while i > lowest {
            let Some(row) = self.rows.get_mut(&(i - 1)) else {
                break;
            };
            i -= 1;
            if row.contains_key(voter) {
                break;
            }
            let info = row.entry(voter.clone()).or_default();
            created += 1;
            if !cont(i, info) {
                break;
            }
        }
        trace!(%voter, from, stopped_at = i, created, "consensus backfill");
        i
    }

    /// Backfill with no flag changes: adds `voter` to the tracked heights
    /// below `from`.
    pub fn fill_gap(&mut self, voter: Option<&Address>, from: u64) -> u64 {
        self.backfill(voter, from, &mut |_, _| true)
    }
}

impl Default for ConsensusView {
    fn default() -> Self {
        Self::new(tally_core::constants::MAX_CACHE_HEIGHTS)
    }
}
