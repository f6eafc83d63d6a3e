//! # tally-consensus
//! Reconstructed finality-vote view for a single telemetry node.
//!
//! [`ConsensusView`] holds prevote/precommit/finality state per block height
//! and voter, bounded to the most recent heights, and implements the backfill
//! walk that infers implicit votes across heights a node stayed silent on.

pub mod view;

pub use view::{ConsensusInfo, ConsensusRow, ConsensusView};
