/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The speculative, uncommitted suffix of the chain.
//!
//! ## Anchor
//!
//! The pending tree hangs off a single committed block, the *anchor*. Initially the anchor is the
//! genesis block. Every block in the tree descends from the anchor; blocks that stop descending
//! from it when it moves are pruned.
//!
//! ## Commit order
//!
//! [`commit`](PendingBlockTree::commit) applies blocks to the [`Ledger`] strictly in ascending
//! round order, and at most once each.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::ledger::Ledger;
use crate::types::{
    block::Block,
    certificates::QuorumCertificate,
    data_types::{CryptoHash, ExecStateId, Round},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockTreeError {
    #[error("parent block {0:?} is neither pending nor the commit anchor")]
    UnknownParent(CryptoHash),

    #[error("block at round {block} does not extend its parent at round {parent}")]
    NonIncreasingRound { block: Round, parent: Round },

    #[error("block at round {block} is not above the committed round {committed}")]
    StaleBlock { block: Round, committed: Round },

    #[error("parent QC of block {0:?} disagrees with the parent's round or execution state")]
    InconsistentParentQC(CryptoHash),
}

#[derive(Clone, Debug)]
struct PendingBlock {
    block: Block,
    exec_state_id: ExecStateId,
}

#[derive(Clone, Copy, Debug)]
struct Anchor {
    id: CryptoHash,
    round: Round,
    exec_state_id: ExecStateId,
}

/// Blocks newly committed and pruned by one call to [`PendingBlockTree::commit`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    /// In the order they were applied to the ledger.
    pub committed: Vec<(CryptoHash, Round)>,
    pub pruned: Vec<CryptoHash>,
}

impl CommitOutcome {
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.pruned.is_empty()
    }
}

pub struct PendingBlockTree {
    blocks: HashMap<CryptoHash, PendingBlock>,
    anchor: Anchor,
    high_qc: QuorumCertificate,
}

impl PendingBlockTree {
    /// Create a pending tree anchored at the genesis block, with the genesis QC as the highQC.
    pub fn new() -> PendingBlockTree {
        let genesis = Block::genesis();
        PendingBlockTree {
            blocks: HashMap::new(),
            anchor: Anchor {
                id: genesis.id,
                round: genesis.round,
                exec_state_id: ExecStateId::genesis(),
            },
            high_qc: QuorumCertificate::genesis_qc(),
        }
    }

    /// Speculatively execute `block` on the state its parent executed to, and insert it into the
    /// pending set.
    ///
    /// Executing a block that is already pending returns its cached state without calling the ledger
    /// again.
    pub fn execute_proposal<L: Ledger>(
        &mut self,
        block: &Block,
        ledger: &mut L,
    ) -> Result<ExecStateId, BlockTreeError> {
        if let Some(pending) = self.blocks.get(&block.id) {
            return Ok(pending.exec_state_id);
        }

        if block.round <= self.anchor.round {
            return Err(BlockTreeError::StaleBlock {
                block: block.round,
                committed: self.anchor.round,
            });
        }

        let parent_id = block.parent_id();
        let (parent_round, parent_state) = self
            .round_and_state(&parent_id)
            .ok_or(BlockTreeError::UnknownParent(parent_id))?;

        if block.round <= parent_round {
            return Err(BlockTreeError::NonIncreasingRound {
                block: block.round,
                parent: parent_round,
            });
        }

        let parent_vote_info = &block.parent_qc.vote_info;
        if parent_vote_info.round != parent_round || parent_vote_info.exec_state_id != parent_state {
            return Err(BlockTreeError::InconsistentParentQC(block.id));
        }

        let exec_state_id = ledger.execute_proposal(block, parent_state);
        self.blocks.insert(
            block.id,
            PendingBlock {
                block: block.clone(),
                exec_state_id,
            },
        );

        Ok(exec_state_id)
    }

    /// Replace the tracked highQC with `qc` if `qc` is from a strictly greater round. Returns whether
    /// it was replaced.
    pub fn ensure_high_qc(&mut self, qc: &QuorumCertificate) -> bool {
        if qc.vote_info.round > self.high_qc.vote_info.round {
            self.high_qc = qc.clone();
            true
        } else {
            false
        }
    }

    /// Commit `block_id` and every pending ancestor of it, in round order, then prune every block
    /// that no longer descends from the new anchor.
    ///
    /// Committing an unknown or already committed block is a no-op and returns an empty outcome.
    pub fn commit<L: Ledger>(&mut self, block_id: &CryptoHash, ledger: &mut L) -> CommitOutcome {
        let mut branch = Vec::new();
        let mut cursor = *block_id;
        while cursor != self.anchor.id {
            match self.blocks.get(&cursor) {
                Some(pending) => {
                    branch.push(cursor);
                    cursor = pending.block.parent_id();
                }
                None => return CommitOutcome::default(),
            }
        }

        let mut outcome = CommitOutcome::default();
        for id in branch.into_iter().rev() {
            if let Some(pending) = self.blocks.remove(&id) {
                ledger.apply_commit(&pending.block, pending.exec_state_id);
                self.anchor = Anchor {
                    id,
                    round: pending.block.round,
                    exec_state_id: pending.exec_state_id,
                };
                outcome.committed.push((id, pending.block.round));
            }
        }

        outcome.pruned = self.prune();
        outcome
    }

    /// Remove every pending block that does not descend from the anchor.
    fn prune(&mut self) -> Vec<CryptoHash> {
        let mut by_round: Vec<(Round, CryptoHash, CryptoHash)> = self
            .blocks
            .values()
            .map(|pending| (pending.block.round, pending.block.id, pending.block.parent_id()))
            .collect();
        by_round.sort();

        // Parents always have lower rounds than their children, so they are visited first.
        let mut descendants = HashSet::new();
        let mut pruned = Vec::new();
        for (_, id, parent_id) in by_round {
            if parent_id == self.anchor.id || descendants.contains(&parent_id) {
                descendants.insert(id);
            } else {
                pruned.push(id);
            }
        }

        for id in &pruned {
            self.blocks.remove(id);
        }
        pruned
    }

    fn round_and_state(&self, id: &CryptoHash) -> Option<(Round, ExecStateId)> {
        if *id == self.anchor.id {
            Some((self.anchor.round, self.anchor.exec_state_id))
        } else {
            self.blocks
                .get(id)
                .map(|pending| (pending.block.round, pending.exec_state_id))
        }
    }

    /// The state `id` executed to, for pending blocks and for the commit anchor.
    pub fn exec_state(&self, id: &CryptoHash) -> Option<ExecStateId> {
        self.round_and_state(id).map(|(_, state)| state)
    }

    pub fn block(&self, id: &CryptoHash) -> Option<&Block> {
        self.blocks.get(id).map(|pending| &pending.block)
    }

    pub fn contains(&self, id: &CryptoHash) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn high_qc(&self) -> &QuorumCertificate {
        &self.high_qc
    }

    pub fn committed_id(&self) -> CryptoHash {
        self.anchor.id
    }

    pub fn committed_round(&self) -> Round {
        self.anchor.round
    }

    /// Number of pending (uncommitted) blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Default for PendingBlockTree {
    fn default() -> Self {
        Self::new()
    }
}
