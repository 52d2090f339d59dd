/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The rules that decide whether this replica votes, and whether a vote commits a block.
//!
//! Every other component may misbehave without breaking safety, as long as the rules in this module
//! hold. Two pieces of state back them, both of which only ever increase:
//! 1. `last_voted_round`: the round of the last block this replica voted for.
//! 2. `preferred_round`: the *lock*. Set to the highest parent round among all QCs seen so far.
//!
//! ## Voting rule
//!
//! [`Safety::make_vote`] refuses to vote for a block unless:
//! 1. Its round is greater than `last_voted_round`, so a replica votes at most once per round.
//! 2. Its round is at least `preferred_round`.
//! 3. Its parent QC is from a lower round than the block.
//! 4. Its parent QC is from a round at least `preferred_round`, so a replica locked on a block never
//!    votes for a branch that does not build on a QC as recent as the lock.
//!
//! ## Commit rule
//!
//! A vote for block `B` with parent `P` and grandparent `G` commits `G` if `B`, `P`, and `G` are in
//! consecutive rounds. In that case the vote's [`LedgerCommitInfo`] carries the execution state of
//! `G`, and any QC formed from such votes commits `G`.

use crate::block_tree::PendingBlockTree;
use crate::types::{
    block::Block,
    certificates::QuorumCertificate,
    data_types::{ExecStateId, Round},
    voting::{LedgerCommitInfo, VoteInfo},
};

#[derive(Clone, Debug, Default)]
pub struct Safety {
    preferred_round: Round,
    last_voted_round: Round,
}

impl Safety {
    pub fn new() -> Safety {
        Safety::default()
    }

    /// Raise the lock to `qc`'s parent round, if that is higher. Returns whether it was raised.
    pub fn update_preferred_round(&mut self, qc: &QuorumCertificate) -> bool {
        if qc.vote_info.parent_round > self.preferred_round {
            self.preferred_round = qc.vote_info.parent_round;
            true
        } else {
            false
        }
    }

    /// Decide whether to vote for `block`, which executed to `exec_state_id` in `block_tree`.
    ///
    /// If the vote is allowed, records its round as the last voted round and returns the content to
    /// sign. Otherwise, returns `None` and leaves all state untouched.
    pub fn make_vote(
        &mut self,
        block: &Block,
        exec_state_id: ExecStateId,
        block_tree: &PendingBlockTree,
    ) -> Option<(VoteInfo, LedgerCommitInfo)> {
        let round = block.round;
        let parent = &block.parent_qc.vote_info;

        if round <= self.last_voted_round
            || round < self.preferred_round
            || parent.round >= round
            || parent.round < self.preferred_round
        {
            return None;
        }

        if block_tree.exec_state(&block.id) != Some(exec_state_id) {
            return None;
        }

        let vote_info = VoteInfo {
            block_id: block.id,
            round,
            parent_id: parent.block_id,
            parent_round: parent.round,
            grandparent_id: parent.parent_id,
            grandparent_round: parent.parent_round,
            exec_state_id,
        };

        let commit_state_id = if vote_info.forms_commit_chain() {
            Some(block_tree.exec_state(&vote_info.grandparent_id)?)
        } else {
            None
        };

        let ledger_commit_info = LedgerCommitInfo {
            commit_state_id,
            vote_info_hash: vote_info.hash(),
        };

        self.last_voted_round = round;
        Some((vote_info, ledger_commit_info))
    }

    pub fn preferred_round(&self) -> Round {
        self.preferred_round
    }

    pub fn last_voted_round(&self) -> Round {
        self.last_voted_round
    }
}
