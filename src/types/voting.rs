/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The content a vote attests to, and the exact byte strings that votes and timeouts sign.

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{borsh_bytes, ChainID, CryptoHash, ExecStateId, Round};

/// The three-block ancestry that a vote for `block_id` attests to.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VoteInfo {
    pub block_id: CryptoHash,
    pub round: Round,
    pub parent_id: CryptoHash,
    pub parent_round: Round,
    pub grandparent_id: CryptoHash,
    pub grandparent_round: Round,
    pub exec_state_id: ExecStateId,
}

impl VoteInfo {
    pub fn hash(&self) -> CryptoHash {
        CryptoHash::digest(&borsh_bytes(self))
    }

    /// Check whether a QC over this `VoteInfo` completes a chain of three blocks in consecutive
    /// rounds, which commits the grandparent.
    pub fn forms_commit_chain(&self) -> bool {
        self.round.directly_follows(self.parent_round)
            && self.parent_round.directly_follows(self.grandparent_round)
    }
}

/// What a voter actually signs. `commit_state_id` is `Some` exactly when the vote completes the
/// 3-chain, in which case it holds the execution state of the block being committed.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LedgerCommitInfo {
    pub commit_state_id: Option<ExecStateId>,
    pub vote_info_hash: CryptoHash,
}

impl LedgerCommitInfo {
    /// Digest that keys the vote collector for this commit info.
    pub fn hash(&self) -> CryptoHash {
        CryptoHash::digest(&borsh_bytes(self))
    }
}

/// Bytes signed by a vote, and by every signature in a QC.
pub fn vote_signing_bytes(chain_id: ChainID, ledger_commit_info: &LedgerCommitInfo) -> Vec<u8> {
    borsh_bytes(&(chain_id, ledger_commit_info))
}

/// Bytes signed by a timeout message, and by every signature in a TC.
pub fn timeout_signing_bytes(chain_id: ChainID, round: Round) -> Vec<u8> {
    borsh_bytes(&(chain_id, round))
}

/// Bytes signed by the leader over a proposal.
pub fn proposal_signing_bytes(chain_id: ChainID, block_id: &CryptoHash) -> Vec<u8> {
    borsh_bytes(&(chain_id, block_id))
}
