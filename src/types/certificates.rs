/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definition of the [Certificate] trait, which specifies the minimal interface of types that serve
//! as evidence that a quorum of committee members supports a given action. Also defines:
//! 1. The [QuorumCertificate] type, which stores the committee's votes for a
//!    [block](crate::types::block::Block).
//! 2. The [TimeoutCertificate] type, which stores the committee's timeout signatures for a round.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    block::Block,
    committee::Committee,
    crypto_primitives::verify_signature,
    data_types::{ChainID, CryptoHash, ExecStateId, Round, SignatureSet},
    voting::{timeout_signing_bytes, vote_signing_bytes, LedgerCommitInfo, VoteInfo},
};

/// Certificates serve as proof that a [quorum](Committee::quorum) of the committee has done
/// something, e.g., voted for a block.
pub trait Certificate {
    fn round(&self) -> Round;

    fn is_correct(&self, chain_id: ChainID, committee: &Committee) -> bool;
}

/// Checks that `signatures` has one position per committee member, that every present signature is
/// its member's signature over `message`, and that the signatures form a quorum.
fn signatures_form_quorum(signatures: &SignatureSet, message: &[u8], committee: &Committee) -> bool {
    if signatures.len() != committee.len() {
        return false;
    }

    let mut signers = 0;
    for (signature, member) in signatures.iter().zip(committee.members()) {
        if let Some(signature) = signature {
            if !verify_signature(member, message, signature) {
                return false;
            }
            signers += 1;
        }
    }

    signers >= committee.quorum()
}

/// Proof that at least a quorum of the committee voted for the same [`LedgerCommitInfo`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct QuorumCertificate {
    pub vote_info: VoteInfo,
    pub ledger_commit_info: LedgerCommitInfo,
    pub signatures: SignatureSet,
}

impl Certificate for QuorumCertificate {
    fn round(&self) -> Round {
        self.vote_info.round
    }

    /// Checks that the commit info matches the vote info, and that the signatures form a quorum over
    /// the commit info.
    ///
    /// The genesis QC is correct by definition.
    fn is_correct(&self, chain_id: ChainID, committee: &Committee) -> bool {
        if self.is_genesis_qc() {
            return true;
        }

        if self.ledger_commit_info.vote_info_hash != self.vote_info.hash()
            || self.ledger_commit_info.commit_state_id.is_some() != self.vote_info.forms_commit_chain()
        {
            return false;
        }

        signatures_form_quorum(
            &self.signatures,
            &vote_signing_bytes(chain_id, &self.ledger_commit_info),
            committee,
        )
    }
}

impl QuorumCertificate {
    pub fn genesis_qc() -> QuorumCertificate {
        let genesis_id = Block::genesis_id();
        let vote_info = VoteInfo {
            block_id: genesis_id,
            round: Round::genesis(),
            parent_id: genesis_id,
            parent_round: Round::genesis(),
            grandparent_id: genesis_id,
            grandparent_round: Round::genesis(),
            exec_state_id: ExecStateId::genesis(),
        };

        QuorumCertificate {
            ledger_commit_info: LedgerCommitInfo {
                commit_state_id: None,
                vote_info_hash: vote_info.hash(),
            },
            vote_info,
            signatures: SignatureSet::genesis(),
        }
    }

    pub fn is_genesis_qc(&self) -> bool {
        *self == Self::genesis_qc()
    }

    /// The id of the block this QC commits, if it completes a 3-chain.
    pub fn commits(&self) -> Option<CryptoHash> {
        self.ledger_commit_info
            .commit_state_id
            .map(|_| self.vote_info.grandparent_id)
    }
}

/// Proof that at least a quorum of the committee timed out in the same round.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TimeoutCertificate {
    pub round: Round,
    pub signatures: SignatureSet,
}

impl Certificate for TimeoutCertificate {
    fn round(&self) -> Round {
        self.round
    }

    fn is_correct(&self, chain_id: ChainID, committee: &Committee) -> bool {
        signatures_form_quorum(
            &self.signatures,
            &timeout_signing_bytes(chain_id, self.round),
            committee,
        )
    }
}
