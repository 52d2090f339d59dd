/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its associated methods.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    certificates::{Certificate, QuorumCertificate},
    committee::Committee,
    data_types::{borsh_bytes, ChainID, CryptoHash, Payload, Round},
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub id: CryptoHash,
    pub round: Round,
    pub payload: Payload,
    pub parent_qc: QuorumCertificate,
}

impl Block {
    pub fn new(round: Round, payload: Payload, parent_qc: QuorumCertificate) -> Block {
        Block {
            id: Block::hash(round, &payload, &parent_qc.vote_info.block_id),
            round,
            payload,
            parent_qc,
        }
    }

    /// The block at round 0 that every committee starts from.
    pub fn genesis() -> Block {
        Block {
            id: Block::genesis_id(),
            round: Round::genesis(),
            payload: Payload::empty(),
            parent_qc: QuorumCertificate::genesis_qc(),
        }
    }

    pub fn genesis_id() -> CryptoHash {
        Block::hash(Round::genesis(), &Payload::empty(), &CryptoHash::zero())
    }

    pub fn hash(round: Round, payload: &Payload, parent_id: &CryptoHash) -> CryptoHash {
        CryptoHash::digest(&borsh_bytes(&(round, payload, parent_id)))
    }

    pub fn parent_id(&self) -> CryptoHash {
        self.parent_qc.vote_info.block_id
    }

    /// Checks if the id matches the contents, the block extends its parent QC to a higher round,
    /// and the parent QC is cryptographically correct.
    pub fn is_correct(&self, chain_id: ChainID, committee: &Committee) -> bool {
        self.id == Block::hash(self.round, &self.payload, &self.parent_id())
            && self.round > self.parent_qc.vote_info.round
            && self.parent_qc.is_correct(chain_id, committee)
    }
}
