/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The fixed set of replicas that propose and vote, and the rule that picks each round's leader.

use std::slice;

use thiserror::Error;

use super::{
    crypto_primitives::VerifyingKey,
    data_types::{Round, SignerIndex},
};

/// Stores the identities of the `N` committee members.
///
/// ## Ordering of members
///
/// Members keep the order they were given in. A member's position in this order is its
/// [`SignerIndex`], so every replica must construct its `Committee` from the same list.
///
/// ## Fault tolerance
///
/// A committee of `N` members tolerates `F = ⌊(N - 1) / 3⌋` Byzantine members, and a quorum is
/// `2F + 1` members.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committee {
    members: Vec<VerifyingKey>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitteeError {
    #[error("a committee must have at least one member")]
    Empty,

    #[error("committee member at position {0} appears more than once")]
    Duplicate(SignerIndex),

    #[error("{0:?} is not a member of the committee")]
    UnknownMember(VerifyingKey),
}

impl Committee {
    /// Create a committee out of `members`, in the given order.
    pub fn new(members: Vec<VerifyingKey>) -> Result<Committee, CommitteeError> {
        if members.is_empty() {
            return Err(CommitteeError::Empty);
        }

        for (pos, member) in members.iter().enumerate() {
            if members[..pos].contains(member) {
                return Err(CommitteeError::Duplicate(pos));
            }
        }

        Ok(Committee { members })
    }

    /// Number of members, `N`.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Maximum number of Byzantine members tolerated, `F`.
    pub fn f(&self) -> usize {
        (self.members.len() - 1) / 3
    }

    /// Number of distinct signers that forms a quorum, `2F + 1`.
    pub fn quorum(&self) -> usize {
        2 * self.f() + 1
    }

    /// Get the signer index of `member`, if it is in the committee.
    pub fn position(&self, member: &VerifyingKey) -> Option<SignerIndex> {
        self.members.iter().position(|m| m == member)
    }

    /// Like [`position`](Self::position), but a non-member is an error.
    pub fn signer_index(&self, member: &VerifyingKey) -> Result<SignerIndex, CommitteeError> {
        self.position(member)
            .ok_or(CommitteeError::UnknownMember(*member))
    }

    pub fn contains(&self, member: &VerifyingKey) -> bool {
        self.members.contains(member)
    }

    /// Get the member at signer index `pos`.
    pub fn member(&self, pos: SignerIndex) -> Option<&VerifyingKey> {
        self.members.get(pos)
    }

    pub fn members(&self) -> slice::Iter<'_, VerifyingKey> {
        self.members.iter()
    }
}

/// Deterministic choice of exactly one proposer per round. Every replica must use the same
/// implementation, or they will disagree on who may propose.
pub trait LeaderElector: Send {
    fn leader(&self, round: Round, committee: &Committee) -> VerifyingKey;
}

/// The default [`LeaderElector`]: the leader of `round` is the member at position `round % N`.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoundRobin;

impl LeaderElector for RoundRobin {
    fn leader(&self, round: Round, committee: &Committee) -> VerifyingKey {
        let pos = (round.int() % committee.len() as u64) as usize;
        committee.members[pos]
    }
}
