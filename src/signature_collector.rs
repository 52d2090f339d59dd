/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Accumulation of partial signatures into the joint signature of a certificate.
//!
//! One [`SignatureCollector`] exists per certificate target. Targets live in two separate keyspaces,
//! each with its own [`Collectors`] map:
//! 1. Vote collectors, owned by the [`Partner`](crate::partner::Partner), keyed by the digest of the
//!    [`LedgerCommitInfo`](crate::types::voting::LedgerCommitInfo) that was voted on.
//! 2. Timeout collectors, owned by the [`PaceMaker`](crate::pacemaker::PaceMaker), keyed by round.

use std::collections::{hash_map::Entry, HashMap, HashSet};
use std::hash::Hash;

use crate::types::{
    committee::Committee,
    data_types::{Round, SignatureBytes, SignatureSet, SignerIndex},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectorStatus {
    Empty,
    Collecting,
    /// At least a quorum of distinct signers has contributed.
    Collected,
}

/// Accumulates signatures for one certificate target, keyed by signer index.
///
/// Contributions are idempotent per signer: a second signature from the same signer index is
/// ignored and does not increase the count.
#[derive(Clone, Debug)]
pub struct SignatureCollector {
    signatures: SignatureSet,
    count: usize,
    quorum: usize,
}

impl SignatureCollector {
    pub fn new(committee: &Committee) -> SignatureCollector {
        SignatureCollector {
            signatures: SignatureSet::new(committee.len()),
            count: 0,
            quorum: committee.quorum(),
        }
    }

    /// Store `signature` as the contribution of `signer`. Returns whether this call added a new signer.
    ///
    /// # Preconditions
    /// `signature` has been verified to be `signer`'s signature over this collector's target.
    pub fn collect(&mut self, signature: SignatureBytes, signer: SignerIndex) -> bool {
        if signer >= self.signatures.len() || self.signatures.get(signer).is_some() {
            return false;
        }

        self.signatures.set(signer, Some(signature));
        self.count += 1;
        true
    }

    /// Whether the number of distinct signers has reached `2F + 1`.
    pub fn collected(&self) -> bool {
        self.count >= self.quorum
    }

    /// Number of distinct signers so far.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn status(&self) -> CollectorStatus {
        if self.count == 0 {
            CollectorStatus::Empty
        } else if self.collected() {
            CollectorStatus::Collected
        } else {
            CollectorStatus::Collecting
        }
    }

    /// The aggregated signature, available only once the collector is [`Collected`](CollectorStatus::Collected).
    pub fn joint_signature(&self) -> Option<SignatureSet> {
        if self.collected() {
            Some(self.signatures.clone())
        } else {
            None
        }
    }
}

/// A map of collectors for one keyspace. Each entry remembers the round of its target so that
/// entries can be retired once round advancement has superseded them.
///
/// The map also remembers which signers have contributed in each round, so that a signer who
/// signs many different targets in one round can only ever open one collector.
#[derive(Debug)]
pub struct Collectors<K> {
    collectors: HashMap<K, (Round, SignatureCollector)>,
    signers: HashMap<Round, HashSet<SignerIndex>>,
}

impl<K: Eq + Hash + Copy> Collectors<K> {
    pub fn new() -> Collectors<K> {
        Collectors {
            collectors: HashMap::new(),
            signers: HashMap::new(),
        }
    }

    /// Record that `signer` contributes to a target in `round`. Returns false if `signer` has already
    /// contributed to some target in `round`, in which case the contribution should be dropped.
    pub fn admit(&mut self, round: Round, signer: SignerIndex) -> bool {
        self.signers.entry(round).or_default().insert(signer)
    }

    /// Get the collector for `key`, creating an empty one for a target in `round` if there is none.
    pub fn ensure(&mut self, key: K, round: Round, committee: &Committee) -> &mut SignatureCollector {
        match self.collectors.entry(key) {
            Entry::Occupied(entry) => &mut entry.into_mut().1,
            Entry::Vacant(entry) => &mut entry.insert((round, SignatureCollector::new(committee))).1,
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, key: &K) -> Option<&SignatureCollector> {
        self.collectors.get(key).map(|(_, collector)| collector)
    }

    /// Drop every collector whose target round is below `round`. Returns how many were dropped.
    pub fn retire_below(&mut self, round: Round) -> usize {
        let before = self.collectors.len();
        self.collectors.retain(|_, (target_round, _)| *target_round >= round);
        self.signers.retain(|signed_round, _| *signed_round >= round);
        before - self.collectors.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.collectors.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

impl<K: Eq + Hash + Copy> Default for Collectors<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::types::data_types::CryptoHash;

    fn committee(n: u8) -> Committee {
        Committee::new(
            (0..n)
                .map(|i| SigningKey::from_bytes(&[i + 1; 32]).verifying_key())
                .collect(),
        )
        .unwrap()
    }

    fn signature(byte: u8) -> SignatureBytes {
        SignatureBytes::new([byte; 64])
    }

    #[test]
    fn reaches_quorum_only_with_distinct_signers() {
        let mut collector = SignatureCollector::new(&committee(4));
        assert_eq!(collector.status(), CollectorStatus::Empty);
        assert_eq!(collector.joint_signature(), None);

        assert!(collector.collect(signature(1), 1));
        assert!(!collector.collect(signature(1), 1));
        assert!(!collector.collect(signature(9), 1));
        assert_eq!(collector.count(), 1);
        assert_eq!(collector.status(), CollectorStatus::Collecting);

        assert!(collector.collect(signature(3), 3));
        assert!(!collector.collected());
        assert!(collector.collect(signature(0), 0));
        assert!(collector.collected());
        assert_eq!(collector.status(), CollectorStatus::Collected);

        let joint = collector.joint_signature().unwrap();
        assert_eq!(joint.count(), 3);
        assert_eq!(joint.get(1), Some(&signature(1)));
        assert_eq!(joint.get(2), None);
    }

    #[test]
    fn ignores_out_of_range_signers() {
        let mut collector = SignatureCollector::new(&committee(4));
        assert!(!collector.collect(signature(1), 4));
        assert_eq!(collector.count(), 0);
    }

    #[test]
    fn single_member_committee_collects_immediately() {
        let mut collector = SignatureCollector::new(&committee(1));
        assert!(collector.collect(signature(1), 0));
        assert!(collector.collected());
    }

    #[test]
    fn retire_below_drops_only_superseded_targets() {
        let committee = committee(4);
        let mut votes: Collectors<CryptoHash> = Collectors::new();
        votes.ensure(CryptoHash::new([1; 32]), Round::new(1), &committee);
        votes.ensure(CryptoHash::new([2; 32]), Round::new(2), &committee);
        votes
            .ensure(CryptoHash::new([3; 32]), Round::new(3), &committee)
            .collect(signature(0), 0);

        assert_eq!(votes.retire_below(Round::new(2)), 1);
        assert_eq!(votes.len(), 2);
        assert!(votes.get(&CryptoHash::new([1; 32])).is_none());

        // An existing collector keeps its signatures when ensured again.
        let collector = votes.ensure(CryptoHash::new([3; 32]), Round::new(3), &committee);
        assert_eq!(collector.count(), 1);
    }

    #[test]
    fn admits_each_signer_once_per_round() {
        let mut votes: Collectors<CryptoHash> = Collectors::new();
        assert!(votes.admit(Round::new(4), 2));
        assert!(!votes.admit(Round::new(4), 2));
        assert!(votes.admit(Round::new(4), 3));
        assert!(votes.admit(Round::new(5), 2));

        votes.retire_below(Round::new(5));
        assert!(votes.admit(Round::new(4), 2));
        assert!(!votes.admit(Round::new(5), 2));
    }
}
