/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes or numbers, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::Add,
};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;

use super::crypto_primitives::CryptoHasher;

/// Number that uniquely identifies a deployment of the consensus engine.
///
/// Every signed byte string starts with the `ChainID`, so signatures produced for one deployment can
/// never be replayed into another deployment that shares the same committee keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct ChainID(u64);

impl ChainID {
    /// Create a new `ChainID` with an `int` value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the `u64` value of this `ChainID`.
    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Round number. Round 0 is occupied by the genesis block, and the [PaceMaker](crate::pacemaker)
/// starts every replica in round 1.
///
/// A replica's current round never decreases.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct Round(u64);

impl Round {
    /// Create a new `Round` wrapping `int`.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// The round of the genesis block.
    pub const fn genesis() -> Self {
        Self(0)
    }

    /// Get the inner `u64` of this `Round`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the round that immediately follows this one.
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Check whether `self` immediately follows `prev`, with no gap in between.
    pub const fn directly_follows(&self, prev: Round) -> bool {
        match prev.0.checked_add(1) {
            Some(int) => int == self.0,
            None => false,
        }
    }
}

impl Display for Round {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for Round {
    type Output = Round;

    fn add(self, rhs: u64) -> Self::Output {
        Round(self.0 + rhs)
    }
}

/// A SHA-256 digest. Identifies blocks, and keys vote collectors by the content that was voted on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zero hash.
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Hash `bytes` with [`CryptoHasher`].
    pub fn digest(bytes: &[u8]) -> Self {
        let mut hasher = CryptoHasher::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[0..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")
    }
}

/// Identifier of the speculative ledger state produced by executing a block on top of its parent's
/// state. Opaque to the consensus core; produced by the [`Ledger`](crate::ledger::Ledger).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct ExecStateId(CryptoHash);

impl ExecStateId {
    /// Create a new `ExecStateId` wrapping `hash`.
    pub const fn new(hash: CryptoHash) -> Self {
        Self(hash)
    }

    /// The state that the genesis block executes to.
    pub const fn genesis() -> Self {
        Self(CryptoHash::zero())
    }

    /// Get the inner `CryptoHash` of this `ExecStateId`.
    pub const fn hash(&self) -> CryptoHash {
        self.0
    }
}

/// Opaque transactions proposed in a [`Block`](super::block::Block).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Create a new `Payload` wrapping `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The payload of the genesis block.
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Get a reference to the bytes of this `Payload`.
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Position of a committee member inside a [`Committee`](super::committee::Committee), and hence
/// the position of its signature inside a [`SignatureSet`].
pub type SignerIndex = usize;

/// Ed25519 signature bytes.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[0..4] {
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "..")
    }
}

/// The joint signature of a certificate: one optional signature per committee member.
///
/// # Ordering
///
/// A signature created by the committee member at position `i` must be stored at position `i`. The
/// [`SignatureCollector`](crate::signature_collector::SignatureCollector) is responsible for
/// upholding this order when it aggregates signatures.
///
/// # Optionality
///
/// A `SignatureSet` created using [`new`](Self::new) initially contains `vec![None; len]`. As `set` is
/// called, these `None`s will be replaced with `Some(signature_bytes)`.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureSet(Vec<Option<SignatureBytes>>);

impl SignatureSet {
    /// Create the `SignatureSet` of the genesis QC, an empty `Vec`.
    pub const fn genesis() -> Self {
        Self(Vec::new())
    }

    /// Create a new `SignatureSet` initially containing `len` `None`s.
    pub fn new(len: usize) -> Self {
        Self(vec![None; len])
    }

    /// Get an iterator over the `Option<SignatureBytes>`s in this `SignatureSet`.
    pub fn iter(&self) -> std::slice::Iter<'_, Option<SignatureBytes>> {
        self.0.iter()
    }

    /// Get the signature at position `pos`, if any.
    pub fn get(&self, pos: SignerIndex) -> Option<&SignatureBytes> {
        self.0.get(pos).and_then(Option::as_ref)
    }

    /// Set the value at `pos` in this `SignatureSet` to be `signature`.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is `>=` [`len`](Self::len).
    pub(crate) fn set(&mut self, pos: SignerIndex, signature: Option<SignatureBytes>) {
        self.0[pos] = signature
    }

    /// Get the length of the `SignatureSet`, i.e., the size of the committee it was created for.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether this `SignatureSet` has zero positions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Count how many positions actually hold a signature.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|signature| signature.is_some()).count()
    }
}

/// Serialize `value` with borsh.
///
/// Serializing into an in-memory `Vec` cannot fail, so this returns the bytes directly.
pub(crate) fn borsh_bytes<T: BorshSerialize>(value: &T) -> Vec<u8> {
    let mut bytes = Vec::new();
    value
        .serialize(&mut bytes)
        .expect("borsh serialization into a Vec is infallible");
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directly_follows_has_no_gaps_and_no_wraparound() {
        assert!(Round::new(1).directly_follows(Round::genesis()));
        assert!(!Round::new(2).directly_follows(Round::genesis()));
        assert!(!Round::new(3).directly_follows(Round::new(3)));
        assert!(!Round::genesis().directly_follows(Round::new(u64::MAX)));
    }
}
