/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The wire envelope exchanged between replicas, and the typed content it carries.
//!
//! ## Envelope
//!
//! Every message travels as a [`WireMessage`]: a kind byte, a borsh-encoded payload, the sender's
//! public key, and the sender's signature. The kind byte is kept raw on the wire so that a replica can
//! tell a corrupted payload (droppable) apart from a message kind it does not speak (a protocol
//! version mismatch, which is fatal).
//!
//! ## Signatures
//!
//! The envelope signature is over the content's [`SignedContent::signing_bytes`], never over the
//! whole payload. For votes and timeouts these are exactly the bytes that certificates carry
//! signatures over, so an envelope signature can be placed into a
//! [`SignatureCollector`](crate::signature_collector::SignatureCollector) as-is.

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use crate::types::{
    block::Block,
    certificates::{QuorumCertificate, TimeoutCertificate},
    crypto_primitives::{verify_signature, Keypair, VerifyingKey},
    data_types::{borsh_bytes, ChainID, Round, SignatureBytes},
    voting::{
        proposal_signing_bytes, timeout_signing_bytes, vote_signing_bytes, LedgerCommitInfo,
        VoteInfo,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Proposal = 0,
    Vote = 1,
    Timeout = 2,
}

impl MessageKind {
    pub fn from_byte(byte: u8) -> Result<MessageKind, MessageError> {
        match byte {
            0 => Ok(MessageKind::Proposal),
            1 => Ok(MessageKind::Vote),
            2 => Ok(MessageKind::Timeout),
            other => Err(MessageError::UnsupportedMessageKind(other)),
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("unsupported message kind {0}")]
    UnsupportedMessageKind(u8),

    #[error("payload does not decode as its declared kind: {0}")]
    MalformedPayload(#[source] std::io::Error),

    #[error("envelope does not decode: {0}")]
    MalformedEnvelope(#[source] std::io::Error),

    #[error("sender is not a valid Ed25519 public key")]
    MalformedSender,
}

impl MessageError {
    /// Whether the error means this replica cannot take part in the protocol any more, rather than
    /// that a single message should be dropped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MessageError::UnsupportedMessageKind(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct WireMessage {
    pub kind: u8,
    pub payload: Vec<u8>,
    pub sender: [u8; 32],
    pub signature: SignatureBytes,
}

impl WireMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<WireMessage, MessageError> {
        WireMessage::try_from_slice(bytes).map_err(MessageError::MalformedEnvelope)
    }

    pub fn kind(&self) -> Result<MessageKind, MessageError> {
        MessageKind::from_byte(self.kind)
    }

    pub fn sender(&self) -> Result<VerifyingKey, MessageError> {
        VerifyingKey::from_bytes(&self.sender).map_err(|_| MessageError::MalformedSender)
    }

    /// Decode the payload according to the kind byte.
    ///
    /// The kind is checked first, so an unsupported kind is reported even when its payload is also
    /// garbage.
    pub fn open(&self) -> Result<(VerifyingKey, Content), MessageError> {
        let kind = self.kind()?;
        let content = match kind {
            MessageKind::Proposal => Content::Proposal(decode_payload(&self.payload)?),
            MessageKind::Vote => Content::Vote(decode_payload(&self.payload)?),
            MessageKind::Timeout => Content::Timeout(decode_payload(&self.payload)?),
        };
        Ok((self.sender()?, content))
    }
}

fn decode_payload<T: BorshDeserialize>(payload: &[u8]) -> Result<T, MessageError> {
    T::try_from_slice(payload).map_err(MessageError::MalformedPayload)
}

/// The decoded payload of a [`WireMessage`], matched exhaustively at the partner's dispatch point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content {
    Proposal(ProposalContent),
    Vote(VoteContent),
    Timeout(TimeoutContent),
}

/// Content types that can be sealed into a signed [`WireMessage`].
pub trait SignedContent: BorshSerialize + Sized {
    const KIND: MessageKind;

    /// The bytes that the envelope signature is over.
    fn signing_bytes(&self, chain_id: ChainID) -> Vec<u8>;

    fn seal(&self, chain_id: ChainID, me: &Keypair) -> WireMessage {
        WireMessage {
            kind: Self::KIND.to_byte(),
            payload: borsh_bytes(self),
            sender: me.public().to_bytes(),
            signature: me.sign(&self.signing_bytes(chain_id)),
        }
    }

    /// Check that `signature` is `sender`'s envelope signature over this content.
    fn is_signed_by(&self, chain_id: ChainID, sender: &VerifyingKey, signature: &SignatureBytes) -> bool {
        verify_signature(sender, &self.signing_bytes(chain_id), signature)
    }
}

/// A block proposed by the leader of `block.round`, with the TC for the previous round if the leader
/// entered its round by timeout.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProposalContent {
    pub block: Block,
    pub last_tc: Option<TimeoutCertificate>,
}

impl SignedContent for ProposalContent {
    const KIND: MessageKind = MessageKind::Proposal;

    fn signing_bytes(&self, chain_id: ChainID) -> Vec<u8> {
        proposal_signing_bytes(chain_id, &self.block.id)
    }
}

/// A vote, sent to the leader of the round after the voted block's round. Carries the voter's
/// highest certificates so that the next leader can catch up from it.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VoteContent {
    pub vote_info: VoteInfo,
    pub ledger_commit_info: LedgerCommitInfo,
    pub high_qc: Option<QuorumCertificate>,
    pub last_tc: Option<TimeoutCertificate>,
}

impl SignedContent for VoteContent {
    const KIND: MessageKind = MessageKind::Vote;

    fn signing_bytes(&self, chain_id: ChainID) -> Vec<u8> {
        vote_signing_bytes(chain_id, &self.ledger_commit_info)
    }
}

/// Broadcast when a replica's round timer expires.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TimeoutContent {
    pub round: Round,
    pub high_qc: QuorumCertificate,
    pub last_tc: Option<TimeoutCertificate>,
}

impl SignedContent for TimeoutContent {
    const KIND: MessageKind = MessageKind::Timeout;

    fn signing_bytes(&self, chain_id: ChainID) -> Vec<u8> {
        timeout_signing_bytes(chain_id, self.round)
    }
}
