/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Round progression: the current round, its leader, and the round timer.
//!
//! The [`PaceMaker`] is the authoritative source of the current round. The round only moves forward,
//! and only for one of two reasons:
//! 1. A verified QC or TC for round `r` is seen, which moves the replica to round `r + 1`
//!    ([`advance_round`](PaceMaker::advance_round)).
//! 2. A quorum of timeout messages for a round is collected into a TC, which then advances the round
//!    as in 1 ([`process_remote_timeout_message`](PaceMaker::process_remote_timeout_message)).
//!
//! When the round timer expires, [`local_timeout_round`](PaceMaker::local_timeout_round) builds this
//! replica's signed timeout message and re-arms the timer, but it does *not* change the round. TC
//! formation is best-effort: a replica that never collects a quorum of timeouts keeps waiting for a
//! QC through the normal proposal path, re-sending its timeout every time the timer expires.
//!
//! Timeout signatures are collected in their own [`Collectors`] map keyed by round, separate from
//! the vote collectors keyed by commit info digest.

use std::time::{Duration, Instant};

use crate::messages::{SignedContent, TimeoutContent, WireMessage};
use crate::signature_collector::Collectors;
use crate::types::{
    certificates::{QuorumCertificate, TimeoutCertificate},
    committee::{Committee, CommitteeError, LeaderElector},
    crypto_primitives::{Keypair, VerifyingKey},
    data_types::{ChainID, Round, SignatureBytes, SignerIndex},
};

/// Why [`PaceMaker::advance_round`] was called. Only used for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdvanceReason {
    /// A certificate embedded in a received message.
    Received,
    /// A QC this replica collected from votes.
    CollectedQC,
    /// A TC this replica collected from timeout messages.
    CollectedTC,
}

/// What happened to a timeout signature handed to the [`PaceMaker`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// The signature does not verify against the timeout's round.
    BadSignature,
    /// The timeout is for a round below the current round.
    Stale,
    /// The timeout is for a round more than one past the current round. Its embedded certificates
    /// did not bring this replica close enough to collect it.
    Future,
    /// Stored; no TC yet, or the TC for its round was already formed.
    Collecting,
    /// The signature completed a quorum. `new_round` is `Some` if the TC moved this replica into a new
    /// round.
    Certified {
        tc: TimeoutCertificate,
        new_round: Option<Round>,
    },
}

/// This replica's reaction to its round timer expiring.
pub struct LocalTimeout {
    pub content: TimeoutContent,
    /// The sealed timeout message, to be multicast to the committee.
    pub message: WireMessage,
    /// Set if this replica's own signature completed a TC, as in a single-member committee.
    pub certified: Option<(TimeoutCertificate, Option<Round>)>,
}

pub struct PaceMaker {
    chain_id: ChainID,
    me: Keypair,
    committee: Committee,
    leader_elector: Box<dyn LeaderElector>,
    round_timeout: Duration,
    current_round: Round,
    last_tc: Option<TimeoutCertificate>,
    deadline: Instant,
    timeouts: Collectors<Round>,
}

impl PaceMaker {
    /// Create a pacemaker in round 1, with the round timer armed from `now`.
    pub fn new(
        chain_id: ChainID,
        me: Keypair,
        committee: Committee,
        leader_elector: Box<dyn LeaderElector>,
        round_timeout: Duration,
        now: Instant,
    ) -> PaceMaker {
        PaceMaker {
            chain_id,
            me,
            committee,
            leader_elector,
            round_timeout,
            current_round: Round::genesis().next(),
            last_tc: None,
            deadline: now + round_timeout,
            timeouts: Collectors::new(),
        }
    }

    /// Move to the round after the highest of `qc` and `tc`, if that is above the current round.
    /// Returns the new round if the round changed.
    ///
    /// # Preconditions
    /// `qc` and `tc`, if present, have been verified.
    pub fn advance_round(
        &mut self,
        qc: Option<&QuorumCertificate>,
        tc: Option<&TimeoutCertificate>,
        reason: AdvanceReason,
        now: Instant,
    ) -> Option<Round> {
        let qc_round = qc.map(|qc| qc.vote_info.round);
        let tc_round = tc.map(|tc| tc.round);
        let candidate = match (qc_round, tc_round) {
            (None, None) => return None,
            (Some(round), None) | (None, Some(round)) => round.next(),
            (Some(qc_round), Some(tc_round)) => qc_round.max(tc_round).next(),
        };

        if candidate <= self.current_round {
            return None;
        }

        // A TC is only worth carrying if it certifies the round right before the new one.
        self.last_tc = tc.filter(|tc| tc.round.next() == candidate).cloned();
        self.current_round = candidate;
        self.deadline = now + self.round_timeout;
        let retired = self.timeouts.retire_below(candidate);
        log::debug!(
            "advanced to round {} ({:?}), retired {} timeout collectors",
            candidate,
            reason,
            retired
        );

        Some(candidate)
    }

    /// React to the round timer expiring: re-arm the timer, sign a timeout for the current round, and
    /// collect this replica's own timeout signature.
    ///
    /// The current round is unchanged unless this replica's own signature completes a TC.
    pub fn local_timeout_round(&mut self, high_qc: &QuorumCertificate, now: Instant) -> LocalTimeout {
        self.deadline = now + self.round_timeout;

        let content = TimeoutContent {
            round: self.current_round,
            high_qc: high_qc.clone(),
            last_tc: self.last_tc.clone(),
        };
        let message = content.seal(self.chain_id, &self.me);

        let certified = match self.committee.position(&self.me.public()) {
            Some(my_index) => self.collect_timeout(content.round, message.signature, my_index, now),
            None => None,
        };

        LocalTimeout {
            content,
            message,
            certified,
        }
    }

    /// Verify a timeout message from `sender` and fold its signature into the collector for its round.
    ///
    /// # Errors
    /// A sender outside the committee is a [`CommitteeError::UnknownMember`].
    pub fn process_remote_timeout_message(
        &mut self,
        sender: &VerifyingKey,
        content: &TimeoutContent,
        signature: &SignatureBytes,
        now: Instant,
    ) -> Result<TimeoutOutcome, CommitteeError> {
        let signer = self.committee.signer_index(sender)?;

        if !content.is_signed_by(self.chain_id, sender, signature) {
            return Ok(TimeoutOutcome::BadSignature);
        }

        if content.round < self.current_round {
            return Ok(TimeoutOutcome::Stale);
        }

        if content.round > self.current_round.next() {
            return Ok(TimeoutOutcome::Future);
        }

        Ok(
            match self.collect_timeout(content.round, *signature, signer, now) {
                Some((tc, new_round)) => TimeoutOutcome::Certified { tc, new_round },
                None => TimeoutOutcome::Collecting,
            },
        )
    }

    /// Collect a verified timeout signature. Produces a TC exactly once per round: when the signature
    /// is new and brings the collector to quorum.
    fn collect_timeout(
        &mut self,
        round: Round,
        signature: SignatureBytes,
        signer: SignerIndex,
        now: Instant,
    ) -> Option<(TimeoutCertificate, Option<Round>)> {
        let collector = self.timeouts.ensure(round, round, &self.committee);
        if !collector.collect(signature, signer) || collector.count() != collector.quorum() {
            log::trace!(
                "timeout for round {}: {} of {} signatures",
                round,
                collector.count(),
                collector.quorum()
            );
            return None;
        }

        let tc = TimeoutCertificate {
            round,
            signatures: collector.joint_signature()?,
        };
        let new_round = self.advance_round(None, Some(&tc), AdvanceReason::CollectedTC, now);
        Some((tc, new_round))
    }

    pub fn leader(&self, round: Round) -> VerifyingKey {
        self.leader_elector.leader(round, &self.committee)
    }

    pub fn is_leader(&self, round: Round) -> bool {
        self.leader(round) == self.me.public()
    }

    pub fn current_round(&self) -> Round {
        self.current_round
    }

    /// The TC that moved this replica into the current round, if it got here by timeout.
    pub fn last_tc(&self) -> Option<&TimeoutCertificate> {
        self.last_tc.as_ref()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Re-arm the round timer from `now` without timing out.
    pub fn reset_timer(&mut self, now: Instant) {
        self.deadline = now + self.round_timeout;
    }

    pub fn round_timeout(&self) -> Duration {
        self.round_timeout
    }

    pub fn committee(&self) -> &Committee {
        &self.committee
    }

    /// Number of rounds that currently have a timeout collector.
    pub fn pending_timeout_rounds(&self) -> usize {
        self.timeouts.len()
    }
}
