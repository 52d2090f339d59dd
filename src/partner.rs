/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus actor: a single event loop that owns, and is the only writer of, all consensus state.
//!
//! ## Events
//!
//! The [`Partner`] processes exactly one event at a time. Events come from two sources, whichever
//! fires first:
//! 1. An inbound [`WireMessage`] ([`on_inbound`](Partner::on_inbound)).
//! 2. The round timer ([`on_tick`](Partner::on_tick)).
//!
//! ## Message handling
//!
//! Certificates embedded in a message are processed first, whatever the message's kind, since they
//! may be more advanced than local state: a verified QC updates the highQC and the lock and may
//! commit, and a verified QC or TC may advance the round. Only then is the message's own content
//! handled, against the possibly new round:
//! - **Proposal**: must be for the current round, from its leader, and arrive while this replica is
//!   still waiting for a proposal. It is verified by the [`Ledger`], executed into the pending tree,
//!   and voted on if [`Safety`] allows. The vote goes to the leader of the next round.
//! - **Vote**: collected by the leader of the round after the voted block, keyed by the digest of the
//!   commit info. The vote that completes a quorum yields a QC, processed like an embedded one.
//! - **Timeout**: handed to the [`PaceMaker`], which may form a TC.
//!
//! ## Round states
//!
//! Within a round the partner moves through `WaitingForProposal → Executed → Voted`, or
//! `WaitingForProposal → TimedOut`. A proposal that executes but cannot be voted for leaves it in
//! `WaitingForNextRound`. Entering a new round resets the state to `WaitingForProposal`.
//!
//! ## Errors
//!
//! Almost every problem with a message is the sender's problem, and only causes the message to be
//! dropped. Two are fatal and stop the partner: a vote or timeout signed by a key outside the
//! committee, and a message kind this replica does not speak.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;

use crate::block_tree::PendingBlockTree;
use crate::events::*;
use crate::ledger::Ledger;
use crate::messages::{
    Content, MessageError, ProposalContent, SignedContent, TimeoutContent, VoteContent,
    WireMessage,
};
use crate::networking::{OutboundSink, SenderHandle};
use crate::pacemaker::{AdvanceReason, PaceMaker, TimeoutOutcome};
use crate::replica::Configuration;
use crate::safety::Safety;
use crate::signature_collector::Collectors;
use crate::types::{
    block::Block,
    certificates::{Certificate, QuorumCertificate, TimeoutCertificate},
    committee::{CommitteeError, LeaderElector},
    crypto_primitives::{Keypair, VerifyingKey},
    data_types::{ChainID, CryptoHash, Round, SignatureBytes},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundState {
    WaitingForProposal,
    Executed,
    Voted,
    TimedOut,
    WaitingForNextRound,
}

/// A point-in-time view of a partner's progress.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub current_round: Round,
    pub round_state: RoundState,
    pub high_qc: QuorumCertificate,
    pub last_tc: Option<TimeoutCertificate>,
    pub preferred_round: Round,
    pub last_voted_round: Round,
    pub committed_round: Round,
    pub committed_block: CryptoHash,
}

impl StatusSnapshot {
    /// The status of a replica that has not processed anything yet.
    pub fn initial() -> StatusSnapshot {
        StatusSnapshot {
            current_round: Round::genesis().next(),
            round_state: RoundState::WaitingForProposal,
            high_qc: QuorumCertificate::genesis_qc(),
            last_tc: None,
            preferred_round: Round::genesis(),
            last_voted_round: Round::genesis(),
            committed_round: Round::genesis(),
            committed_block: Block::genesis_id(),
        }
    }
}

/// Errors that stop the partner.
#[derive(Debug, Error)]
pub enum PartnerError {
    #[error("message signed by a non-member: {0}")]
    UnknownSigner(#[from] CommitteeError),

    #[error("protocol mismatch: {0}")]
    Protocol(#[from] MessageError),
}

pub struct Partner<L: Ledger> {
    chain_id: ChainID,
    me: Keypair,
    is_member: bool,
    safety: Safety,
    block_tree: PendingBlockTree,
    pacemaker: PaceMaker,
    votes: Collectors<CryptoHash>,
    round_state: RoundState,
    ledger: L,
    sender: SenderHandle,
    event_publisher: Option<Sender<Event>>,
}

impl<L: Ledger> Partner<L> {
    pub fn new(
        configuration: &Configuration,
        ledger: L,
        sinks: Vec<Box<dyn OutboundSink>>,
        leader_elector: Box<dyn LeaderElector>,
        event_publisher: Option<Sender<Event>>,
        now: Instant,
    ) -> Partner<L> {
        let me = Keypair::new(configuration.me.clone());
        let is_member = configuration.committee.contains(&me.public());
        let pacemaker = PaceMaker::new(
            configuration.chain_id,
            me.clone(),
            configuration.committee.clone(),
            leader_elector,
            configuration.round_timeout,
            now,
        );

        Partner {
            chain_id: configuration.chain_id,
            me,
            is_member,
            safety: Safety::new(),
            block_tree: PendingBlockTree::new(),
            pacemaker,
            votes: Collectors::new(),
            round_state: RoundState::WaitingForProposal,
            ledger,
            sender: SenderHandle::new(sinks, configuration.sink_timeout),
            event_publisher,
        }
    }

    /// Enter the first round. The leader of round 1 proposes a block extending genesis.
    pub fn begin(&mut self) {
        self.on_new_round(self.pacemaker.current_round());
    }

    /// Handle one inbound message.
    ///
    /// # Errors
    /// Only fatal errors are returned. Droppable messages are logged and yield `Ok(())`.
    pub fn on_inbound(&mut self, message: WireMessage, now: Instant) -> Result<(), PartnerError> {
        let (origin, content) = match message.open() {
            Ok(opened) => opened,
            Err(err) if err.is_fatal() => {
                log::error!("cannot process inbound message: {}", err);
                return Err(err.into());
            }
            Err(err) => {
                log::debug!("dropping malformed message: {}", err);
                return Ok(());
            }
        };

        match content {
            Content::Proposal(proposal) => {
                self.on_receive_proposal(origin, proposal, &message.signature, now);
                Ok(())
            }
            Content::Vote(vote) => self.on_receive_vote(origin, vote, &message.signature, now),
            Content::Timeout(timeout) => {
                self.on_receive_timeout(origin, timeout, &message.signature, now)
            }
        }
    }

    /// Check the round timer. If it has expired, time out of the current round.
    pub fn on_tick(&mut self, now: Instant) -> Result<(), PartnerError> {
        if now < self.pacemaker.deadline() {
            return Ok(());
        }

        // Non-members never time out, but their timer still bounds how long the event loop sleeps.
        if !self.is_member {
            self.pacemaker.reset_timer(now);
            return Ok(());
        }

        let round = self.pacemaker.current_round();
        Event::RoundTimeout(RoundTimeoutEvent {
            timestamp: SystemTime::now(),
            round,
            timeout: self.pacemaker.round_timeout(),
        })
        .publish(&self.event_publisher);
        log::debug!("round {} timed out", round);

        let local = self
            .pacemaker
            .local_timeout_round(self.block_tree.high_qc(), now);
        self.round_state = RoundState::TimedOut;

        let receivers = self.committee_members();
        self.sender.multicast(local.message, receivers);
        Event::Timeout(TimeoutEvent {
            timestamp: SystemTime::now(),
            timeout: local.content,
        })
        .publish(&self.event_publisher);

        if let Some((tc, new_round)) = local.certified {
            self.on_collect_tc(tc, new_round);
        }

        Ok(())
    }

    fn on_receive_proposal(
        &mut self,
        origin: VerifyingKey,
        proposal: ProposalContent,
        signature: &SignatureBytes,
        now: Instant,
    ) {
        Event::ReceiveProposal(ReceiveProposalEvent {
            timestamp: SystemTime::now(),
            origin,
            proposal: proposal.clone(),
        })
        .publish(&self.event_publisher);

        if !proposal.is_signed_by(self.chain_id, &origin, signature) {
            log::debug!("dropping proposal with a bad signature");
            return;
        }

        self.process_certificates(
            Some(&proposal.block.parent_qc),
            proposal.last_tc.as_ref(),
            AdvanceReason::Received,
            now,
        );

        let block = &proposal.block;
        let round = self.pacemaker.current_round();
        if block.round != round {
            log::warn!("dropping proposal for round {} in round {}", block.round, round);
            return;
        }

        if origin != self.pacemaker.leader(round) {
            log::warn!("dropping proposal for round {} from a non-leader", round);
            return;
        }

        if self.round_state != RoundState::WaitingForProposal {
            log::debug!(
                "dropping proposal for round {} in state {:?}",
                round,
                self.round_state
            );
            return;
        }

        if !block.is_correct(self.chain_id, self.pacemaker.committee()) {
            log::debug!("dropping incorrect block {:?}", block.id);
            return;
        }

        if !self.ledger.verify_proposal(&proposal) {
            log::debug!("ledger rejected block {:?}", block.id);
            return;
        }

        let exec_state_id = match self.block_tree.execute_proposal(block, &mut self.ledger) {
            Ok(exec_state_id) => exec_state_id,
            Err(err) => {
                log::debug!("cannot execute block {:?}: {}", block.id, err);
                return;
            }
        };
        self.round_state = RoundState::Executed;
        Event::InsertBlock(InsertBlockEvent {
            timestamp: SystemTime::now(),
            block: block.clone(),
            exec_state_id,
        })
        .publish(&self.event_publisher);

        if !self.is_member {
            self.round_state = RoundState::WaitingForNextRound;
            return;
        }

        let Some((vote_info, ledger_commit_info)) =
            self.safety.make_vote(block, exec_state_id, &self.block_tree)
        else {
            log::debug!("safety rules refuse a vote for block {:?}", block.id);
            self.round_state = RoundState::WaitingForNextRound;
            return;
        };

        let vote = VoteContent {
            vote_info,
            ledger_commit_info,
            high_qc: Some(self.block_tree.high_qc().clone()),
            last_tc: self.pacemaker.last_tc().cloned(),
        };
        let next_leader = self.pacemaker.leader(round.next());
        self.sender
            .unicast(vote.seal(self.chain_id, &self.me), next_leader);
        self.round_state = RoundState::Voted;

        Event::Vote(VoteEvent {
            timestamp: SystemTime::now(),
            next_leader,
            vote,
        })
        .publish(&self.event_publisher);
    }

    fn on_receive_vote(
        &mut self,
        origin: VerifyingKey,
        vote: VoteContent,
        signature: &SignatureBytes,
        now: Instant,
    ) -> Result<(), PartnerError> {
        Event::ReceiveVote(ReceiveVoteEvent {
            timestamp: SystemTime::now(),
            origin,
            vote: vote.clone(),
        })
        .publish(&self.event_publisher);

        self.process_certificates(
            vote.high_qc.as_ref(),
            vote.last_tc.as_ref(),
            AdvanceReason::Received,
            now,
        );

        let signer = self.pacemaker.committee().signer_index(&origin).map_err(|err| {
            log::error!("vote from outside the committee: {}", err);
            err
        })?;

        if vote.ledger_commit_info.vote_info_hash != vote.vote_info.hash()
            || !vote.is_signed_by(self.chain_id, &origin, signature)
        {
            log::debug!("dropping vote with a bad signature or commit info");
            return Ok(());
        }

        // Only votes for the current round or the one before it can still form a useful QC.
        let voted_round = vote.vote_info.round;
        let current_round = self.pacemaker.current_round();
        if voted_round > current_round || voted_round.next() < current_round {
            log::warn!("dropping vote for round {} in round {}", voted_round, current_round);
            return Ok(());
        }

        if !self.pacemaker.is_leader(voted_round.next()) {
            log::warn!("dropping vote for round {}: not the next leader", voted_round);
            return Ok(());
        }

        if !self.votes.admit(voted_round, signer) {
            log::debug!("dropping second vote for round {} from signer {}", voted_round, signer);
            return Ok(());
        }

        let collector = self.votes.ensure(
            vote.ledger_commit_info.hash(),
            voted_round,
            self.pacemaker.committee(),
        );
        if !collector.collect(*signature, signer) || collector.count() != collector.quorum() {
            log::trace!(
                "votes for block {:?}: {} of {}",
                vote.vote_info.block_id,
                collector.count(),
                collector.quorum()
            );
            return Ok(());
        }

        let Some(signatures) = collector.joint_signature() else {
            return Ok(());
        };
        let qc = QuorumCertificate {
            vote_info: vote.vote_info,
            ledger_commit_info: vote.ledger_commit_info,
            signatures,
        };
        Event::CollectQC(CollectQCEvent {
            timestamp: SystemTime::now(),
            quorum_certificate: qc.clone(),
        })
        .publish(&self.event_publisher);

        self.process_certificates(Some(&qc), None, AdvanceReason::CollectedQC, now);
        Ok(())
    }

    fn on_receive_timeout(
        &mut self,
        origin: VerifyingKey,
        timeout: TimeoutContent,
        signature: &SignatureBytes,
        now: Instant,
    ) -> Result<(), PartnerError> {
        Event::ReceiveTimeout(ReceiveTimeoutEvent {
            timestamp: SystemTime::now(),
            origin,
            timeout: timeout.clone(),
        })
        .publish(&self.event_publisher);

        self.process_certificates(
            Some(&timeout.high_qc),
            timeout.last_tc.as_ref(),
            AdvanceReason::Received,
            now,
        );

        let outcome = self
            .pacemaker
            .process_remote_timeout_message(&origin, &timeout, signature, now)
            .map_err(|err| {
                log::error!("timeout from outside the committee: {}", err);
                err
            })?;

        match outcome {
            TimeoutOutcome::BadSignature => {
                log::debug!("dropping timeout for round {} with a bad signature", timeout.round)
            }
            TimeoutOutcome::Stale => log::warn!(
                "dropping timeout for round {} in round {}",
                timeout.round,
                self.pacemaker.current_round()
            ),
            TimeoutOutcome::Future => log::debug!(
                "dropping timeout for future round {} in round {}",
                timeout.round,
                self.pacemaker.current_round()
            ),
            TimeoutOutcome::Collecting => (),
            TimeoutOutcome::Certified { tc, new_round } => self.on_collect_tc(tc, new_round),
        }

        Ok(())
    }

    fn on_collect_tc(&mut self, tc: TimeoutCertificate, new_round: Option<Round>) {
        Event::CollectTC(CollectTCEvent {
            timestamp: SystemTime::now(),
            timeout_certificate: tc,
        })
        .publish(&self.event_publisher);

        if let Some(round) = new_round {
            self.on_new_round(round);
        }
    }

    /// Verify `qc` and `tc`, apply a valid QC to the pending tree and safety state, then let the
    /// pacemaker advance the round.
    fn process_certificates(
        &mut self,
        qc: Option<&QuorumCertificate>,
        tc: Option<&TimeoutCertificate>,
        reason: AdvanceReason,
        now: Instant,
    ) {
        let qc = qc.filter(|qc| self.verify_certificate(*qc, "QC"));
        let tc = tc.filter(|tc| self.verify_certificate(*tc, "TC"));

        if let Some(qc) = qc {
            self.process_qc(qc);
        }

        if let Some(round) = self.pacemaker.advance_round(qc, tc, reason, now) {
            self.on_new_round(round);
        }
    }

    fn verify_certificate<C: Certificate>(&self, certificate: &C, name: &str) -> bool {
        let correct = certificate.is_correct(self.chain_id, self.pacemaker.committee());
        if !correct {
            log::debug!("ignoring incorrect {} for round {}", name, certificate.round());
        }
        correct
    }

    fn process_qc(&mut self, qc: &QuorumCertificate) {
        if self.block_tree.ensure_high_qc(qc) {
            Event::UpdateHighQC(UpdateHighQCEvent {
                timestamp: SystemTime::now(),
                high_qc: qc.clone(),
            })
            .publish(&self.event_publisher);
        }

        if self.safety.update_preferred_round(qc) {
            Event::UpdatePreferredRound(UpdatePreferredRoundEvent {
                timestamp: SystemTime::now(),
                preferred_round: self.safety.preferred_round(),
            })
            .publish(&self.event_publisher);
        }

        if let Some(block_id) = qc.commits() {
            let outcome = self.block_tree.commit(&block_id, &mut self.ledger);
            for (block, round) in outcome.committed {
                log::debug!("committed block {:?} at round {}", block, round);
                Event::CommitBlock(CommitBlockEvent {
                    timestamp: SystemTime::now(),
                    block,
                    round,
                })
                .publish(&self.event_publisher);
            }
            for block in outcome.pruned {
                Event::PruneBlock(PruneBlockEvent {
                    timestamp: SystemTime::now(),
                    block,
                })
                .publish(&self.event_publisher);
            }
        }
    }

    fn on_new_round(&mut self, round: Round) {
        self.round_state = RoundState::WaitingForProposal;
        // Votes for round r are still useful while the leader of round r + 1 is in round r + 1.
        self.votes
            .retire_below(Round::new(round.int().saturating_sub(1)));

        let leader = self.pacemaker.leader(round);
        Event::StartRound(StartRoundEvent {
            timestamp: SystemTime::now(),
            leader,
            round,
        })
        .publish(&self.event_publisher);

        if leader == self.me.public() {
            self.propose(round);
        }
    }

    fn propose(&mut self, round: Round) {
        let high_qc = self.block_tree.high_qc().clone();
        let payload = self
            .ledger
            .produce_payload(round, &high_qc.vote_info.block_id);
        let last_tc = self
            .pacemaker
            .last_tc()
            .filter(|tc| tc.round.next() == round)
            .cloned();

        let proposal = ProposalContent {
            block: Block::new(round, payload, high_qc),
            last_tc,
        };
        let receivers = self.committee_members();
        self.sender
            .multicast(proposal.seal(self.chain_id, &self.me), receivers);

        Event::Propose(ProposeEvent {
            timestamp: SystemTime::now(),
            proposal,
        })
        .publish(&self.event_publisher);
    }

    fn committee_members(&self) -> Vec<VerifyingKey> {
        self.pacemaker.committee().members().copied().collect()
    }

    /// Publish the current status as an [`Event::Status`].
    pub fn publish_status(&self) {
        Event::Status(StatusEvent {
            timestamp: SystemTime::now(),
            status: self.status(),
        })
        .publish(&self.event_publisher);
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            current_round: self.pacemaker.current_round(),
            round_state: self.round_state,
            high_qc: self.block_tree.high_qc().clone(),
            last_tc: self.pacemaker.last_tc().cloned(),
            preferred_round: self.safety.preferred_round(),
            last_voted_round: self.safety.last_voted_round(),
            committed_round: self.block_tree.committed_round(),
            committed_block: self.block_tree.committed_id(),
        }
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.me.public()
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn block_tree(&self) -> &PendingBlockTree {
        &self.block_tree
    }

    pub fn deadline(&self) -> Instant {
        self.pacemaker.deadline()
    }
}

/// Upper bound on how long the event loop blocks on its inbound queue, so that shutdown signals are
/// noticed promptly.
const MAX_WAIT: Duration = Duration::from_millis(50);

impl<L: Ledger> Partner<L> {
    /// Run the partner on its own thread until it is told to shut down, its inbound queue is closed,
    /// or a fatal error occurs.
    pub(crate) fn start(
        mut self,
        inbound: Receiver<WireMessage>,
        shutdown_signal: Receiver<()>,
        status_period: Duration,
        status: Arc<Mutex<StatusSnapshot>>,
    ) -> JoinHandle<Result<(), PartnerError>> {
        thread::spawn(move || {
            self.begin();
            let mut next_status = Instant::now() + status_period;

            loop {
                match shutdown_signal.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => return Ok(()),
                    Err(TryRecvError::Empty) => (),
                }

                let now = Instant::now();
                let wake_at = self.deadline().min(next_status).min(now + MAX_WAIT);
                match inbound.recv_timeout(wake_at.saturating_duration_since(now)) {
                    Ok(message) => self.on_inbound(message, Instant::now())?,
                    Err(RecvTimeoutError::Timeout) => (),
                    Err(RecvTimeoutError::Disconnected) => return Ok(()),
                }

                let now = Instant::now();
                self.on_tick(now)?;
                if now >= next_status {
                    self.publish_status();
                    next_status = now + status_period;
                }

                let snapshot = self.status();
                match status.lock() {
                    Ok(mut shared) => *shared = snapshot,
                    Err(poisoned) => *poisoned.into_inner() = snapshot,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Receiver;

    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::block_tree::tests::RecordingLedger;
    use crate::messages::MessageKind;
    use crate::networking::{ChannelSink, OutgoingLetter, SendType};
    use crate::types::{
        committee::{Committee, RoundRobin},
        data_types::{ExecStateId, Payload},
        voting::{LedgerCommitInfo, VoteInfo},
    };

    const ROUND_TIMEOUT: Duration = Duration::from_millis(500);

    fn signing_keys(n: u8) -> Vec<SigningKey> {
        (0..n).map(|i| SigningKey::from_bytes(&[i + 1; 32])).collect()
    }

    fn partner(
        keys: &[SigningKey],
        me: usize,
        now: Instant,
    ) -> (Partner<RecordingLedger>, Receiver<OutgoingLetter>) {
        partner_with_key(keys, keys[me].clone(), now)
    }

    /// A partner for the committee of `keys`, signing with `me`, which need not be a member.
    fn partner_with_key(
        keys: &[SigningKey],
        me: SigningKey,
        now: Instant,
    ) -> (Partner<RecordingLedger>, Receiver<OutgoingLetter>) {
        let committee = Committee::new(keys.iter().map(|k| k.verifying_key()).collect()).unwrap();
        let configuration = Configuration::builder()
            .me(me)
            .chain_id(ChainID::new(7))
            .committee(committee)
            .round_timeout(ROUND_TIMEOUT)
            .build();
        let (sink, letters) = ChannelSink::new(64);
        let partner = Partner::new(
            &configuration,
            RecordingLedger::default(),
            vec![Box::new(sink)],
            Box::new(RoundRobin),
            None,
            now,
        );
        (partner, letters)
    }

    /// A vote for a fresh block in `round` that extends genesis. `tag` tells blocks apart.
    fn vote_for(round: u64, tag: u8) -> VoteContent {
        let block = Block::new(
            Round::new(round),
            Payload::new(vec![tag]),
            QuorumCertificate::genesis_qc(),
        );
        let vote_info = VoteInfo {
            block_id: block.id,
            round: block.round,
            parent_id: Block::genesis_id(),
            parent_round: Round::genesis(),
            grandparent_id: Block::genesis_id(),
            grandparent_round: Round::genesis(),
            exec_state_id: ExecStateId::genesis(),
        };
        VoteContent {
            ledger_commit_info: LedgerCommitInfo {
                commit_state_id: None,
                vote_info_hash: vote_info.hash(),
            },
            vote_info,
            high_qc: None,
            last_tc: None,
        }
    }

    #[test]
    fn single_member_commits_along_its_own_chain() {
        let keys = signing_keys(1);
        let now = Instant::now();
        let (mut partner, letters) = partner(&keys, 0, now);
        partner.begin();

        // Each letter is either a proposal or the vote on it; delivering it yields the next one.
        for _ in 0..30 {
            let letter = letters.try_recv().unwrap();
            assert_eq!(letter.receivers, vec![partner.public_key()]);
            partner.on_inbound(letter.message, now).unwrap();
        }

        let status = partner.status();
        assert_eq!(status.current_round, Round::new(16));
        assert_eq!(status.committed_round, Round::new(13));
        assert_eq!(status.high_qc.vote_info.round, Round::new(15));
        assert_eq!(status.preferred_round, Round::new(14));
        assert_eq!(status.last_voted_round, Round::new(15));
        assert_eq!(partner.ledger().committed.len(), 13);
        assert_eq!(partner.ledger().committed.last(), Some(&status.committed_block));
    }

    #[test]
    fn timer_expiry_sends_one_timeout_and_keeps_safety_state() {
        let keys = signing_keys(4);
        let start = Instant::now();
        let (mut partner, letters) = partner(&keys, 2, start);
        partner.begin();
        assert!(letters.try_recv().is_err());

        partner.on_tick(start + ROUND_TIMEOUT / 2).unwrap();
        assert!(letters.try_recv().is_err());

        let expiry = start + ROUND_TIMEOUT;
        partner.on_tick(expiry).unwrap();
        partner.on_tick(expiry).unwrap();

        let letter = letters.try_recv().unwrap();
        assert_eq!(letter.send_type, SendType::Multicast);
        assert_eq!(letter.receivers.len(), 4);
        assert!(matches!(letter.message.kind(), Ok(MessageKind::Timeout)));
        assert!(letters.try_recv().is_err());

        let status = partner.status();
        assert_eq!(status.current_round, Round::new(1));
        assert_eq!(status.round_state, RoundState::TimedOut);
        assert_eq!(status.preferred_round, Round::genesis());
        assert_eq!(status.last_voted_round, Round::genesis());
        assert_eq!(partner.deadline(), expiry + ROUND_TIMEOUT);
    }

    #[test]
    fn single_member_times_out_into_the_next_round() {
        let keys = signing_keys(1);
        let start = Instant::now();
        let (mut partner, letters) = partner(&keys, 0, start);
        partner.begin();
        let _round_one_proposal = letters.try_recv().unwrap();

        partner.on_tick(start + ROUND_TIMEOUT).unwrap();
        let timeout = letters.try_recv().unwrap();
        assert!(matches!(timeout.message.kind(), Ok(MessageKind::Timeout)));

        let proposal = letters.try_recv().unwrap();
        let Ok((_, Content::Proposal(proposal))) = proposal.message.open() else {
            panic!("expected a proposal for round 2");
        };
        assert_eq!(proposal.block.round, Round::new(2));
        assert_eq!(proposal.last_tc.map(|tc| tc.round), Some(Round::new(1)));
        assert_eq!(partner.status().current_round, Round::new(2));
    }

    #[test]
    fn vote_from_outside_the_committee_is_fatal() {
        let keys = signing_keys(4);
        let now = Instant::now();
        let (mut partner, _letters) = partner(&keys, 2, now);
        partner.begin();

        let outsider = Keypair::new(SigningKey::from_bytes(&[99; 32]));

        let result = partner.on_inbound(vote_for(1, 0).seal(ChainID::new(7), &outsider), now);
        assert!(matches!(
            result,
            Err(PartnerError::UnknownSigner(CommitteeError::UnknownMember(_)))
        ));
    }

    #[test]
    fn votes_outside_the_current_round_window_are_dropped() {
        let keys = signing_keys(4);
        let now = Instant::now();
        // Member 2 leads round 2, so it collects votes for round 1.
        let (mut partner, letters) = partner(&keys, 2, now);
        partner.begin();
        let member = Keypair::new(keys[3].clone());

        for round in [u64::MAX, u64::MAX - 1, 2, 7] {
            partner
                .on_inbound(vote_for(round, 0).seal(ChainID::new(7), &member), now)
                .unwrap();
        }

        assert!(partner.votes.is_empty());
        assert!(letters.try_recv().is_err());
        assert_eq!(partner.status(), StatusSnapshot::initial());
    }

    #[test]
    fn a_member_opens_at_most_one_vote_collector_per_round() {
        let keys = signing_keys(4);
        let now = Instant::now();
        let (mut partner, _letters) = partner(&keys, 2, now);
        partner.begin();
        let chain_id = ChainID::new(7);

        let first = vote_for(1, 0);
        let member = Keypair::new(keys[3].clone());
        for tag in 0..=200 {
            partner
                .on_inbound(vote_for(1, tag).seal(chain_id, &member), now)
                .unwrap();
        }
        assert_eq!(partner.votes.len(), 1);

        let other_member = Keypair::new(keys[0].clone());
        partner
            .on_inbound(first.seal(chain_id, &other_member), now)
            .unwrap();
        assert_eq!(partner.votes.len(), 1);
        let collector = partner.votes.get(&first.ledger_commit_info.hash()).unwrap();
        assert_eq!(collector.count(), 2);
    }

    #[test]
    fn timeouts_for_far_future_rounds_are_dropped() {
        let keys = signing_keys(4);
        let now = Instant::now();
        let (mut partner, letters) = partner(&keys, 2, now);
        partner.begin();
        let member = Keypair::new(keys[3].clone());

        for round in (3..200).chain([u64::MAX]) {
            let timeout = TimeoutContent {
                round: Round::new(round),
                high_qc: QuorumCertificate::genesis_qc(),
                last_tc: None,
            };
            partner
                .on_inbound(timeout.seal(ChainID::new(7), &member), now)
                .unwrap();
        }

        assert_eq!(partner.pacemaker.pending_timeout_rounds(), 0);
        assert_eq!(partner.status().current_round, Round::new(1));
        assert!(letters.try_recv().is_err());
    }

    #[test]
    fn non_member_rearms_its_timer_without_timing_out() {
        let keys = signing_keys(4);
        let start = Instant::now();
        let (mut observer, letters) =
            partner_with_key(&keys, SigningKey::from_bytes(&[99; 32]), start);
        observer.begin();

        let expiry = start + ROUND_TIMEOUT;
        observer.on_tick(expiry).unwrap();
        assert_eq!(observer.deadline(), expiry + ROUND_TIMEOUT);

        let later = expiry + Duration::from_secs(10);
        observer.on_tick(later).unwrap();
        assert_eq!(observer.deadline(), later + ROUND_TIMEOUT);

        assert!(letters.try_recv().is_err());
        assert_eq!(observer.status().round_state, RoundState::WaitingForProposal);
        assert_eq!(observer.status().current_round, Round::new(1));
    }

    #[test]
    fn unsupported_kind_is_fatal_and_garbage_is_dropped() {
        let keys = signing_keys(4);
        let now = Instant::now();
        let (mut partner, _letters) = partner(&keys, 2, now);

        let mut message = WireMessage {
            kind: 9,
            payload: vec![1, 2, 3],
            sender: keys[0].verifying_key().to_bytes(),
            signature: SignatureBytes::new([0; 64]),
        };
        assert!(matches!(
            partner.on_inbound(message.clone(), now),
            Err(PartnerError::Protocol(MessageError::UnsupportedMessageKind(9)))
        ));

        message.kind = MessageKind::Proposal.to_byte();
        assert!(partner.on_inbound(message, now).is_ok());
        assert_eq!(partner.status(), StatusSnapshot::initial());
    }

    #[test]
    fn proposal_from_a_non_leader_is_dropped() {
        let keys = signing_keys(4);
        let now = Instant::now();
        let (mut partner, letters) = partner(&keys, 2, now);
        partner.begin();

        // Round 1 belongs to member 1; member 3 proposes anyway.
        let proposal = ProposalContent {
            block: Block::new(Round::new(1), Payload::empty(), QuorumCertificate::genesis_qc()),
            last_tc: None,
        };
        let impostor = Keypair::new(keys[3].clone());
        partner
            .on_inbound(proposal.seal(ChainID::new(7), &impostor), now)
            .unwrap();

        assert!(letters.try_recv().is_err());
        assert!(partner.block_tree().is_empty());
        assert_eq!(partner.status().round_state, RoundState::WaitingForProposal);
    }
}
