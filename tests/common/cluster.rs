use std::{
    collections::VecDeque,
    sync::mpsc::{self, Receiver},
    time::{Duration, Instant},
};

use ed25519_dalek::SigningKey;
use hotstuff_partner::{
    events::Event,
    messages::WireMessage,
    networking::{ChannelSink, OutgoingLetter},
    partner::{Partner, StatusSnapshot},
    replica::Configuration,
    types::{
        certificates::QuorumCertificate,
        committee::{Committee, RoundRobin},
        crypto_primitives::VerifyingKey,
        data_types::ChainID,
    },
};
use rand_core::OsRng;

use super::memory_ledger::{CommitLog, MemoryLedger};

pub(crate) const ROUND_TIMEOUT: Duration = Duration::from_millis(500);

/// One partner in a [`Cluster`], with the receiving ends of everything it emits.
pub(crate) struct Slot {
    pub(crate) key: VerifyingKey,
    pub(crate) partner: Partner<MemoryLedger>,
    pub(crate) commits: CommitLog,
    letters: Receiver<OutgoingLetter>,
    events: Receiver<Event>,
    pub(crate) seen: Vec<Event>,
}

/// Partners driven in lockstep by the test thread, with letters delivered one at a time in FIFO order.
///
/// A slot normally runs one committee member, but a test can add extra slots that run a member's key
/// a second time, to play a Byzantine replica that sends conflicting messages.
pub(crate) struct Cluster {
    pub(crate) keys: Vec<SigningKey>,
    pub(crate) slots: Vec<Slot>,
    pub(crate) start: Instant,
    queue: VecDeque<(usize, WireMessage)>,
    route: Box<dyn Fn(usize, usize) -> bool>,
    committee: Committee,
}

impl Cluster {
    /// Create a cluster of `n` honest partners. Slot `i` runs committee member `i`.
    pub(crate) fn new(n: usize) -> Cluster {
        let mut csprg = OsRng {};
        let keys: Vec<SigningKey> = (0..n).map(|_| SigningKey::generate(&mut csprg)).collect();
        let committee = Committee::new(keys.iter().map(|key| key.verifying_key()).collect()).unwrap();

        let mut cluster = Cluster {
            keys,
            slots: Vec::new(),
            start: Instant::now(),
            queue: VecDeque::new(),
            route: Box::new(|_, _| true),
            committee,
        };
        for member in 0..n {
            cluster.add_slot(member, member as u8);
        }
        cluster
    }

    /// Add a slot running committee member `member`'s key, whose ledger proposes payloads tagged
    /// `tag`. Returns the index of the new slot.
    pub(crate) fn add_slot(&mut self, member: usize, tag: u8) -> usize {
        let configuration = Configuration::builder()
            .me(self.keys[member].clone())
            .chain_id(ChainID::new(0))
            .committee(self.committee.clone())
            .round_timeout(ROUND_TIMEOUT)
            .build();
        let (ledger, commits) = MemoryLedger::new(tag);
        let (sink, letters) = ChannelSink::new(1024);
        let (event_publisher, events) = mpsc::channel();

        let partner = Partner::new(
            &configuration,
            ledger,
            vec![Box::new(sink)],
            Box::new(RoundRobin),
            Some(event_publisher),
            self.start,
        );
        self.slots.push(Slot {
            key: self.keys[member].verifying_key(),
            partner,
            commits,
            letters,
            events,
            seen: Vec::new(),
        });
        self.slots.len() - 1
    }

    /// Only deliver a letter from slot `from` to slot `to` if `route(from, to)`.
    pub(crate) fn set_route(&mut self, route: impl Fn(usize, usize) -> bool + 'static) {
        self.route = Box::new(route);
    }

    pub(crate) fn begin(&mut self) {
        for slot in &mut self.slots {
            slot.partner.begin();
        }
        self.collect();
    }

    pub(crate) fn tick_all(&mut self, now: Instant) {
        for slot in &mut self.slots {
            slot.partner.on_tick(now).unwrap();
        }
        self.collect();
    }

    /// Deliver the oldest undelivered message. Returns `false` if there was none.
    pub(crate) fn step(&mut self) -> bool {
        let Some((to, message)) = self.queue.pop_front() else {
            return false;
        };
        self.slots[to].partner.on_inbound(message, self.start).unwrap();
        self.collect();
        true
    }

    /// Deliver messages until `done` holds, the network is quiet, or `max_steps` messages have been
    /// delivered. Returns whether `done` holds at the end.
    pub(crate) fn run_until(&mut self, max_steps: usize, done: impl Fn(&Cluster) -> bool) -> bool {
        for _ in 0..max_steps {
            if done(self) || !self.step() {
                break;
            }
        }
        done(self)
    }

    pub(crate) fn status(&self, slot: usize) -> StatusSnapshot {
        self.slots[slot].partner.status()
    }

    /// QCs that slot `slot` formed from votes.
    pub(crate) fn collected_qcs(&self, slot: usize) -> Vec<&QuorumCertificate> {
        self.slots[slot]
            .seen
            .iter()
            .filter_map(|event| match event {
                Event::CollectQC(collect_qc_event) => Some(&collect_qc_event.quorum_certificate),
                _ => None,
            })
            .collect()
    }

    /// Move every emitted letter into the delivery queue and every emitted event into `seen`.
    fn collect(&mut self) {
        for from in 0..self.slots.len() {
            while let Ok(event) = self.slots[from].events.try_recv() {
                self.slots[from].seen.push(event);
            }

            while let Ok(letter) = self.slots[from].letters.try_recv() {
                for receiver in &letter.receivers {
                    for (to, slot) in self.slots.iter().enumerate() {
                        if slot.key == *receiver && (self.route)(from, to) {
                            self.queue.push_back((to, letter.message.clone()));
                        }
                    }
                }
            }
        }
    }
}
