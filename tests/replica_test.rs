//! Replicas running on their own threads, connected by a mock network.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use ed25519_dalek::SigningKey;
use hotstuff_partner::{
    replica::{Configuration, Replica, ReplicaSpec},
    types::{
        committee::{Committee, LeaderElector, RoundRobin},
        crypto_primitives::VerifyingKey,
        data_types::{ChainID, CryptoHash, Round},
    },
};
use log::LevelFilter;
use rand_core::OsRng;

mod common;

use crate::common::{
    logging::setup_logger,
    memory_ledger::{committed_ids, CommitLog, MemoryLedger},
    network::MockNetwork,
};

const ROUND_TIMEOUT: Duration = Duration::from_millis(300);
const TEST_DEADLINE: Duration = Duration::from_secs(60);

struct Node {
    replica: Replica,
    commits: CommitLog,
    handled_commits: Arc<Mutex<Vec<CryptoHash>>>,
}

fn start_node(
    key: SigningKey,
    committee: &Committee,
    network: &MockNetwork,
    leader_elector: impl LeaderElector + 'static,
    log_events: bool,
) -> Node {
    let verifying_key = key.verifying_key();
    let configuration = Configuration::builder()
        .me(key)
        .chain_id(ChainID::new(3))
        .committee(committee.clone())
        .round_timeout(ROUND_TIMEOUT)
        .status_period(Duration::from_millis(200))
        .log_events(log_events)
        .build();
    let (ledger, commits) = MemoryLedger::new(committee.position(&verifying_key).unwrap() as u8);

    let handled_commits = Arc::new(Mutex::new(Vec::new()));
    let handled = Arc::clone(&handled_commits);
    let replica = ReplicaSpec::builder()
        .ledger(ledger)
        .configuration(configuration)
        .sinks(vec![Box::new(network.sink())])
        .leader_elector(leader_elector)
        .on_commit_block(move |event| handled.lock().unwrap().push(event.block))
        .build()
        .start();
    network.connect(verifying_key, replica.inbound());

    Node {
        replica,
        commits,
        handled_commits,
    }
}

fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + TEST_DEADLINE;
    while !done() {
        assert!(Instant::now() < deadline, "replicas made no progress in time");
        thread::sleep(Duration::from_millis(50));
    }
}

fn assert_consistent(logs: &[Vec<CryptoHash>]) {
    let longest = logs.iter().max_by_key(|log| log.len()).unwrap();
    for log in logs {
        assert_eq!(log[..], longest[..log.len()]);
    }
}

#[test]
fn replicas_commit_the_same_chain_test() {
    setup_logger(LevelFilter::Info);

    let mut csprg = OsRng {};
    let keys: Vec<SigningKey> = (0..4).map(|_| SigningKey::generate(&mut csprg)).collect();
    let committee = Committee::new(keys.iter().map(|key| key.verifying_key()).collect()).unwrap();
    let network = MockNetwork::default();

    let nodes: Vec<Node> = keys
        .into_iter()
        .map(|key| start_node(key, &committee, &network, RoundRobin, true))
        .collect();

    log::debug!("Waiting until every replica committed 5 blocks.");
    wait_until(|| nodes.iter().all(|node| node.commits.lock().unwrap().len() >= 5));

    for node in &nodes {
        let status = node.replica.status();
        assert!(status.current_round > status.committed_round);
        assert!(!node.replica.is_stopped());
    }

    let mut logs = Vec::new();
    for node in nodes {
        assert!(node.replica.stop().is_ok());
        let committed = committed_ids(&node.commits);
        // The event bus drains before `stop` returns, so every commit reached the handler.
        assert_eq!(*node.handled_commits.lock().unwrap(), committed);
        logs.push(committed);
    }
    assert_consistent(&logs);
}

/// Elects leaders round robin among the given members only.
struct SkipMembers {
    live: Vec<VerifyingKey>,
}

impl LeaderElector for SkipMembers {
    fn leader(&self, round: Round, _committee: &Committee) -> VerifyingKey {
        self.live[(round.int() % self.live.len() as u64) as usize]
    }
}

#[test]
fn rounds_advance_past_a_crashed_leader_test() {
    setup_logger(LevelFilter::Info);

    let mut csprg = OsRng {};
    let keys: Vec<SigningKey> = (0..4).map(|_| SigningKey::generate(&mut csprg)).collect();
    let committee = Committee::new(keys.iter().map(|key| key.verifying_key()).collect()).unwrap();
    let network = MockNetwork::default();

    // Member 1, the leader of round 1, never starts. Every round it leads ends by timeout.
    let crashed = keys[1].verifying_key();
    let nodes: Vec<Node> = keys
        .into_iter()
        .filter(|key| key.verifying_key() != crashed)
        .map(|key| start_node(key, &committee, &network, RoundRobin, false))
        .collect();

    log::debug!("Waiting until every live replica reached round 8.");
    wait_until(|| {
        nodes
            .iter()
            .all(|node| node.replica.status().current_round >= Round::new(8))
    });

    for node in &nodes {
        let status = node.replica.status();
        assert!(status.high_qc.vote_info.round > Round::genesis());
        assert!(status.last_voted_round <= status.current_round);
    }
    let logs: Vec<Vec<CryptoHash>> = nodes.iter().map(|node| committed_ids(&node.commits)).collect();
    assert_consistent(&logs);
}

#[test]
fn replicas_commit_without_a_crashed_member_test() {
    setup_logger(LevelFilter::Info);

    let mut csprg = OsRng {};
    let keys: Vec<SigningKey> = (0..4).map(|_| SigningKey::generate(&mut csprg)).collect();
    let committee = Committee::new(keys.iter().map(|key| key.verifying_key()).collect()).unwrap();
    let network = MockNetwork::default();

    // Member 1 never starts, and the remaining members agree never to elect it.
    let crashed = keys[1].verifying_key();
    let live: Vec<VerifyingKey> = committee.members().copied().filter(|key| *key != crashed).collect();
    let nodes: Vec<Node> = keys
        .into_iter()
        .filter(|key| key.verifying_key() != crashed)
        .map(|key| {
            let elector = SkipMembers { live: live.clone() };
            start_node(key, &committee, &network, elector, false)
        })
        .collect();

    log::debug!("Waiting until every live replica committed 3 blocks.");
    wait_until(|| nodes.iter().all(|node| node.commits.lock().unwrap().len() >= 3));

    let logs: Vec<Vec<CryptoHash>> = nodes.iter().map(|node| committed_ids(&node.commits)).collect();
    assert_consistent(&logs);
}
