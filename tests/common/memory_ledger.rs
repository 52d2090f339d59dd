use std::sync::{Arc, Mutex};

use hotstuff_partner::{
    ledger::Ledger,
    messages::ProposalContent,
    types::{
        block::Block,
        data_types::{CryptoHash, ExecStateId, Payload, Round},
    },
};

/// Blocks committed by a [`MemoryLedger`], in commit order. Shared with the test so that it can be
/// read while the ledger is owned by a running replica.
pub(crate) type CommitLog = Arc<Mutex<Vec<Block>>>;

/// A ledger whose "state" is a hash chain over the ids of executed blocks.
pub(crate) struct MemoryLedger {
    tag: u8,
    commits: CommitLog,
}

impl MemoryLedger {
    /// Create a ledger that proposes payloads starting with `tag`, so that tests can tell apart blocks
    /// that different replicas would propose for the same round.
    pub(crate) fn new(tag: u8) -> (MemoryLedger, CommitLog) {
        let commits = CommitLog::default();
        (
            MemoryLedger {
                tag,
                commits: Arc::clone(&commits),
            },
            commits,
        )
    }
}

/// The state a [`MemoryLedger`] reaches by executing `block` on `parent_state`.
pub(crate) fn exec_state(parent_state: ExecStateId, block: &Block) -> ExecStateId {
    let bytes = [parent_state.hash().bytes(), block.id.bytes()].concat();
    ExecStateId::new(CryptoHash::digest(&bytes))
}

impl Ledger for MemoryLedger {
    fn produce_payload(&mut self, round: Round, _parent: &CryptoHash) -> Payload {
        let mut bytes = vec![self.tag];
        bytes.extend_from_slice(&round.int().to_le_bytes());
        Payload::new(bytes)
    }

    fn verify_proposal(&mut self, proposal: &ProposalContent) -> bool {
        !proposal.block.payload.bytes().is_empty()
    }

    fn execute_proposal(&mut self, block: &Block, parent_state: ExecStateId) -> ExecStateId {
        exec_state(parent_state, block)
    }

    fn apply_commit(&mut self, block: &Block, _exec_state: ExecStateId) {
        self.commits.lock().unwrap().push(block.clone());
    }
}

/// Read a commit log as a list of block ids.
pub(crate) fn committed_ids(commits: &CommitLog) -> Vec<CryptoHash> {
    commits.lock().unwrap().iter().map(|block| block.id).collect()
}
