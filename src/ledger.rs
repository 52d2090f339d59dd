/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The application ledger that consensus orders blocks for.
//!
//! Besides implementing the functions specified in the trait, implementors of `Ledger` are expected
//! to be *deterministic*: every replica that calls [`execute_proposal`](Ledger::execute_proposal)
//! with the same block on the same parent state must get the same [`ExecStateId`]. Otherwise
//! replicas will sign different [`VoteInfo`](crate::types::voting::VoteInfo)s and never form a QC.

use crate::messages::ProposalContent;
use crate::types::{
    block::Block,
    data_types::{CryptoHash, ExecStateId, Payload, Round},
};

pub trait Ledger: Send + 'static {
    /// Called when this replica leads `round` and has to propose a block extending the block
    /// identified by `parent`.
    fn produce_payload(&mut self, round: Round, parent: &CryptoHash) -> Payload;

    /// Called on every proposal received from the current leader, before it is executed. Returning
    /// `false` drops the proposal without voting.
    fn verify_proposal(&mut self, proposal: &ProposalContent) -> bool;

    /// Speculatively execute `block` on top of `parent_state`, the state its parent executed to.
    /// The genesis block executes to [`ExecStateId::genesis`].
    fn execute_proposal(&mut self, block: &Block, parent_state: ExecStateId) -> ExecStateId;

    /// Make `block`, which executed to `exec_state`, permanent. Called exactly once per committed
    /// block, in round order.
    fn apply_commit(&mut self, block: &Block, exec_state: ExecStateId);
}
