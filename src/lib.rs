/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A chained HotStuff consensus engine for a fixed committee of `N = 3F + 1` replicas.
//!
//! Each replica runs one [partner](partner::Partner): a single-threaded event loop that owns the
//! [pacemaker](pacemaker), the [safety rules](safety), the [pending block tree](block_tree) and the
//! vote collectors. Blocks are executed and committed by a user-provided [`Ledger`](ledger::Ledger);
//! messages leave through user-provided [sinks](networking::OutboundSink). Start a replica with
//! [`ReplicaSpec`](replica::ReplicaSpec).

pub mod types;

pub mod signature_collector;

pub mod safety;

pub mod block_tree;

pub mod pacemaker;

pub mod messages;

pub mod networking;

pub mod ledger;

pub mod partner;

pub mod events;

pub(crate) mod event_bus;

pub(crate) mod logging;

pub mod replica;
