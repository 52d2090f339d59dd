/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica.
//!
//! A replica is one member of a committee of `N` processes that agree on a chain of blocks. Each
//! replica is uniquely identified by an [Ed25519 public key](ed25519_dalek::VerifyingKey), and its
//! position in the [`Committee`] is its signer index.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Transport
//!
//! The replica does not own a network. Outbound messages are handed to the registered
//! [sinks](crate::networking::OutboundSink) as [letters](crate::networking::OutgoingLetter), and the
//! user's transport feeds inbound [`WireMessage`]s into the queue returned by [`Replica::inbound`].
//! Letters addressed to this replica itself must be looped back into that queue too.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .ledger(ledger)
//!     .configuration(configuration)
//!     .sinks(vec![Box::new(sink)])
//!     .on_commit_block(commit_handler)
//!     .build()
//!     .start();
//! ```
//!
//! ### Required setters
//! - `.ledger(...)`
//! - `.configuration(...)`
//! - `.sinks(...)`
//!
//! ### Optional setters
//! - `.leader_elector(...)`, defaulting to [`RoundRobin`].
//! - One `.on_*(...)` setter per event type in [crate::events], to register a handler.
//!
//! The replica's [configuration](Configuration) is also defined using the builder pattern:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(signing_key)
//!     .chain_id(ChainID::new(0))
//!     .committee(committee)
//!     .round_timeout(Duration::from_millis(500))
//!     .log_events(true)
//!     .build();
//! ```

use std::panic;
use std::sync::mpsc::{self, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ed25519_dalek::SigningKey;
use typed_builder::TypedBuilder;

use crate::event_bus::*;
use crate::events::*;
use crate::ledger::Ledger;
use crate::messages::WireMessage;
use crate::networking::OutboundSink;
use crate::partner::{Partner, PartnerError, StatusSnapshot};
use crate::types::committee::{Committee, LeaderElector, RoundRobin};
use crate::types::data_types::ChainID;

/// Stores the user-defined parameters required to start the replica, that is:
/// 1. The replica's [keypair](ed25519_dalek::SigningKey).
/// 2. The [chain ID](crate::types::data_types::ChainID) of the target blockchain.
/// 3. The [committee](Committee), identical on every replica.
/// 4. The round timeout: how long a round may go without progress before this replica times out.
/// 5. The sink timeout: how long a single outbound sink may block before a letter is given up on.
/// 6. The status period: how often an [`Event::Status`] is published.
/// 7. The capacity of the inbound message queue.
/// 8. The "Log Events" flag, if set to "true" then every event is logged.
///
/// ## Chain ID
///
/// Every signature covers the chain ID, so that votes, timeouts and proposals for one deployment
/// cannot be replayed into another. Do not run the same keypair in two deployments with the same
/// chain ID.
///
/// ## Log Events
///
/// Logging goes through the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(Clone, TypedBuilder)]
#[builder(builder_method(doc =
    "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.chain_id(...)`
    - `.committee(...)`
    - `.round_timeout(...)`

    Optional:
    - `.sink_timeout(...)`
    - `.status_period(...)`
    - `.inbound_buffer_capacity(...)`
    - `.log_events(...)`
"
))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's keypair, used to sign messages. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the chain ID of the blockchain. Required."))]
    pub chain_id: ChainID,
    #[builder(setter(doc = "Set the committee. Every replica must be given the same members in the same order. Required."))]
    pub committee: Committee,
    #[builder(setter(doc = "Set how long a round may last before this replica times out of it. Required."))]
    pub round_timeout: Duration,
    #[builder(default = Duration::from_millis(100),
    setter(doc = "Set the maximum time a single outbound sink may take to accept a letter. Defaults to 100ms."))]
    pub sink_timeout: Duration,
    #[builder(default = Duration::from_secs(1),
    setter(doc = "Set how often the replica publishes a status event. Defaults to 1s."))]
    pub status_period: Duration,
    #[builder(default = 1024,
    setter(doc = "Set the number of inbound messages that can be queued before the transport blocks. Defaults to 1024."))]
    pub inbound_buffer_capacity: usize,
    #[builder(default = false, setter(doc = "Enable logging of every event? Defaults to false."))]
    pub log_events: bool,
}

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc =
    "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.ledger(...)`
    - `.configuration(...)`
    - `.sinks(...)`

    Optional:
    - `.leader_elector(...)`
    - `.on_insert_block(...)`
    - `.on_commit_block(...)`
    - `.on_prune_block(...)`
    - `.on_update_high_qc(...)`
    - `.on_update_preferred_round(...)`
    - `.on_propose(...)`
    - `.on_vote(...)`
    - `.on_timeout(...)`
    - `.on_receive_proposal(...)`
    - `.on_receive_vote(...)`
    - `.on_receive_timeout(...)`
    - `.on_start_round(...)`
    - `.on_round_timeout(...)`
    - `.on_collect_qc(...)`
    - `.on_collect_tc(...)`
    - `.on_status(...)`
"
))]
pub struct ReplicaSpec<L: Ledger> {
    // Required parameters
    #[builder(setter(doc = "Set the ledger that executes and commits blocks. The argument must implement the [Ledger](crate::ledger::Ledger) trait. Required."))]
    ledger: L,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set the outbound sinks. Every outgoing letter is offered to each sink in order. Required."))]
    sinks: Vec<Box<dyn OutboundSink>>,

    // Optional parameters
    #[builder(default, setter(transform = |elector: impl LeaderElector + 'static| Some(Box::new(elector) as Box<dyn LeaderElector>),
    doc = "Set the leader election rule. Defaults to round robin. Optional."))]
    leader_elector: Option<Box<dyn LeaderElector>>,
    #[builder(default, setter(transform = |handler: impl Fn(&InsertBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is executed and inserted into the pending tree. Optional."))]
    on_insert_block: Option<HandlerPtr<InsertBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is committed. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PruneBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PruneBlockEvent>),
    doc = "Register a handler closure to be invoked after a conflicting block is pruned. Optional."))]
    on_prune_block: Option<HandlerPtr<PruneBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateHighQCEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateHighQCEvent>),
    doc = "Register a handler closure to be invoked after the highQC is updated. Optional."))]
    on_update_high_qc: Option<HandlerPtr<UpdateHighQCEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdatePreferredRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdatePreferredRoundEvent>),
    doc = "Register a handler closure to be invoked after the preferred round is raised. Optional."))]
    on_update_preferred_round: Option<HandlerPtr<UpdatePreferredRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica proposes a block. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VoteEvent>),
    doc = "Register a handler closure to be invoked after the replica sends a vote. Optional."))]
    on_vote: Option<HandlerPtr<VoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TimeoutEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a timeout. Optional."))]
    on_timeout: Option<HandlerPtr<TimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a proposal. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a vote. Optional."))]
    on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a timeout. Optional."))]
    on_receive_timeout: Option<HandlerPtr<ReceiveTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRoundEvent>),
    doc = "Register a handler closure to be invoked after the replica enters a new round. Optional."))]
    on_start_round: Option<HandlerPtr<StartRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RoundTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RoundTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the round timer expires. Optional."))]
    on_round_timeout: Option<HandlerPtr<RoundTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CollectQCEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CollectQCEvent>),
    doc = "Register a handler closure to be invoked after the replica collects a new quorum certificate. Optional."))]
    on_collect_qc: Option<HandlerPtr<CollectQCEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CollectTCEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CollectTCEvent>),
    doc = "Register a handler closure to be invoked after the replica collects a new timeout certificate. Optional."))]
    on_collect_tc: Option<HandlerPtr<CollectTCEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StatusEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StatusEvent>),
    doc = "Register a handler closure to be invoked on every periodic status report. Optional."))]
    on_status: Option<HandlerPtr<StatusEvent>>,
}

impl<L: Ledger> ReplicaSpec<L> {
    /// Starts all threads and channels associated with running a replica, and returns the handles to
    /// them in a [Replica] struct.
    pub fn start(self) -> Replica {
        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            UserHandlers {
                on_insert_block: self.on_insert_block,
                on_commit_block: self.on_commit_block,
                on_prune_block: self.on_prune_block,
                on_update_high_qc: self.on_update_high_qc,
                on_update_preferred_round: self.on_update_preferred_round,
                on_propose: self.on_propose,
                on_vote: self.on_vote,
                on_timeout: self.on_timeout,
                on_receive_proposal: self.on_receive_proposal,
                on_receive_vote: self.on_receive_vote,
                on_receive_timeout: self.on_receive_timeout,
                on_start_round: self.on_start_round,
                on_round_timeout: self.on_round_timeout,
                on_collect_qc: self.on_collect_qc,
                on_collect_tc: self.on_collect_tc,
                on_status: self.on_status,
            },
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (event_bus_shutdown, event_bus) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
                (Some(shutdown), Some(event_bus))
            }
            None => (None, None),
        };

        let (inbound, inbound_receiver) =
            mpsc::sync_channel(self.configuration.inbound_buffer_capacity);
        let status = Arc::new(Mutex::new(StatusSnapshot::initial()));
        let leader_elector = self
            .leader_elector
            .unwrap_or_else(|| Box::new(RoundRobin) as Box<dyn LeaderElector>);

        let partner = Partner::new(
            &self.configuration,
            self.ledger,
            self.sinks,
            leader_elector,
            event_publisher,
            Instant::now(),
        );
        let (partner_shutdown, partner_shutdown_receiver) = mpsc::channel();
        let partner = partner.start(
            inbound_receiver,
            partner_shutdown_receiver,
            self.configuration.status_period,
            Arc::clone(&status),
        );

        Replica {
            inbound,
            status,
            partner: Some(partner),
            partner_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background
/// threads are gracefully shut down.
pub struct Replica {
    inbound: SyncSender<WireMessage>,
    status: Arc<Mutex<StatusSnapshot>>,
    partner: Option<JoinHandle<Result<(), PartnerError>>>,
    partner_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Replica {
    /// Get a sender into this replica's inbound queue. The transport pushes every message addressed to
    /// this replica here, including those this replica sent to itself.
    pub fn inbound(&self) -> SyncSender<WireMessage> {
        self.inbound.clone()
    }

    /// Get the latest status of the replica, as of its last processed event.
    pub fn status(&self) -> StatusSnapshot {
        match self.status.lock() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Whether the partner thread has stopped, either because of a fatal error or a panic.
    pub fn is_stopped(&self) -> bool {
        self.partner
            .as_ref()
            .map_or(true, |partner| partner.is_finished())
    }

    /// Shut the replica down and return how its partner thread ended.
    ///
    /// # Errors
    /// The fatal error that stopped the partner, if any.
    pub fn stop(mut self) -> Result<(), PartnerError> {
        let outcome = self.join_partner();
        self.shutdown_event_bus();
        match outcome {
            Some(Ok(result)) => result,
            Some(Err(panic)) => panic::resume_unwind(panic),
            None => Ok(()),
        }
    }

    fn join_partner(&mut self) -> Option<thread::Result<Result<(), PartnerError>>> {
        let partner = self.partner.take()?;

        // The partner may already have exited on a fatal error, dropping its receiver.
        let _ = self.partner_shutdown.send(());
        Some(partner.join())
    }

    fn shutdown_event_bus(&mut self) {
        if let Some(shutdown) = self.event_bus_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }
    }
}

impl Drop for Replica {
    fn drop(&mut self) {
        // Stop the partner before the event bus, so that the bus can drain every event the partner
        // published.
        match self.join_partner() {
            Some(Ok(Err(err))) => log::error!("replica stopped with a fatal error: {}", err),
            Some(Err(_)) => log::error!("partner thread panicked"),
            _ => (),
        }
        self.shutdown_event_bus();
    }
}
