/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Handing signed messages to the transport.
//!
//! The consensus engine does not talk to peers itself. Every outgoing message is wrapped in an
//! [`OutgoingLetter`] and handed to each registered [`OutboundSink`]; the transport behind a sink is
//! responsible for actually reaching the receivers. Delivery is fire-and-forget: a sink gets a bounded
//! amount of time to accept a letter, and a sink that fails is logged and skipped. Nothing is
//! retransmitted here, since the round timeout re-drives progress when messages are lost.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::messages::WireMessage;
use crate::types::crypto_primitives::VerifyingKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendType {
    Unicast,
    Multicast,
}

/// A signed message and who it is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingLetter {
    pub message: WireMessage,
    pub send_type: SendType,
    pub receivers: Vec<VerifyingKey>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("sink did not accept the letter within {0:?}")]
    TimedOut(Duration),

    #[error("sink's consumer has disconnected")]
    Disconnected,
}

/// A consumer of outgoing letters, typically the transport.
pub trait OutboundSink: Send {
    /// Hand over `letter`, giving up after `timeout`.
    fn notify(&mut self, letter: &OutgoingLetter, timeout: Duration) -> Result<(), NotifyError>;
}

/// An [`OutboundSink`] backed by a bounded channel. The other end of the channel is the subscribable
/// source of outgoing letters.
#[derive(Clone)]
pub struct ChannelSink {
    sender: SyncSender<OutgoingLetter>,
}

const RETRY_INTERVAL: Duration = Duration::from_millis(1);

impl ChannelSink {
    /// Create a sink whose channel buffers up to `capacity` letters, and the receiver to consume them
    /// from.
    pub fn new(capacity: usize) -> (ChannelSink, Receiver<OutgoingLetter>) {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        (ChannelSink { sender }, receiver)
    }

    pub fn from_sender(sender: SyncSender<OutgoingLetter>) -> ChannelSink {
        ChannelSink { sender }
    }
}

impl OutboundSink for ChannelSink {
    fn notify(&mut self, letter: &OutgoingLetter, timeout: Duration) -> Result<(), NotifyError> {
        let deadline = Instant::now() + timeout;
        let mut letter = letter.clone();
        loop {
            match self.sender.try_send(letter) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(NotifyError::Disconnected),
                Err(TrySendError::Full(returned)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(NotifyError::TimedOut(timeout));
                    }
                    letter = returned;
                    thread::sleep(RETRY_INTERVAL.min(deadline - now));
                }
            }
        }
    }
}

/// The ordered list of registered sinks, with helpers for the two send types.
pub(crate) struct SenderHandle {
    sinks: Vec<Box<dyn OutboundSink>>,
    timeout: Duration,
}

impl SenderHandle {
    pub(crate) fn new(sinks: Vec<Box<dyn OutboundSink>>, timeout: Duration) -> SenderHandle {
        SenderHandle { sinks, timeout }
    }

    pub(crate) fn unicast(&mut self, message: WireMessage, receiver: VerifyingKey) {
        self.deliver(OutgoingLetter {
            message,
            send_type: SendType::Unicast,
            receivers: vec![receiver],
        })
    }

    pub(crate) fn multicast(&mut self, message: WireMessage, receivers: Vec<VerifyingKey>) {
        self.deliver(OutgoingLetter {
            message,
            send_type: SendType::Multicast,
            receivers,
        })
    }

    fn deliver(&mut self, letter: OutgoingLetter) {
        for (index, sink) in self.sinks.iter_mut().enumerate() {
            if let Err(err) = sink.notify(&letter, self.timeout) {
                log::warn!("outbound sink {} dropped a {:?} letter: {}", index, letter.send_type, err);
            }
        }
    }
}
