use std::{
    collections::HashMap,
    sync::{mpsc::SyncSender, Arc, Mutex},
    time::Duration,
};

use hotstuff_partner::{
    messages::WireMessage,
    networking::{NotifyError, OutboundSink, OutgoingLetter},
    types::crypto_primitives::VerifyingKey,
};

/// A mock network that routes letters straight into the inbound queues of running replicas.
/// Letters to a replica that is not connected are lost, like messages to a crashed process.
#[derive(Clone, Default)]
pub(crate) struct MockNetwork {
    routes: Arc<Mutex<HashMap<VerifyingKey, SyncSender<WireMessage>>>>,
}

impl MockNetwork {
    pub(crate) fn connect(&self, peer: VerifyingKey, inbound: SyncSender<WireMessage>) {
        self.routes.lock().unwrap().insert(peer, inbound);
    }

    pub(crate) fn disconnect(&self, peer: &VerifyingKey) {
        self.routes.lock().unwrap().remove(peer);
    }

    /// Get an outbound sink that sends into this network.
    pub(crate) fn sink(&self) -> NetworkStub {
        NetworkStub {
            routes: Arc::clone(&self.routes),
        }
    }
}

pub(crate) struct NetworkStub {
    routes: Arc<Mutex<HashMap<VerifyingKey, SyncSender<WireMessage>>>>,
}

impl OutboundSink for NetworkStub {
    fn notify(&mut self, letter: &OutgoingLetter, _timeout: Duration) -> Result<(), NotifyError> {
        let routes = self.routes.lock().unwrap();
        for receiver in &letter.receivers {
            if let Some(inbound) = routes.get(receiver) {
                // A full or closed inbox loses the message, as a real network may.
                let _ = inbound.try_send(letter.message.clone());
            }
        }
        Ok(())
    }
}
