//! Event bus: fans protocol events out to interested subscribers.
//!
//! Subscriptions are keyed by message kind. Handlers run synchronously on
//! whichever thread produced the event (a transfer worker, the maintenance
//! thread, the responder path); subscribers that touch thread-affine state
//! marshal to their own threads.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::commands::BrowseListing;
use crate::entity::Status;
use crate::protocol::{ChatScope, FileSummary, MessageKind};

/// Events delivered to subscribers.
#[derive(Debug, Clone)]
pub enum Event {
    Chat {
        sender_id: String,
        sender_name: String,
        text: String,
        scope: ChatScope,
    },
    Browse {
        listing: BrowseListing,
    },
    Search {
        files: Vec<FileSummary>,
    },
    PeerJoined {
        id: String,
        name: String,
    },
    PeerQuit {
        id: String,
    },
    TransferUpdate {
        id: String,
        status: Status,
        transferred: u64,
    },
    SessionEstablished {
        id: String,
    },
}

impl Event {
    /// The message kind this event is routed under.
    pub fn kind(&self) -> MessageKind {
        match self {
            Event::Chat { .. } => MessageKind::Chat,
            Event::Browse { .. } => MessageKind::Browse,
            Event::Search { .. } => MessageKind::Search,
            Event::PeerJoined { .. } => MessageKind::Join,
            Event::PeerQuit { .. } => MessageKind::Quit,
            Event::TransferUpdate { .. } => MessageKind::Transfer,
            Event::SessionEstablished { .. } => MessageKind::Handshake,
        }
    }
}

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Typed publish/subscribe registry.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<MessageKind, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one message kind.
    pub fn subscribe<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Delivers an event to every handler subscribed to its kind.
    ///
    /// Handlers are snapshotted under the read lock and invoked after it is
    /// released, so a handler may itself subscribe or publish.
    pub fn publish(&self, event: &Event) {
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers.get(&event.kind()).cloned().unwrap_or_default()
        };
        for handler in &snapshot {
            handler(event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds = self
            .handlers
            .read()
            .map(|h| h.len())
            .unwrap_or_default();
        f.debug_struct("EventBus").field("kinds", &kinds).finish()
    }
}
