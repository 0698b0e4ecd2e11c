//! Event bus: per-session mailboxes plus broadcast fan-out.
//!
//! The bus only knows mailboxes. The session registry opens a mailbox when
//! it creates a session and closes it on termination, inside the same
//! critical section, so the set of mailboxes tracks the set of live
//! sessions.

mod event;
mod mailbox;

pub use event::{CloseReason, Event, Target, Topic};
pub use mailbox::{Mailbox, WaitOutcome};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::BusConfig;
use crate::ids::SessionId;

#[derive(Clone)]
pub struct EventBus {
    mailboxes: Arc<RwLock<HashMap<SessionId, Arc<Mailbox>>>>,
    warn_depth: usize,
}

impl EventBus {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            mailboxes: Arc::new(RwLock::new(HashMap::new())),
            warn_depth: config.mailbox_warn_depth,
        }
    }

    pub(crate) fn open(&self, owner: SessionId) -> Arc<Mailbox> {
        let mailbox = Arc::new(Mailbox::new(owner, self.warn_depth));
        self.mailboxes.write().insert(owner, Arc::clone(&mailbox));
        mailbox
    }

    pub(crate) fn close(&self, owner: SessionId) -> Option<Arc<Mailbox>> {
        let mailbox = self.mailboxes.write().remove(&owner)?;
        mailbox.close();
        Some(mailbox)
    }

    pub fn mailbox(&self, owner: SessionId) -> Option<Arc<Mailbox>> {
        self.mailboxes.read().get(&owner).cloned()
    }

    /// Deliver `event` to every mailbox selected by `target`.
    ///
    /// Returns the number of mailboxes that accepted the event.
    pub fn post(&self, target: &Target, event: Event) -> usize {
        let recipients: Vec<Arc<Mailbox>> = {
            let mailboxes = self.mailboxes.read();
            match target {
                Target::Broadcast => mailboxes.values().cloned().collect(),
                Target::Others(sender) => mailboxes
                    .iter()
                    .filter(|(id, _)| *id != sender)
                    .map(|(_, mailbox)| Arc::clone(mailbox))
                    .collect(),
                Target::Sessions(ids) => ids
                    .iter()
                    .filter_map(|id| mailboxes.get(id).cloned())
                    .collect(),
            }
        };

        let topic = event.topic();
        let delivered = recipients
            .iter()
            .filter(|mailbox| mailbox.push(event.clone()))
            .count();
        tracing::trace!(?topic, delivered, "Event posted");
        delivered
    }

    pub fn broadcast(&self, event: Event) -> usize {
        self.post(&Target::Broadcast, event)
    }

    pub fn len(&self) -> usize {
        self.mailboxes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.read().is_empty()
    }
}
