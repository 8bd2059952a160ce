//! The switching hub.
//!
//! The hub owns the set of joined participants. It is driven by a single
//! task that applies [`HubEvent`]s one at a time, so broadcast order is the
//! order in which events reached the hub and the participant map needs no
//! lock. Sessions talk to it through a cloneable [`HubHandle`].

use crate::config::HubConfig;
use crate::metrics;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use wschat_protocol::ChatMessage;
use wschat_transport::ConnectionId;

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub loop is no longer running.
    #[error("Hub is not running")]
    Stopped,
}

/// A joined participant as seen by the hub.
///
/// Holds the only sending half of the participant's outbound queue, so
/// dropping it is what closes the queue.
#[derive(Debug)]
pub struct Participant {
    id: ConnectionId,
    queue: mpsc::Sender<Arc<ChatMessage>>,
}

impl Participant {
    /// Create a participant with an outbound queue of the given capacity.
    ///
    /// Returns the participant and the receiving half of its queue.
    #[must_use]
    pub fn new(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Arc<ChatMessage>>) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        (Self { id, queue }, rx)
    }

    /// Get the participant's connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Enqueue without waiting.
    pub(crate) fn try_deliver(
        &self,
        message: Arc<ChatMessage>,
    ) -> Result<(), TrySendError<Arc<ChatMessage>>> {
        self.queue.try_send(message)
    }
}

/// Events consumed by the hub loop.
#[derive(Debug)]
pub enum HubEvent {
    /// Add a participant.
    Join(Participant),
    /// Remove a participant and close its queue.
    Leave(ConnectionId),
    /// Fan a message out to every participant.
    Broadcast(Arc<ChatMessage>),
    /// Report current statistics.
    Stats(oneshot::Sender<HubStats>),
    /// Close every queue and stop the loop.
    Shutdown,
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Number of joined participants.
    pub participants: usize,
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Participants the message was enqueued for.
    pub delivered: usize,
    /// Participants evicted because their queue was full.
    pub evicted: usize,
    /// Participants dropped because their outbound task had already gone.
    pub closed: usize,
}

/// Participant registry and fan-out.
#[derive(Debug, Default)]
pub struct Hub {
    participants: HashMap<ConnectionId, Participant>,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of joined participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether nobody is joined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Check if a participant is joined.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.participants.contains_key(id)
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            participants: self.participants.len(),
        }
    }

    /// Add a participant.
    ///
    /// Returns `false` if a participant with the same ID is already joined;
    /// the existing one is kept and the newcomer's queue is closed.
    pub fn join(&mut self, participant: Participant) -> bool {
        if self.participants.contains_key(participant.id()) {
            warn!(connection = %participant.id(), "Duplicate join ignored");
            return false;
        }

        debug!(connection = %participant.id(), "Participant joined");
        self.participants.insert(participant.id.clone(), participant);
        metrics::set_participants(self.participants.len());
        true
    }

    /// Remove a participant, closing its queue.
    ///
    /// Returns `true` if the participant was joined. Leaving twice is a no-op.
    pub fn leave(&mut self, id: &ConnectionId) -> bool {
        let removed = self.participants.remove(id).is_some();
        if removed {
            debug!(connection = %id, "Participant left");
            metrics::set_participants(self.participants.len());
        }
        removed
    }

    /// Enqueue a message for every participant without waiting.
    ///
    /// Participants whose queue is full are evicted; their queue is closed
    /// so their outbound task finishes. Everybody else still gets the message.
    pub fn broadcast(&mut self, message: Arc<ChatMessage>) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();

        self.participants
            .retain(|id, participant| match participant.try_deliver(Arc::clone(&message)) {
                Ok(()) => {
                    outcome.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(connection = %id, "Outbound queue full, evicting slow participant");
                    outcome.evicted += 1;
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection = %id, "Outbound queue already closed");
                    outcome.closed += 1;
                    false
                }
            });

        trace!(
            recipients = outcome.delivered,
            evicted = outcome.evicted,
            "Broadcast message"
        );

        metrics::record_broadcast(outcome.delivered);
        for _ in 0..outcome.evicted {
            metrics::record_eviction();
        }
        if outcome.evicted + outcome.closed > 0 {
            metrics::set_participants(self.participants.len());
        }

        outcome
    }

    /// Remove every participant, closing all queues.
    pub fn close_all(&mut self) {
        let count = self.participants.len();
        self.participants.clear();
        metrics::set_participants(0);
        debug!(participants = count, "Closed all outbound queues");
    }

    /// Apply one event.
    ///
    /// Returns `ControlFlow::Break` when the loop should stop.
    pub fn handle_event(&mut self, event: HubEvent) -> ControlFlow<()> {
        match event {
            HubEvent::Join(participant) => {
                self.join(participant);
            }
            HubEvent::Leave(id) => {
                self.leave(&id);
            }
            HubEvent::Broadcast(message) => {
                self.broadcast(message);
            }
            HubEvent::Stats(reply) => {
                // The requester may have given up waiting.
                let _ = reply.send(self.stats());
            }
            HubEvent::Shutdown => {
                self.close_all();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Run the event loop until shutdown or until every handle is dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<HubEvent>) {
        while let Some(event) = events.recv().await {
            if self.handle_event(event).is_break() {
                info!("Hub shut down");
                return;
            }
        }

        self.close_all();
        debug!("All hub handles dropped, hub stopped");
    }
}

/// Start a hub on its own task.
#[must_use]
pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
    let task = tokio::spawn(Hub::new().run(rx));
    (HubHandle::from_sender(tx), task)
}

/// Cloneable handle for submitting events to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Wrap the sending side of a hub's event queue.
    #[must_use]
    pub fn from_sender(events: mpsc::Sender<HubEvent>) -> Self {
        Self { events }
    }

    async fn submit(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Stopped)
    }

    /// Join a participant.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is no longer running.
    pub async fn join(&self, participant: Participant) -> Result<(), HubError> {
        self.submit(HubEvent::Join(participant)).await
    }

    /// Remove a participant. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is no longer running.
    pub async fn leave(&self, id: ConnectionId) -> Result<(), HubError> {
        self.submit(HubEvent::Leave(id)).await
    }

    /// Broadcast a message to every participant, the sender included.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is no longer running.
    pub async fn broadcast(&self, message: ChatMessage) -> Result<(), HubError> {
        self.submit(HubEvent::Broadcast(Arc::new(message))).await
    }

    /// Query hub statistics.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub is no longer running.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubEvent::Stats(tx)).await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Close every participant's queue and stop the hub.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Stopped`] if the hub had already stopped.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.submit(HubEvent::Shutdown).await
    }

    /// Whether the hub loop has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}
