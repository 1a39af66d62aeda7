//! Observable events emitted by the acquisition core
//!
//! State transitions are published to any number of subscribers instead of
//! touching a display directly. Each subscriber owns a bounded crossbeam
//! channel; publishing never blocks: a full subscriber misses the event and a
//! disconnected one is pruned.

use crate::error::ErrorClass;
use crate::types::{ConnectionState, ProbeDescriptor, RttStatus, Session, VariableDescriptor};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::{Arc, Mutex};

/// Default per-subscriber queue depth
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Something the operator should see
#[derive(Debug, Clone, PartialEq)]
pub struct UserError {
    pub class: ErrorClass,
    pub message: String,
    pub at: chrono::DateTime<chrono::Local>,
}

impl UserError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            at: chrono::Local::now(),
        }
    }
}

impl std::fmt::Display for UserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} error: {}", self.at.format("%H:%M:%S"), self.class, self.message)
    }
}

/// Events published by the acquisition core
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    /// A detection cycle replaced the probe list
    ProbesDetected(Vec<ProbeDescriptor>),
    /// The lifecycle state machine moved
    StateChanged(ConnectionState),
    /// The session was created, replaced, or removed
    ConnectionChanged(Option<Session>),
    /// Discovery replaced the variable set
    DiscoveryCompleted(Vec<VariableDescriptor>),
    /// A write was accepted by the transport
    ValueWritten { address: u64, value: f64 },
    /// The poll interval changed (buffers were cleared)
    RateChanged { interval_ms: u64 },
    PollingPaused,
    PollingResumed,
    /// Every sample buffer was emptied
    BuffersCleared,
    /// Fresh RTT diagnostics, `None` once the status can no longer be read
    RttStatus(Option<RttStatus>),
    /// A failure the operator should see
    UserError(UserError),
}

/// Fan-out publisher for [`AcquisitionEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<AcquisitionEvent>>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Register a new subscriber; it sees events published from now on
    pub fn subscribe(&self) -> Receiver<AcquisitionEvent> {
        let (tx, rx) = bounded(self.capacity);
        self.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Publish to every live subscriber without blocking
    pub fn publish(&self, event: AcquisitionEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Event subscriber queue full, dropping event");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Publish a user-visible failure
    pub fn user_error(&self, class: ErrorClass, message: impl Into<String>) {
        let error = UserError::new(class, message);
        tracing::error!("{}", error.message);
        self.publish(AcquisitionEvent::UserError(error));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<AcquisitionEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Drain everything currently queued on a subscription
pub fn drain(rx: &Receiver<AcquisitionEvent>) -> Vec<AcquisitionEvent> {
    rx.try_iter().collect()
}
