//! Acquisition module: the telemetry pipeline
//!
//! This module turns a [`Transport`] into live, bounded sample series.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager ──session──> VariableRegistry ──eligible vars──> PollingEngine
//!        │                              │                                 │
//!        └──────────────── EventBus <───┴──────── RingBuffer per variable ┘
//!                                                        │
//!                                              window::project ──> viewer
//! ```
//!
//! # Components
//!
//! - [`ConnectionManager`] - Probe detection, connect with retry, disconnect
//! - [`VariableRegistry`] - Discovered descriptors and last known values
//! - [`PollingEngine`] - Periodic reads into per-variable [`RingBuffer`]s
//! - [`RttMonitor`] - RTT diagnostics on a fixed cadence
//! - [`EventBus`] - Fan-out of [`AcquisitionEvent`]s to any consumer
//! - [`window`] - Time or count window projection for display
//!
//! [`Acquisition`] wires them together around one shared session slot.

pub mod connection;
pub mod diagnostics;
pub mod events;
pub mod poller;
pub mod registry;
pub mod ring_buffer;
pub mod session;
pub mod single_flight;
pub mod window;

pub use connection::{ConnectPolicy, ConnectRequest, ConnectionManager};
pub use diagnostics::RttMonitor;
pub use events::{drain, AcquisitionEvent, EventBus, UserError};
pub use poller::{CycleReport, PollingEngine};
pub use registry::VariableRegistry;
pub use ring_buffer::RingBuffer;
pub use session::SessionSlot;
pub use single_flight::{FlightGuard, SingleFlight};
pub use window::{project, to_plot_points, WindowSpec};

use crate::backend::Transport;
use crate::config::AcquisitionConfig;
use crate::error::Result;
use crate::types::{ProbeDescriptor, Session, VariableDescriptor};
use crossbeam_channel::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// The assembled pipeline for one transport
pub struct Acquisition<T: Transport> {
    transport: Arc<T>,
    session: Arc<SessionSlot>,
    events: EventBus,
    registry: Arc<VariableRegistry<T>>,
    poller: Arc<PollingEngine<T>>,
    connection: ConnectionManager<T>,
    rtt: Arc<RttMonitor<T>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Transport> Acquisition<T> {
    pub fn new(transport: T, config: &AcquisitionConfig) -> Self {
        let transport = Arc::new(transport);
        let session = Arc::new(SessionSlot::new());
        let events = EventBus::default();

        let registry = Arc::new(VariableRegistry::new(
            Arc::clone(&transport),
            Arc::clone(&session),
            events.clone(),
        ));
        let poller = Arc::new(PollingEngine::new(
            Arc::clone(&transport),
            Arc::clone(&session),
            Arc::clone(&registry),
            events.clone(),
            config.poll_interval_ms,
            config.buffer_capacity,
        ));
        let connection = ConnectionManager::new(
            Arc::clone(&transport),
            Arc::clone(&session),
            Arc::clone(&registry),
            Arc::clone(&poller),
            events.clone(),
            ConnectPolicy::from(config),
        );
        let rtt = Arc::new(RttMonitor::new(
            Arc::clone(&transport),
            Arc::clone(&session),
            events.clone(),
            Duration::from_millis(config.rtt_status_interval_ms),
        ));

        Self {
            transport,
            session,
            events,
            registry,
            poller,
            connection,
            rtt,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the polling and RTT tasks on the current tokio runtime.
    ///
    /// Calling it again while the tasks run does nothing.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        if !tasks.is_empty() {
            return;
        }
        tasks.push(self.poller.spawn());
        tasks.push(self.rtt.spawn());
        tracing::debug!("Acquisition tasks started");
    }

    /// Abort the background tasks
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    pub async fn detect_probes(&self) -> Result<Option<Vec<ProbeDescriptor>>> {
        self.connection.detect_probes().await
    }

    pub async fn connect(&self, request: ConnectRequest) -> Result<Option<Session>> {
        self.connection.connect_with(request).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    /// Discover variables and wake the poller for the new set
    pub async fn discover(&self, address: u64) -> Result<Option<Vec<VariableDescriptor>>> {
        let result = self.registry.discover(address).await;
        if matches!(result, Ok(Some(_))) {
            self.poller.notify();
        }
        result
    }

    pub async fn write(&self, address: u64, value: f64) -> Result<()> {
        self.registry.write(address, value).await
    }

    pub fn subscribe(&self) -> Receiver<AcquisitionEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    pub fn registry(&self) -> &VariableRegistry<T> {
        &self.registry
    }

    pub fn poller(&self) -> &PollingEngine<T> {
        &self.poller
    }

    pub fn rtt(&self) -> &RttMonitor<T> {
        &self.rtt
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn session(&self) -> Option<Session> {
        self.session.session()
    }
}

impl<T: Transport> Drop for Acquisition<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
