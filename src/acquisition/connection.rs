//! Connection lifecycle manager
//!
//! Owns probe detection, connect with retry, disconnect, and the
//! auto-connect-once policy. Detection and connect are guarded by
//! independent single-flight flags: a second call while one is running
//! returns `Ok(None)` immediately and performs no I/O.
//!
//! ```text
//! Idle ──connect──> Connecting ──ok──> Connected ──disconnect──> Disconnecting ──> Idle
//!                        └──exhausted──> Idle
//! ```
//!
//! Detection runs beside this state machine and is observable through
//! [`ConnectionManager::is_detecting`].

use crate::acquisition::events::{AcquisitionEvent, EventBus};
use crate::acquisition::poller::PollingEngine;
use crate::acquisition::registry::VariableRegistry;
use crate::acquisition::session::SessionSlot;
use crate::acquisition::single_flight::SingleFlight;
use crate::backend::Transport;
use crate::config::AcquisitionConfig;
use crate::error::{McuLinkError, Result};
use crate::types::{ConnectionState, ProbeDescriptor, Session};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Retry and follow-up behavior for connects
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectPolicy {
    pub max_attempts: u32,
    /// Fixed pause between failed attempts
    pub retry_delay: Duration,
    /// Descriptor table to discover right after a successful connect
    pub auto_discover: Option<u64>,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            auto_discover: None,
        }
    }
}

impl From<&AcquisitionConfig> for ConnectPolicy {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            max_attempts: config.max_connect_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            auto_discover: config
                .auto_discover
                .then_some(config.descriptor_address),
        }
    }
}

/// Parameters of one connect call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub probe_index: usize,
    /// Attach to this target instead of the configured one
    pub target: Option<String>,
    /// Operator initiated; failures are always surfaced
    pub manual: bool,
    /// Overrides the policy's attempt count
    pub max_attempts: Option<u32>,
}

impl ConnectRequest {
    pub fn new(probe_index: usize) -> Self {
        Self {
            probe_index,
            target: None,
            manual: false,
            max_attempts: None,
        }
    }

    pub fn manual(mut self, manual: bool) -> Self {
        self.manual = manual;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }
}

/// Drives detect/connect/disconnect and gates the rest of the pipeline
pub struct ConnectionManager<T: Transport> {
    transport: Arc<T>,
    session: Arc<SessionSlot>,
    registry: Arc<VariableRegistry<T>>,
    poller: Arc<PollingEngine<T>>,
    events: EventBus,
    policy: ConnectPolicy,
    detect_flight: SingleFlight,
    connect_flight: SingleFlight,
    state: Mutex<ConnectionState>,
    probes: RwLock<Vec<ProbeDescriptor>>,
    auto_connect_attempted: AtomicBool,
    initial_connect: AtomicBool,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(
        transport: Arc<T>,
        session: Arc<SessionSlot>,
        registry: Arc<VariableRegistry<T>>,
        poller: Arc<PollingEngine<T>>,
        events: EventBus,
        policy: ConnectPolicy,
    ) -> Self {
        Self {
            transport,
            session,
            registry,
            poller,
            events,
            policy,
            detect_flight: SingleFlight::new("detect"),
            connect_flight: SingleFlight::new("connect"),
            state: Mutex::new(ConnectionState::Idle),
            probes: RwLock::new(Vec::new()),
            auto_connect_attempted: AtomicBool::new(false),
            initial_connect: AtomicBool::new(true),
        }
    }

    /// Enumerate probes and replace the probe list.
    ///
    /// The first successful detection that finds at least one probe while
    /// no session exists also makes the process's single automatic connect
    /// attempt, to probe 0. A detection that races another connect leaves
    /// that attempt for a later detection.
    /// The outcome of that connect does not affect this call's result.
    pub async fn detect_probes(&self) -> Result<Option<Vec<ProbeDescriptor>>> {
        let Some(flight) = self.detect_flight.try_begin() else {
            tracing::debug!("Probe detection already in flight, ignoring");
            return Ok(None);
        };

        let result = self.transport.detect_probes().await;
        drop(flight);

        let probes = match result {
            Ok(probes) => probes,
            Err(e) => {
                self.events
                    .user_error(e.class(), format!("Failed to detect probes: {}", e));
                return Err(e);
            }
        };

        tracing::info!(count = probes.len(), "Detected probes");
        *self.probes.write().unwrap_or_else(|p| p.into_inner()) = probes.clone();
        self.events
            .publish(AcquisitionEvent::ProbesDetected(probes.clone()));

        if !probes.is_empty()
            && self.session.id().is_none()
            && !self.auto_connect_attempted.swap(true, Ordering::SeqCst)
        {
            tracing::info!(probe = %probes[0].name, "Auto-connecting to first probe");
            match self.connect(0, false).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    // Another connect held the flight; the automatic one is still owed
                    self.auto_connect_attempted.store(false, Ordering::SeqCst);
                    tracing::debug!("Connect already in flight, automatic connect deferred");
                }
                Err(e) => tracing::debug!("Automatic connect did not succeed: {}", e),
            }
        }

        Ok(Some(probes))
    }

    /// Connect to `probe_index` with the policy's attempt count
    pub async fn connect(&self, probe_index: usize, manual: bool) -> Result<Option<Session>> {
        self.connect_with(ConnectRequest::new(probe_index).manual(manual))
            .await
    }

    /// Connect with retry.
    ///
    /// Returns `Ok(None)` when a connect is already in flight. Attempts are
    /// separated by the policy's fixed delay; there is no delay after the
    /// final attempt. A failed connect leaves no session behind.
    pub async fn connect_with(&self, request: ConnectRequest) -> Result<Option<Session>> {
        let Some(_flight) = self.connect_flight.try_begin() else {
            tracing::debug!("Connect already in flight, ignoring");
            return Ok(None);
        };
        let initial = self.initial_connect.swap(false, Ordering::SeqCst);
        let max_attempts = request
            .max_attempts
            .unwrap_or(self.policy.max_attempts)
            .max(1);

        if self.session.id().is_some() {
            // Reconnect: nothing collected under the old session survives
            self.poller.stop();
            self.registry.clear();
        }
        self.set_state(ConnectionState::Connecting);

        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            tracing::info!(
                probe_index = request.probe_index,
                attempt,
                max_attempts,
                "Connecting"
            );
            match self
                .transport
                .connect(request.probe_index, request.target.clone())
                .await
            {
                Ok(session) => return Ok(Some(self.on_connected(session).await)),
                Err(e) => {
                    tracing::warn!(attempt, max_attempts, "Connect attempt failed: {}", e);
                    last_error = e.to_string();
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        if self.session.clear().is_some() {
            self.events.publish(AcquisitionEvent::ConnectionChanged(None));
        }
        self.set_state(ConnectionState::Idle);

        let error = McuLinkError::Connect {
            attempts: max_attempts,
            last_error,
        };
        if request.manual || !initial {
            self.events.user_error(error.class(), error.to_string());
        } else {
            tracing::info!("Initial automatic connect failed quietly: {}", error);
        }
        Err(error)
    }

    async fn on_connected(&self, session: Session) -> Session {
        if let Some(verification) = &session.chip_verification {
            if !verification.matched {
                tracing::warn!(
                    expected = %verification.expected,
                    detected = %verification.detected,
                    "Attached chip does not match the requested target"
                );
            }
        }

        let id = self.session.install(session.clone());
        self.registry.clear();
        self.poller.start();
        self.set_state(ConnectionState::Connected);
        tracing::info!(chip = %session.target_name, session = id.0, "Connected");
        self.events
            .publish(AcquisitionEvent::ConnectionChanged(Some(session.clone())));

        if let Some(address) = self.policy.auto_discover {
            match self.registry.discover(address).await {
                Ok(Some(vars)) => {
                    tracing::debug!(count = vars.len(), "Auto-discovery complete");
                    self.poller.notify();
                }
                Ok(None) => {}
                Err(e) => tracing::debug!("Auto-discovery failed: {}", e),
            }
        }
        session
    }

    /// Tear down the session.
    ///
    /// Scheduling halts before the transport is asked to detach. Buffers and
    /// the registry are discarded only once it has, before the session is
    /// released. If the transport refuses the teardown the session, its
    /// series and its values stay up and polling resumes.
    pub async fn disconnect(&self) -> Result<()> {
        if self.connect_flight.is_in_flight() {
            let error = McuLinkError::transport("cannot disconnect while a connect is in progress");
            self.events.user_error(error.class(), error.to_string());
            return Err(error);
        }
        {
            let mut state = self.lock_state();
            match *state {
                ConnectionState::Disconnecting => return Ok(()),
                ConnectionState::Idle if self.session.id().is_none() => return Ok(()),
                _ => *state = ConnectionState::Disconnecting,
            }
        }
        self.events
            .publish(AcquisitionEvent::StateChanged(ConnectionState::Disconnecting));
        self.poller.halt();

        if let Err(e) = self.transport.disconnect().await {
            self.poller.start();
            self.set_state(ConnectionState::Connected);
            let error = McuLinkError::transport(format!("Failed to disconnect: {}", e));
            self.events.user_error(error.class(), error.to_string());
            return Err(error);
        }

        self.poller.stop();
        self.registry.clear();
        self.session.clear();
        self.set_state(ConnectionState::Idle);
        tracing::info!("Disconnected");
        self.events.publish(AcquisitionEvent::ConnectionChanged(None));
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        *self.lock_state()
    }

    pub fn is_detecting(&self) -> bool {
        self.detect_flight.is_in_flight()
    }

    pub fn is_connecting(&self) -> bool {
        self.connect_flight.is_in_flight()
    }

    /// Probes found by the last successful detection
    pub fn probes(&self) -> Vec<ProbeDescriptor> {
        self.probes.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.session.session()
    }

    pub fn policy(&self) -> &ConnectPolicy {
        &self.policy
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.lock_state();
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            tracing::debug!(state = %next, "Connection state changed");
            self.events.publish(AcquisitionEvent::StateChanged(next));
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}
