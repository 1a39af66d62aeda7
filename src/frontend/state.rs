//! View state and action types for the frontend
//!
//! The viewer never touches the acquisition core directly from a panel.
//! Panels read [`ViewState`] and return [`AppAction`]s; the app turns actions
//! into tasks on the tokio runtime and folds the resulting
//! [`AcquisitionEvent`]s back into the view state.

use crate::acquisition::{AcquisitionEvent, UserError, WindowSpec};
use crate::types::{
    AvailableTargets, ConnectionState, ProbeDescriptor, RttStatus, Session, VariableDescriptor,
};
use std::collections::{HashMap, VecDeque};

/// Maximum number of errors kept in the log
pub const MAX_ERROR_LOG: usize = 50;

/// Actions that any panel can emit
#[derive(Debug, Clone, PartialEq)]
pub enum AppAction {
    RefreshProbes,
    Connect {
        probe_index: usize,
        target: Option<String>,
    },
    Disconnect,
    Discover,
    /// Fetch chip families for manual target selection
    LoadTargets,
    Write {
        address: u64,
        value: f64,
    },
    SetRate(u64),
    Pause,
    Resume,
    ClearBuffers,
    SetWindow(WindowSpec),
    ClearErrors,
}

/// Everything the panels render from
#[derive(Debug, Default)]
pub struct ViewState {
    pub probes: Vec<ProbeDescriptor>,
    pub selected_probe: usize,
    pub connection: ConnectionState,
    pub session: Option<Session>,
    pub variables: Vec<VariableDescriptor>,
    /// Slider positions for read-write variables
    pub pending_writes: HashMap<u64, f64>,
    pub interval_ms: u64,
    pub paused: bool,
    pub window: WindowSpec,
    pub rtt: Option<RttStatus>,
    pub targets: Option<AvailableTargets>,
    pub selected_target: Option<String>,
    pub errors: VecDeque<UserError>,
}

impl ViewState {
    pub fn new(interval_ms: u64, window: WindowSpec) -> Self {
        Self {
            interval_ms,
            window,
            ..Default::default()
        }
    }

    /// Fold one event into the view
    pub fn apply(&mut self, event: AcquisitionEvent) {
        match event {
            AcquisitionEvent::ProbesDetected(probes) => {
                if self.selected_probe >= probes.len() {
                    self.selected_probe = 0;
                }
                self.probes = probes;
            }
            AcquisitionEvent::StateChanged(state) => self.connection = state,
            AcquisitionEvent::ConnectionChanged(session) => {
                if session.is_none() {
                    self.variables.clear();
                    self.pending_writes.clear();
                    self.rtt = None;
                }
                self.session = session;
            }
            AcquisitionEvent::DiscoveryCompleted(variables) => {
                self.pending_writes.clear();
                self.variables = variables;
            }
            AcquisitionEvent::ValueWritten { address, value } => {
                self.pending_writes.insert(address, value);
            }
            AcquisitionEvent::RateChanged { interval_ms } => self.interval_ms = interval_ms,
            AcquisitionEvent::PollingPaused => self.paused = true,
            AcquisitionEvent::PollingResumed => self.paused = false,
            AcquisitionEvent::BuffersCleared => {}
            AcquisitionEvent::RttStatus(status) => self.rtt = status,
            AcquisitionEvent::UserError(error) => {
                self.errors.push_back(error);
                while self.errors.len() > MAX_ERROR_LOG {
                    self.errors.pop_front();
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// Read-only numeric variables, the ones that get a plot
    pub fn plotted_variables(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.variables.iter().filter(|v| v.is_read_eligible())
    }
}
