//! # MCU Link: live variable telemetry over a debug probe
//!
//! Attach to a microcontroller through a debug probe, discover the typed,
//! address-mapped variables the firmware publishes in its descriptor table,
//! and watch (or set) them in near real time.
//!
//! ## Architecture
//!
//! - **Backend**: The [`Transport`](backend::Transport) seam, with a probe-rs
//!   implementation for hardware and a scripted mock for tests and demos
//! - **Acquisition**: Connection lifecycle, variable registry, polling engine
//!   and bounded per-variable sample buffers
//! - **Frontend**: A thin eframe/egui viewer driven by acquisition events
//! - **Communication**: Crossbeam channels fan events out to any subscriber
//!
//! ## Configuration
//!
//! Settings (`config.toml`) and app state (`app_state.json`) live in the
//! platform data directory under `dev.mcu-link.mcu-link`.
//!
//! ## Example
//!
//! ```ignore
//! use mcu_link::{Acquisition, AppConfig, ConnectRequest, MockTransport, WindowSpec};
//! use std::time::Instant;
//!
//! let config = AppConfig::default();
//! let acquisition = Acquisition::new(MockTransport::demo(), &config.acquisition);
//! acquisition.start();
//!
//! acquisition.detect_probes().await?; // auto-connects and discovers
//! let samples = acquisition
//!     .poller()
//!     .project(0x2000_0104, &WindowSpec::count(100), Instant::now());
//! ```

pub mod acquisition;
pub mod backend;
pub mod config;
pub mod error;
pub mod frontend;
pub mod types;

// Re-export commonly used types
pub use acquisition::{
    Acquisition, AcquisitionEvent, ConnectRequest, ConnectionManager, EventBus, PollingEngine,
    RingBuffer, VariableRegistry, WindowSpec,
};
pub use backend::{MockTransport, ProbeRsTransport, Transport};
pub use config::{AppConfig, AppState};
pub use error::{McuLinkError, Result};
pub use frontend::McuLinkApp;
pub use types::{ConnectionState, Sample, Session, VarType, VariableDescriptor};
