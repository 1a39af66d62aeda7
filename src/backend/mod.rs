//! Backend module: the probe command interface
//!
//! The acquisition core talks to hardware only through the [`Transport`]
//! trait. This module defines that seam and its implementations.
//!
//! # Components
//!
//! - [`Transport`] - Async command interface (detect, connect, discover, read, write, ...)
//! - [`ProbeRsTransport`] - probe-rs backed transport for real hardware
//! - [`MockTransport`] - Simulated probe and firmware for tests and demos
//! - [`descriptor`] - Decoder for the firmware's variable descriptor table
//!
//! # Example
//!
//! ```ignore
//! use mcu_link::backend::{MockTransport, Transport};
//!
//! let transport = MockTransport::demo();
//! let probes = transport.detect_probes().await?;
//! let session = transport.connect(0, None).await?;
//! let vars = transport.discover_variables(0x080F_0000).await?;
//! ```

pub mod descriptor;
pub mod mock_probe;
pub mod probe;
pub mod transport;

pub use descriptor::{decode_table, DescriptorTableBuilder};
pub use mock_probe::{ConnectFailures, MockDataPattern, MockTransport};
pub use probe::ProbeRsTransport;
pub use transport::{ProbeStats, Transport};

use crate::types::ChipFamily;

/// Family whose variants are suggested first in target selection
pub const RECOMMENDED_FAMILY: &str = "STM32H7";

/// Maximum number of recommended targets
const MAX_RECOMMENDED: usize = 8;

/// Variants of the recommended family, in registry order
pub fn recommended_targets(families: &[ChipFamily]) -> Vec<String> {
    families
        .iter()
        .filter(|family| family.name.contains(RECOMMENDED_FAMILY))
        .flat_map(|family| family.variants.iter().cloned())
        .take(MAX_RECOMMENDED)
        .collect()
}
