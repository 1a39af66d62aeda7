//! Core data types for MCU Link
//!
//! This module contains the data model shared by the transport adapters,
//! the acquisition core and the viewer.
//!
//! # Main Types
//!
//! - [`VarType`] - Firmware value types and their byte codec
//! - [`VariableDescriptor`] - A named, typed, address-mapped firmware value
//! - [`ProbeDescriptor`] - Identity of a detected debug probe
//! - [`Session`] - The live connection to a target
//! - [`Sample`] - A single timestamped value
//!
//! # Value Widening
//!
//! Every value crosses the transport boundary as an `f64`. Reads widen the
//! firmware representation; writes narrow it again, truncating toward zero
//! (and saturating at the type bounds) for integer types.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Type of a firmware variable, using the descriptor table's type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarType {
    /// 8-bit unsigned integer (code 0)
    U8,
    /// 8-bit signed integer (code 1)
    I8,
    /// 16-bit unsigned integer (code 2)
    U16,
    /// 16-bit signed integer (code 3)
    I16,
    /// 32-bit unsigned integer (code 4)
    U32,
    /// 32-bit signed integer (code 5)
    I32,
    /// 32-bit IEEE float (code 6)
    F32,
    /// A type code this host does not understand; listed but never polled
    Raw(u8),
}

impl VarType {
    /// Numeric types, in type-code order
    pub const NUMERIC: [VarType; 7] = [
        VarType::U8,
        VarType::I8,
        VarType::U16,
        VarType::I16,
        VarType::U32,
        VarType::I32,
        VarType::F32,
    ];

    /// Decode a descriptor table type code
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => VarType::U8,
            1 => VarType::I8,
            2 => VarType::U16,
            3 => VarType::I16,
            4 => VarType::U32,
            5 => VarType::I32,
            6 => VarType::F32,
            other => VarType::Raw(other),
        }
    }

    /// The descriptor table type code
    pub fn code(&self) -> u8 {
        match self {
            VarType::U8 => 0,
            VarType::I8 => 1,
            VarType::U16 => 2,
            VarType::I16 => 3,
            VarType::U32 => 4,
            VarType::I32 => 5,
            VarType::F32 => 6,
            VarType::Raw(code) => *code,
        }
    }

    /// Returns the size in bytes of this variable type (0 when unknown)
    pub fn size_bytes(&self) -> usize {
        match self {
            VarType::U8 | VarType::I8 => 1,
            VarType::U16 | VarType::I16 => 2,
            VarType::U32 | VarType::I32 | VarType::F32 => 4,
            VarType::Raw(_) => 0,
        }
    }

    /// Whether values of this type can be read and plotted as numbers
    pub fn is_numeric(&self) -> bool {
        !matches!(self, VarType::Raw(_))
    }

    /// Parse little-endian bytes into a widened f64
    pub fn decode(&self, bytes: &[u8]) -> Option<f64> {
        if !self.is_numeric() || bytes.len() < self.size_bytes() {
            return None;
        }

        Some(match self {
            VarType::U8 => bytes[0] as f64,
            VarType::I8 => bytes[0] as i8 as f64,
            VarType::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            VarType::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            VarType::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            VarType::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            VarType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            VarType::Raw(_) => return None,
        })
    }

    /// Narrow an f64 into little-endian bytes.
    ///
    /// Integer targets truncate toward zero and saturate at the type bounds
    /// (`as` cast semantics); NaN becomes 0.
    pub fn encode(&self, value: f64) -> Option<Vec<u8>> {
        Some(match self {
            VarType::U8 => vec![value as u8],
            VarType::I8 => vec![value as i8 as u8],
            VarType::U16 => (value as u16).to_le_bytes().to_vec(),
            VarType::I16 => (value as i16).to_le_bytes().to_vec(),
            VarType::U32 => (value as u32).to_le_bytes().to_vec(),
            VarType::I32 => (value as i32).to_le_bytes().to_vec(),
            VarType::F32 => (value as f32).to_le_bytes().to_vec(),
            VarType::Raw(_) => return None,
        })
    }
}

impl std::fmt::Display for VarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarType::U8 => write!(f, "UINT8"),
            VarType::I8 => write!(f, "INT8"),
            VarType::U16 => write!(f, "UINT16"),
            VarType::I16 => write!(f, "INT16"),
            VarType::U32 => write!(f, "UINT32"),
            VarType::I32 => write!(f, "INT32"),
            VarType::F32 => write!(f, "FLOAT"),
            VarType::Raw(code) => write!(f, "RAW({})", code),
        }
    }
}

/// Access permission of a firmware variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AccessMode {
    /// Observed only; these are the variables the polling engine samples
    #[default]
    ReadOnly,
    /// Observed and writable by the operator
    ReadWrite,
}

impl AccessMode {
    /// Decode descriptor table access flags
    pub fn from_flags(flags: u8) -> Option<Self> {
        match flags {
            0 => Some(AccessMode::ReadOnly),
            1 => Some(AccessMode::ReadWrite),
            _ => None,
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, AccessMode::ReadWrite)
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::ReadOnly => write!(f, "RO"),
            AccessMode::ReadWrite => write!(f, "RW"),
        }
    }
}

/// Inclusive value range advertised by the firmware (used for sliders)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueBounds {
    pub min: f64,
    pub max: f64,
}

impl ValueBounds {
    /// Bounds are only meaningful when finite and ordered
    pub fn new(min: f64, max: f64) -> Option<Self> {
        (min.is_finite() && max.is_finite() && min < max).then_some(Self { min, max })
    }
}

/// Category used when a descriptor carries none
pub const DEFAULT_CATEGORY: &str = "Other";

/// A named, address-mapped firmware value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    /// Symbol name as exposed by the firmware
    pub name: String,
    /// Memory address; unique within one discovery result
    pub address: u64,
    /// Value type
    pub var_type: VarType,
    /// Access permission
    pub access: AccessMode,
    /// Optional grouping label
    pub category: Option<String>,
    /// Optional numeric bounds
    pub bounds: Option<ValueBounds>,
}

impl VariableDescriptor {
    /// Create a descriptor with no category and no bounds
    pub fn new(name: impl Into<String>, address: u64, var_type: VarType, access: AccessMode) -> Self {
        Self {
            name: name.into(),
            address,
            var_type,
            access,
            category: None,
            bounds: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.bounds = ValueBounds::new(min, max);
        self
    }

    /// Whether the value can be read at all (seeded on discovery)
    pub fn is_readable(&self) -> bool {
        self.var_type.is_numeric()
    }

    /// Whether the polling engine samples this variable
    pub fn is_read_eligible(&self) -> bool {
        self.access == AccessMode::ReadOnly && self.var_type.is_numeric()
    }

    /// Whether the operator may write this variable
    pub fn is_writable(&self) -> bool {
        self.access.is_writable() && self.var_type.is_numeric()
    }

    /// Category label, falling back to [`DEFAULT_CATEGORY`]
    pub fn category_label(&self) -> &str {
        self.category.as_deref().unwrap_or(DEFAULT_CATEGORY)
    }
}

/// Information about a detected probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeDescriptor {
    /// Human readable probe name
    pub name: String,
    /// Vendor ID
    pub vendor_id: u16,
    /// Product ID
    pub product_id: u16,
    /// Serial number (if available)
    pub serial_number: Option<String>,
    /// Probe kind (ST-Link, J-Link, CMSIS-DAP, ...)
    pub kind: String,
}

impl std::fmt::Display for ProbeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref serial) = self.serial_number {
            write!(
                f,
                "{} ({:04x}:{:04x}) - {}",
                self.name, self.vendor_id, self.product_id, serial
            )
        } else {
            write!(f, "{} ({:04x}:{:04x})", self.name, self.vendor_id, self.product_id)
        }
    }
}

/// How values travel between host and target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TransportKind {
    /// Plain memory access over SWD
    #[default]
    Memory,
    /// RTT channels only
    Rtt,
    /// RTT for streaming, memory access for everything else
    Hybrid,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Memory => write!(f, "Memory"),
            TransportKind::Rtt => write!(f, "RTT"),
            TransportKind::Hybrid => write!(f, "Hybrid"),
        }
    }
}

/// Result of comparing the requested chip with the one actually attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipVerification {
    pub expected: String,
    pub detected: String,
    pub matched: bool,
}

impl ChipVerification {
    /// Compare chip names case-insensitively, accepting a requested prefix
    /// (`STM32F407` matches `STM32F407VGTx`)
    pub fn compare(expected: impl Into<String>, detected: impl Into<String>) -> Self {
        let expected = expected.into();
        let detected = detected.into();
        let matched = detected
            .to_ascii_lowercase()
            .starts_with(&expected.to_ascii_lowercase());
        Self {
            expected,
            detected,
            matched,
        }
    }
}

/// The live connection to a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Target name as reported by the transport
    pub target_name: String,
    /// Whether the link is up
    pub connected: bool,
    /// Chip identifier, if the transport could read one
    pub chip_id: Option<String>,
    /// How values are transferred
    pub transport: TransportKind,
    /// Chip verification, when a specific target was requested
    pub chip_verification: Option<ChipVerification>,
}

/// Identity of a live session; a new one is issued on every successful connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session
    #[default]
    Idle,
    /// A connect retry loop is running
    Connecting,
    /// A session is live
    Connected,
    /// Teardown in progress
    Disconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "Idle"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnecting => write!(f, "Disconnecting..."),
        }
    }
}

/// A single timestamped value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: Instant,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: Instant, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Seconds between this sample and `now` (negative for samples in the past)
    pub fn seconds_relative_to(&self, now: Instant) -> f64 {
        match now.checked_duration_since(self.timestamp) {
            Some(age) => -age.as_secs_f64(),
            None => self.timestamp.duration_since(now).as_secs_f64(),
        }
    }
}

/// RTT diagnostics reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RttStatus {
    pub enabled: bool,
    pub channels_found: u32,
    pub control_block_addr: Option<u64>,
    pub up_channel_available: bool,
    pub down_channel_available: bool,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub last_activity: Option<String>,
}

/// A chip family and its variant names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipFamily {
    pub name: String,
    pub variants: Vec<String>,
}

/// Targets offered for manual selection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AvailableTargets {
    pub families: Vec<ChipFamily>,
    pub recommended: Vec<String>,
}

impl AvailableTargets {
    /// Total number of selectable variants
    pub fn variant_count(&self) -> usize {
        self.families.iter().map(|f| f.variants.len()).sum()
    }
}
