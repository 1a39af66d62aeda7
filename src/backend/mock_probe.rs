//! Simulated transport for testing
//!
//! [`MockTransport`] behaves like a probe attached to a target running
//! firmware with a descriptor table. It keeps a small virtual memory map,
//! serves typed reads from per-address waveforms, and can be scripted to
//! fail connects, reads, detection or teardown. Every operation can be
//! delayed with a configurable latency (via `tokio::time`, so paused-clock
//! tests stay deterministic) and call counters are exposed for assertions.
//!
//! # Example
//!
//! ```ignore
//! use mcu_link::backend::{MockDataPattern, MockTransport};
//! use mcu_link::types::{AccessMode, VarType, VariableDescriptor};
//!
//! let transport = MockTransport::new()
//!     .with_probe("Mock ST-Link")
//!     .with_descriptor_table(
//!         0x080F_0000,
//!         vec![VariableDescriptor::new("temp", 0x2000_0000, VarType::F32, AccessMode::ReadOnly)],
//!     )
//!     .with_pattern(0x2000_0000, MockDataPattern::Constant(21.5));
//! ```

use crate::backend::descriptor::DescriptorTableBuilder;
use crate::backend::transport::{ProbeStats, Transport};
use crate::error::{McuLinkError, Result};
use crate::types::{
    AccessMode, AvailableTargets, ChipFamily, ChipVerification, ProbeDescriptor, RttStatus,
    Session, TransportKind, VarType, VariableDescriptor,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Chip name reported by the simulated target
pub const MOCK_CHIP: &str = "STM32H735ZGTx";

/// Where [`MockTransport::demo`] places its descriptor table
pub const DEMO_TABLE_ADDRESS: u64 = 0x080F_0000;

/// Pattern for generating mock data
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockDataPattern {
    /// Constant value
    Constant(f64),
    /// Sine wave with frequency and amplitude
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Counter that increments on every read
    Counter { step: f64, min: f64, max: f64 },
    /// Sawtooth wave
    Sawtooth { period: f64, amplitude: f64 },
    /// Square wave
    Square { period: f64, amplitude: f64 },
}

impl MockDataPattern {
    fn generate(&self, elapsed_secs: f64, counter: &mut f64) -> f64 {
        match *self {
            MockDataPattern::Constant(v) => v,
            MockDataPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * std::f64::consts::PI * frequency * elapsed_secs).sin(),
            MockDataPattern::Counter { step, min, max } => {
                *counter += step;
                if *counter > max {
                    *counter = min;
                } else if *counter < min {
                    *counter = max;
                }
                *counter
            }
            MockDataPattern::Sawtooth { period, amplitude } => {
                let t = elapsed_secs % period;
                amplitude * (t / period)
            }
            MockDataPattern::Square { period, amplitude } => {
                if elapsed_secs % period < period / 2.0 {
                    amplitude
                } else {
                    -amplitude
                }
            }
        }
    }
}

/// How scripted connect attempts fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectFailures {
    /// Every attempt succeeds
    #[default]
    None,
    /// The next `n` attempts fail, then attempts succeed
    Next(u32),
    /// Every attempt fails
    Always,
}

/// Sparse byte-addressed memory
#[derive(Debug, Default)]
struct MockMemory {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl MockMemory {
    fn region_for(&self, address: u64, len: usize) -> Option<(u64, &Vec<u8>)> {
        let (&base, bytes) = self.regions.range(..=address).next_back()?;
        let offset = (address - base) as usize;
        (offset + len <= bytes.len()).then_some((base, bytes))
    }

    fn read(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        let (base, bytes) = self.region_for(address, len)?;
        let offset = (address - base) as usize;
        Some(bytes[offset..offset + len].to_vec())
    }

    fn write(&mut self, address: u64, data: &[u8]) {
        let hit = self.region_for(address, data.len()).map(|(base, _)| base);
        match hit.and_then(|base| self.regions.get_mut(&base).map(|r| (base, r))) {
            Some((base, region)) => {
                let offset = (address - base) as usize;
                region[offset..offset + data.len()].copy_from_slice(data);
            }
            None => {
                self.regions.insert(address, data.to_vec());
            }
        }
    }
}

#[derive(Debug)]
struct MockState {
    probes: Vec<ProbeDescriptor>,
    connected: bool,
    detect_fails: bool,
    disconnect_fails: bool,
    connect_failures: ConnectFailures,
    memory: MockMemory,
    patterns: HashMap<u64, (MockDataPattern, f64)>,
    failing_reads: HashSet<u64>,
    rtt: RttStatus,
    stats: ProbeStats,
}

/// Simulated probe and target
#[derive(Debug)]
pub struct MockTransport {
    state: Mutex<MockState>,
    latency: Duration,
    connect_latency: Duration,
    started: Instant,
    detect_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    read_calls: AtomicUsize,
    write_calls: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A transport with no probes attached
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                probes: Vec::new(),
                connected: false,
                detect_fails: false,
                disconnect_fails: false,
                connect_failures: ConnectFailures::None,
                memory: MockMemory::default(),
                patterns: HashMap::new(),
                failing_reads: HashSet::new(),
                rtt: RttStatus::default(),
                stats: ProbeStats::default(),
            }),
            latency: Duration::ZERO,
            connect_latency: Duration::ZERO,
            started: Instant::now(),
            detect_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
        }
    }

    /// One probe, a descriptor table at [`DEMO_TABLE_ADDRESS`] and live waveforms
    pub fn demo() -> Self {
        Self::new()
            .with_probe("Mock ST-Link V3")
            .with_descriptor_table(
                DEMO_TABLE_ADDRESS,
                vec![
                    VariableDescriptor::new("led_button", 0x2000_0100, VarType::U8, AccessMode::ReadWrite)
                        .with_category("Controls")
                        .with_bounds(0.0, 1.0),
                    VariableDescriptor::new(
                        "temperature_sensor",
                        0x2000_0104,
                        VarType::F32,
                        AccessMode::ReadOnly,
                    )
                    .with_category("Sensors")
                    .with_bounds(-40.0, 85.0),
                    VariableDescriptor::new("adc_raw", 0x2000_0108, VarType::U16, AccessMode::ReadOnly)
                        .with_category("Sensors")
                        .with_bounds(0.0, 4095.0),
                    VariableDescriptor::new("tick_count", 0x2000_010C, VarType::U32, AccessMode::ReadOnly),
                    VariableDescriptor::new("motor_setpoint", 0x2000_0110, VarType::I16, AccessMode::ReadWrite)
                        .with_category("Controls")
                        .with_bounds(-1000.0, 1000.0),
                ],
            )
            .with_pattern(
                0x2000_0104,
                MockDataPattern::Sine {
                    frequency: 0.2,
                    amplitude: 3.0,
                    offset: 22.5,
                },
            )
            .with_pattern(
                0x2000_0108,
                MockDataPattern::Sawtooth {
                    period: 2.0,
                    amplitude: 4095.0,
                },
            )
            .with_pattern(
                0x2000_010C,
                MockDataPattern::Counter {
                    step: 1.0,
                    min: 0.0,
                    max: u32::MAX as f64,
                },
            )
            .with_rtt_status(RttStatus {
                enabled: true,
                channels_found: 2,
                control_block_addr: Some(0x2000_0000),
                up_channel_available: true,
                down_channel_available: true,
                bytes_read: 0,
                bytes_written: 0,
                last_activity: Some("RTT initialized".to_string()),
            })
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a probe with the given name
    pub fn with_probe(self, name: &str) -> Self {
        {
            let mut state = self.lock();
            let index = state.probes.len() as u16;
            state.probes.push(ProbeDescriptor {
                name: name.to_string(),
                vendor_id: 0x0483,
                product_id: 0x374E + index,
                serial_number: Some(format!("MOCK{:04}", index)),
                kind: "Mock".to_string(),
            });
        }
        self
    }

    /// Place a descriptor table image at `address` and zero every variable cell
    pub fn with_descriptor_table(self, address: u64, variables: Vec<VariableDescriptor>) -> Self {
        {
            let mut state = self.lock();
            for var in &variables {
                let size = var.var_type.size_bytes().max(1);
                state.memory.write(var.address, &vec![0u8; size]);
            }
            let image = DescriptorTableBuilder::new().entries(variables).build();
            state.memory.write(address, &image);
        }
        self
    }

    /// Serve reads at `address` from a waveform
    pub fn with_pattern(self, address: u64, pattern: MockDataPattern) -> Self {
        self.lock().patterns.insert(address, (pattern, 0.0));
        self
    }

    /// Store an initial value at `address`
    pub fn with_value(self, address: u64, var_type: VarType, value: f64) -> Self {
        if let Some(bytes) = var_type.encode(value) {
            self.lock().memory.write(address, &bytes);
        }
        self
    }

    /// Delay every operation except connect
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay each connect attempt
    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    pub fn with_connect_failures(self, failures: ConnectFailures) -> Self {
        self.set_connect_failures(failures);
        self
    }

    pub fn with_rtt_status(self, rtt: RttStatus) -> Self {
        self.lock().rtt = rtt;
        self
    }

    pub fn set_connect_failures(&self, failures: ConnectFailures) {
        self.lock().connect_failures = failures;
    }

    /// Make reads at `address` fail (or succeed again)
    pub fn set_read_failure(&self, address: u64, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing_reads.insert(address);
        } else {
            state.failing_reads.remove(&address);
        }
    }

    pub fn set_detect_failure(&self, failing: bool) {
        self.lock().detect_fails = failing;
    }

    pub fn set_disconnect_failure(&self, failing: bool) {
        self.lock().disconnect_fails = failing;
    }

    /// Raw memory contents, for asserting writes
    pub fn peek(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        self.lock().memory.read(address, len)
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn detect_calls(&self) -> usize {
        self.detect_calls.load(Ordering::SeqCst)
    }

    /// Number of connect attempts made
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self, latency: Duration) {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn require_connected(state: &MockState) -> Result<()> {
    if state.connected {
        Ok(())
    } else {
        Err(McuLinkError::Transport("Not connected to probe".to_string()))
    }
}

impl Transport for MockTransport {
    async fn detect_probes(&self) -> Result<Vec<ProbeDescriptor>> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        self.delay(self.latency).await;

        let state = self.lock();
        if state.detect_fails {
            return Err(McuLinkError::Transport("USB enumeration failed".to_string()));
        }
        Ok(state.probes.clone())
    }

    async fn connect(&self, probe_index: usize, target: Option<String>) -> Result<Session> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.delay(self.connect_latency).await;

        let mut state = self.lock();
        if probe_index >= state.probes.len() {
            return Err(McuLinkError::Transport(format!(
                "Invalid probe index {}",
                probe_index
            )));
        }

        let scripted = state.connect_failures;
        let fail = match scripted {
            ConnectFailures::None => false,
            ConnectFailures::Always => true,
            ConnectFailures::Next(0) => false,
            ConnectFailures::Next(n) => {
                state.connect_failures = ConnectFailures::Next(n - 1);
                true
            }
        };
        if fail {
            state.connected = false;
            return Err(McuLinkError::Transport(
                "Failed to attach to target: no response from target".to_string(),
            ));
        }

        state.connected = true;
        state.stats = ProbeStats::default();

        Ok(Session {
            target_name: MOCK_CHIP.to_string(),
            connected: true,
            chip_id: Some(MOCK_CHIP.to_string()),
            transport: if state.rtt.enabled {
                TransportKind::Hybrid
            } else {
                TransportKind::Memory
            },
            chip_verification: target.map(|t| ChipVerification::compare(t, MOCK_CHIP)),
        })
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.delay(self.latency).await;

        let mut state = self.lock();
        if state.disconnect_fails {
            return Err(McuLinkError::Transport("Probe refused to detach".to_string()));
        }
        state.connected = false;
        Ok(())
    }

    async fn discover_variables(&self, address: u64) -> Result<Vec<VariableDescriptor>> {
        self.delay(self.latency).await;

        let state = self.lock();
        require_connected(&state)?;
        crate::backend::descriptor::decode_table(address, |addr, len| {
            state
                .memory
                .read(addr, len)
                .ok_or_else(|| McuLinkError::Transport(format!("unmapped address 0x{:08X}", addr)))
        })
    }

    async fn read_variable(&self, address: u64, var_type: VarType) -> Result<f64> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.delay(self.latency).await;

        let elapsed = self.started.elapsed().as_secs_f64();
        let mut state = self.lock();
        require_connected(&state)?;

        if state.failing_reads.contains(&address) || !var_type.is_numeric() {
            state.stats.record_failure();
            return Err(McuLinkError::Read {
                address,
                message: format!("simulated fault reading {}", var_type),
            });
        }

        let value = if let Some((pattern, counter)) = state.patterns.get_mut(&address) {
            let raw = pattern.generate(elapsed, counter);
            var_type.encode(raw).and_then(|bytes| var_type.decode(&bytes))
        } else {
            state
                .memory
                .read(address, var_type.size_bytes())
                .and_then(|bytes| var_type.decode(&bytes))
        };

        match value {
            Some(v) => {
                state.stats.record_success(0, var_type.size_bytes() as u64);
                Ok(v)
            }
            None => {
                state.stats.record_failure();
                Err(McuLinkError::Read {
                    address,
                    message: "unmapped address".to_string(),
                })
            }
        }
    }

    async fn write_variable(&self, address: u64, var_type: VarType, value: f64) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        self.delay(self.latency).await;

        let mut state = self.lock();
        require_connected(&state)?;
        let bytes = var_type.encode(value).ok_or_else(|| McuLinkError::Write {
            address,
            message: format!("cannot encode {}", var_type),
        })?;
        state.patterns.remove(&address);
        state.memory.write(address, &bytes);
        state.rtt.bytes_written += bytes.len() as u64;
        Ok(())
    }

    async fn rtt_status(&self) -> Result<RttStatus> {
        self.delay(self.latency).await;

        let state = self.lock();
        require_connected(&state)?;
        Ok(state.rtt.clone())
    }

    async fn available_targets(&self) -> Result<AvailableTargets> {
        let families = vec![
            ChipFamily {
                name: "STM32F4 Series".to_string(),
                variants: vec!["STM32F407VGTx".to_string(), "STM32F411RETx".to_string()],
            },
            ChipFamily {
                name: "STM32H7 Series".to_string(),
                variants: vec![
                    "STM32H723ZGTx".to_string(),
                    MOCK_CHIP.to_string(),
                    "STM32H743ZITx".to_string(),
                ],
            },
        ];
        Ok(AvailableTargets {
            recommended: super::recommended_targets(&families),
            families,
        })
    }

    fn stats(&self) -> ProbeStats {
        self.lock().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_requires_probe() {
        let transport = MockTransport::new();
        assert!(transport.connect(0, None).await.is_err());

        let transport = transport.with_probe("Probe A");
        let session = transport.connect(0, None).await.unwrap();
        assert!(session.connected);
        assert_eq!(session.target_name, MOCK_CHIP);
        assert!(session.chip_verification.is_none());
        assert_eq!(transport.connect_calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let transport = MockTransport::new()
            .with_probe("Probe A")
            .with_connect_failures(ConnectFailures::Next(2));
        assert!(transport.connect(0, None).await.is_err());
        assert!(transport.connect(0, None).await.is_err());
        assert!(transport.connect(0, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_specific_target_verification() {
        let transport = MockTransport::new().with_probe("Probe A");
        let session = transport
            .connect(0, Some("STM32F407VGTx".to_string()))
            .await
            .unwrap();
        let verification = session.chip_verification.unwrap();
        assert!(!verification.matched);
        assert_eq!(verification.detected, MOCK_CHIP);
    }

    #[tokio::test]
    async fn test_demo_discovery_and_reads() {
        let transport = MockTransport::demo();
        transport.connect(0, None).await.unwrap();

        let vars = transport.discover_variables(DEMO_TABLE_ADDRESS).await.unwrap();
        assert_eq!(vars.len(), 5);
        assert_eq!(vars[1].name, "temperature_sensor");

        let temp = transport.read_variable(0x2000_0104, VarType::F32).await.unwrap();
        assert!((19.0..=26.0).contains(&temp));

        let first = transport.read_variable(0x2000_010C, VarType::U32).await.unwrap();
        let second = transport.read_variable(0x2000_010C, VarType::U32).await.unwrap();
        assert_eq!(second, first + 1.0);
    }

    #[tokio::test]
    async fn test_write_then_read_truncates() {
        let transport = MockTransport::demo();
        transport.connect(0, None).await.unwrap();

        transport.write_variable(0x2000_0110, VarType::I16, -12.9).await.unwrap();
        assert_eq!(transport.read_variable(0x2000_0110, VarType::I16).await.unwrap(), -12.0);
        assert_eq!(transport.peek(0x2000_0110, 2), Some((-12i16).to_le_bytes().to_vec()));
    }

    #[tokio::test]
    async fn test_read_failure_injection() {
        let transport = MockTransport::demo();
        transport.connect(0, None).await.unwrap();
        transport.set_read_failure(0x2000_0104, true);

        let err = transport.read_variable(0x2000_0104, VarType::F32).await.unwrap_err();
        assert!(matches!(err, McuLinkError::Read { address: 0x2000_0104, .. }));
        assert_eq!(transport.stats().failed_reads, 1);
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let transport = MockTransport::demo();
        assert!(transport.read_variable(0x2000_0104, VarType::F32).await.is_err());
        assert!(transport.discover_variables(DEMO_TABLE_ADDRESS).await.is_err());
        assert!(transport.rtt_status().await.is_err());
    }

    #[tokio::test]
    async fn test_available_targets_recommends_h7() {
        let targets = MockTransport::new().available_targets().await.unwrap();
        assert_eq!(targets.variant_count(), 5);
        assert!(targets.recommended.iter().all(|t| t.starts_with("STM32H7")));
    }
}
