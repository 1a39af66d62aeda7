//! Probe-RS transport for SWD communication
//!
//! This module provides the hardware [`Transport`] on top of probe-rs. It
//! handles probe enumeration, attaching to a target, descriptor discovery,
//! and typed memory access.
//!
//! probe-rs is a blocking API, so every call runs on tokio's blocking pool
//! while the session itself lives behind a mutex shared with those tasks.
//!
//! # Supported Probes
//!
//! Any probe supported by probe-rs, including:
//! - ST-Link (V2, V2-1, V3)
//! - J-Link
//! - CMSIS-DAP compatible probes
//! - Raspberry Pi Pico (picoprobe)
//!
//! # Example
//!
//! ```ignore
//! use mcu_link::backend::{ProbeRsTransport, Transport};
//! use mcu_link::config::ProbeConfig;
//!
//! let transport = ProbeRsTransport::new(ProbeConfig::default());
//! let probes = transport.detect_probes().await?;
//! let session = transport.connect(0, None).await?;
//! let value = transport.read_variable(0x2000_0104, VarType::F32).await?;
//! ```

use crate::backend::descriptor::decode_table;
use crate::backend::transport::{ProbeStats, Transport};
use crate::config::{ProbeConfig, ProbeProtocol};
use crate::error::{McuLinkError, Result};
use crate::types::{
    AvailableTargets, ChipFamily, ChipVerification, ProbeDescriptor, RttStatus, Session,
    TransportKind, VarType, VariableDescriptor,
};
use probe_rs::{probe::list::Lister, MemoryInterface, Permissions};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// RTT channel used by the firmware library
const RTT_CHANNEL_MCULINK: usize = 0;

/// Chip families offered for manual selection. Entries the installed
/// probe-rs registry does not know are filtered out at runtime.
const KNOWN_FAMILIES: &[(&str, &[&str])] = &[
    ("STM32F1 Series", &["STM32F103C8Tx", "STM32F103RBTx"]),
    ("STM32F4 Series", &["STM32F401RETx", "STM32F407VGTx", "STM32F411RETx", "STM32F446RETx"]),
    ("STM32G4 Series", &["STM32G431CBUx", "STM32G474RETx"]),
    (
        "STM32H7 Series",
        &[
            "STM32H723ZGTx",
            "STM32H735ZGTx",
            "STM32H743ZITx",
            "STM32H750VBTx",
        ],
    ),
    ("nRF52 Series", &["nRF52832_xxAA", "nRF52840_xxAA"]),
    ("RP2040", &["RP2040"]),
];

struct ProbeInner {
    session: Option<probe_rs::Session>,
    rtt: RttStatus,
    stats: ProbeStats,
}

/// Hardware transport backed by probe-rs
pub struct ProbeRsTransport {
    inner: Arc<Mutex<ProbeInner>>,
    config: ProbeConfig,
}

impl ProbeRsTransport {
    /// Create a new transport with the given configuration
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProbeInner {
                session: None,
                rtt: RttStatus::default(),
                stats: ProbeStats::default(),
            })),
            config,
        }
    }

    /// Get current configuration
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Run `f` against the shared probe state on the blocking pool
    async fn blocking<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut ProbeInner) -> Result<R> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| McuLinkError::transport("probe state lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| McuLinkError::Transport(format!("probe task failed: {}", e)))?
    }
}

fn session_mut(inner: &mut ProbeInner) -> Result<&mut probe_rs::Session> {
    inner
        .session
        .as_mut()
        .ok_or_else(|| McuLinkError::Transport("Not connected to probe".to_string()))
}

fn list_probes() -> Vec<ProbeDescriptor> {
    Lister::new()
        .list_all()
        .into_iter()
        .map(|probe| ProbeDescriptor {
            name: probe.identifier.clone(),
            vendor_id: probe.vendor_id,
            product_id: probe.product_id,
            serial_number: probe.serial_number.clone(),
            kind: probe.probe_type().to_string(),
        })
        .collect()
}

/// Look for an RTT control block and summarize what was found
fn probe_rtt(session: &mut probe_rs::Session) -> RttStatus {
    let mut core = match session.core(0) {
        Ok(core) => core,
        Err(e) => {
            tracing::debug!("RTT: core unavailable: {}", e);
            return RttStatus::default();
        }
    };

    match probe_rs::rtt::Rtt::attach(&mut core) {
        Ok(mut rtt) => {
            let up = rtt.up_channels().len();
            let down = rtt.down_channels().len();
            let status = RttStatus {
                enabled: true,
                channels_found: (up + down) as u32,
                control_block_addr: Some(rtt.ptr() as u64),
                up_channel_available: up > RTT_CHANNEL_MCULINK,
                down_channel_available: down > RTT_CHANNEL_MCULINK,
                bytes_read: 0,
                bytes_written: 0,
                last_activity: Some("RTT initialized".to_string()),
            };
            tracing::info!(
                channels = status.channels_found,
                "RTT control block found at 0x{:08X}",
                rtt.ptr() as u64
            );
            status
        }
        Err(e) => {
            tracing::debug!("RTT: no control block: {}", e);
            RttStatus::default()
        }
    }
}

impl Transport for ProbeRsTransport {
    async fn detect_probes(&self) -> Result<Vec<ProbeDescriptor>> {
        let probes = tokio::task::spawn_blocking(list_probes)
            .await
            .map_err(|e| McuLinkError::Transport(format!("probe enumeration failed: {}", e)))?;
        tracing::debug!("Found {} probe(s)", probes.len());
        Ok(probes)
    }

    async fn connect(&self, probe_index: usize, target: Option<String>) -> Result<Session> {
        let config = self.config.clone();
        self.blocking(move |inner| {
            // Drop any previous session before opening the probe again
            inner.session = None;
            inner.rtt = RttStatus::default();

            let probes = Lister::new().list_all();
            let info = probes.get(probe_index).ok_or_else(|| {
                McuLinkError::Transport(format!(
                    "Invalid probe index {} ({} probe(s) attached)",
                    probe_index,
                    probes.len()
                ))
            })?;

            let mut probe = info.open()?;
            if let Err(e) = probe.set_speed(config.speed_khz) {
                tracing::warn!("Failed to set probe speed: {}", e);
            }
            let protocol = match config.protocol {
                ProbeProtocol::Swd => probe_rs::probe::WireProtocol::Swd,
                ProbeProtocol::Jtag => probe_rs::probe::WireProtocol::Jtag,
            };
            probe.select_protocol(protocol)?;

            let chip = target.clone().unwrap_or_else(|| config.target_chip.clone());
            let target_def = probe_rs::config::Registry::from_builtin_families().get_target_by_name(&chip)?;
            tracing::info!(
                chip = %chip,
                speed_khz = config.speed_khz,
                under_reset = config.connect_under_reset,
                "Attaching to target"
            );
            let mut session = if config.connect_under_reset {
                probe.attach_under_reset(target_def, Permissions::default())?
            } else {
                probe.attach(target_def, Permissions::default())?
            };

            let detected = session.target().name.clone();
            let rtt = probe_rtt(&mut session);
            let transport = if rtt.enabled {
                TransportKind::Hybrid
            } else {
                TransportKind::Memory
            };

            inner.rtt = rtt;
            inner.stats = ProbeStats::default();
            inner.session = Some(session);

            Ok(Session {
                target_name: detected.clone(),
                connected: true,
                chip_id: Some(detected.clone()),
                transport,
                chip_verification: target.map(|t| ChipVerification::compare(t, detected)),
            })
        })
        .await
    }

    async fn disconnect(&self) -> Result<()> {
        self.blocking(|inner| {
            if inner.session.take().is_some() {
                tracing::info!("Disconnected from probe");
            }
            inner.rtt = RttStatus::default();
            Ok(())
        })
        .await
    }

    async fn discover_variables(&self, address: u64) -> Result<Vec<VariableDescriptor>> {
        self.blocking(move |inner| {
            let session = session_mut(inner)?;
            let mut core = session.core(0)?;
            decode_table(address, |addr, len| {
                let mut buf = vec![0u8; len];
                core.read(addr, &mut buf)?;
                Ok(buf)
            })
        })
        .await
    }

    async fn read_variable(&self, address: u64, var_type: VarType) -> Result<f64> {
        self.blocking(move |inner| {
            let size = var_type.size_bytes();
            if size == 0 {
                return Err(McuLinkError::Read {
                    address,
                    message: format!("cannot read {} values", var_type),
                });
            }

            let mut buf = vec![0u8; size];
            let start = Instant::now();
            let result = {
                let session = session_mut(inner)?;
                let mut core = session.core(0)?;
                core.read(address, &mut buf)
            };

            match result {
                Ok(()) => {
                    inner
                        .stats
                        .record_success(start.elapsed().as_micros() as u64, size as u64);
                    var_type.decode(&buf).ok_or_else(|| McuLinkError::Read {
                        address,
                        message: "failed to decode value".to_string(),
                    })
                }
                Err(e) => {
                    inner.stats.record_failure();
                    Err(McuLinkError::Read {
                        address,
                        message: e.to_string(),
                    })
                }
            }
        })
        .await
    }

    async fn write_variable(&self, address: u64, var_type: VarType, value: f64) -> Result<()> {
        self.blocking(move |inner| {
            let bytes = var_type.encode(value).ok_or_else(|| McuLinkError::Write {
                address,
                message: format!("cannot write {} values", var_type),
            })?;
            {
                let session = session_mut(inner)?;
                let mut core = session.core(0)?;
                core.write_8(address, &bytes).map_err(|e| McuLinkError::Write {
                    address,
                    message: e.to_string(),
                })?;
            }
            inner.rtt.bytes_written += bytes.len() as u64;
            Ok(())
        })
        .await
    }

    async fn rtt_status(&self) -> Result<RttStatus> {
        self.blocking(|inner| {
            session_mut(inner)?;
            Ok(inner.rtt.clone())
        })
        .await
    }

    async fn available_targets(&self) -> Result<AvailableTargets> {
        let families = tokio::task::spawn_blocking(|| {
            KNOWN_FAMILIES
                .iter()
                .filter_map(|(family, variants)| {
                    let variants: Vec<String> = variants
                        .iter()
                        .filter(|name| probe_rs::config::Registry::from_builtin_families().get_target_by_name(name).is_ok())
                        .map(|name| name.to_string())
                        .collect();
                    (!variants.is_empty()).then(|| ChipFamily {
                        name: family.to_string(),
                        variants,
                    })
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| McuLinkError::Transport(format!("target lookup failed: {}", e)))?;

        Ok(AvailableTargets {
            recommended: super::recommended_targets(&families),
            families,
        })
    }

    fn stats(&self) -> ProbeStats {
        self.inner
            .lock()
            .map(|inner| inner.stats.clone())
            .unwrap_or_default()
    }
}
