//! Variable registry
//!
//! Holds the descriptors found by the last discovery and the last known
//! value of each variable. A discovery replaces the whole set; it is never
//! merged with the previous one. Every replacement (and every clear) bumps a
//! generation counter so that values produced against an older set can be
//! recognized and dropped.

use crate::acquisition::events::{AcquisitionEvent, EventBus};
use crate::acquisition::session::SessionSlot;
use crate::acquisition::single_flight::SingleFlight;
use crate::backend::Transport;
use crate::error::{McuLinkError, Result};
use crate::types::VariableDescriptor;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct RegistryInner {
    generation: u64,
    variables: Vec<VariableDescriptor>,
    values: HashMap<u64, f64>,
}

/// Discovered variables and their last known values
pub struct VariableRegistry<T: Transport> {
    transport: Arc<T>,
    session: Arc<SessionSlot>,
    events: EventBus,
    discover_flight: SingleFlight,
    inner: RwLock<RegistryInner>,
}

impl<T: Transport> VariableRegistry<T> {
    pub fn new(transport: Arc<T>, session: Arc<SessionSlot>, events: EventBus) -> Self {
        Self {
            transport,
            session,
            events,
            discover_flight: SingleFlight::new("discover"),
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Discover the descriptor table at `address_hint`.
    ///
    /// Returns `Ok(None)` without doing anything when a discovery is already
    /// running. On success the variable set is replaced and every readable
    /// variable gets one seeding read; a failed seed leaves that value unset.
    pub async fn discover(&self, address_hint: u64) -> Result<Option<Vec<VariableDescriptor>>> {
        let Some(_flight) = self.discover_flight.try_begin() else {
            return Ok(None);
        };

        match self.discover_inner(address_hint).await {
            Ok(descriptors) => Ok(Some(descriptors)),
            Err(e) => {
                self.events.user_error(e.class(), e.to_string());
                Err(e)
            }
        }
    }

    async fn discover_inner(&self, address_hint: u64) -> Result<Vec<VariableDescriptor>> {
        let session_id = self
            .session
            .id()
            .ok_or_else(|| McuLinkError::Transport("Not connected to a target".to_string()))?;

        tracing::info!("Discovering variables at 0x{:08X}", address_hint);
        let descriptors = self
            .transport
            .discover_variables(address_hint)
            .await
            .map_err(|e| match e {
                McuLinkError::Discovery { .. } => e,
                other => McuLinkError::Discovery {
                    address: address_hint,
                    message: other.to_string(),
                },
            })?;

        if !self.session.is_current(session_id) {
            return Err(McuLinkError::Transport(
                "Session changed during discovery".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = descriptors.iter().find(|d| !seen.insert(d.address)) {
            return Err(McuLinkError::Discovery {
                address: address_hint,
                message: format!("duplicate variable address 0x{:08X}", dup.address),
            });
        }

        let generation = {
            let mut inner = self.write_lock();
            inner.generation += 1;
            inner.variables = descriptors.clone();
            inner.values.clear();
            inner.generation
        };

        for var in descriptors.iter().filter(|v| v.is_readable()) {
            match self.transport.read_variable(var.address, var.var_type).await {
                Ok(value) => {
                    self.record_value(generation, var.address, value);
                }
                Err(e) => {
                    tracing::warn!(
                        name = %var.name,
                        address = %format!("0x{:08X}", var.address),
                        "Initial read failed: {}",
                        e
                    );
                }
            }
        }

        tracing::info!(
            count = descriptors.len(),
            read_eligible = descriptors.iter().filter(|d| d.is_read_eligible()).count(),
            "Discovery complete"
        );
        self.events
            .publish(AcquisitionEvent::DiscoveryCompleted(descriptors.clone()));
        Ok(descriptors)
    }

    /// Write `value` to the variable at `address`.
    ///
    /// The cached value is updated as soon as the transport accepts the
    /// write, narrowed the same way the firmware will store it.
    pub async fn write(&self, address: u64, value: f64) -> Result<()> {
        let result = self.write_inner(address, value).await;
        if let Err(ref e) = result {
            self.events.user_error(e.class(), e.to_string());
        }
        result
    }

    async fn write_inner(&self, address: u64, value: f64) -> Result<()> {
        let (generation, descriptor) = {
            let inner = self.read();
            let descriptor = inner
                .variables
                .iter()
                .find(|v| v.address == address)
                .cloned()
                .ok_or_else(|| McuLinkError::Write {
                    address,
                    message: "unknown variable address".to_string(),
                })?;
            (inner.generation, descriptor)
        };

        if !descriptor.is_writable() {
            return Err(McuLinkError::Write {
                address,
                message: format!("{} is not read-write", descriptor.name),
            });
        }
        if !self.session.is_connected() {
            return Err(McuLinkError::Write {
                address,
                message: "not connected".to_string(),
            });
        }

        self.transport
            .write_variable(address, descriptor.var_type, value)
            .await
            .map_err(|e| match e {
                McuLinkError::Write { .. } => e,
                other => McuLinkError::Write {
                    address,
                    message: other.to_string(),
                },
            })?;

        let stored = descriptor
            .var_type
            .encode(value)
            .and_then(|bytes| descriptor.var_type.decode(&bytes))
            .unwrap_or(value);
        self.record_value(generation, address, stored);

        tracing::debug!(name = %descriptor.name, value = stored, "Wrote variable");
        self.events.publish(AcquisitionEvent::ValueWritten {
            address,
            value: stored,
        });
        Ok(())
    }

    /// Drop every descriptor and cached value
    pub fn clear(&self) {
        let mut inner = self.write_lock();
        inner.generation += 1;
        inner.variables.clear();
        inner.values.clear();
    }

    /// Store a value read under `generation`; stale generations are ignored
    pub(crate) fn record_value(&self, generation: u64, address: u64, value: f64) -> bool {
        let mut inner = self.write_lock();
        if inner.generation != generation || !inner.variables.iter().any(|v| v.address == address) {
            return false;
        }
        inner.values.insert(address, value);
        true
    }

    /// Current generation plus its read-eligible variables
    pub(crate) fn read_eligible_snapshot(&self) -> (u64, Vec<VariableDescriptor>) {
        let inner = self.read();
        let vars = inner
            .variables
            .iter()
            .filter(|v| v.is_read_eligible())
            .cloned()
            .collect();
        (inner.generation, vars)
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    pub fn variables(&self) -> Vec<VariableDescriptor> {
        self.read().variables.clone()
    }

    pub fn get(&self, address: u64) -> Option<VariableDescriptor> {
        self.read().variables.iter().find(|v| v.address == address).cloned()
    }

    /// Variables the polling engine samples
    pub fn read_eligible(&self) -> Vec<VariableDescriptor> {
        self.read_eligible_snapshot().1
    }

    /// Variables grouped by category label
    pub fn by_category(&self) -> BTreeMap<String, Vec<VariableDescriptor>> {
        let mut groups: BTreeMap<String, Vec<VariableDescriptor>> = BTreeMap::new();
        for var in self.read().variables.iter() {
            groups
                .entry(var.category_label().to_string())
                .or_default()
                .push(var.clone());
        }
        groups
    }

    pub fn value(&self, address: u64) -> Option<f64> {
        self.read().values.get(&address).copied()
    }

    pub fn values(&self) -> HashMap<u64, f64> {
        self.read().values.clone()
    }

    pub fn len(&self) -> usize {
        self.read().variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().variables.is_empty()
    }

    pub fn is_discovering(&self) -> bool {
        self.discover_flight.is_in_flight()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
