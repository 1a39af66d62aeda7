//! Polling engine
//!
//! Periodically reads every read-eligible variable (read-only, numeric) and
//! appends the results to that variable's [`RingBuffer`].
//!
//! # Scheduling
//!
//! A single task drives the cycles, so a cycle never starts while the
//! previous one still has reads outstanding. With a positive interval the
//! start of one cycle and the start of the next are at least that far apart;
//! with an interval of zero cycles run back to back, yielding to the
//! scheduler in between.
//!
//! # Invalidation
//!
//! Buffers carry an epoch that is bumped by every rate change and by
//! [`PollingEngine::stop`]. A sample is only appended if the session, the
//! registry generation and the buffer epoch are all unchanged since its
//! cycle began; anything else is a straggler from an invalidated cycle and
//! is dropped.

use crate::acquisition::events::{AcquisitionEvent, EventBus};
use crate::acquisition::registry::VariableRegistry;
use crate::acquisition::ring_buffer::RingBuffer;
use crate::acquisition::session::SessionSlot;
use crate::acquisition::single_flight::SingleFlight;
use crate::acquisition::window::{project, WindowSpec};
use crate::backend::Transport;
use crate::types::{Sample, SessionId, VariableDescriptor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// How long an idle engine waits before looking for new variables again
const IDLE_RECHECK: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct PollControl {
    interval_ms: u64,
    paused: bool,
    running: bool,
}

#[derive(Debug, Default)]
struct BufferSet {
    epoch: u64,
    generation: u64,
    buffers: HashMap<u64, RingBuffer>,
}

/// Counts from one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Reads that returned a value
    pub read: usize,
    /// Reads that failed
    pub failed: usize,
    /// Values that landed in a buffer
    pub appended: usize,
}

/// Drives periodic reads into per-variable ring buffers
pub struct PollingEngine<T: Transport> {
    transport: Arc<T>,
    session: Arc<SessionSlot>,
    registry: Arc<VariableRegistry<T>>,
    events: EventBus,
    cycle_flight: SingleFlight,
    control: Mutex<PollControl>,
    buffers: RwLock<BufferSet>,
    wake: Notify,
    capacity: usize,
    cycles: AtomicU64,
}

impl<T: Transport> PollingEngine<T> {
    pub fn new(
        transport: Arc<T>,
        session: Arc<SessionSlot>,
        registry: Arc<VariableRegistry<T>>,
        events: EventBus,
        interval_ms: u64,
        capacity: usize,
    ) -> Self {
        Self {
            transport,
            session,
            registry,
            events,
            cycle_flight: SingleFlight::new("poll cycle"),
            control: Mutex::new(PollControl {
                interval_ms,
                paused: false,
                running: false,
            }),
            buffers: RwLock::new(BufferSet::default()),
            wake: Notify::new(),
            capacity: capacity.max(1),
            cycles: AtomicU64::new(0),
        }
    }

    /// Spawn the scheduling task on the current tokio runtime
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run().await })
    }

    async fn run(self: Arc<Self>) {
        loop {
            let (active, interval_ms) = {
                let control = self.control();
                (control.running && !control.paused, control.interval_ms)
            };
            if !active || !self.session.is_connected() {
                self.wake.notified().await;
                continue;
            }

            let started = tokio::time::Instant::now();
            if self.poll_once().await.is_none() {
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(IDLE_RECHECK) => {}
                }
                continue;
            }

            if interval_ms == 0 {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep_until(started + Duration::from_millis(interval_ms)) => {}
                    _ = self.wake.notified() => {}
                }
            }
        }
    }

    /// Run one guarded poll cycle.
    ///
    /// Returns `None` without reading anything when a cycle is already in
    /// flight, no session is live, or there is nothing to poll.
    pub async fn poll_once(&self) -> Option<CycleReport> {
        let _flight = self.cycle_flight.try_begin()?;
        let session_id = self.session.id()?;
        let (generation, vars) = self.registry.read_eligible_snapshot();
        if vars.is_empty() {
            return None;
        }
        let epoch = self.sync_buffers(generation, &vars);

        let mut report = CycleReport::default();
        for var in &vars {
            match self.transport.read_variable(var.address, var.var_type).await {
                Ok(value) => {
                    report.read += 1;
                    if self.append(session_id, epoch, generation, var.address, value) {
                        report.appended += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        name = %var.name,
                        address = %format!("0x{:08X}", var.address),
                        "Poll read failed: {}",
                        e
                    );
                }
            }
        }

        self.cycles.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            read = report.read,
            failed = report.failed,
            appended = report.appended,
            "Poll cycle complete"
        );
        Some(report)
    }

    /// Align the buffer set with the registry generation, returning the epoch
    fn sync_buffers(&self, generation: u64, vars: &[VariableDescriptor]) -> u64 {
        let mut set = self.buffers_mut();
        if set.generation != generation {
            // Samples from a replaced variable set never carry over
            set.buffers.clear();
            set.generation = generation;
        }
        for var in vars {
            set.buffers
                .entry(var.address)
                .or_insert_with(|| RingBuffer::new(self.capacity));
        }
        set.epoch
    }

    fn append(
        &self,
        session_id: SessionId,
        epoch: u64,
        generation: u64,
        address: u64,
        value: f64,
    ) -> bool {
        if !self.session.is_current(session_id) {
            return false;
        }
        {
            let mut set = self.buffers_mut();
            if set.epoch != epoch || set.generation != generation {
                return false;
            }
            match set.buffers.get_mut(&address) {
                Some(buffer) => buffer.push(value),
                None => return false,
            }
        }
        self.registry.record_value(generation, address, value);
        true
    }

    /// Set the poll interval; 0 polls back to back.
    ///
    /// A different interval clears every buffer and restarts the schedule.
    /// A cycle already in flight finishes, but its samples are dropped.
    pub fn set_rate(&self, interval_ms: u64) {
        {
            let mut control = self.control();
            if control.interval_ms == interval_ms {
                return;
            }
            control.interval_ms = interval_ms;
        }
        self.invalidate_buffers();
        self.wake.notify_one();
        tracing::info!(interval_ms, "Poll rate changed, buffers cleared");
        self.events
            .publish(AcquisitionEvent::RateChanged { interval_ms });
    }

    /// Suspend cycles after the current one; buffers and rate are kept
    pub fn pause(&self) {
        {
            let mut control = self.control();
            if control.paused {
                return;
            }
            control.paused = true;
        }
        self.wake.notify_one();
        tracing::info!("Polling paused");
        self.events.publish(AcquisitionEvent::PollingPaused);
    }

    pub fn resume(&self) {
        {
            let mut control = self.control();
            if !control.paused {
                return;
            }
            control.paused = false;
        }
        self.wake.notify_one();
        tracing::info!("Polling resumed");
        self.events.publish(AcquisitionEvent::PollingResumed);
    }

    /// Allow cycles to run (called once a session exists)
    pub fn start(&self) {
        self.control().running = true;
        self.wake.notify_one();
        tracing::debug!("Polling engine started");
    }

    /// Stop scheduling cycles, keeping every buffer
    pub fn halt(&self) {
        self.control().running = false;
        self.wake.notify_one();
        tracing::debug!("Polling engine halted");
    }

    /// Stop scheduling cycles and discard every buffer
    pub fn stop(&self) {
        self.control().running = false;
        {
            let mut set = self.buffers_mut();
            set.epoch += 1;
            set.buffers.clear();
        }
        self.wake.notify_one();
        tracing::debug!("Polling engine stopped");
        self.events.publish(AcquisitionEvent::BuffersCleared);
    }

    /// Empty every buffer without touching the schedule
    pub fn clear_buffers(&self) {
        self.invalidate_buffers();
        self.events.publish(AcquisitionEvent::BuffersCleared);
    }

    fn invalidate_buffers(&self) {
        let mut set = self.buffers_mut();
        set.epoch += 1;
        for buffer in set.buffers.values_mut() {
            buffer.clear();
        }
    }

    /// Wake the scheduler, e.g. after a discovery
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// Window projection of one variable's buffer
    pub fn project(&self, address: u64, window: &WindowSpec, now: Instant) -> Vec<Sample> {
        self.buffers()
            .buffers
            .get(&address)
            .map(|buffer| project(buffer, window, now))
            .unwrap_or_default()
    }

    /// Full chronological contents of one variable's buffer
    pub fn samples(&self, address: u64) -> Vec<Sample> {
        self.buffers()
            .buffers
            .get(&address)
            .map(RingBuffer::all)
            .unwrap_or_default()
    }

    pub fn latest(&self, address: u64) -> Option<Sample> {
        self.buffers().buffers.get(&address).and_then(RingBuffer::latest)
    }

    pub fn buffer_len(&self, address: u64) -> usize {
        self.buffers().buffers.get(&address).map_or(0, RingBuffer::len)
    }

    /// Addresses that currently own a buffer
    pub fn tracked_addresses(&self) -> Vec<u64> {
        let mut addresses: Vec<u64> = self.buffers().buffers.keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    pub fn interval_ms(&self) -> u64 {
        self.control().interval_ms
    }

    pub fn is_paused(&self) -> bool {
        self.control().paused
    }

    pub fn is_running(&self) -> bool {
        self.control().running
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    fn control(&self) -> std::sync::MutexGuard<'_, PollControl> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn buffers(&self) -> std::sync::RwLockReadGuard<'_, BufferSet> {
        self.buffers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn buffers_mut(&self) -> std::sync::RwLockWriteGuard<'_, BufferSet> {
        self.buffers.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::events::drain;
    use crate::backend::{MockDataPattern, MockTransport};
    use crate::types::{AccessMode, Session, TransportKind, VarType};

    const TABLE: u64 = 0x080F_0000;
    const TEMP: u64 = 0x2000_0000;
    const PRESSURE: u64 = 0x2000_0004;
    const LED: u64 = 0x2000_0008;

    struct Fixture {
        transport: Arc<MockTransport>,
        slot: Arc<SessionSlot>,
        registry: Arc<VariableRegistry<MockTransport>>,
        engine: Arc<PollingEngine<MockTransport>>,
        events: EventBus,
    }

    async fn fixture(interval_ms: u64) -> Fixture {
        let transport = Arc::new(
            MockTransport::new()
                .with_probe("Probe A")
                .with_descriptor_table(
                    TABLE,
                    vec![
                        VariableDescriptor::new("temp", TEMP, VarType::F32, AccessMode::ReadOnly),
                        VariableDescriptor::new("pressure", PRESSURE, VarType::U16, AccessMode::ReadOnly),
                        VariableDescriptor::new("led", LED, VarType::U8, AccessMode::ReadWrite),
                    ],
                )
                .with_pattern(TEMP, MockDataPattern::Constant(25.0))
                .with_pattern(
                    PRESSURE,
                    MockDataPattern::Counter {
                        step: 1.0,
                        min: 0.0,
                        max: 1000.0,
                    },
                ),
        );
        let session = transport.connect(0, None).await.unwrap();
        let slot = Arc::new(SessionSlot::new());
        slot.install(session);
        let events = EventBus::default();
        let registry = Arc::new(VariableRegistry::new(
            Arc::clone(&transport),
            Arc::clone(&slot),
            events.clone(),
        ));
        registry.discover(TABLE).await.unwrap();
        let engine = Arc::new(PollingEngine::new(
            Arc::clone(&transport),
            Arc::clone(&slot),
            Arc::clone(&registry),
            events.clone(),
            interval_ms,
            100,
        ));
        Fixture {
            transport,
            slot,
            registry,
            engine,
            events,
        }
    }

    #[tokio::test]
    async fn test_poll_once_reads_only_eligible() {
        let f = fixture(100).await;
        let reads_before = f.transport.read_calls();

        let report = f.engine.poll_once().await.unwrap();
        assert_eq!(report, CycleReport { read: 2, failed: 0, appended: 2 });
        assert_eq!(f.transport.read_calls() - reads_before, 2);
        assert_eq!(f.engine.tracked_addresses(), vec![TEMP, PRESSURE]);
        assert_eq!(f.engine.buffer_len(LED), 0);
        assert_eq!(f.engine.latest(TEMP).map(|s| s.value), Some(25.0));
    }

    #[tokio::test]
    async fn test_failed_read_does_not_abort_cycle() {
        let f = fixture(100).await;
        f.transport.set_read_failure(TEMP, true);

        let report = f.engine.poll_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.appended, 1);
        assert_eq!(f.engine.buffer_len(TEMP), 0);
        assert_eq!(f.engine.buffer_len(PRESSURE), 1);
    }

    #[tokio::test]
    async fn test_poll_updates_registry_values() {
        let f = fixture(100).await;
        f.engine.poll_once().await.unwrap();
        let polled = f.engine.latest(PRESSURE).map(|s| s.value);
        assert_eq!(f.registry.value(PRESSURE), polled);
    }

    #[tokio::test]
    async fn test_no_session_no_cycle() {
        let f = fixture(100).await;
        f.slot.clear();
        assert!(f.engine.poll_once().await.is_none());
    }

    #[tokio::test]
    async fn test_stale_session_results_are_dropped() {
        let f = fixture(100).await;
        let session_id = f.slot.id().unwrap();
        let (generation, vars) = f.registry.read_eligible_snapshot();
        let epoch = f.engine.sync_buffers(generation, &vars);

        f.slot.install(Session {
            target_name: "other".to_string(),
            connected: true,
            chip_id: None,
            transport: TransportKind::Memory,
            chip_verification: None,
        });
        assert!(!f.engine.append(session_id, epoch, generation, TEMP, 1.0));
        assert_eq!(f.engine.buffer_len(TEMP), 0);
    }

    #[tokio::test]
    async fn test_rate_change_clears_buffers() {
        let f = fixture(100).await;
        let rx = f.events.subscribe();
        f.engine.poll_once().await.unwrap();
        f.engine.poll_once().await.unwrap();
        assert_eq!(f.engine.buffer_len(TEMP), 2);

        f.engine.set_rate(10);
        assert!(f.engine.samples(TEMP).is_empty());
        assert_eq!(f.engine.interval_ms(), 10);
        assert!(drain(&rx).contains(&AcquisitionEvent::RateChanged { interval_ms: 10 }));

        // Same rate again is a no-op
        f.engine.poll_once().await.unwrap();
        f.engine.set_rate(10);
        assert_eq!(f.engine.buffer_len(TEMP), 1);
    }

    #[tokio::test]
    async fn test_rate_change_discards_in_flight_samples() {
        let f = fixture(100).await;
        let session_id = f.slot.id().unwrap();
        let (generation, vars) = f.registry.read_eligible_snapshot();
        let epoch = f.engine.sync_buffers(generation, &vars);

        f.engine.set_rate(0);
        assert!(!f.engine.append(session_id, epoch, generation, TEMP, 1.0));
        assert!(f.engine.samples(TEMP).is_empty());
    }

    #[tokio::test]
    async fn test_pause_keeps_buffers_and_rate() {
        let f = fixture(50).await;
        f.engine.poll_once().await.unwrap();
        f.engine.pause();
        assert!(f.engine.is_paused());
        assert_eq!(f.engine.buffer_len(TEMP), 1);
        assert_eq!(f.engine.interval_ms(), 50);

        f.engine.resume();
        assert!(!f.engine.is_paused());
        assert_eq!(f.engine.buffer_len(TEMP), 1);
    }

    #[tokio::test]
    async fn test_stop_discards_buffers() {
        let f = fixture(100).await;
        f.engine.start();
        f.engine.poll_once().await.unwrap();
        f.engine.stop();
        assert!(!f.engine.is_running());
        assert!(f.engine.tracked_addresses().is_empty());
    }

    #[tokio::test]
    async fn test_rediscovery_resets_buffers() {
        let f = fixture(100).await;
        f.engine.poll_once().await.unwrap();
        f.registry.clear();
        assert!(f.engine.poll_once().await.is_none());

        f.registry.discover(TABLE).await.unwrap();
        f.engine.poll_once().await.unwrap();
        assert_eq!(f.engine.buffer_len(TEMP), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_polling_respects_interval() {
        let f = fixture(100).await;
        let handle = f.engine.spawn();
        f.engine.start();

        tokio::time::sleep(Duration::from_millis(350)).await;
        let len = f.engine.buffer_len(TEMP);
        assert!((3..=4).contains(&len), "got {} samples", len);
        assert_eq!(f.engine.cycles_completed(), len as u64);

        f.engine.pause();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let paused_len = f.engine.buffer_len(TEMP);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(f.engine.buffer_len(TEMP), paused_len);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_polls_back_to_back() {
        let f = fixture(100).await;
        f.engine.set_rate(0);
        f.engine.start();
        let handle = f.engine.spawn();

        let ticks = Arc::new(AtomicU64::new(0));
        let counter = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    tokio::task::yield_now().await;
                }
            })
        };

        let started = tokio::time::Instant::now();
        for _ in 0..1000 {
            if f.engine.cycles_completed() >= 10 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(f.engine.cycles_completed() >= 10);
        assert!(f.engine.buffer_len(TEMP) >= 10);
        assert!(ticks.load(Ordering::Relaxed) > 0);
        assert_eq!(started.elapsed(), Duration::ZERO);

        counter.abort();
        handle.abort();
    }

    #[tokio::test]
    async fn test_window_projection_through_engine() {
        let f = fixture(100).await;
        for _ in 0..5 {
            f.engine.poll_once().await.unwrap();
        }
        let projected = f.engine.project(PRESSURE, &WindowSpec::count(2), Instant::now());
        assert_eq!(projected.len(), 2);
        assert!(projected[0].value < projected[1].value);
        assert!(f.engine.project(LED, &WindowSpec::count(2), Instant::now()).is_empty());
    }
}
