//! RTT status monitor
//!
//! Independent of the polling engine: every tick, while a session exists,
//! ask the transport for its RTT diagnostics and publish the result.

use crate::acquisition::events::{AcquisitionEvent, EventBus};
use crate::acquisition::session::SessionSlot;
use crate::backend::Transport;
use crate::types::RttStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default cadence of RTT status queries
pub const DEFAULT_RTT_INTERVAL: Duration = Duration::from_secs(2);

pub struct RttMonitor<T: Transport> {
    transport: Arc<T>,
    session: Arc<SessionSlot>,
    events: EventBus,
    interval: Duration,
    last: Mutex<Option<RttStatus>>,
}

impl<T: Transport> RttMonitor<T> {
    pub fn new(
        transport: Arc<T>,
        session: Arc<SessionSlot>,
        events: EventBus,
        interval: Duration,
    ) -> Self {
        Self {
            transport,
            session,
            events,
            interval: interval.max(Duration::from_millis(1)),
            last: Mutex::new(None),
        }
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                monitor.refresh().await;
            }
        })
    }

    /// Query once. Without a session the last status is dropped.
    pub async fn refresh(&self) -> Option<RttStatus> {
        if !self.session.is_connected() {
            if self.take_last().is_some() {
                self.events.publish(AcquisitionEvent::RttStatus(None));
            }
            return None;
        }

        let status = match self.transport.rtt_status().await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::debug!("RTT status unavailable: {}", e);
                None
            }
        };
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = status.clone();
        self.events
            .publish(AcquisitionEvent::RttStatus(status.clone()));
        status
    }

    /// Most recent status seen by [`refresh`](Self::refresh)
    pub fn last(&self) -> Option<RttStatus> {
        self.last.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn take_last(&self) -> Option<RttStatus> {
        self.last.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::events::drain;
    use crate::backend::MockTransport;

    #[tokio::test(start_paused = true)]
    async fn test_status_published_on_cadence() {
        let transport = Arc::new(MockTransport::demo());
        let session = transport.connect(0, None).await.unwrap();
        let slot = Arc::new(SessionSlot::new());
        slot.install(session);
        let events = EventBus::default();
        let rx = events.subscribe();

        let monitor = Arc::new(RttMonitor::new(
            Arc::clone(&transport),
            Arc::clone(&slot),
            events,
            DEFAULT_RTT_INTERVAL,
        ));
        let handle = monitor.spawn();

        tokio::time::sleep(Duration::from_millis(4500)).await;
        let statuses = drain(&rx)
            .into_iter()
            .filter(|e| matches!(e, AcquisitionEvent::RttStatus(Some(_))))
            .count();
        // Ticks at 0s, 2s and 4s
        assert_eq!(statuses, 3);
        assert!(monitor.last().is_some_and(|s| s.enabled));

        handle.abort();
    }

    #[tokio::test]
    async fn test_no_session_clears_status() {
        let transport = Arc::new(MockTransport::demo());
        let session = transport.connect(0, None).await.unwrap();
        let slot = Arc::new(SessionSlot::new());
        slot.install(session);
        let events = EventBus::default();
        let rx = events.subscribe();
        let monitor = RttMonitor::new(transport, Arc::clone(&slot), events, DEFAULT_RTT_INTERVAL);

        assert!(monitor.refresh().await.is_some());
        slot.clear();
        assert!(monitor.refresh().await.is_none());
        assert!(monitor.last().is_none());
        assert_eq!(drain(&rx).last(), Some(&AcquisitionEvent::RttStatus(None)));
    }
}
