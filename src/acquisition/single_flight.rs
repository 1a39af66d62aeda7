//! Single-flight guards
//!
//! At most one instance of a guarded operation runs at a time. A second
//! caller that finds the flag set gets `None` back and must return without
//! doing any I/O; requests are dropped, never queued. The flag is released
//! when the returned [`FlightGuard`] is dropped, so every exit path
//! (success, `?` propagation, panic unwind, or a cancelled future) clears it.

use std::sync::atomic::{AtomicBool, Ordering};

/// Re-entrancy flag for one operation class
#[derive(Debug, Default)]
pub struct SingleFlight {
    name: &'static str,
    in_flight: AtomicBool,
}

impl SingleFlight {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Claim the flag, or `None` if the operation is already running
    pub fn try_begin(&self) -> Option<FlightGuard<'_>> {
        match self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Some(FlightGuard { flight: self }),
            Err(_) => {
                tracing::debug!(operation = self.name, "Already in flight, ignoring request");
                None
            }
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Clears the owning [`SingleFlight`] when dropped
#[derive(Debug)]
pub struct FlightGuard<'a> {
    flight: &'a SingleFlight,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flight.in_flight.store(false, Ordering::Release);
    }
}
