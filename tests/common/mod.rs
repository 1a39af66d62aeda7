//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use mcu_link::acquisition::{drain, AcquisitionEvent};
use crossbeam_channel::Receiver;
use std::time::Duration;

/// Descriptor table address used by every fixture
pub const TABLE_ADDRESS: u64 = 0x080F_0000;

/// Poll `condition` every few milliseconds of (possibly paused) tokio time
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Number of user-visible errors among the queued events
pub fn count_user_errors(rx: &Receiver<AcquisitionEvent>) -> usize {
    drain(rx)
        .iter()
        .filter(|e| matches!(e, AcquisitionEvent::UserError(_)))
        .count()
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
