//! Transport trait for the probe command interface
//!
//! Everything the acquisition core needs from the outside world goes
//! through [`Transport`]: probe enumeration, session setup and teardown,
//! descriptor discovery, typed reads and writes, and diagnostics. Calls are
//! asynchronous and may be slow or fail; the core never assumes anything
//! about the wire protocol beneath them.
//!
//! Two implementations ship with the crate: [`ProbeRsTransport`] for real
//! hardware and [`MockTransport`] for tests and demos.
//!
//! [`ProbeRsTransport`]: super::ProbeRsTransport
//! [`MockTransport`]: super::MockTransport

use crate::error::Result;
use crate::types::{AvailableTargets, ProbeDescriptor, RttStatus, Session, VarType, VariableDescriptor};
use std::collections::VecDeque;
use std::future::Future;

/// Size of the rolling window for recent read times
const RECENT_WINDOW_SIZE: usize = 100;

/// Command interface to a debug probe and the firmware behind it
pub trait Transport: Send + Sync + 'static {
    /// Enumerate attached probes
    fn detect_probes(&self) -> impl Future<Output = Result<Vec<ProbeDescriptor>>> + Send;

    /// Open the probe at `probe_index` and attach to a target.
    ///
    /// With `target` set this is a connect to a specific target and the
    /// returned session carries a chip verification.
    fn connect(
        &self,
        probe_index: usize,
        target: Option<String>,
    ) -> impl Future<Output = Result<Session>> + Send;

    /// Tear down the current session
    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send;

    /// Parse the descriptor table at `address`
    fn discover_variables(
        &self,
        address: u64,
    ) -> impl Future<Output = Result<Vec<VariableDescriptor>>> + Send;

    /// Read one variable and widen it to f64
    fn read_variable(
        &self,
        address: u64,
        var_type: VarType,
    ) -> impl Future<Output = Result<f64>> + Send;

    /// Narrow `value` to `var_type` and write it
    fn write_variable(
        &self,
        address: u64,
        var_type: VarType,
        value: f64,
    ) -> impl Future<Output = Result<()>> + Send;

    /// RTT diagnostics for the current session
    fn rtt_status(&self) -> impl Future<Output = Result<RttStatus>> + Send;

    /// Chip families known to the transport, for manual target selection
    fn available_targets(&self) -> impl Future<Output = Result<AvailableTargets>> + Send;

    /// Read statistics since the last connect
    fn stats(&self) -> ProbeStats;
}

/// Statistics for probe read operations
#[derive(Debug, Clone)]
pub struct ProbeStats {
    /// Total number of successful reads
    pub successful_reads: u64,
    /// Total number of failed reads
    pub failed_reads: u64,
    /// Total read time in microseconds
    pub total_read_time_us: u64,
    /// Last read time in microseconds
    pub last_read_time_us: u64,
    /// Total bytes read
    pub total_bytes_read: u64,
    /// Rolling window of recent read times for jitter calculation
    pub recent_read_times: VecDeque<u64>,
}

impl Default for ProbeStats {
    fn default() -> Self {
        Self {
            successful_reads: 0,
            failed_reads: 0,
            total_read_time_us: 0,
            last_read_time_us: 0,
            total_bytes_read: 0,
            recent_read_times: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
        }
    }
}

impl ProbeStats {
    /// Calculate average read time in microseconds
    pub fn avg_read_time_us(&self) -> f64 {
        if self.successful_reads == 0 {
            0.0
        } else {
            self.total_read_time_us as f64 / self.successful_reads as f64
        }
    }

    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.successful_reads + self.failed_reads;
        if total == 0 {
            100.0
        } else {
            (self.successful_reads as f64 / total as f64) * 100.0
        }
    }

    /// Record a successful read
    pub fn record_success(&mut self, time_us: u64, bytes: u64) {
        self.successful_reads += 1;
        self.total_read_time_us += time_us;
        self.last_read_time_us = time_us;
        self.total_bytes_read += bytes;

        self.recent_read_times.push_back(time_us);
        if self.recent_read_times.len() > RECENT_WINDOW_SIZE {
            self.recent_read_times.pop_front();
        }
    }

    /// Record a failed read
    pub fn record_failure(&mut self) {
        self.failed_reads += 1;
    }

    /// Jitter (max - min) over the recent window in microseconds
    pub fn jitter_us(&self) -> u64 {
        let min = self.recent_read_times.iter().min().copied().unwrap_or(0);
        let max = self.recent_read_times.iter().max().copied().unwrap_or(0);
        max.saturating_sub(min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_stats_rates() {
        let mut stats = ProbeStats::default();
        assert_eq!(stats.avg_read_time_us(), 0.0);
        assert_eq!(stats.success_rate(), 100.0);

        for _ in 0..9 {
            stats.record_success(100, 4);
        }
        stats.record_failure();
        assert_eq!(stats.success_rate(), 90.0);
        assert_eq!(stats.avg_read_time_us(), 100.0);
        assert_eq!(stats.total_bytes_read, 36);
    }

    #[test]
    fn test_probe_stats_jitter_window() {
        let mut stats = ProbeStats::default();
        assert_eq!(stats.jitter_us(), 0);
        stats.record_success(50, 1);
        stats.record_success(80, 1);
        assert_eq!(stats.jitter_us(), 30);

        for _ in 0..RECENT_WINDOW_SIZE {
            stats.record_success(60, 1);
        }
        assert_eq!(stats.recent_read_times.len(), RECENT_WINDOW_SIZE);
        assert_eq!(stats.jitter_us(), 0);
    }
}
