//! Window projection
//!
//! Turns a [`RingBuffer`] into the bounded, ordered series handed to the
//! renderer. Projection is a pure read: the same buffer contents, spec and
//! `now` always produce the same output, and nothing in the buffer changes.

use crate::acquisition::ring_buffer::RingBuffer;
use crate::types::Sample;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Which suffix of a buffer is displayed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WindowSpec {
    /// Samples no older than `seconds` before now
    TimeSpan { seconds: f64 },
    /// Up to `samples` most recent samples
    Count { samples: usize },
}

impl Default for WindowSpec {
    fn default() -> Self {
        WindowSpec::TimeSpan { seconds: 10.0 }
    }
}

impl WindowSpec {
    pub fn time_span(span: Duration) -> Self {
        WindowSpec::TimeSpan {
            seconds: span.as_secs_f64(),
        }
    }

    pub fn count(samples: usize) -> Self {
        WindowSpec::Count { samples }
    }

    /// Span as a `Duration`; negative or non-finite spans select nothing
    fn span(seconds: f64) -> Option<Duration> {
        Duration::try_from_secs_f64(seconds).ok()
    }
}

impl std::fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowSpec::TimeSpan { seconds } => write!(f, "last {:.1} s", seconds),
            WindowSpec::Count { samples } => write!(f, "last {} samples", samples),
        }
    }
}

/// Project `buffer` through `spec`, relative to `now`.
///
/// Returns samples in chronological order; empty when nothing qualifies.
pub fn project(buffer: &RingBuffer, spec: &WindowSpec, now: Instant) -> Vec<Sample> {
    match *spec {
        WindowSpec::Count { samples } => {
            let skip = buffer.len().saturating_sub(samples);
            buffer.iter().skip(skip).copied().collect()
        }
        WindowSpec::TimeSpan { seconds } => {
            let Some(span) = WindowSpec::span(seconds) else {
                return Vec::new();
            };
            match now.checked_sub(span) {
                Some(cutoff) => buffer
                    .iter()
                    .skip_while(|s| s.timestamp < cutoff)
                    .copied()
                    .collect(),
                // The window reaches back before the clock's origin
                None => buffer.all(),
            }
        }
    }
}

/// `[x, y]` points for plotting, x in seconds relative to `now`
pub fn to_plot_points(samples: &[Sample], now: Instant) -> Vec<[f64; 2]> {
    samples
        .iter()
        .map(|s| [s.seconds_relative_to(now), s.value])
        .collect()
}
