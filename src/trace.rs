//! Host call tracing and statistics
//!
//! Opt-in instrumentation for an instance: a bounded ring buffer of recent
//! host calls and per-function performance counters. The summary is
//! serializable, so embedders can dump it as JSON after a run.
//!
//! Durations are host wall time spent inside the call, measured with
//! `Instant`, independent of the clock provider the guest sees.

use crate::errno::Errno;
use crate::syscall::WasiFunction;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Maximum number of calls kept in the ring buffer
pub const TRACE_BUFFER_SIZE: usize = 1000;

/// How a host call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Returned an errno (success included)
    Errno(&'static str),
    /// The guest exited
    Exit(u32),
    /// The call trapped on a host bug
    HostBug,
}

impl CallOutcome {
    pub fn from_errno(errno: Errno) -> Self {
        CallOutcome::Errno(errno.name())
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, CallOutcome::Errno("success") | CallOutcome::Exit(_))
    }
}

/// A single traced call
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    /// Position in the instance's call sequence
    pub seq: u64,
    pub function: &'static str,
    pub outcome: CallOutcome,
    pub duration_ns: u64,
}

/// Performance counters for one function
#[derive(Debug, Clone, Serialize)]
pub struct PerfCounters {
    pub count: u64,
    pub errors: u64,
    pub total_ns: u64,
    pub min_ns: u64,
    pub max_ns: u64,
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self {
            count: 0,
            errors: 0,
            total_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
        }
    }
}

impl PerfCounters {
    pub fn record(&mut self, duration_ns: u64, is_error: bool) {
        self.count += 1;
        if is_error {
            self.errors += 1;
        }
        self.total_ns = self.total_ns.saturating_add(duration_ns);
        self.min_ns = self.min_ns.min(duration_ns);
        self.max_ns = self.max_ns.max(duration_ns);
    }

    /// Average time per call
    pub fn avg_ns(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_ns / self.count
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            1.0
        } else {
            (self.count - self.errors) as f64 / self.count as f64
        }
    }
}

/// Snapshot of a tracer's state
#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub total_calls: u64,
    pub total_errors: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub functions: BTreeMap<&'static str, PerfCounters>,
    pub recent: Vec<TraceEvent>,
}

impl TraceSummary {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Per-instance call tracer
#[derive(Debug, Default)]
pub struct Tracer {
    enabled: bool,
    events: VecDeque<TraceEvent>,
    counters: BTreeMap<&'static str, PerfCounters>,
    next_seq: u64,
    bytes_read: u64,
    bytes_written: u64,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a finished host call
    pub fn record(&mut self, function: WasiFunction, outcome: CallOutcome, duration: Duration) {
        if !self.enabled {
            return;
        }
        let duration_ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.counters
            .entry(function.name())
            .or_default()
            .record(duration_ns, outcome.is_error());

        if self.events.len() >= TRACE_BUFFER_SIZE {
            self.events.pop_front();
        }
        self.events.push_back(TraceEvent {
            seq: self.next_seq,
            function: function.name(),
            outcome,
            duration_ns,
        });
        self.next_seq += 1;
    }

    pub fn record_read(&mut self, bytes: usize) {
        if self.enabled {
            self.bytes_read += bytes as u64;
        }
    }

    pub fn record_write(&mut self, bytes: usize) {
        if self.enabled {
            self.bytes_written += bytes as u64;
        }
    }

    /// Counters for one function, if it was called
    pub fn counters(&self, function: WasiFunction) -> Option<&PerfCounters> {
        self.counters.get(function.name())
    }

    /// Most recent calls, oldest first
    pub fn recent(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter()
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            total_calls: self.counters.values().map(|c| c.count).sum(),
            total_errors: self.counters.values().map(|c| c.errors).sum(),
            bytes_read: self.bytes_read,
            bytes_written: self.bytes_written,
            functions: self.counters.clone(),
            recent: self.events.iter().cloned().collect(),
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.counters.clear();
        self.bytes_read = 0;
        self.bytes_written = 0;
    }
}
