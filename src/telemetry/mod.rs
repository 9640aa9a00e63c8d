//! Telemetry Recorder
//!
//! A bounded ring of per-frame snapshots plus the live recognition worker
//! counters. Listeners receive every change over crossbeam channels; a slow
//! or dropped listener never holds up the scanning path.

pub mod diagnostics;

pub use diagnostics::{DiagnosticsReport, EnvironmentInfo, GeometryReport, TelemetrySummary};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::analysis::ParsedCollectorNumber;
use crate::shared::FrameResult;
use crate::vision::{InkDetection, WorkerObserver};

/// Default number of retained snapshots
pub const DEFAULT_CAPACITY: usize = 20;

/// Events buffered per listener before new ones are dropped
const SUBSCRIBER_BUFFER: usize = 64;

/// Immutable record of one evaluated frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSnapshot {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub text: Option<String>,
    pub recognition_confidence: Option<f32>,
    /// Engine time, excluding queue wait
    pub latency_ms: Option<f64>,
    /// Whether the recognition call waited behind another one
    pub queued: bool,
    pub parsed: Option<ParsedCollectorNumber>,
    pub ink: Option<InkDetection>,
    pub outcome: &'static str,
    pub detail: Option<String>,
}

/// Stage data gathered while a frame is evaluated
#[derive(Debug, Clone, Default)]
pub struct FrameTrace {
    pub text: Option<String>,
    pub recognition_confidence: Option<f32>,
    pub latency: Option<Duration>,
    pub queued: bool,
    pub parsed: Option<ParsedCollectorNumber>,
    pub ink: Option<InkDetection>,
}

/// Change notification delivered to listeners
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Frame(FrameSnapshot),
    Worker { locked: bool, queue_depth: usize },
    Reset,
}

#[derive(Debug)]
struct Inner {
    frames: VecDeque<FrameSnapshot>,
    next_seq: u64,
    recorded: u64,
    locked: bool,
    queue_depth: usize,
    peak_queue_depth: usize,
}

/// Per-session diagnostic recorder
pub struct Telemetry {
    capacity: usize,
    session_id: Uuid,
    inner: Mutex<Inner>,
    subscribers: Mutex<Vec<Sender<TelemetryEvent>>>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Telemetry {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            session_id: Uuid::new_v4(),
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                next_seq: 1,
                recorded: 0,
                locked: false,
                queue_depth: 0,
                peak_queue_depth: 0,
            }),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Append a frame, evicting the oldest past capacity. Returns its sequence id.
    pub fn record(&self, trace: FrameTrace, result: &FrameResult) -> u64 {
        let (outcome, detail) = match result {
            Ok(outcome) => (outcome.label(), outcome.detail()),
            Err(rejection) => (rejection.label(), Some(rejection.to_string())),
        };

        let snapshot = {
            let mut inner = self.inner.lock();
            let snapshot = FrameSnapshot {
                seq: inner.next_seq,
                timestamp: Utc::now(),
                text: trace.text,
                recognition_confidence: trace.recognition_confidence,
                latency_ms: trace.latency.map(|d| d.as_secs_f64() * 1000.0),
                queued: trace.queued,
                parsed: trace.parsed,
                ink: trace.ink,
                outcome,
                detail,
            };
            inner.next_seq += 1;
            inner.recorded += 1;
            if inner.frames.len() == self.capacity {
                inner.frames.pop_front();
            }
            inner.frames.push_back(snapshot.clone());
            snapshot
        };

        let seq = snapshot.seq;
        debug!("Frame #{} -> {}", seq, outcome);
        self.notify(TelemetryEvent::Frame(snapshot));
        seq
    }

    /// Retained snapshots, oldest first
    pub fn frames(&self) -> Vec<FrameSnapshot> {
        self.inner.lock().frames.iter().cloned().collect()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.lock().locked
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.lock().queue_depth
    }

    /// Aggregates over the retained snapshots and live counters
    pub fn summary(&self) -> TelemetrySummary {
        let inner = self.inner.lock();

        let latencies: Vec<f64> = inner.frames.iter().filter_map(|f| f.latency_ms).collect();
        let avg_latency_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
        };
        let peak_latency_ms = latencies.iter().copied().fold(None, |peak: Option<f64>, l| {
            Some(peak.map_or(l, |p| p.max(l)))
        });

        let mut outcomes = BTreeMap::new();
        for frame in &inner.frames {
            *outcomes.entry(frame.outcome.to_string()).or_insert(0) += 1;
        }

        TelemetrySummary {
            frames_recorded: inner.recorded,
            frames_retained: inner.frames.len(),
            capacity: self.capacity,
            avg_latency_ms,
            peak_latency_ms,
            contended: inner.frames.iter().filter(|f| f.queued).count(),
            locked: inner.locked,
            queue_depth: inner.queue_depth,
            peak_queue_depth: inner.peak_queue_depth,
            outcomes,
        }
    }

    /// Clear the buffer and counters in one step. Sequence ids keep increasing.
    pub fn reset(&self) {
        {
            let mut inner = self.inner.lock();
            inner.frames.clear();
            inner.recorded = 0;
            inner.locked = false;
            inner.queue_depth = 0;
            inner.peak_queue_depth = 0;
        }
        self.notify(TelemetryEvent::Reset);
    }

    /// Register a listener for every telemetry change
    pub fn subscribe(&self) -> Receiver<TelemetryEvent> {
        let (tx, rx) = bounded(SUBSCRIBER_BUFFER);
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Build the diagnostics bundle
    pub fn export(&self, geometry: Option<GeometryReport>) -> DiagnosticsReport {
        DiagnosticsReport {
            generated_at: Utc::now(),
            environment: EnvironmentInfo::current(self.session_id),
            summary: self.summary(),
            frames: self.frames(),
            geometry,
        }
    }

    fn notify(&self, event: TelemetryEvent) {
        self.subscribers.lock().retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

impl WorkerObserver for Telemetry {
    fn worker_status(&self, locked: bool, queue_depth: usize) {
        {
            let mut inner = self.inner.lock();
            inner.locked = locked;
            inner.queue_depth = queue_depth;
            inner.peak_queue_depth = inner.peak_queue_depth.max(queue_depth);
        }
        self.notify(TelemetryEvent::Worker { locked, queue_depth });
    }
}
