//! CountAggregator - Count Change Event Log
//!
//! ## Responsibilities
//!
//! - Turn a stream of per-frame person counts into a sparse change log
//! - Maintain derived aggregates (current count, cumulative total)
//! - Serve a bounded tail of recent events
//! - Seek into the log to restore the count valid at a frame
//!
//! The cumulative total is the sum of positive count deltas. It approximates
//! "people who entered" and does not track identity across frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Frame rate used when a video does not report a usable one
pub const DEFAULT_FPS: f64 = 30.0;

/// Timestamp carried by a CountEvent
///
/// Serialized as an RFC 3339 string for live frames and as seconds
/// from the start of the video for file playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTimestamp {
    Live(DateTime<Utc>),
    Video(f64),
}

/// Where an observed count came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameMarker {
    /// Live frame pushed by the client
    Live(DateTime<Utc>),
    /// Source frame of a stored video
    Video { frame_index: u64, seconds: f64 },
}

impl FrameMarker {
    /// Marker for a live frame observed now
    pub fn now() -> Self {
        FrameMarker::Live(Utc::now())
    }

    /// Marker for a video frame, timestamp = frame_index / fps
    pub fn video(frame_index: u64, fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { DEFAULT_FPS };
        FrameMarker::Video {
            frame_index,
            seconds: frame_index as f64 / fps,
        }
    }

    fn timestamp(&self) -> EventTimestamp {
        match self {
            FrameMarker::Live(at) => EventTimestamp::Live(*at),
            FrameMarker::Video { seconds, .. } => EventTimestamp::Video(*seconds),
        }
    }

    fn frame_index(&self) -> Option<u64> {
        match self {
            FrameMarker::Live(_) => None,
            FrameMarker::Video { frame_index, .. } => Some(*frame_index),
        }
    }
}

/// Recorded change in detected count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountEvent {
    pub timestamp: EventTimestamp,
    /// New detected count
    pub count: u32,
    /// Count observed before this event
    pub previous_count: u32,
    /// Cumulative total after this event
    pub cumulative_total: u64,
    /// Source frame index (file playback only)
    #[serde(rename = "frame", default, skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<u64>,
}

/// Aggregate values derived from the event log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountState {
    pub current_count: u32,
    pub cumulative_total: u64,
}

/// Pure state transition for one observed count.
///
/// Returns the updated state and the event to append, if the count changed.
pub fn observe(prior: CountState, new_count: u32, marker: FrameMarker) -> (CountState, Option<CountEvent>) {
    if new_count == prior.current_count {
        return (prior, None);
    }

    let delta_total = new_count.saturating_sub(prior.current_count) as u64;
    let next = CountState {
        current_count: new_count,
        cumulative_total: prior.cumulative_total + delta_total,
    };

    let event = CountEvent {
        timestamp: marker.timestamp(),
        count: new_count,
        previous_count: prior.current_count,
        cumulative_total: next.cumulative_total,
        frame_index: marker.frame_index(),
    };

    (next, Some(event))
}

/// Result of a seek that matched an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekMatch {
    /// Frame index of the matched event
    pub frame_index: u64,
    /// Count restored from that event
    pub count: u32,
}

/// Per-session count state: aggregates plus the append-only event log
#[derive(Debug, Clone, Default)]
pub struct CountAggregator {
    state: CountState,
    events: Vec<CountEvent>,
}

impl CountAggregator {
    /// Create empty aggregator (implicit initial count 0)
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one observed count, appending an event when it changed
    pub fn observe(&mut self, count: u32, marker: FrameMarker) -> Option<&CountEvent> {
        let (next, event) = observe(self.state, count, marker);
        self.state = next;
        match event {
            Some(event) => {
                self.events.push(event);
                self.events.last()
            }
            None => None,
        }
    }

    /// Clear the log and zero both aggregates
    pub fn reset(&mut self) {
        self.state = CountState::default();
        self.events.clear();
    }

    /// Last `n` events in chronological order
    pub fn tail(&self, n: usize) -> &[CountEvent] {
        let start = self.events.len().saturating_sub(n);
        &self.events[start..]
    }

    /// Full event log
    pub fn events(&self) -> &[CountEvent] {
        &self.events
    }

    /// Set current count from the event nearest `target_frame`.
    ///
    /// Ties resolve to the earliest event. Appends nothing and leaves the
    /// cumulative total alone. No-op when no event carries a frame index.
    pub fn seek(&mut self, target_frame: u64) -> Option<SeekMatch> {
        let mut best: Option<(u64, SeekMatch)> = None;

        for event in &self.events {
            let Some(frame_index) = event.frame_index else {
                continue;
            };
            let distance = frame_index.abs_diff(target_frame);
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((
                    distance,
                    SeekMatch {
                        frame_index,
                        count: event.count,
                    },
                ));
            }
        }

        let (_, matched) = best?;
        self.state.current_count = matched.count;
        Some(matched)
    }

    pub fn current_count(&self) -> u32 {
        self.state.current_count
    }

    pub fn cumulative_total(&self) -> u64 {
        self.state.cumulative_total
    }

    pub fn state(&self) -> CountState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
