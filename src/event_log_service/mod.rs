//! EventLogService - Latest Session Event Archive (Ring Buffer)
//!
//! ## Responsibilities
//!
//! - Mirror the event log of each live session
//! - Serve the most recently active one to the `GET /count-events` query surface
//!
//! Best-effort and process-lifetime only. The session that last recorded or
//! reset events is the latest; capacity bounds each session's log.

use crate::count_aggregator::CountEvent;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Ring buffer for events
struct EventRingBuffer {
    events: VecDeque<CountEvent>,
    capacity: usize,
}

impl EventRingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    fn push(&mut self, event: CountEvent) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Per-session logs plus the latest owner
struct Archive {
    sessions: HashMap<Uuid, EventRingBuffer>,
    latest: Option<Uuid>,
}

/// EventLogService instance
pub struct EventLogService {
    archive: RwLock<Archive>,
    capacity: usize,
}

impl EventLogService {
    /// Create new EventLogService
    pub fn new(capacity: usize) -> Self {
        Self {
            archive: RwLock::new(Archive {
                sessions: HashMap::new(),
                latest: None,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Record an event for a session and mark it latest
    pub async fn record(&self, session_id: Uuid, event: CountEvent) {
        let capacity = self.capacity;
        let mut archive = self.archive.write().await;
        archive
            .sessions
            .entry(session_id)
            .or_insert_with(|| EventRingBuffer::new(capacity))
            .push(event);
        archive.latest = Some(session_id);
        tracing::trace!(session_id = %session_id, "Event archived");
    }

    /// Start over for a session (new bulk pass)
    pub async fn reset(&self, session_id: Uuid) {
        let mut archive = self.archive.write().await;
        archive
            .sessions
            .insert(session_id, EventRingBuffer::new(self.capacity));
        archive.latest = Some(session_id);
        tracing::debug!(session_id = %session_id, "Event archive reset");
    }

    /// Drop a closed session's log unless it is still the latest
    pub async fn release(&self, session_id: Uuid) {
        let mut archive = self.archive.write().await;
        if archive.latest != Some(session_id) {
            archive.sessions.remove(&session_id);
        }
    }

    /// Events of the most recent session, oldest first
    pub async fn latest(&self) -> Vec<CountEvent> {
        let archive = self.archive.read().await;
        archive
            .latest
            .and_then(|id| archive.sessions.get(&id))
            .map(|buffer| buffer.events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Session whose log `latest()` returns
    pub async fn owner(&self) -> Option<Uuid> {
        self.archive.read().await.latest
    }

    /// Get event count of the latest session
    pub async fn count(&self) -> usize {
        let archive = self.archive.read().await;
        archive
            .latest
            .and_then(|id| archive.sessions.get(&id))
            .map_or(0, |buffer| buffer.events.len())
    }

    /// Sessions with a retained log
    pub async fn session_count(&self) -> usize {
        self.archive.read().await.sessions.len()
    }
}

impl Default for EventLogService {
    fn default() -> Self {
        Self::new(2000) // Default capacity
    }
}
