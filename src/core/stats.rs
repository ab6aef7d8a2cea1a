use std::time::{Duration, Instant};

/// Snapshot of connection counters, served via `GetConnectionStats`.
#[derive(Clone, Debug, kameo::Reply)]
pub struct ConnectionStats {
    pub uptime: Duration,
    pub events_published: u64,
    pub frames_dropped: u64,
    pub reconnects: u64,
    pub last_event_age: Duration,
}

/// Per-connection counters owned by the connection actor.
#[derive(Debug)]
pub struct StatsTracker {
    connection_started: Instant,
    last_event_received: Instant,
    events_published: u64,
    frames_dropped: u64,
    reconnects: u64,
}

impl StatsTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            connection_started: now,
            last_event_received: now,
            events_published: 0,
            frames_dropped: 0,
            reconnects: 0,
        }
    }

    /// Called on every successful open; counters survive reconnects.
    pub fn mark_open(&mut self) {
        let now = Instant::now();
        self.connection_started = now;
        self.last_event_received = now;
    }

    pub fn record_event(&mut self) {
        self.last_event_received = Instant::now();
        self.events_published = self.events_published.saturating_add(1);
    }

    pub fn record_dropped_frame(&mut self) {
        self.frames_dropped = self.frames_dropped.saturating_add(1);
    }

    pub fn record_reconnect(&mut self) {
        self.reconnects = self.reconnects.saturating_add(1);
    }

    pub fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            uptime: self.connection_started.elapsed(),
            events_published: self.events_published,
            frames_dropped: self.frames_dropped,
            reconnects: self.reconnects,
            last_event_age: self.last_event_received.elapsed(),
        }
    }
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}
