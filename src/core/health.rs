use std::time::{Duration, Instant};

use hdrhistogram::Histogram;

use super::ring::RingBuffer;
use super::session::SessionShared;
use super::types::SessionStats;

const MAX_RECENT_ERRORS: usize = 64;
const MAX_ERROR_TEXT_BYTES: usize = 512;

#[derive(Debug, Clone)]
struct ErrorRecord {
    _at: Instant,
    _context: String,
    _detail: String,
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_ERROR_TEXT_BYTES {
        return s.to_string();
    }
    let mut end = MAX_ERROR_TEXT_BYTES;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Per-session health bookkeeping, owned by the lifecycle controller.
///
/// Heartbeat round-trips feed the latency histogram, which is the closest
/// thing the gateway protocol offers to a ping measurement.
#[derive(Debug)]
pub struct ConnectionHealth {
    connected_at: Instant,
    errors: u64,
    reconnects: u64,
    recent_errors: RingBuffer<ErrorRecord>,
    heartbeat_rtt: Histogram<u64>,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            connected_at: Instant::now(),
            errors: 0,
            reconnects: 0,
            recent_errors: RingBuffer::new(MAX_RECENT_ERRORS),
            heartbeat_rtt: Histogram::new_with_bounds(1, 60_000_000, 3)
                .expect("histogram bounds are valid"),
        }
    }

    /// New transport established: restart the uptime clock, keep counters.
    pub fn mark_connected(&mut self) {
        self.connected_at = Instant::now();
    }

    pub fn record_error(&mut self, context: &str, detail: &str) {
        self.errors = self.errors.saturating_add(1);
        self.recent_errors.push(ErrorRecord {
            _at: Instant::now(),
            _context: truncate(context),
            _detail: truncate(detail),
        });
    }

    pub fn record_heartbeat_rtt(&mut self, rtt: Duration) {
        let micros = rtt.as_micros().min(u64::MAX as u128) as u64;
        let _ = self.heartbeat_rtt.record(micros);
    }

    pub fn increment_reconnect(&mut self) {
        self.reconnects = self.reconnects.saturating_add(1);
    }

    pub fn stats(&self, shared: &SessionShared) -> SessionStats {
        let samples = self.heartbeat_rtt.len();
        let (p50, p99) = if samples == 0 {
            (0, 0)
        } else {
            (
                self.heartbeat_rtt.value_at_percentile(50.0),
                self.heartbeat_rtt.value_at_percentile(99.0),
            )
        };

        SessionStats {
            uptime: self.connected_at.elapsed(),
            events: shared.events_seen(),
            frames: shared.frames_seen(),
            errors: self.errors,
            reconnects: self.reconnects,
            last_inbound_age: shared.last_inbound_age(),
            heartbeat_p50_us: p50,
            heartbeat_p99_us: p99,
            heartbeat_samples: samples,
            recent_errors: self.recent_errors.len(),
        }
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtt_percentiles_come_from_the_histogram() {
        let shared = SessionShared::new();
        let mut health = ConnectionHealth::new();
        health.record_heartbeat_rtt(Duration::from_micros(100));
        health.record_heartbeat_rtt(Duration::from_micros(200));
        health.record_heartbeat_rtt(Duration::from_micros(300));

        let stats = health.stats(&shared);
        assert_eq!(stats.heartbeat_samples, 3);
        assert_eq!(stats.heartbeat_p50_us, 200);
        assert_eq!(stats.heartbeat_p99_us, 300);
    }

    #[test]
    fn error_log_is_bounded_and_truncated() {
        let mut health = ConnectionHealth::new();
        for i in 0..(MAX_RECENT_ERRORS + 5) {
            health.record_error("parse", &format!("error-{i}"));
        }
        assert_eq!(health.recent_errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(health.errors, (MAX_RECENT_ERRORS + 5) as u64);

        let huge = "x".repeat(MAX_ERROR_TEXT_BYTES + 10);
        health.record_error("parse", &huge);
        assert_eq!(
            health
                .recent_errors
                .iter()
                .last()
                .expect("record")
                ._detail
                .len(),
            MAX_ERROR_TEXT_BYTES
        );
    }

    #[test]
    fn counters_survive_reconnect_marks() {
        let shared = SessionShared::new();
        shared.count_frame();
        shared.count_event();

        let mut health = ConnectionHealth::new();
        health.increment_reconnect();
        health.mark_connected();

        let stats = health.stats(&shared);
        assert_eq!(stats.frames, 1);
        assert_eq!(stats.events, 1);
        assert_eq!(stats.reconnects, 1);
    }
}
