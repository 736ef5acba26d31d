use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Last-seen DISPATCH sequence number, initially absent.
///
/// Written only by the reader; read by the heartbeat timer and by RESUME
/// construction. Relaxed ordering is sufficient: every reader of this cell
/// is already sequenced after the store through the channels the frames
/// travel on.
#[derive(Debug)]
pub struct SequenceCell(AtomicU64);

/// Sentinel for "no sequence observed yet"; real sequences start at 1.
const SEQ_ABSENT: u64 = 0;

impl SequenceCell {
    pub fn new() -> Self {
        Self(AtomicU64::new(SEQ_ABSENT))
    }

    pub fn record(&self, seq: u64) {
        self.0.store(seq, Ordering::Relaxed);
    }

    pub fn get(&self) -> Option<u64> {
        match self.0.load(Ordering::Relaxed) {
            SEQ_ABSENT => None,
            seq => Some(seq),
        }
    }

    pub fn clear(&self) {
        self.0.store(SEQ_ABSENT, Ordering::Relaxed);
    }
}

impl Default for SequenceCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Heartbeat liveness bookkeeping shared between the timer task (arms the
/// cycle) and the reader (acknowledges it).
///
/// The flag follows a strict false → true (send) → false (ack) cycle; a
/// timer tick that finds the flag still armed has detected a zombie
/// connection.
#[derive(Debug)]
pub struct Liveness {
    ack_pending: AtomicBool,
    sent_at: Mutex<Option<Instant>>,
}

impl Liveness {
    pub fn new() -> Self {
        Self {
            ack_pending: AtomicBool::new(false),
            sent_at: Mutex::new(None),
        }
    }

    /// Arm the next heartbeat cycle. Returns `false` when the previous
    /// cycle was never acknowledged, i.e. the connection is a zombie.
    pub fn begin_cycle(&self) -> bool {
        if self.ack_pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.sent_at.lock().expect("liveness lock poisoned") = Some(Instant::now());
        true
    }

    /// Complete the cycle. Returns the round-trip time when a heartbeat was
    /// actually outstanding, `None` for an unsolicited ACK.
    pub fn acknowledge(&self) -> Option<Duration> {
        if !self.ack_pending.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.sent_at
            .lock()
            .expect("liveness lock poisoned")
            .take()
            .map(|sent| sent.elapsed())
    }

    pub fn ack_pending(&self) -> bool {
        self.ack_pending.load(Ordering::Acquire)
    }

    /// Fresh connection: the first tick must treat the flag as clear.
    pub fn reset(&self) {
        self.ack_pending.store(false, Ordering::Release);
        *self.sent_at.lock().expect("liveness lock poisoned") = None;
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Cells shared between the reader, the heartbeat timer, and the actor.
///
/// Counters live here rather than in the actor so the reader's hot path
/// never needs an actor round-trip per frame.
#[derive(Debug)]
pub struct SessionShared {
    pub sequence: SequenceCell,
    pub liveness: Liveness,
    epoch: Instant,
    events_seen: AtomicU64,
    frames_seen: AtomicU64,
    last_inbound_ms: AtomicU64,
}

impl SessionShared {
    pub fn new() -> Self {
        Self {
            sequence: SequenceCell::new(),
            liveness: Liveness::new(),
            epoch: Instant::now(),
            events_seen: AtomicU64::new(0),
            frames_seen: AtomicU64::new(0),
            last_inbound_ms: AtomicU64::new(0),
        }
    }

    /// DISPATCH delivered (or discarded after the consumer went away).
    pub fn count_event(&self) {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
    }

    /// Any inbound frame, control traffic included.
    pub fn count_frame(&self) {
        self.frames_seen.fetch_add(1, Ordering::Relaxed);
        let age_ms = self.epoch.elapsed().as_millis().min(u64::MAX as u128) as u64;
        self.last_inbound_ms.store(age_ms, Ordering::Relaxed);
    }

    pub fn events_seen(&self) -> u64 {
        self.events_seen.load(Ordering::Relaxed)
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen.load(Ordering::Relaxed)
    }

    pub fn last_inbound_age(&self) -> Duration {
        let now_ms = self.epoch.elapsed().as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(now_ms.saturating_sub(self.last_inbound_ms.load(Ordering::Relaxed)))
    }
}

impl Default for SessionShared {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_starts_absent_and_records() {
        let cell = SequenceCell::new();
        assert_eq!(cell.get(), None);
        cell.record(1);
        assert_eq!(cell.get(), Some(1));
        cell.record(43);
        assert_eq!(cell.get(), Some(43));
        cell.clear();
        assert_eq!(cell.get(), None);
    }

    #[test]
    fn liveness_cycle_false_true_false() {
        let liveness = Liveness::new();
        assert!(!liveness.ack_pending());

        assert!(liveness.begin_cycle());
        assert!(liveness.ack_pending());

        let rtt = liveness.acknowledge();
        assert!(rtt.is_some());
        assert!(!liveness.ack_pending());
    }

    #[test]
    fn second_send_without_ack_is_a_zombie() {
        let liveness = Liveness::new();
        assert!(liveness.begin_cycle());
        assert!(!liveness.begin_cycle());
    }

    #[test]
    fn unsolicited_ack_reports_no_rtt() {
        let liveness = Liveness::new();
        assert_eq!(liveness.acknowledge(), None);
    }

    #[test]
    fn reset_clears_a_poisoned_cycle() {
        let liveness = Liveness::new();
        assert!(liveness.begin_cycle());
        liveness.reset();
        assert!(liveness.begin_cycle());
    }
}
