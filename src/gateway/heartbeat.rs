use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::core::payload::OutboundFrame;
use crate::core::queue::OutboundQueue;
use crate::core::session::SessionShared;

/// Why the heartbeat loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatExit {
    /// Shutdown signal or timer replacement.
    Shutdown,
    /// A tick found the previous heartbeat unacknowledged.
    Zombie,
    /// The outbound queue is gone; the session is shutting down.
    QueueClosed,
}

/// Timer loop spawned on every HELLO.
///
/// Producer-only: arms the liveness cycle and pushes a heartbeat carrying
/// the last observed sequence. The first beat is delayed by `first_delay`
/// (usually `interval * U(0,1)`), subsequent beats tick at the fixed
/// interval the server dictated.
pub(crate) async fn drive_heartbeat(
    shared: Arc<SessionShared>,
    queue: OutboundQueue,
    interval: Duration,
    first_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> HeartbeatExit {
    tokio::select! {
        changed = shutdown.changed() => {
            if changed.is_err() || *shutdown.borrow_and_update() {
                return HeartbeatExit::Shutdown;
            }
        }
        _ = tokio::time::sleep(first_delay) => {}
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow_and_update() {
                    return HeartbeatExit::Shutdown;
                }
            }
            // the first tick of `interval` completes immediately, which is
            // exactly the beat the jittered sleep above scheduled
            _ = ticker.tick() => {
                if !shared.liveness.begin_cycle() {
                    warn!("heartbeat ack never arrived; flagging zombie connection");
                    return HeartbeatExit::Zombie;
                }

                let seq = shared.sequence.get();
                debug!(seq, "sending heartbeat");
                let frame = OutboundFrame::Heartbeat { seq };
                // heartbeats carry a deadline so the deadline queue policy
                // sends them ahead of backlogged traffic
                if queue.push_with_deadline(frame, Some(Instant::now())).is_err() {
                    return HeartbeatExit::QueueClosed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::queue::QueuePolicy;

    fn fixture() -> (Arc<SessionShared>, OutboundQueue) {
        (
            Arc::new(SessionShared::default()),
            OutboundQueue::new(QueuePolicy::Fifo),
        )
    }

    #[tokio::test]
    async fn first_beat_carries_null_then_last_sequence() {
        let (shared, queue) = fixture();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(drive_heartbeat(
            Arc::clone(&shared),
            queue.clone(),
            Duration::from_millis(30),
            Duration::ZERO,
            shutdown_rx,
        ));

        let first = queue.pop().await.expect("first beat");
        assert!(matches!(first, OutboundFrame::Heartbeat { seq: None }));

        // ack the cycle and feed a sequence for the next beat
        shared.liveness.acknowledge();
        shared.sequence.record(42);

        let second = queue.pop().await.expect("second beat");
        assert!(matches!(second, OutboundFrame::Heartbeat { seq: Some(42) }));

        task.abort();
    }

    #[tokio::test]
    async fn missing_ack_flags_a_zombie_on_the_next_tick() {
        let (shared, queue) = fixture();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(drive_heartbeat(
            shared,
            queue.clone(),
            Duration::from_millis(20),
            Duration::ZERO,
            shutdown_rx,
        ));

        // first beat goes out, nobody acks
        assert!(queue.pop().await.is_some());

        let exit = task.await.expect("join");
        assert_eq!(exit, HeartbeatExit::Zombie);
        // the zombie tick must not have enqueued another heartbeat
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn shutdown_cancels_the_timer() {
        let (shared, queue) = fixture();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(drive_heartbeat(
            shared,
            queue,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            shutdown_rx,
        ));

        shutdown_tx.send(true).expect("signal");
        assert_eq!(task.await.expect("join"), HeartbeatExit::Shutdown);
    }

    #[tokio::test]
    async fn queue_closure_ends_the_loop() {
        let (shared, queue) = fixture();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        queue.close();
        let exit = drive_heartbeat(
            shared,
            queue,
            Duration::from_millis(10),
            Duration::ZERO,
            shutdown_rx,
        )
        .await;
        assert_eq!(exit, HeartbeatExit::QueueClosed);
    }
}
