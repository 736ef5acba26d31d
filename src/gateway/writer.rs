use futures_util::{Sink, SinkExt};
use tokio::sync::watch;
use tracing::trace;

use crate::core::WsFrame;
use crate::core::queue::OutboundQueue;
use crate::core::types::GatewayResult;

/// Writer loop: the only code path that touches the transport sink.
///
/// Pops one frame at a time, encodes it, and awaits the send before popping
/// the next, so at most one write is ever in flight. Producers never see
/// the sink; the queue is the sole synchronization point.
///
/// Exit conditions:
/// - queue closed and drained → clean shutdown, sink closed, `Ok(())`;
/// - shutdown signal → exit without draining (the transport is going away);
/// - sink error → `Err`, reported by the caller to the lifecycle controller.
pub(crate) async fn drive_writer<W>(
    mut sink: W,
    queue: OutboundQueue,
    mut shutdown: watch::Receiver<bool>,
) -> GatewayResult<()>
where
    W: Sink<WsFrame, Error = crate::core::GatewayError> + Unpin,
{
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow_and_update() {
                    break;
                }
            }
            popped = queue.pop() => {
                let Some(frame) = popped else { break };
                let wire = frame.encode()?;
                trace!(kind = frame.kind(), op = frame.op(), "writing gateway frame");
                sink.send(wire).await?;
            }
        }
    }

    let _ = sink.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame_bytes;
    use crate::core::payload::OutboundFrame;
    use crate::core::queue::QueuePolicy;
    use crate::core::types::GatewayError;
    use sonic_rs::JsonValueTrait;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct CaptureSink {
        frames: Arc<Mutex<Vec<WsFrame>>>,
        closed: Arc<AtomicBool>,
        failing: Arc<AtomicBool>,
    }

    impl Sink<WsFrame> for CaptureSink {
        type Error = GatewayError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(GatewayError::Transport {
                    context: "write",
                    error: "sink gone".to_string(),
                });
            }
            self.frames.lock().expect("capture lock").push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            self.closed.store(true, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn drains_in_order_and_exits_on_close() {
        let queue = OutboundQueue::new(QueuePolicy::Fifo);
        let sink = CaptureSink::default();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        for seq in 1..=3 {
            queue
                .push(OutboundFrame::Heartbeat { seq: Some(seq) })
                .expect("push");
        }
        queue.close();

        drive_writer(sink.clone(), queue, shutdown_rx)
            .await
            .expect("writer");

        let frames = sink.frames.lock().expect("capture lock");
        assert_eq!(frames.len(), 3);
        for (idx, frame) in frames.iter().enumerate() {
            let value: sonic_rs::Value =
                sonic_rs::from_slice(frame_bytes(frame).expect("bytes")).expect("json");
            assert_eq!(value.get("d").as_u64(), Some(idx as u64 + 1));
        }
        assert!(sink.closed.load(Ordering::SeqCst), "sink must be closed");
    }

    #[tokio::test]
    async fn shutdown_signal_stops_the_loop() {
        let queue = OutboundQueue::new(QueuePolicy::Fifo);
        let sink = CaptureSink::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(drive_writer(sink, queue.clone(), shutdown_rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        shutdown_tx.send(true).expect("signal");
        task.await.expect("join").expect("clean exit");
    }

    #[tokio::test]
    async fn sink_error_is_reported() {
        let queue = OutboundQueue::new(QueuePolicy::Fifo);
        let sink = CaptureSink::default();
        sink.failing.store(true, Ordering::SeqCst);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        queue
            .push(OutboundFrame::Heartbeat { seq: None })
            .expect("push");

        let err = drive_writer(sink, queue, shutdown_rx)
            .await
            .expect_err("must fail");
        assert!(matches!(err, GatewayError::Transport { .. }));
    }
}
