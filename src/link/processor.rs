//! Background task servicing the simulator socket.
//!
//! The task owns the `TcpStream`. Each pass waits for the socket to become
//! readable or writable, flushes the pending outbound message when it can
//! write, and decodes whatever one read returns when it can read.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::link::framing::{decode_frames, encode_frame};
use crate::link::handler::{disconnect_message, MessageHandler};

/// Single-slot outbound mailbox shared with [`SimClient`](super::SimClient).
pub(crate) type PendingSlot = Arc<Mutex<Option<Value>>>;

/// Outcome of one pass that did not fail.
#[derive(Debug, PartialEq, Eq)]
enum Pass {
    Continue,
    /// The peer closed the connection or sent undecodable bytes.
    Disconnected,
}

pub(crate) struct FrameProcessor {
    pub(crate) stream: TcpStream,
    pub(crate) active: Arc<AtomicBool>,
    pub(crate) aborted: Arc<AtomicBool>,
    pub(crate) pending: PendingSlot,
    /// Set by `force_close`; wins over a concurrent `stop`.
    pub(crate) close_requested: Arc<AtomicBool>,
    /// Wakes the readiness wait once `close_requested` is set.
    pub(crate) close_signal: Arc<Notify>,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) poll_interval: Duration,
    pub(crate) read_chunk_size: usize,
}

impl FrameProcessor {
    /// Run until `active` is cleared or the socket fails.
    ///
    /// A close requested through `close_requested` always ends in the
    /// disconnect message, even when `active` was cleared first.
    pub(crate) async fn run(mut self) {
        let mut failed = false;

        loop {
            if self.close_requested.load(Ordering::Acquire) {
                self.fail(anyhow!("Socket closed by caller"));
                failed = true;
                break;
            }
            if !self.active.load(Ordering::Acquire) {
                break;
            }

            pace(self.poll_interval).await;

            match self.pass().await {
                Ok(Pass::Continue) => {}
                Ok(Pass::Disconnected) => {
                    self.active.store(false, Ordering::Release);
                    break;
                }
                Err(e) => {
                    self.fail(e);
                    failed = true;
                    break;
                }
            }
        }

        // A close that raced with the peer hanging up is still reported.
        if !failed && self.close_requested.load(Ordering::Acquire) {
            self.fail(anyhow!("Socket closed by caller"));
        }

        info!("Frame processor stopped");
    }

    /// Fatal path: mark the link dead and tell the handler, once.
    fn fail(&self, e: anyhow::Error) {
        error!("Simulator link failed: {:#}", e);
        self.active.store(false, Ordering::Release);
        self.aborted.store(true, Ordering::Release);
        self.handler.on_message(disconnect_message());
    }

    async fn pass(&mut self) -> Result<Pass> {
        // Error readiness is reported through the read or write it causes.
        let ready = tokio::select! {
            biased;
            _ = self.close_signal.notified() => bail!("Socket closed by caller"),
            ready = self.stream.ready(Interest::READABLE | Interest::WRITABLE) => {
                ready.context("Failed to poll socket readiness")?
            }
        };

        if ready.is_writable() {
            self.flush_pending().await?;
        }

        if ready.is_readable() {
            return self.read_chunk();
        }

        Ok(Pass::Continue)
    }

    /// Write the pending message, if any, and clear the slot.
    async fn flush_pending(&mut self) -> Result<()> {
        let next = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(message) = next else {
            return Ok(());
        };

        let frame = encode_frame(&message)?;
        self.stream
            .write_all(frame.as_bytes())
            .await
            .context("Failed to write frame")?;
        debug!(bytes = frame.len(), "Sent frame");

        Ok(())
    }

    /// Read once and dispatch every frame the read completes.
    fn read_chunk(&mut self) -> Result<Pass> {
        let mut buf = vec![0u8; self.read_chunk_size];

        let read = match self.stream.try_read(&mut buf) {
            Ok(0) => {
                warn!("Simulator closed the connection");
                return Ok(Pass::Disconnected);
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Pass::Continue),
            Err(e) => return Err(e).context("Failed to read from socket"),
        };
        buf.truncate(read);

        let text = match String::from_utf8(buf) {
            Ok(text) => text,
            Err(e) => {
                warn!("Simulator sent invalid UTF-8, closing link: {}", e);
                return Ok(Pass::Disconnected);
            }
        };

        for message in decode_frames(&text) {
            self.handler.on_message(message);
        }

        Ok(Pass::Continue)
    }
}

/// Pause between passes. A zero interval still yields so the task cannot
/// starve the runtime while the socket stays writable.
async fn pace(interval: Duration) {
    if interval.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Connected (client, server) pair over loopback.
    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    fn processor(
        stream: TcpStream,
        handler: mpsc::UnboundedSender<Value>,
    ) -> (FrameProcessor, Arc<AtomicBool>, PendingSlot) {
        let active = Arc::new(AtomicBool::new(true));
        let pending: PendingSlot = Arc::new(Mutex::new(None));
        let processor = FrameProcessor {
            stream,
            active: Arc::clone(&active),
            aborted: Arc::new(AtomicBool::new(false)),
            pending: Arc::clone(&pending),
            close_requested: Arc::new(AtomicBool::new(false)),
            close_signal: Arc::new(Notify::new()),
            handler: Arc::new(handler),
            poll_interval: Duration::from_millis(1),
            read_chunk_size: 1024,
        };
        (processor, active, pending)
    }

    #[tokio::test]
    async fn test_pass_writes_pending_frame() {
        let (client, server) = tcp_pair().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let (mut processor, _active, pending) = processor(client, tx);

        *pending.lock().unwrap() = Some(json!({"msg_type": "exit_scene"}));
        assert_eq!(processor.pass().await.unwrap(), Pass::Continue);
        assert!(pending.lock().unwrap().is_none());

        let mut line = String::new();
        timeout(TEST_TIMEOUT, BufReader::new(server).read_line(&mut line))
            .await
            .expect("Test timed out")
            .unwrap();
        assert_eq!(line, "{\"msg_type\":\"exit_scene\"}\n");
    }

    #[tokio::test]
    async fn test_run_dispatches_inbound_frames() {
        let (client, mut server) = tcp_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (processor, active, _pending) = processor(client, tx);
        let task = tokio::spawn(processor.run());

        server
            .write_all(b"{\"msg_type\":\"car_loaded\"}\n{\"msg_type\":\"telemetry\",\"speed\":1,5}\n")
            .await
            .unwrap();

        let first = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        let second = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, json!({"msg_type": "car_loaded"}));
        assert_eq!(second, json!({"msg_type": "telemetry", "speed": 1.5}));

        active.store(false, Ordering::Release);
        timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_ends_quietly_on_peer_close() {
        let (client, server) = tcp_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (processor, active, _pending) = processor(client, tx);

        drop(server);
        timeout(TEST_TIMEOUT, processor.run())
            .await
            .expect("Processor should stop after peer close");

        assert!(!active.load(Ordering::Acquire));
        assert!(rx.try_recv().is_err(), "No synthetic message expected");
    }

    #[tokio::test]
    async fn test_run_treats_invalid_utf8_as_disconnect() {
        let (client, mut server) = tcp_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (processor, active, _pending) = processor(client, tx);

        server.write_all(&[0xff, 0xfe, b'\n']).await.unwrap();
        timeout(TEST_TIMEOUT, processor.run())
            .await
            .expect("Processor should stop on invalid UTF-8");

        assert!(!active.load(Ordering::Acquire));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_signal_delivers_disconnect_message() {
        let (client, _server) = tcp_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (processor, active, _pending) = processor(client, tx);
        let aborted = Arc::clone(&processor.aborted);

        processor.close_signal.notify_one();
        timeout(TEST_TIMEOUT, processor.run()).await.unwrap();

        assert!(!active.load(Ordering::Acquire));
        assert!(aborted.load(Ordering::Acquire));
        assert_eq!(rx.try_recv().unwrap(), disconnect_message());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_request_wins_over_cleared_active() {
        let (client, _server) = tcp_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (processor, active, _pending) = processor(client, tx);
        let aborted = Arc::clone(&processor.aborted);

        // force_close followed immediately by stop, before the task ran.
        processor.close_requested.store(true, Ordering::Release);
        processor.close_signal.notify_one();
        active.store(false, Ordering::Release);
        timeout(TEST_TIMEOUT, processor.run()).await.unwrap();

        assert!(aborted.load(Ordering::Acquire));
        assert_eq!(rx.try_recv().unwrap(), disconnect_message());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_request_reported_even_after_peer_close() {
        let (client, server) = tcp_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (processor, _active, _pending) = processor(client, tx);
        let close_requested = Arc::clone(&processor.close_requested);

        drop(server);
        close_requested.store(true, Ordering::Release);
        timeout(TEST_TIMEOUT, processor.run()).await.unwrap();

        assert_eq!(rx.try_recv().unwrap(), disconnect_message());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_frame_split_across_reads_is_not_stitched() {
        let (client, mut server) = tcp_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (processor, active, _pending) = processor(client, tx);
        let task = tokio::spawn(processor.run());

        server.write_all(b"{\"msg_type\":\"tele").await.unwrap();
        server.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.write_all(b"metry\"}\n").await.unwrap();
        server.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        server
            .write_all(b"{\"msg_type\":\"car_loaded\"}\n")
            .await
            .unwrap();

        // Each read is decoded on its own, so both halves are dropped.
        let first = timeout(TEST_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, json!({"msg_type": "car_loaded"}));

        active.store(false, Ordering::Release);
        timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
        assert!(rx.try_recv().is_err());
    }
}
