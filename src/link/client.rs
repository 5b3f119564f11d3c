//! Connection manager for the simulator link.
//!
//! This module provides `SimClient`, which connects to the simulator over
//! TCP (retrying until it answers), hands the socket to a background
//! frame processor task, and exposes a fire-and-forget `send`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::link::handler::MessageHandler;
use crate::link::processor::{FrameProcessor, PendingSlot};

/// Link-specific error types.
#[derive(Debug, Error)]
pub enum LinkError {
    /// An outbound message could not be turned into JSON.
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Client for one simulator connection.
///
/// The client keeps a single outbound slot: [`send`](Self::send) replaces
/// whatever has not been written yet, so only the most recent message
/// between two writable passes reaches the simulator. Inbound messages go
/// to the [`MessageHandler`] supplied at construction.
///
/// # Connection Lifecycle
///
/// - `new()` - Create an unconnected client
/// - `connect()` - Retry until connected, then start the background task
/// - `stop()` - Ask the task to finish and wait for it
///
/// # Example
///
/// ```ignore
/// use simlink::config::LinkConfig;
/// use simlink::link::SimClient;
/// use serde_json::json;
///
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
/// let mut client = SimClient::new(LinkConfig::default(), tx);
/// client.connect().await;
///
/// client.send(json!({"msg_type": "load_scene", "scene_name": "generated_road"}));
/// while let Some(msg) = rx.recv().await {
///     // ...
/// }
/// client.stop().await;
/// ```
pub struct SimClient {
    config: LinkConfig,
    handler: Arc<dyn MessageHandler>,
    /// Cleared to ask the background task to exit; the task clears it too
    /// when the socket dies.
    active: Arc<AtomicBool>,
    /// Set when the task died on an unexpected error.
    aborted: Arc<AtomicBool>,
    pending: PendingSlot,
    /// Set by [`force_close`](Self::force_close); the task reports it even
    /// if `stop` clears `active` first.
    close_requested: Arc<AtomicBool>,
    /// Wakes the task's readiness wait for [`force_close`](Self::force_close).
    close_signal: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl SimClient {
    /// Create a client that is not connected yet.
    pub fn new(config: LinkConfig, handler: impl MessageHandler + 'static) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
            active: Arc::new(AtomicBool::new(false)),
            aborted: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(Mutex::new(None)),
            close_requested: Arc::new(AtomicBool::new(false)),
            close_signal: Arc::new(Notify::new()),
            task: None,
        }
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Connect to the simulator and start the background task.
    ///
    /// Retries forever, sleeping `retry_delay` after every failed attempt;
    /// failures are logged, never returned. Does nothing if the background
    /// task is already running.
    pub async fn connect(&mut self) {
        if self.is_active() {
            warn!("Simulator link already running; ignoring connect()");
            return;
        }

        // A task that died on its own still has to be reaped.
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        let addr = self.config.addr();
        info!("Connecting to simulator at {}", addr);

        let stream = loop {
            match TcpStream::connect((self.config.host.as_str(), self.config.port)).await {
                Ok(stream) => break stream,
                Err(e) => {
                    warn!(
                        "Could not connect to {} ({}); retrying in {:?}",
                        addr, e, self.config.retry_delay
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        };

        match stream.peer_addr() {
            Ok(peer) => info!(%peer, "Connected to simulator"),
            Err(_) => info!("Connected to simulator"),
        }

        self.close_requested = Arc::new(AtomicBool::new(false));
        self.close_signal = Arc::new(Notify::new());
        self.aborted.store(false, Ordering::Release);
        self.active.store(true, Ordering::Release);

        let processor = FrameProcessor {
            stream,
            active: Arc::clone(&self.active),
            aborted: Arc::clone(&self.aborted),
            pending: Arc::clone(&self.pending),
            close_requested: Arc::clone(&self.close_requested),
            close_signal: Arc::clone(&self.close_signal),
            handler: Arc::clone(&self.handler),
            poll_interval: self.config.poll_interval,
            read_chunk_size: self.config.read_chunk_size,
        };
        self.task = Some(tokio::spawn(processor.run()));
    }

    /// Queue `message` as the next frame to write.
    ///
    /// Replaces any message that has not been written yet.
    pub fn send(&self, message: Value) {
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(message);

        if previous.is_some() {
            debug!("Dropping unsent message in favour of a newer one");
        }
    }

    /// Serialize `message` and [`send`](Self::send) it.
    ///
    /// # Errors
    ///
    /// Returns `LinkError::Encode` if `message` cannot be represented as JSON.
    pub fn send_message<T: Serialize>(&self, message: &T) -> Result<(), LinkError> {
        self.send(serde_json::to_value(message)?);
        Ok(())
    }

    /// Stop the background task and close the socket.
    ///
    /// The task notices the request after its current readiness wait
    /// returns. Safe to call repeatedly, and on a client that never
    /// connected.
    pub async fn stop(&mut self) {
        self.active.store(false, Ordering::Release);

        let Some(task) = self.task.take() else {
            return;
        };

        if let Err(e) = task.await {
            warn!("Frame processor ended abnormally: {}", e);
        }
        info!("Simulator link stopped");
    }

    /// Close the socket under a running background task.
    ///
    /// The task treats this like any other socket failure: it exits, marks
    /// the client aborted and delivers the disconnect message to the
    /// handler exactly once, even when [`stop`](Self::stop) is called
    /// right after. Call `stop` afterwards to reap it.
    pub fn force_close(&self) {
        if self.task.is_some() && self.is_active() {
            self.close_requested.store(true, Ordering::Release);
            self.close_signal.notify_one();
        }
    }

    /// Whether the background task is running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether the last connection died on an unexpected error.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

impl Drop for SimClient {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
