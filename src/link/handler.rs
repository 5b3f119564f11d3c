//! Delivery of decoded frames to application code.

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;

/// Receives every message decoded from the simulator socket.
///
/// Called synchronously from the link's background task, once per decoded
/// frame and in wire order, so implementations should return quickly. When
/// the task dies on an unexpected error the handler gets one final
/// [`disconnect_message`].
///
/// Closures and unbounded channel senders implement this trait:
///
/// ```ignore
/// let client = SimClient::new(config, |msg: Value| tracing::info!(%msg));
///
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
/// let client = SimClient::new(config, tx);
/// ```
pub trait MessageHandler: Send + Sync {
    /// Handle one decoded message. The default does nothing.
    fn on_message(&self, message: Value) {
        let _ = message;
    }
}

/// Handler that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreMessages;

impl MessageHandler for IgnoreMessages {}

impl<F> MessageHandler for F
where
    F: Fn(Value) + Send + Sync,
{
    fn on_message(&self, message: Value) {
        self(message)
    }
}

impl MessageHandler for UnboundedSender<Value> {
    fn on_message(&self, message: Value) {
        // Receiver gone means nobody is listening any more.
        let _ = self.send(message);
    }
}

/// The message delivered when the link dies on an unexpected error.
pub fn disconnect_message() -> Value {
    json!({ "msg_type": "" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_handler_receives_message() {
        let seen = Mutex::new(Vec::new());
        let handler = |msg: Value| seen.lock().unwrap().push(msg);

        handler.on_message(json!({"msg_type": "car_loaded"}));

        assert_eq!(*seen.lock().unwrap(), vec![json!({"msg_type": "car_loaded"})]);
    }

    #[test]
    fn test_channel_handler_ignores_closed_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
        drop(rx);
        tx.on_message(json!({"msg_type": "telemetry"}));
    }

    #[test]
    fn test_disconnect_message_shape() {
        assert_eq!(disconnect_message().to_string(), r#"{"msg_type":""}"#);
    }
}
