//! simlink library
//!
//! Client for the donkey-car driving simulator's TCP telemetry socket:
//!
//! - `link` - the connection, its background I/O task and the JSON framing
//! - `config` - connection settings with environment overrides
//! - `protocol` - typed simulator commands and events
//!
//! # Link Module
//!
//! The link delivers every decoded frame to a handler and sends whatever was
//! most recently queued:
//!
//! ```ignore
//! use simlink::config::LinkConfig;
//! use simlink::link::SimClient;
//! use simlink::protocol::{Command, SimEvent};
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let mut client = SimClient::new(LinkConfig::from_env()?, tx);
//! client.connect().await;
//! client.send_message(&Command::load_scene("generated_road"))?;
//!
//! while let Some(message) = rx.recv().await {
//!     if let SimEvent::Telemetry(t) = SimEvent::from_message(message)? {
//!         println!("speed {}", t.speed);
//!     }
//! }
//! ```

pub mod config;
pub mod link;
pub mod protocol;
