//! TCP link to the driving simulator.
//!
//! This module owns the one socket the client keeps open to the simulator
//! and the background task that services it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐          TCP socket          ┌─────────────────────┐
//! │   SimClient     │  ◄──────────────────────────►│     simulator       │
//! │ (send / stop)   │   newline-delimited JSON     │   (Unity process)   │
//! └────────┬────────┘                              └─────────────────────┘
//!          │ pending slot + active flag
//!          ▼
//! ┌─────────────────┐
//! │ FrameProcessor  │──► MessageHandler::on_message
//! │ (tokio task)    │
//! └─────────────────┘
//! ```
//!
//! # Protocol
//!
//! Every frame is one JSON object terminated by `\n`:
//!
//! ```text
//! {"msg_type":"telemetry","speed":1.2,"cte":0.01}\n
//! ```
//!
//! Simulators running under a comma-decimal locale emit `"speed":1,2`;
//! inbound frames are repaired before parsing (see
//! [`replace_float_notation`]).
//!
//! # Usage
//!
//! ```ignore
//! use simlink::config::LinkConfig;
//! use simlink::link::SimClient;
//! use serde_json::{json, Value};
//!
//! let mut client = SimClient::new(LinkConfig::default(), |msg: Value| println!("{msg}"));
//! client.connect().await;
//! client.send(json!({"msg_type": "exit_scene"}));
//! client.stop().await;
//! ```

mod client;
mod framing;
mod handler;
mod processor;

pub use client::{LinkError, SimClient};
pub use framing::{decode_frames, encode_frame, replace_float_notation, FRAME_DELIMITER};
pub use handler::{disconnect_message, IgnoreMessages, MessageHandler};
