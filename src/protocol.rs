//! Message vocabulary of the driving simulator.
//!
//! Every frame is a JSON object whose `msg_type` field names its kind. These
//! types sit on top of the untyped [`serde_json::Value`]s the link delivers;
//! anything the client does not model is passed through as
//! [`SimEvent::Other`].

use std::f64::consts::PI;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The simulator places its origin at (50, 50) on the ground plane.
pub const SIM_ORIGIN_OFFSET: f64 = 50.0;

/// Scene loaded when none is configured.
pub const DEFAULT_SCENE: &str = "generated_road";

/// Errors turning a decoded frame into a [`SimEvent`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame has no string `msg_type` field.
    #[error("Message has no msg_type")]
    MissingType,

    /// A `telemetry` frame did not match the expected shape.
    #[error("Malformed telemetry: {0}")]
    Telemetry(#[source] serde_json::Error),
}

/// Messages sent to the simulator.
///
/// Numeric control values travel as strings; the simulator parses them
/// itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg_type", rename_all = "snake_case")]
pub enum Command {
    /// Load a scene by name.
    LoadScene { scene_name: String },
    /// Spawn and style the car.
    CarConfig(CarConfig),
    /// Steering and throttle for the next physics step.
    Control {
        steering: String,
        throttle: String,
        brake: String,
    },
    /// Leave the current scene.
    ExitScene,
}

impl Command {
    /// `load_scene` for the named scene.
    pub fn load_scene(scene_name: impl Into<String>) -> Self {
        Command::LoadScene {
            scene_name: scene_name.into(),
        }
    }

    /// Control command with the brake released.
    ///
    /// `steering` is normalized to [-1, 1]; `throttle` is the target speed.
    pub fn control(steering: f64, throttle: f64) -> Self {
        Command::Control {
            steering: steering.to_string(),
            throttle: throttle.to_string(),
            brake: "0.0".to_string(),
        }
    }

    /// Zero steering, zero throttle. Sent as a failsafe when no fresh
    /// control input is available.
    pub fn neutral() -> Self {
        Self::control(0.0, 0.0)
    }

    /// The `msg_type` this command is sent with.
    pub fn msg_type(&self) -> &'static str {
        match self {
            Command::LoadScene { .. } => "load_scene",
            Command::CarConfig(_) => "car_config",
            Command::Control { .. } => "control",
            Command::ExitScene => "exit_scene",
        }
    }
}

/// Body and spawn settings for `car_config`.
///
/// All values are strings on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarConfig {
    pub body_style: String,
    pub body_r: String,
    pub body_g: String,
    pub body_b: String,
    pub car_name: String,
    pub font_size: String,
    #[serde(rename = "start_X")]
    pub start_x: String,
    #[serde(rename = "start_Y")]
    pub start_y: String,
    #[serde(rename = "start_Z")]
    pub start_z: String,
    pub yaw: String,
}

impl Default for CarConfig {
    fn default() -> Self {
        Self {
            body_style: "mushr".to_string(),
            body_r: "0".to_string(),
            body_g: "0".to_string(),
            body_b: "255".to_string(),
            car_name: "MUSHR".to_string(),
            font_size: "100".to_string(),
            start_x: "0.00".to_string(),
            start_y: "0.00".to_string(),
            start_z: "0.00".to_string(),
            yaw: "1.57".to_string(),
        }
    }
}

/// One `telemetry` frame.
///
/// Fields missing from the frame default to zero, which keeps older
/// simulator builds that send fewer channels usable.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    pub steering_angle: f64,
    pub throttle: f64,
    pub speed: f64,
    /// Name of the object last collided with, `"none"` otherwise.
    pub hit: String,
    pub pos_x: f64,
    pub pos_y: f64,
    pub pos_z: f64,
    pub vel_x: f64,
    pub vel_y: f64,
    pub vel_z: f64,
    pub quat_x: f64,
    pub quat_y: f64,
    pub quat_z: f64,
    pub quat_w: f64,
    /// Yaw in radians.
    pub heading: f64,
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
    #[serde(rename = "Ax")]
    pub accel_x: f64,
    #[serde(rename = "Ay")]
    pub accel_y: f64,
    #[serde(rename = "Az")]
    pub accel_z: f64,
    /// Simulator clock, seconds.
    pub time: f64,
    /// Cross-track error from the lane center.
    pub cte: f64,
    /// Local wall-clock time the frame was decoded.
    #[serde(skip, default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl Telemetry {
    /// Position with the simulator's origin offset removed from x and y.
    pub fn position(&self) -> [f64; 3] {
        [
            self.pos_x - SIM_ORIGIN_OFFSET,
            self.pos_y - SIM_ORIGIN_OFFSET,
            self.pos_z,
        ]
    }

    /// Orientation quaternion as `[x, y, z, w]`.
    pub fn orientation(&self) -> [f64; 4] {
        [self.quat_x, self.quat_y, self.quat_z, self.quat_w]
    }

    /// Linear velocity as reported, in the simulator's frame.
    pub fn velocity(&self) -> [f64; 3] {
        [self.vel_x, self.vel_y, self.vel_z]
    }

    /// Angular velocity in a z-up frame. The simulator reports y-up.
    pub fn angular_velocity(&self) -> [f64; 3] {
        [self.gyro_x, self.gyro_z, self.gyro_y]
    }

    /// Linear acceleration as reported, in the simulator's frame.
    pub fn acceleration(&self) -> [f64; 3] {
        [self.accel_x, self.accel_y, self.accel_z]
    }

    /// Heading folded back into (-2π, 2π) after a single overshoot.
    pub fn wrapped_heading(&self) -> f64 {
        let mut heading = self.heading;
        if heading > 2.0 * PI {
            heading -= 2.0 * PI;
        }
        if heading < -2.0 * PI {
            heading += 2.0 * PI;
        }
        heading
    }

    /// Whether the car is touching anything.
    pub fn is_colliding(&self) -> bool {
        !self.hit.is_empty() && self.hit != "none"
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Telemetry(Box<Telemetry>),
    /// The car requested by `car_config` is in the scene.
    CarLoaded,
    /// The link died; see [`crate::link::disconnect_message`].
    Disconnected,
    /// Any other message, passed through untouched.
    Other { msg_type: String, message: Value },
}

impl SimEvent {
    /// Classify a message delivered by the link.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingType`] if `msg_type` is absent or
    /// not a string, and [`ProtocolError::Telemetry`] if a telemetry frame
    /// has fields of the wrong type.
    pub fn from_message(message: Value) -> Result<Self, ProtocolError> {
        let msg_type = message
            .get("msg_type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_owned();

        match msg_type.as_str() {
            "telemetry" => serde_json::from_value(message)
                .map(|telemetry| SimEvent::Telemetry(Box::new(telemetry)))
                .map_err(ProtocolError::Telemetry),
            "car_loaded" => Ok(SimEvent::CarLoaded),
            "" => Ok(SimEvent::Disconnected),
            _ => Ok(SimEvent::Other { msg_type, message }),
        }
    }

    /// The `msg_type` this event arrived with.
    pub fn msg_type(&self) -> &str {
        match self {
            SimEvent::Telemetry(_) => "telemetry",
            SimEvent::CarLoaded => "car_loaded",
            SimEvent::Disconnected => "",
            SimEvent::Other { msg_type, .. } => msg_type,
        }
    }
}
