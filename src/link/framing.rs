//! Newline-delimited JSON framing for the simulator socket.
//!
//! Outbound frames are a serialized JSON value followed by `\n`. Inbound
//! reads are split on `\n`, and fragments that do not form a complete
//! object on their own are stitched back together using their first and
//! last characters.
//!
//! # Wire Format
//!
//! ```text
//! {"msg_type":"car_loaded"}\n
//! {"msg_type":"telemetry","speed":1.7,"cte":0.001}\n
//! ```
//!
//! A frame cut across two lines of the same read is reassembled by joining
//! the pieces with a single space, so a cut inside a string value shows up
//! in the decoded value (`"telemet" + "ry"` decodes as `"telemet ry"`).

use std::borrow::Cow;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

/// Terminator appended to every outbound frame and split on for inbound reads.
pub const FRAME_DELIMITER: char = '\n';

/// A quoted key followed by a run of number-ish characters.
///
/// The run deliberately includes `,` so that `"speed":1,2` is captured whole.
static NUMERIC_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""[A-Za-z_][A-Za-z0-9_]*":([0-9,E-]+)"#).expect("numeric field pattern is valid")
});

/// Serialize a value into a single outbound frame.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized (non-string map keys
/// produced by a custom `Serialize` impl, for instance).
pub fn encode_frame(message: &Value) -> Result<String> {
    let mut frame = serde_json::to_string(message).context("Failed to serialize frame")?;
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Repair comma-decimal numbers emitted by simulators running under a
/// non-English locale.
///
/// Looks for `"key":<digits, commas, E, ->` runs that are immediately
/// followed by either another key (`,"`) or the end of the object (`}`),
/// and turns the last comma inside the number into a `.`:
///
/// ```text
/// "a":1,2,"b":3}   ->   "a":1.2,"b":3}
/// "a":1,2}         ->   "a":1.2}
/// ```
///
/// This is a textual rewrite, not a JSON-aware one. Valid JSON never
/// matches and is returned borrowed and untouched.
pub fn replace_float_notation(text: &str) -> Cow<'_, str> {
    let mut rewrites = Vec::new();

    for captures in NUMERIC_FIELD.captures_iter(text) {
        let Some(run) = captures.get(1) else {
            continue;
        };
        let rest = &text[run.end()..];

        // The field separator is swallowed by the run when another key follows.
        let number = if rest.starts_with('}') {
            run.as_str()
        } else if rest.starts_with('"') && run.as_str().ends_with(',') {
            &run.as_str()[..run.len() - 1]
        } else {
            continue;
        };

        if let Some(offset) = number.rfind(',') {
            rewrites.push(run.start() + offset);
        }
    }

    if rewrites.is_empty() {
        return Cow::Borrowed(text);
    }

    let mut repaired = text.to_owned();
    for position in rewrites {
        repaired.replace_range(position..position + 1, ".");
    }
    Cow::Owned(repaired)
}

/// Decode every complete JSON object contained in one read.
///
/// Fragments are handled in order:
///
/// - `{...}` on its own line is parsed directly;
/// - a fragment starting with `{` but not closed opens an accumulation, and
///   following fragments are appended until one ends with `}`;
/// - a fragment that neither opens an object nor continues one is dropped.
///
/// Frames that fail to parse after repair are logged and skipped. An
/// accumulation still open when the read is exhausted is discarded.
pub fn decode_frames(text: &str) -> Vec<Value> {
    let mut decoded = Vec::new();
    let mut partial: Vec<&str> = Vec::new();

    for fragment in text.split(FRAME_DELIMITER) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }

        let opens = fragment.starts_with('{');
        let closes = fragment.ends_with('}');

        if opens && closes {
            decoded.extend(parse_frame(fragment));
            continue;
        }

        if partial.is_empty() && !opens {
            warn!(fragment, "Dropping fragment outside of any frame");
            continue;
        }

        partial.push(fragment);
        if closes {
            let assembled = partial.join(" ");
            partial.clear();
            decoded.extend(parse_frame(&assembled));
        }
    }

    if !partial.is_empty() {
        debug!(
            fragments = partial.len(),
            "Discarding incomplete frame at end of read"
        );
    }

    decoded
}

/// Repair and parse a single candidate frame, logging on failure.
fn parse_frame(frame: &str) -> Option<Value> {
    let repaired = replace_float_notation(frame);
    match serde_json::from_str(&repaired) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, frame = %repaired, "Failed to parse frame");
            None
        }
    }
}
