//! # Log Line Decoder
//!
//! Decodes one raw shell log line of the form
//! `[HH:MM:SS.mmm,uuu] <lvl> module: message` into a [`LoggingEvent`].
//!
//! The decoder is a pure function: no state, deterministic, and a malformed
//! line is reported as an error for the caller to drop — it never aborts the
//! session.

use super::{LogLevel, LoggingEvent};
use crate::error::{PmicBridgeError, Result};

/// Decode a raw shell log line
///
/// # Errors
///
/// Returns [`PmicBridgeError::MalformedLine`] if the bracket/marker
/// structure is absent or the timestamp does not parse.
pub fn parse_log_line(line: &str) -> Result<LoggingEvent> {
    let malformed = || PmicBridgeError::MalformedLine(line.to_string());

    let rest = line.strip_prefix('[').ok_or_else(malformed)?;
    let (timestamp_str, rest) = rest.split_once(']').ok_or_else(malformed)?;

    let rest = rest.trim_start();
    let rest = rest.strip_prefix('<').ok_or_else(malformed)?;
    let (level_str, rest) = rest.split_once('>').ok_or_else(malformed)?;
    let level = LogLevel::from_tag(level_str).ok_or_else(malformed)?;

    let rest = rest.trim_start();
    let (module, message) = rest.split_once(':').ok_or_else(malformed)?;
    if module.is_empty() || module.contains(char::is_whitespace) {
        return Err(malformed());
    }

    Ok(LoggingEvent {
        timestamp_ms: parse_uptime(timestamp_str).ok_or_else(malformed)?,
        level,
        module: module.to_string(),
        message: message.trim_start().to_string(),
    })
}

/// Convert `HH:MM:SS.mmm[,uuu]` into milliseconds since boot.
///
/// The `,uuu` sub-millisecond component is informational only and discarded.
fn parse_uptime(timestamp: &str) -> Option<u64> {
    let clock = timestamp.trim().split(',').next()?;
    let (hms, millis) = clock.split_once('.')?;

    let mut fields = hms.split(':');
    let hours: u64 = fields.next()?.parse().ok()?;
    let minutes: u64 = fields.next()?.parse().ok()?;
    let seconds: u64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    let millis: u64 = millis.parse().ok()?;

    Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}
