//! # Shell Protocol Constants and Types
//!
//! Core definitions for the PMIC's line-oriented shell protocol: the log
//! modules the firmware emits, severity levels, and the decoded
//! [`LoggingEvent`] every other decoder builds on.

pub mod logline;
pub mod telemetry;

/// Maximum device uptime timestamp before wrap-around (99:59:59.999 in ms)
pub const MAX_TIMESTAMP: u64 = 359_999_999;

/// Connection/PMIC lifecycle log module
pub const MODULE_PMIC: &str = "module_pmic";

/// ADC sample telemetry log module
pub const MODULE_PMIC_ADC: &str = "module_pmic_adc";

/// IRQ/error event log module
pub const MODULE_PMIC_IRQ: &str = "module_pmic_irq";

/// Charger detail log module (consumed as plain logging only)
pub const MODULE_PMIC_CHARGER: &str = "module_pmic_charger";

/// Fuel gauge log module (consumed as plain logging only)
pub const MODULE_FG: &str = "module_fg";

/// Battery profiling telemetry log module
pub const MODULE_CC_PROFILING: &str = "module_cc_profiling";

/// Synthetic module tag for the request/response audit mirror
pub const MODULE_SHELL_COMMANDS: &str = "shell_commands";

/// `module_pmic` sentinel: communication with the PMIC was lost
pub const MSG_NO_RESPONSE: &str = "No response from PMIC.";

/// `module_pmic` sentinel: the PMIC came back and a reboot is possible
pub const MSG_PMIC_AVAILABLE: &str = "PMIC available. Application can be restarted.";

/// `module_pmic` sentinel: the device raised its power-loss warning
pub const MSG_POWER_FAILURE: &str = "Power Failure Warning";

/// Log modules whose message body is a `key=value` data record
const DATA_PAIR_MODULES: &[&str] = &[
    MODULE_PMIC_ADC,
    MODULE_PMIC_IRQ,
    MODULE_CC_PROFILING,
    MODULE_SHELL_COMMANDS,
];

/// Returns true when the module's messages carry `key=value` payloads
#[must_use]
pub fn is_module_data_pair(module: &str) -> bool {
    DATA_PAIR_MODULES.contains(&module)
}

/// Severity tag of a shell log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Parse the shell's three-letter severity tag
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "dbg" => Some(Self::Debug),
            "inf" => Some(Self::Info),
            "wrn" => Some(Self::Warning),
            "err" => Some(Self::Error),
            _ => None,
        }
    }

    /// The tag as the shell prints it
    #[must_use]
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Debug => "dbg",
            Self::Info => "inf",
            Self::Warning => "wrn",
            Self::Error => "err",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// One decoded shell log line
///
/// `timestamp_ms` is milliseconds since device boot as printed by the shell;
/// wrap-around correction happens downstream in the device session, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingEvent {
    /// Milliseconds since device boot (raw, may wrap at [`MAX_TIMESTAMP`])
    pub timestamp_ms: u64,

    /// Severity tag
    pub level: LogLevel,

    /// Emitting module tag (e.g. `module_pmic_adc`)
    pub module: String,

    /// Raw message payload after the module tag
    pub message: String,
}

/// Iterate the `key=value` pairs of a comma-separated message body.
///
/// Parts without a `=` are skipped; values keep their raw text so the caller
/// decides how (and whether) to parse them.
pub fn key_value_pairs(message: &str) -> impl Iterator<Item = (&str, &str)> {
    message.split(',').filter_map(|part| {
        let mut halves = part.splitn(2, '=');
        match (halves.next(), halves.next()) {
            (Some(key), Some(value)) => Some((key.trim(), value.trim())),
            _ => None,
        }
    })
}

/// Extract the value part of a `Label: value` style answer.
///
/// Returns the text after the last colon, trimmed; the whole trimmed answer
/// when no colon is present.
#[must_use]
pub fn parse_colon_based_answer(answer: &str) -> &str {
    match answer.rfind(':') {
        Some(idx) => answer[idx + 1..].trim(),
        None => answer.trim(),
    }
}

/// Parse the first numeric token of a `Label: value [unit]` style answer.
pub fn parse_to_number(answer: &str) -> crate::error::Result<f64> {
    let value = parse_colon_based_answer(answer);
    value
        .split_whitespace()
        .next()
        .and_then(|token| token.parse::<f64>().ok())
        .ok_or_else(|| crate::error::PmicBridgeError::MalformedLine(answer.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_pair_modules() {
        assert!(is_module_data_pair(MODULE_PMIC_ADC));
        assert!(is_module_data_pair(MODULE_PMIC_IRQ));
        assert!(is_module_data_pair(MODULE_CC_PROFILING));
        assert!(is_module_data_pair(MODULE_SHELL_COMMANDS));
        assert!(!is_module_data_pair(MODULE_PMIC));
        assert!(!is_module_data_pair(MODULE_FG));
    }

    #[test]
    fn test_log_level_round_trip() {
        for tag in ["dbg", "inf", "wrn", "err"] {
            let level = LogLevel::from_tag(tag).unwrap();
            assert_eq!(level.as_tag(), tag);
        }
        assert_eq!(LogLevel::from_tag("fatal"), None);
    }

    #[test]
    fn test_key_value_pairs() {
        let pairs: Vec<_> =
            key_value_pairs("vbat=4.19,ibat=0.1,tbat=23.4,soc=87.5").collect();
        assert_eq!(
            pairs,
            vec![
                ("vbat", "4.19"),
                ("ibat", "0.1"),
                ("tbat", "23.4"),
                ("soc", "87.5"),
            ]
        );
    }

    #[test]
    fn test_key_value_pairs_skips_bare_parts() {
        let pairs: Vec<_> = key_value_pairs("Ready").collect();
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_parse_colon_based_answer() {
        assert_eq!(parse_colon_based_answer("Value: 3600"), "3600");
        assert_eq!(parse_colon_based_answer("Value: vset pin select"), "vset pin select");
        assert_eq!(parse_colon_based_answer("3600"), "3600");
    }

    #[test]
    fn test_parse_to_number() {
        assert_eq!(parse_to_number("Value: 3600").unwrap(), 3600.0);
        assert_eq!(parse_to_number("Value: 3600 mV").unwrap(), 3600.0);
        assert_eq!(parse_to_number("Uptime: 2945165 ms").unwrap(), 2_945_165.0);
        assert!(parse_to_number("Value: nonsense").is_err());
    }
}
