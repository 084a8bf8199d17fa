//! # Module Telemetry Decoders
//!
//! Per-subsystem decoders turning a [`LoggingEvent`]'s `key=value` payload
//! into typed records: ADC samples, the charging-status bitfield, IRQ
//! events, and battery-profiling telemetry.
//!
//! All decoders are forward-compatible: unknown keys are ignored, missing
//! keys keep their zero/NaN default, and a value that fails to parse leaves
//! the field at its default instead of failing the whole record.

use super::{key_value_pairs, parse_colon_based_answer, LoggingEvent};

/// Charging-status bit: battery full
const STATUS_BATTERY_FULL: u8 = 0x02;
/// Charging-status bit: trickle charging
const STATUS_TRICKLE_CHARGE: u8 = 0x04;
/// Charging-status bit: constant-current phase
const STATUS_CONSTANT_CURRENT: u8 = 0x08;
/// Charging-status bit: constant-voltage phase
const STATUS_CONSTANT_VOLTAGE: u8 = 0x10;
/// Charging-status bit: recharge needed
const STATUS_RECHARGE_NEEDED: u8 = 0x20;
/// Charging-status bit: die temperature high
const STATUS_DIE_TEMP_HIGH: u8 = 0x40;
/// Charging-status bit: supplement mode active
const STATUS_SUPPLEMENT_MODE: u8 = 0x80;

/// One ADC battery reading
///
/// `timestamp_ms` is the raw device uptime of the emitting log line; the
/// device session applies wrap-around correction before publishing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdcSample {
    /// Milliseconds since device boot
    pub timestamp_ms: u64,

    /// Battery voltage in volts
    pub v_bat: f64,

    /// Battery current in mA (negative while discharging)
    pub i_bat_ma: f64,

    /// Battery temperature in °C
    pub t_bat: f64,

    /// State of charge in percent (NaN when the fuel gauge is off)
    pub soc: f64,

    /// Time to empty in seconds (NaN when unknown)
    pub tte_s: f64,

    /// Time to full in seconds (NaN when unknown)
    pub ttf_s: f64,
}

impl AdcSample {
    /// Decode a `module_pmic_adc` event
    #[must_use]
    pub fn decode(event: &LoggingEvent) -> Self {
        let mut sample = Self {
            timestamp_ms: event.timestamp_ms,
            v_bat: 0.0,
            i_bat_ma: 0.0,
            t_bat: 0.0,
            soc: f64::NAN,
            tte_s: f64::NAN,
            ttf_s: f64::NAN,
        };

        for (key, value) in key_value_pairs(&event.message) {
            let number = value.parse::<f64>();
            match key {
                "vbat" => sample.v_bat = fixed(2, number.unwrap_or(0.0)),
                // the shell reports amps; the UI works in mA
                "ibat" => sample.i_bat_ma = fixed(2, number.unwrap_or(0.0) * 1000.0),
                "tbat" => sample.t_bat = fixed(1, number.unwrap_or(0.0)),
                "soc" => {
                    sample.soc = number
                        .map(|v| fixed(1, v).clamp(0.0, 100.0))
                        .unwrap_or(f64::NAN);
                }
                "tte" => sample.tte_s = number.unwrap_or(f64::NAN),
                "ttf" => sample.ttf_s = number.unwrap_or(f64::NAN),
                _ => {}
            }
        }

        sample
    }
}

/// Round to `dp` decimal places
fn fixed(dp: i32, value: f64) -> f64 {
    let factor = 10f64.powi(dp);
    (value * factor).round() / factor
}

/// Decoded charging-status bitfield (`npmx charger status`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChargingStatus {
    pub battery_full: bool,
    pub trickle_charge: bool,
    pub constant_current_charging: bool,
    pub constant_voltage_charging: bool,
    pub battery_recharge_needed: bool,
    pub die_temp_high: bool,
    pub supplement_mode_active: bool,
}

impl ChargingStatus {
    /// Decode the status byte (bit 0 is reserved for battery detection)
    #[must_use]
    pub fn from_status_value(value: u8) -> Self {
        Self {
            battery_full: value & STATUS_BATTERY_FULL != 0,
            trickle_charge: value & STATUS_TRICKLE_CHARGE != 0,
            constant_current_charging: value & STATUS_CONSTANT_CURRENT != 0,
            constant_voltage_charging: value & STATUS_CONSTANT_VOLTAGE != 0,
            battery_recharge_needed: value & STATUS_RECHARGE_NEEDED != 0,
            die_temp_high: value & STATUS_DIE_TEMP_HIGH != 0,
            supplement_mode_active: value & STATUS_SUPPLEMENT_MODE != 0,
        }
    }
}

/// One `module_pmic_irq` event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrqEvent {
    /// IRQ register group (e.g. `EVENTSVBUSIN0SET`)
    pub kind: String,

    /// Event bit name (e.g. `EVENTVBUSDETECTED`)
    pub event: String,
}

impl IrqEvent {
    /// Decode a `module_pmic_irq` event
    #[must_use]
    pub fn decode(event: &LoggingEvent) -> Self {
        let mut irq = Self::default();
        for (key, value) in key_value_pairs(&event.message) {
            match key {
                "type" => irq.kind = value.to_string(),
                "bit" => irq.event = value.to_string(),
                _ => {}
            }
        }
        irq
    }
}

/// One `module_cc_profiling` data record
///
/// `seq` restarts at 1 for every segment of the profile, which is how
/// consumers detect the transition from rest into load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilingEvent {
    /// Milliseconds since device boot
    pub timestamp_ms: u64,

    /// Load current in amperes (negative while discharging)
    pub i_load: f64,

    /// Load voltage in volts
    pub v_load: f64,

    /// Battery temperature in °C
    pub t_bat: f64,

    /// Completed cycle count within the current segment
    pub cycle: u32,

    /// Report sequence number within the current segment (starts at 1)
    pub seq: u32,

    /// Charge counter reading
    pub chg: f64,

    /// Report index
    pub rep: u32,

    /// Segment-relative start time in ms
    pub t0: f64,

    /// Segment-relative end time in ms
    pub t1: f64,
}

impl ProfilingEvent {
    /// Decode a `module_cc_profiling` data record
    #[must_use]
    pub fn decode(event: &LoggingEvent) -> Self {
        let mut record = Self {
            timestamp_ms: event.timestamp_ms,
            i_load: 0.0,
            v_load: 0.0,
            t_bat: 0.0,
            cycle: 0,
            seq: 0,
            chg: 0.0,
            rep: 0,
            t0: 0.0,
            t1: 0.0,
        };

        for (key, value) in key_value_pairs(&event.message) {
            let float = value.parse::<f64>().unwrap_or(0.0);
            let int = value.parse::<u32>().unwrap_or(0);
            match key {
                "iload" => record.i_load = float,
                "vload" => record.v_load = float,
                "tbat" => record.t_bat = float,
                "cycle" => record.cycle = int,
                "seq" => record.seq = int,
                "chg" => record.chg = float,
                "rep" => record.rep = int,
                "t0" => record.t0 = float,
                "t1" => record.t1 = float,
                _ => {}
            }
        }

        record
    }
}

/// Terminal/control state of a profiling run, reported by the firmware as a
/// bare token on `module_cc_profiling` (data records carry `key=value`
/// pairs instead)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcProfilingState {
    /// All configured cycles finished (success)
    Ready,

    /// Voltage cutoff reached (success)
    VCutOff,

    /// Die temperature terminated the run (failure)
    ThermalError,

    /// Power-loss warning fired (contextual, see the sequencer)
    Pof,
}

impl CcProfilingState {
    /// Match a control message against the known state tokens
    #[must_use]
    pub fn from_message(message: &str) -> Option<Self> {
        match message.trim() {
            "Ready" => Some(Self::Ready),
            "vCutOff" => Some(Self::VCutOff),
            "ThermalError" => Some(Self::ThermalError),
            "POF" => Some(Self::Pof),
            _ => None,
        }
    }
}

/// ADC sampling configuration read back from `npm_adc sample`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcSampleSettings {
    /// Interval between samples in ms
    pub sample_interval_ms: u32,

    /// Interval between reports in ms
    pub report_interval_ms: u32,
}

impl Default for AdcSampleSettings {
    fn default() -> Self {
        Self {
            sample_interval_ms: 1000,
            report_interval_ms: 2000,
        }
    }
}

impl AdcSampleSettings {
    /// Parse `... : sample interval=1000 ms, report interval=2000 ms`
    #[must_use]
    pub fn parse(answer: &str) -> Self {
        let mut settings = Self::default();
        for (key, value) in key_value_pairs(parse_colon_based_answer(answer)) {
            let number = value
                .split_whitespace()
                .next()
                .and_then(|token| token.parse::<u32>().ok());
            match (key, number) {
                ("sample interval", Some(n)) => settings.sample_interval_ms = n,
                ("report interval", Some(n)) => settings.report_interval_ms = n,
                _ => {}
            }
        }
        settings
    }
}

/// One temperature/capacity characterization point of a battery model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryModelCharacterization {
    /// Characterization temperature in °C
    pub temperature: f64,

    /// Measured capacity in mAh
    pub capacity_mah: f64,
}

/// One battery model as listed by `fuel_gauge model list`
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryModel {
    pub name: String,
    pub characterizations: Vec<BatteryModelCharacterization>,
    /// Database slot for stored models, `None` for hardcoded ones
    pub slot_index: Option<u8>,
}

/// Parse one `name="...",T={...},Q={...}` battery model line.
///
/// Characterizations are listed coldest-first on the wire and reported
/// warmest-first, matching the order the control panel displays them in.
#[must_use]
pub fn parse_battery_model(line: &str) -> Option<BatteryModel> {
    let line = line.trim();
    let name = line
        .split_once("name=\"")
        .and_then(|(_, rest)| rest.split_once('"'))
        .map(|(name, _)| name.to_string())?;
    if name.is_empty() {
        return None;
    }

    let braced = |tag: &str| -> Vec<f64> {
        line.split_once(tag)
            .and_then(|(_, rest)| rest.split_once('}'))
            .map(|(body, _)| {
                body.split(',')
                    .filter_map(|item| {
                        item.trim()
                            .split_whitespace()
                            .next()
                            .and_then(|token| token.parse::<f64>().ok())
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    let temperatures = braced("T={");
    let capacities = braced("Q={");

    let characterizations = temperatures
        .into_iter()
        .zip(capacities)
        .rev()
        .map(|(temperature, capacity_mah)| BatteryModelCharacterization {
            temperature,
            capacity_mah,
        })
        .collect();

    Some(BatteryModel {
        name,
        characterizations,
        slot_index: None,
    })
}

/// Parse the `Hardcoded battery models:` section of `fuel_gauge model list`.
#[must_use]
pub fn parse_hardcoded_battery_models(response: &str) -> Vec<BatteryModel> {
    let mut in_section = false;
    let mut models = Vec::new();

    for line in response.lines() {
        let line = line.trim();
        if line.starts_with("Hardcoded battery models:") {
            in_section = true;
            continue;
        }
        if in_section {
            if line.ends_with(':') {
                break;
            }
            if let Some(model) = parse_battery_model(line) {
                models.push(model);
            }
        }
    }

    models
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::logline::parse_log_line;

    fn adc_event(message: &str) -> LoggingEvent {
        parse_log_line(&format!("[00:01:00.000,000] <inf> module_pmic_adc: {message}"))
            .unwrap()
    }

    #[test]
    fn test_decode_adc_sample() {
        let sample = AdcSample::decode(&adc_event(
            "vbat=4.151,ibat=-0.0912,tbat=23.44,soc=87.55,tte=5121,ttf=nan",
        ));

        assert_eq!(sample.timestamp_ms, 60_000);
        assert_eq!(sample.v_bat, 4.15);
        assert_eq!(sample.i_bat_ma, -91.2);
        assert_eq!(sample.t_bat, 23.4);
        assert_eq!(sample.soc, 87.6);
        assert_eq!(sample.tte_s, 5121.0);
        assert!(sample.ttf_s.is_nan());
    }

    #[test]
    fn test_decode_adc_sample_defaults_and_unknown_keys() {
        // missing keys default, unknown keys are ignored, bad numbers do not abort
        let sample = AdcSample::decode(&adc_event("vbat=4.2,ibat=garbage,extra=1"));
        assert_eq!(sample.v_bat, 4.2);
        assert_eq!(sample.i_bat_ma, 0.0);
        assert_eq!(sample.t_bat, 0.0);
        assert!(sample.soc.is_nan());
    }

    #[test]
    fn test_adc_soc_is_clamped() {
        assert_eq!(AdcSample::decode(&adc_event("soc=104.2")).soc, 100.0);
        assert_eq!(AdcSample::decode(&adc_event("soc=-3.0")).soc, 0.0);
    }

    #[test]
    fn test_charging_status_bitmask_table() {
        // 0b01011010: batteryFull, constant current, constant voltage, die temp high
        let status = ChargingStatus::from_status_value(0b0101_1010);
        assert!(status.battery_full);
        assert!(!status.trickle_charge);
        assert!(status.constant_current_charging);
        assert!(status.constant_voltage_charging);
        assert!(!status.battery_recharge_needed);
        assert!(status.die_temp_high);
        assert!(!status.supplement_mode_active);

        // 0b00000100: trickle charging only
        let status = ChargingStatus::from_status_value(0b0000_0100);
        assert_eq!(
            status,
            ChargingStatus {
                trickle_charge: true,
                ..ChargingStatus::default()
            }
        );

        // 0b10100000: recharge needed + supplement mode
        let status = ChargingStatus::from_status_value(0b1010_0000);
        assert_eq!(
            status,
            ChargingStatus {
                battery_recharge_needed: true,
                supplement_mode_active: true,
                ..ChargingStatus::default()
            }
        );

        // bit 0 is reserved and never sets a flag
        assert_eq!(
            ChargingStatus::from_status_value(0b0000_0001),
            ChargingStatus::default()
        );
    }

    #[test]
    fn test_decode_irq_event() {
        let event = parse_log_line(
            "[00:00:10.000,000] <inf> module_pmic_irq: type=EVENTSVBUSIN0SET,bit=EVENTVBUSDETECTED",
        )
        .unwrap();
        let irq = IrqEvent::decode(&event);
        assert_eq!(irq.kind, "EVENTSVBUSIN0SET");
        assert_eq!(irq.event, "EVENTVBUSDETECTED");
    }

    #[test]
    fn test_decode_profiling_event() {
        let event = parse_log_line(
            "[00:10:00.000,000] <inf> module_cc_profiling: iload=-0.5,vload=3.95,tbat=24.1,cycle=2,seq=1,chg=12.5,rep=601,t0=0,t1=1000",
        )
        .unwrap();
        let record = ProfilingEvent::decode(&event);
        assert_eq!(record.i_load, -0.5);
        assert_eq!(record.v_load, 3.95);
        assert_eq!(record.t_bat, 24.1);
        assert_eq!(record.cycle, 2);
        assert_eq!(record.seq, 1);
        assert_eq!(record.rep, 601);
    }

    #[test]
    fn test_cc_profiling_state_tokens() {
        assert_eq!(CcProfilingState::from_message("Ready"), Some(CcProfilingState::Ready));
        assert_eq!(CcProfilingState::from_message("vCutOff"), Some(CcProfilingState::VCutOff));
        assert_eq!(
            CcProfilingState::from_message("ThermalError"),
            Some(CcProfilingState::ThermalError)
        );
        assert_eq!(CcProfilingState::from_message("POF"), Some(CcProfilingState::Pof));
        assert_eq!(CcProfilingState::from_message("iload=1,seq=2"), None);
    }

    #[test]
    fn test_parse_adc_sample_settings() {
        let settings =
            AdcSampleSettings::parse("npm_adc sample: sample interval=500 ms, report interval=1000 ms");
        assert_eq!(settings.sample_interval_ms, 500);
        assert_eq!(settings.report_interval_ms, 1000);

        // unknown shape falls back to defaults
        let settings = AdcSampleSettings::parse("whatever");
        assert_eq!(settings, AdcSampleSettings::default());
    }

    #[test]
    fn test_parse_battery_model() {
        let model = parse_battery_model(
            r#"name="LP803448",T={5.00 C,25.00 C,45.00 C},Q={1413.40 mAh,1518.28 mAh,1500.11 mAh}"#,
        )
        .unwrap();

        assert_eq!(model.name, "LP803448");
        assert_eq!(model.slot_index, None);
        assert_eq!(model.characterizations.len(), 3);
        // warmest characterization first
        assert_eq!(model.characterizations[0].temperature, 45.0);
        assert_eq!(model.characterizations[0].capacity_mah, 1500.11);
        assert_eq!(model.characterizations[2].temperature, 5.0);
        assert_eq!(model.characterizations[2].capacity_mah, 1413.4);
    }

    #[test]
    fn test_parse_battery_model_rejects_junk() {
        assert!(parse_battery_model("Slot 0: Empty").is_none());
        assert!(parse_battery_model("").is_none());
    }

    #[test]
    fn test_parse_hardcoded_battery_models() {
        let response = r#"Currently active battery model:
        name="LP803448",T={5.00 C,25.00 C,45.00 C},Q={1413.40 mAh,1518.28 mAh,1500.11 mAh}
Hardcoded battery models:
        name="LP803448",T={5.00 C,25.00 C,45.00 C},Q={1413.40 mAh,1518.28 mAh,1500.11 mAh}
        name="LP502540",T={25.00 C},Q={563.08 mAh}
Battery models stored in database:
        Slot 0: Empty
        Slot 1: Empty
        Slot 2: Empty"#;

        let models = parse_hardcoded_battery_models(response);
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "LP803448");
        assert_eq!(models[1].name, "LP502540");
        assert_eq!(models[1].characterizations.len(), 1);
        assert_eq!(models[1].characterizations[0].capacity_mah, 563.08);
    }
}
