//! # Bulk Configuration Applier
//!
//! Imports a JSON-serializable [`DeviceConfig`] onto the device. The
//! charger is applied strictly sequentially (its writes depend on each
//! other — charging goes off before limits change), the indexed domains
//! run in parallel with their own fields sequential, and the singleton
//! domains follow sequentially. Every write failure is caught and logged;
//! application never rolls back and never aborts early.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::buck::{BuckMode, BuckModeControl};
use super::charger::NtcThermistor;
use super::gpio::{GpioMode, GpioPull};
use super::ldo::LdoMode;
use super::led::LedMode;
use super::pof::PofPolarity;
use super::timer::{TimerMode, TimerPrescaler};
use super::{PmicDevice, DEVICE_TYPE};
use crate::error::{PmicBridgeError, Result};

/// Confirmation id of the firmware-mismatch gate
const CONFIG_MISMATCH_DIALOG_ID: &str = "pmic1300-load-config-mismatch";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargerConfig {
    pub v_term: f64,
    pub i_chg: f64,
    pub enabled: bool,
    pub i_term: f64,
    pub enable_recharging: bool,
    pub enable_v_bat_low: bool,
    pub v_trickle_fast: f64,
    pub ntc_thermistor: NtcThermistor,
    pub ntc_beta: u32,
    pub t_chg_resume: f64,
    pub t_chg_stop: f64,
    pub v_term_r: f64,
    pub t_cold: f64,
    pub t_cool: f64,
    pub t_warm: f64,
    pub t_hot: f64,
    pub bat_lim: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuckConfig {
    pub v_out_normal: f64,
    pub v_out_retention: f64,
    pub mode: BuckMode,
    pub enabled: bool,
    pub mode_control: BuckModeControl,
    pub on_off_control: Option<u8>,
    pub retention_control: Option<u8>,
    pub active_discharge: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LdoConfig {
    pub voltage: f64,
    pub enabled: bool,
    pub mode: LdoMode,
    pub soft_start_enabled: bool,
    pub soft_start: u32,
    pub active_discharge: bool,
    pub on_off_control: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpioConfig {
    pub mode: GpioMode,
    pub pull: GpioPull,
    pub drive: u8,
    pub open_drain: bool,
    pub debounce: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedConfig {
    pub mode: LedMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PofConfig {
    pub enable: bool,
    pub polarity: PofPolarity,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    pub mode: TimerMode,
    pub prescaler: TimerPrescaler,
    pub period: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipConfig {
    pub time_to_active: u32,
    pub inv_polarity: bool,
    pub long_press_reset: bool,
    pub two_button_reset: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbPowerConfig {
    pub current_limiter: f64,
}

/// Complete exported device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub device_type: String,
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub charger: Option<ChargerConfig>,
    #[serde(default)]
    pub bucks: Vec<BuckConfig>,
    #[serde(default)]
    pub ldos: Vec<LdoConfig>,
    #[serde(default)]
    pub gpios: Vec<GpioConfig>,
    #[serde(default)]
    pub leds: Vec<LedConfig>,
    #[serde(default)]
    pub pof: Option<PofConfig>,
    #[serde(default)]
    pub timer_config: Option<TimerConfig>,
    #[serde(default)]
    pub ship: Option<ShipConfig>,
    #[serde(default)]
    pub fuel_gauge: Option<bool>,
    #[serde(default)]
    pub usb_power: Option<UsbPowerConfig>,
}

impl DeviceConfig {
    /// Parse an exported configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PmicBridgeError::ConfigRejected(format!("invalid configuration: {e}")))
    }
}

/// Log-and-continue wrapper for one bulk-apply write
fn note_failure(what: &str, result: Result<()>) {
    if let Err(e) = result {
        error!("Config apply: {what} failed: {e}");
    }
}

impl PmicDevice {
    /// Apply a bulk configuration import.
    ///
    /// Rejects without touching the device when the config targets another
    /// device type or carries no firmware version; a differing firmware
    /// version asks the confirmation collaborator, and cancel resolves
    /// with nothing applied.
    pub async fn apply_config(&self, config: &DeviceConfig) -> Result<()> {
        if config.device_type != DEVICE_TYPE {
            return Err(PmicBridgeError::ConfigRejected(format!(
                "configuration targets device type {:?}, this device is {DEVICE_TYPE:?}",
                config.device_type
            )));
        }

        let Some(firmware_version) = &config.firmware_version else {
            return Err(PmicBridgeError::ConfigRejected(
                "configuration carries no firmware version".to_string(),
            ));
        };

        if firmware_version != self.supported_version() {
            let confirmed = self
                .confirm_destructive(
                    CONFIG_MISMATCH_DIALOG_ID,
                    format!(
                        "The configuration was intended for firmware version {firmware_version}. \
                         The device is running {}. Do you still want to apply this configuration?",
                        self.supported_version()
                    ),
                )
                .await;
            if !confirmed {
                return Err(PmicBridgeError::ConfigRejected(
                    "cancelled by the operator".to_string(),
                ));
            }
        }

        info!("Applying bulk configuration");
        self.apply_all(config).await;
        Ok(())
    }

    async fn apply_all(&self, config: &DeviceConfig) {
        if let Some(charger) = &config.charger {
            self.apply_charger(charger).await;
        }

        // indexed domains: blocks in parallel, fields sequential per block
        let bucks = config.bucks.iter().take(self.counts().bucks);
        let handles: Vec<_> = bucks
            .cloned()
            .enumerate()
            .map(|(index, buck)| {
                let device = self.clone();
                tokio::spawn(async move { device.apply_buck(index, &buck).await })
            })
            .collect();
        for handle in handles {
            let _ = handle.await;
        }

        let ldos = config.ldos.iter().take(self.counts().ldos);
        let handles: Vec<_> = ldos
            .cloned()
            .enumerate()
            .map(|(index, ldo)| {
                let device = self.clone();
                tokio::spawn(async move { device.apply_ldo(index, &ldo).await })
            })
            .collect();
        for handle in handles {
            let _ = handle.await;
        }

        let gpios = config.gpios.iter().take(self.counts().gpios);
        let handles: Vec<_> = gpios
            .cloned()
            .enumerate()
            .map(|(index, gpio)| {
                let device = self.clone();
                tokio::spawn(async move { device.apply_gpio(index, &gpio).await })
            })
            .collect();
        for handle in handles {
            let _ = handle.await;
        }

        let leds = config.leds.iter().take(self.counts().leds);
        let handles: Vec<_> = leds
            .cloned()
            .enumerate()
            .map(|(index, led)| {
                let device = self.clone();
                tokio::spawn(
                    async move { note_failure("led mode", device.set_led_mode(index, led.mode).await) },
                )
            })
            .collect();
        for handle in handles {
            let _ = handle.await;
        }

        if let Some(pof) = &config.pof {
            note_failure("pof enable", self.set_pof_enabled(pof.enable).await);
            note_failure("pof polarity", self.set_pof_polarity(pof.polarity).await);
            note_failure("pof threshold", self.set_pof_threshold(pof.threshold).await);
        }

        if let Some(timer) = &config.timer_config {
            note_failure("timer mode", self.set_timer_mode(timer.mode).await);
            note_failure("timer prescaler", self.set_timer_prescaler(timer.prescaler).await);
            note_failure("timer period", self.set_timer_period(timer.period).await);
        }

        if let Some(ship) = &config.ship {
            note_failure(
                "ship time to active",
                self.set_ship_mode_time_to_active(ship.time_to_active).await,
            );
            note_failure(
                "ship invert polarity",
                self.set_ship_invert_polarity(ship.inv_polarity).await,
            );
            note_failure(
                "ship long press reset",
                self.set_ship_long_press_reset(ship.long_press_reset).await,
            );
            note_failure(
                "ship two button reset",
                self.set_ship_two_button_reset(ship.two_button_reset).await,
            );
        }

        if let Some(fuel_gauge) = config.fuel_gauge {
            note_failure("fuel gauge", self.set_fuel_gauge_enabled(fuel_gauge).await);
        }

        if let Some(usb) = &config.usb_power {
            note_failure(
                "usb current limiter",
                self.set_vbusin_current_limiter(usb.current_limiter).await,
            );
        }
    }

    async fn apply_charger(&self, charger: &ChargerConfig) {
        note_failure("charger vTerm", self.set_charger_v_term(charger.v_term).await);
        note_failure("charger iChg", self.set_charger_i_chg(charger.i_chg).await);
        note_failure("charger iTerm", self.set_charger_i_term(charger.i_term).await);
        note_failure(
            "charger recharging",
            self.set_charger_enabled_recharging(charger.enable_recharging).await,
        );
        note_failure(
            "charger vbatlow",
            self.set_charger_enabled_v_bat_low(charger.enable_v_bat_low).await,
        );
        note_failure(
            "charger vTrickleFast",
            self.set_charger_v_trickle_fast(charger.v_trickle_fast).await,
        );
        note_failure(
            "charger ntc thermistor",
            self.set_charger_ntc_thermistor(charger.ntc_thermistor).await,
        );
        note_failure("charger ntc beta", self.set_charger_ntc_beta(charger.ntc_beta).await);
        note_failure("charger batLim", self.set_charger_bat_lim(charger.bat_lim).await);
        note_failure(
            "charger tChgResume",
            self.set_charger_t_chg_resume(charger.t_chg_resume).await,
        );
        note_failure(
            "charger tChgStop",
            self.set_charger_t_chg_stop(charger.t_chg_stop).await,
        );
        note_failure("charger vTermR", self.set_charger_v_term_r(charger.v_term_r).await);
        note_failure("charger tCold", self.set_charger_t_cold(charger.t_cold).await);
        note_failure("charger tCool", self.set_charger_t_cool(charger.t_cool).await);
        note_failure("charger tWarm", self.set_charger_t_warm(charger.t_warm).await);
        note_failure("charger tHot", self.set_charger_t_hot(charger.t_hot).await);
        note_failure("charger enabled", self.set_charger_enabled(charger.enabled).await);
    }

    async fn apply_buck(&self, index: usize, buck: &BuckConfig) {
        note_failure(
            "buck vOutNormal",
            self.set_buck_v_out_normal(index, buck.v_out_normal).await,
        );
        note_failure("buck enabled", self.set_buck_enabled(index, buck.enabled).await);
        note_failure(
            "buck modeControl",
            self.set_buck_mode_control(index, buck.mode_control).await,
        );
        note_failure(
            "buck vOutRetention",
            self.set_buck_v_out_retention(index, buck.v_out_retention).await,
        );
        note_failure(
            "buck retentionControl",
            self.set_buck_retention_control(index, buck.retention_control).await,
        );
        note_failure(
            "buck onOffControl",
            self.set_buck_on_off_control(index, buck.on_off_control).await,
        );
        note_failure(
            "buck activeDischarge",
            self.set_buck_active_discharge(index, buck.active_discharge).await,
        );
        note_failure("buck mode", self.set_buck_mode(index, buck.mode).await);
    }

    async fn apply_ldo(&self, index: usize, ldo: &LdoConfig) {
        note_failure("ldo voltage", self.set_ldo_voltage(index, ldo.voltage).await);
        note_failure("ldo enabled", self.set_ldo_enabled(index, ldo.enabled).await);
        note_failure(
            "ldo softStartEnabled",
            self.set_ldo_soft_start_enabled(index, ldo.soft_start_enabled).await,
        );
        note_failure("ldo softStart", self.set_ldo_soft_start(index, ldo.soft_start).await);
        note_failure(
            "ldo activeDischarge",
            self.set_ldo_active_discharge(index, ldo.active_discharge).await,
        );
        note_failure(
            "ldo onOffControl",
            self.set_ldo_on_off_control(index, ldo.on_off_control).await,
        );
        note_failure("ldo mode", self.set_ldo_mode(index, ldo.mode).await);
    }

    async fn apply_gpio(&self, index: usize, gpio: &GpioConfig) {
        note_failure("gpio mode", self.set_gpio_mode(index, gpio.mode).await);
        note_failure("gpio pull", self.set_gpio_pull(index, gpio.pull).await);
        note_failure("gpio drive", self.set_gpio_drive(index, gpio.drive).await);
        note_failure("gpio openDrain", self.set_gpio_open_drain(index, gpio.open_drain).await);
        note_failure("gpio debounce", self.set_gpio_debounce(index, gpio.debounce).await);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testutil::{attached, attached_with};
    use crate::device::{Confirmation, MockConfirmationHandler, SessionConfig};
    use std::sync::Arc;

    fn sample_config() -> DeviceConfig {
        DeviceConfig {
            device_type: DEVICE_TYPE.to_string(),
            firmware_version: Some(crate::device::SUPPORTED_FW_VERSION.to_string()),
            charger: Some(ChargerConfig {
                v_term: 4.2,
                i_chg: 400.0,
                enabled: true,
                i_term: 10.0,
                enable_recharging: true,
                enable_v_bat_low: false,
                v_trickle_fast: 2.9,
                ntc_thermistor: NtcThermistor::Ntc10k,
                ntc_beta: 3380,
                t_chg_resume: 100.0,
                t_chg_stop: 110.0,
                v_term_r: 4.0,
                t_cold: 0.0,
                t_cool: 10.0,
                t_warm: 45.0,
                t_hot: 60.0,
                bat_lim: 1000.0,
            }),
            bucks: vec![BuckConfig {
                v_out_normal: 1.8,
                v_out_retention: 1.2,
                mode: BuckMode::Software,
                enabled: true,
                mode_control: BuckModeControl::Auto,
                on_off_control: None,
                retention_control: None,
                active_discharge: false,
            }],
            ldos: vec![LdoConfig {
                voltage: 3.0,
                enabled: false,
                mode: LdoMode::Ldo,
                soft_start_enabled: true,
                soft_start: 20,
                active_discharge: false,
                on_off_control: None,
            }],
            gpios: vec![GpioConfig {
                mode: GpioMode::Input,
                pull: GpioPull::NoPull,
                drive: 1,
                open_drain: false,
                debounce: false,
            }],
            leds: vec![LedConfig {
                mode: LedMode::Charging,
            }],
            pof: Some(PofConfig {
                enable: true,
                polarity: PofPolarity::ActiveHigh,
                threshold: 2.8,
            }),
            timer_config: Some(TimerConfig {
                mode: TimerMode::Wakeup,
                prescaler: TimerPrescaler::Slow,
                period: 1000,
            }),
            ship: Some(ShipConfig {
                time_to_active: 96,
                inv_polarity: false,
                long_press_reset: true,
                two_button_reset: true,
            }),
            fuel_gauge: Some(false),
            usb_power: Some(UsbPowerConfig { current_limiter: 0.5 }),
        }
    }

    #[tokio::test]
    async fn test_wrong_device_type_rejects_without_writes() {
        let harness = attached();
        let mut config = sample_config();
        config.device_type = "npm9999".to_string();

        let result = harness.device.apply_config(&config).await;
        assert!(matches!(result, Err(PmicBridgeError::ConfigRejected(_))));
        harness.settle().await;
        assert!(harness.mock.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_firmware_version_rejects_without_writes() {
        let harness = attached();
        let mut config = sample_config();
        config.firmware_version = None;

        let result = harness.device.apply_config(&config).await;
        assert!(matches!(result, Err(PmicBridgeError::ConfigRejected(_))));
        harness.settle().await;
        assert!(harness.mock.sent().is_empty());
    }

    #[tokio::test]
    async fn test_version_mismatch_cancel_applies_nothing() {
        let mut confirm = MockConfirmationHandler::new();
        confirm
            .expect_confirm()
            .times(1)
            .returning(|_| Confirmation::Cancel);
        let harness = attached_with(
            Some(Arc::new(confirm) as Arc<dyn crate::device::ConfirmationHandler>),
            SessionConfig::default(),
        );

        let mut config = sample_config();
        config.firmware_version = Some("0.9.0+1".to_string());

        let result = harness.device.apply_config(&config).await;
        assert!(matches!(result, Err(PmicBridgeError::ConfigRejected(_))));

        // zero writes for every domain
        harness.settle().await;
        assert!(harness.mock.sent().is_empty());
    }

    #[tokio::test]
    async fn test_apply_orders_charger_before_parallel_domains() {
        let harness = attached();
        let responder = harness.spawn_auto_responder();

        harness.device.apply_config(&sample_config()).await.unwrap();
        responder.abort();

        let sent = harness.mock.sent();
        assert!(!sent.is_empty());

        let first_buck = sent
            .iter()
            .position(|c| c.contains("buck"))
            .expect("buck commands present");
        let last_charger = sent
            .iter()
            .rposition(|c| c.starts_with("npmx charger") || c.starts_with("powerup_charger"))
            .expect("charger commands present");
        assert!(
            last_charger < first_buck,
            "charger writes must complete before any buck write"
        );

        // singleton domains follow the indexed ones
        let first_pof = sent.iter().position(|c| c.starts_with("npmx pof")).unwrap();
        let last_ldo = sent.iter().rposition(|c| c.starts_with("npmx ldsw")).unwrap();
        let last_gpio = sent.iter().rposition(|c| c.starts_with("npmx gpio")).unwrap();
        assert!(last_ldo < first_pof);
        assert!(last_gpio < first_pof);

        // the final sequential tail keeps its order
        let fuel = sent.iter().position(|c| c == "fuel_gauge set 0").unwrap();
        let usb = sent
            .iter()
            .position(|c| c == "npmx vbusin current_limit set 500")
            .unwrap();
        assert!(first_pof < fuel);
        assert!(fuel < usb);
    }

    #[tokio::test]
    async fn test_single_write_failure_does_not_abort_the_rest() {
        let harness = attached();

        let device = harness.device.clone();
        let apply = tokio::spawn(async move {
            let mut config = sample_config();
            config.charger = None;
            config.bucks.clear();
            config.ldos.clear();
            config.gpios.clear();
            config.leds.clear();
            config.timer_config = None;
            config.ship = None;
            config.fuel_gauge = None;
            config.usb_power = None;
            device.apply_config(&config).await
        });

        // pof enable fails; polarity and threshold still go out (the
        // reconciliation read slots in wherever the scheduler puts it)
        assert_eq!(
            harness.respond_next(&["error: busy"]).await,
            "npmx pof status set 1"
        );

        let mut set_commands = Vec::new();
        while set_commands.len() < 2 {
            let command = harness.respond_next(&["Value: 0"]).await;
            if !command.ends_with("get") {
                set_commands.push(command);
            }
        }
        assert_eq!(
            set_commands,
            vec!["npmx pof polarity set 1", "npmx pof threshold set 2800"]
        );

        assert!(apply.await.unwrap().is_ok());
    }

    #[test]
    fn test_device_config_json_round_trip() {
        let config = sample_config();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"deviceType\": \"npm1300\""));
        assert!(json.contains("\"firmwareVersion\""));
        assert!(json.contains("\"vTerm\": 4.2"));

        let parsed = DeviceConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_json_is_config_rejected() {
        let result = DeviceConfig::from_json("{\"deviceType\": 12}");
        assert!(matches!(result, Err(PmicBridgeError::ConfigRejected(_))));
    }
}
