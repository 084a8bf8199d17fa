//! # Event Bus
//!
//! Typed publish/subscribe fan-out from the device session to the UI/store
//! collaborator: one broadcast channel per event category, scoped to the
//! session object. Subscribing returns a plain `broadcast::Receiver`;
//! dropping it is the unsubscribe.
//!
//! Lagging subscribers lose the oldest events rather than stalling the
//! session (telemetry consumers only keep the most recent value anyway).

use tokio::sync::broadcast;

use super::buck::BuckUpdate;
use super::charger::ChargerUpdate;
use super::fuel_gauge::FuelGaugeUpdate;
use super::gpio::GpioUpdate;
use super::ldo::LdoUpdate;
use super::led::LedUpdate;
use super::pof::PofUpdate;
use super::ship_mode::ShipModeUpdate;
use super::state::PmicState;
use super::timer::TimerUpdate;
use super::usb_power::UsbPowerUpdate;
use crate::protocol::telemetry::{
    AdcSample, AdcSampleSettings, CcProfilingState, ChargingStatus, ProfilingEvent,
};
use crate::protocol::LoggingEvent;

/// Buffered events per category before a slow subscriber starts lagging
const BUS_CAPACITY: usize = 128;

/// A decoded log line plus whether its payload is a `key=value` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingRecord {
    pub event: LoggingEvent,
    pub data_pair: bool,
}

/// Partial update of an indexed domain (buck 1, LDO 0, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct PartialUpdate<T> {
    pub index: usize,
    pub data: T,
}

/// Severity of an operator-facing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Warning,
    Danger,
    Success,
}

/// Discrete, leveled message for the UI collaborator; the core never
/// dictates rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
}

impl Alert {
    #[must_use]
    pub fn new(level: AlertLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// One section of the device's error log readback (`npmx errlog check`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLogs {
    ResetCause(Vec<String>),
    ChargerError(Vec<String>),
    SensorError(Vec<String>),
}

macro_rules! bus_channel {
    ($field:ident, $subscribe:ident, $emit:ident, $ty:ty) => {
        pub fn $subscribe(&self) -> broadcast::Receiver<$ty> {
            self.$field.subscribe()
        }

        pub(crate) fn $emit(&self, value: $ty) {
            // no receivers is fine; events are best-effort fan-out
            let _ = self.$field.send(value);
        }
    };
}

/// Per-category broadcast channels for one device session
#[derive(Clone)]
pub struct EventBus {
    logging: broadcast::Sender<LoggingRecord>,
    adc: broadcast::Sender<AdcSample>,
    adc_settings: broadcast::Sender<AdcSampleSettings>,
    charging_status: broadcast::Sender<ChargingStatus>,
    pmic_state: broadcast::Sender<PmicState>,
    charger: broadcast::Sender<ChargerUpdate>,
    buck: broadcast::Sender<PartialUpdate<BuckUpdate>>,
    ldo: broadcast::Sender<PartialUpdate<LdoUpdate>>,
    gpio: broadcast::Sender<PartialUpdate<GpioUpdate>>,
    led: broadcast::Sender<PartialUpdate<LedUpdate>>,
    pof: broadcast::Sender<PofUpdate>,
    timer: broadcast::Sender<TimerUpdate>,
    ship_mode: broadcast::Sender<ShipModeUpdate>,
    fuel_gauge: broadcast::Sender<FuelGaugeUpdate>,
    usb_power: broadcast::Sender<UsbPowerUpdate>,
    usb_powered: broadcast::Sender<bool>,
    battery_connected: broadcast::Sender<bool>,
    error_logs: broadcast::Sender<ErrorLogs>,
    profiling: broadcast::Sender<ProfilingEvent>,
    profiling_active: broadcast::Sender<bool>,
    cc_state: broadcast::Sender<CcProfilingState>,
    alerts: broadcast::Sender<Alert>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        fn channel<T: Clone>() -> broadcast::Sender<T> {
            broadcast::channel(BUS_CAPACITY).0
        }

        Self {
            logging: channel(),
            adc: channel(),
            adc_settings: channel(),
            charging_status: channel(),
            pmic_state: channel(),
            charger: channel(),
            buck: channel(),
            ldo: channel(),
            gpio: channel(),
            led: channel(),
            pof: channel(),
            timer: channel(),
            ship_mode: channel(),
            fuel_gauge: channel(),
            usb_power: channel(),
            usb_powered: channel(),
            battery_connected: channel(),
            error_logs: channel(),
            profiling: channel(),
            profiling_active: channel(),
            cc_state: channel(),
            alerts: channel(),
        }
    }

    bus_channel!(logging, subscribe_logging, emit_logging, LoggingRecord);
    bus_channel!(adc, subscribe_adc, emit_adc, AdcSample);
    bus_channel!(adc_settings, subscribe_adc_settings, emit_adc_settings, AdcSampleSettings);
    bus_channel!(charging_status, subscribe_charging_status, emit_charging_status, ChargingStatus);
    bus_channel!(pmic_state, subscribe_pmic_state, emit_pmic_state, PmicState);
    bus_channel!(charger, subscribe_charger, emit_charger, ChargerUpdate);
    bus_channel!(buck, subscribe_buck, emit_buck, PartialUpdate<BuckUpdate>);
    bus_channel!(ldo, subscribe_ldo, emit_ldo, PartialUpdate<LdoUpdate>);
    bus_channel!(gpio, subscribe_gpio, emit_gpio, PartialUpdate<GpioUpdate>);
    bus_channel!(led, subscribe_led, emit_led, PartialUpdate<LedUpdate>);
    bus_channel!(pof, subscribe_pof, emit_pof, PofUpdate);
    bus_channel!(timer, subscribe_timer, emit_timer, TimerUpdate);
    bus_channel!(ship_mode, subscribe_ship_mode, emit_ship_mode, ShipModeUpdate);
    bus_channel!(fuel_gauge, subscribe_fuel_gauge, emit_fuel_gauge, FuelGaugeUpdate);
    bus_channel!(usb_power, subscribe_usb_power, emit_usb_power, UsbPowerUpdate);
    bus_channel!(usb_powered, subscribe_usb_powered, emit_usb_powered, bool);
    bus_channel!(battery_connected, subscribe_battery_connected, emit_battery_connected, bool);
    bus_channel!(error_logs, subscribe_error_logs, emit_error_logs, ErrorLogs);
    bus_channel!(profiling, subscribe_profiling, emit_profiling, ProfilingEvent);
    bus_channel!(profiling_active, subscribe_profiling_active, emit_profiling_active, bool);
    bus_channel!(cc_state, subscribe_cc_state, emit_cc_state, CcProfilingState);
    bus_channel!(alerts, subscribe_alerts, emit_alerts, Alert);
}
