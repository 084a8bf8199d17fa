//! # PMIC Device Session
//!
//! One attached (or offline) PMIC behind its shell: builds the command
//! channel, runs the event loop that decodes log traffic into typed events,
//! owns the connection state machine and the uptime-overflow counter, and
//! exposes the per-domain setting synchronizers implemented in the sibling
//! modules.
//!
//! ## Ownership
//!
//! All shared mutable session state (PmicState, overflow counter,
//! auto-reboot flag) lives inside the event-loop task; API entry points
//! read the state through a `watch` snapshot and mutate it only by message.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::{PmicBridgeError, Result};
use crate::protocol::logline::parse_log_line;
use crate::protocol::telemetry::{
    AdcSample, AdcSampleSettings, CcProfilingState, IrqEvent, ProfilingEvent,
};
use crate::protocol::{
    is_module_data_pair, LogLevel, LoggingEvent, MAX_TIMESTAMP, MODULE_CC_PROFILING, MODULE_PMIC,
    MODULE_PMIC_ADC, MODULE_PMIC_IRQ, MODULE_SHELL_COMMANDS, MSG_NO_RESPONSE, MSG_PMIC_AVAILABLE,
    MSG_POWER_FAILURE,
};
use crate::shell::channel::{ChannelConfig, CommandChannel, CommandHandle, CommandOutcome, ShellEvent};
use crate::shell::transport::ShellTransport;
use crate::shell::ResponseMatcher;

pub mod buck;
pub mod charger;
pub mod config_apply;
pub mod events;
pub mod fuel_gauge;
pub mod gpio;
pub mod ldo;
pub mod led;
pub mod pof;
pub mod ship_mode;
pub mod state;
pub mod timer;
pub mod usb_power;

use events::{ErrorLogs, EventBus, LoggingRecord};
use state::{AvailableAction, ConnectionMonitor, PmicState};

/// Device type tag carried by exported configurations
pub const DEVICE_TYPE: &str = "npm1300";

/// Firmware version this adapter was written against
pub const SUPPORTED_FW_VERSION: &str = "1.0.1+0";

/// Kernel reset command (short delay so the response still goes out)
const KERNEL_RESET_COMMAND: &str = "delayed_reboot 100";

/// Capacity of the session mailbox
const SESSION_CHANNEL_CAPACITY: usize = 32;

/// How many of each controllable block the PMIC carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCounts {
    pub chargers: usize,
    pub bucks: usize,
    pub ldos: usize,
    pub gpios: usize,
    pub leds: usize,
}

impl Default for DeviceCounts {
    fn default() -> Self {
        Self {
            chargers: 1,
            bucks: 2,
            ldos: 2,
            gpios: 5,
            leds: 3,
        }
    }
}

/// Inclusive numeric range with UI hints
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSpec {
    pub min: f64,
    pub max: f64,
    pub decimals: u8,
    pub step: f64,
}

/// Operator's answer to a confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirm,
    ConfirmAndRemember,
    Cancel,
}

/// One confirmation prompt for a destructive or risky operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    /// Stable identifier used for "don't ask again" bookkeeping
    pub id: &'static str,
    pub title: &'static str,
    pub message: String,
}

/// Async yes/no/yes-and-remember collaborator (the dialog layer)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    async fn confirm(&self, request: ConfirmationRequest) -> Confirmation;
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub channel: ChannelConfig,
    /// Reboot the application automatically when the PMIC comes back
    pub auto_reboot: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            auto_reboot: true,
        }
    }
}

/// The shell may or may not be attached; `Offline` serves the UI locally
enum ShellLink {
    Offline,
    Attached(CommandHandle),
}

enum SessionMsg {
    SetAutoReboot(bool),
    RequestKernelReset,
    /// A command response carried the PMIC-side `IO error` marker
    PmicIoError,
    /// Result of a `kernel uptime` probe, for the audit clock and the
    /// overflow counter
    SeedUptime { device_uptime_ms: u64 },
}

struct DeviceInner {
    link: ShellLink,
    bus: EventBus,
    state_rx: watch::Receiver<PmicState>,
    session_tx: mpsc::Sender<SessionMsg>,
    counts: DeviceCounts,
    confirm: Option<Arc<dyn ConfirmationHandler>>,
    remembered: Mutex<HashSet<&'static str>>,
}

/// Handle to one PMIC session; cheap to clone
#[derive(Clone)]
pub struct PmicDevice {
    inner: Arc<DeviceInner>,
}

impl PmicDevice {
    /// Create a session without a shell; all writes apply optimistically
    pub fn offline(confirm: Option<Arc<dyn ConfirmationHandler>>) -> Self {
        Self::build(ShellLink::Offline, None, SessionConfig::default(), confirm)
    }

    /// Create a session over an attached shell transport
    pub fn attach<T>(
        transport: T,
        line_rx: mpsc::Receiver<String>,
        config: SessionConfig,
        confirm: Option<Arc<dyn ConfirmationHandler>>,
    ) -> Self
    where
        T: ShellTransport + 'static,
    {
        let (handle, shell_rx) = CommandChannel::spawn(transport, line_rx, config.channel.clone());
        Self::build(ShellLink::Attached(handle), Some(shell_rx), config, confirm)
    }

    fn build(
        link: ShellLink,
        shell_rx: Option<mpsc::Receiver<ShellEvent>>,
        config: SessionConfig,
        confirm: Option<Arc<dyn ConfirmationHandler>>,
    ) -> Self {
        let initial = match link {
            ShellLink::Offline => PmicState::Offline,
            ShellLink::Attached(_) => PmicState::PmicConnected,
        };
        let (monitor, state_rx) = ConnectionMonitor::new(initial);
        let bus = EventBus::new();
        let (session_tx, session_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);

        let cmd = match &link {
            ShellLink::Offline => None,
            ShellLink::Attached(handle) => Some(handle.clone()),
        };

        tokio::spawn(
            SessionLoop {
                session_rx,
                shell_rx,
                state: SessionState {
                    monitor,
                    bus: bus.clone(),
                    cmd,
                    auto_reboot: config.auto_reboot,
                    last_raw_uptime_ms: 0,
                    overflow_counter: 0,
                    uptime_delta_ms: chrono::Utc::now().timestamp_millis(),
                },
            }
            .run(),
        );

        Self {
            inner: Arc::new(DeviceInner {
                link,
                bus,
                state_rx,
                session_tx,
                counts: DeviceCounts::default(),
                confirm,
                remembered: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Event subscriptions for the UI/store collaborator
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Current connection state snapshot
    #[must_use]
    pub fn connection_state(&self) -> PmicState {
        *self.inner.state_rx.borrow()
    }

    #[must_use]
    pub fn counts(&self) -> DeviceCounts {
        self.inner.counts
    }

    #[must_use]
    pub fn device_type(&self) -> &'static str {
        DEVICE_TYPE
    }

    #[must_use]
    pub fn supported_version(&self) -> &'static str {
        SUPPORTED_FW_VERSION
    }

    /// Enable/disable the automatic application reboot when the PMIC
    /// becomes available again
    pub async fn set_auto_reboot(&self, enabled: bool) {
        let _ = self
            .inner
            .session_tx
            .send(SessionMsg::SetAutoReboot(enabled))
            .await;
    }

    /// Operator-initiated kernel reset (used while `pmic-pending-reboot`)
    pub async fn request_kernel_reset(&self) {
        let _ = self
            .inner
            .session_tx
            .send(SessionMsg::RequestKernelReset)
            .await;
    }

    /// Hold queued commands while the shell reports busy
    pub async fn pause_commands(&self) {
        if let ShellLink::Attached(handle) = &self.inner.link {
            handle.pause().await;
        }
    }

    /// Resume sending after [`PmicDevice::pause_commands`]
    pub async fn resume_commands(&self) {
        if let ShellLink::Attached(handle) = &self.inner.link {
            handle.resume().await;
        }
    }

    /// Pull-refresh every readable setting, charger through USB power.
    ///
    /// Individual read failures are ignored; each successful read emits its
    /// usual change event, so the UI converges on whatever the device
    /// reports.
    pub async fn request_all_settings(&self) {
        let _ = self.request_pmic_charging_state().await;
        let _ = self.request_charger_v_term().await;
        let _ = self.request_charger_i_chg().await;
        let _ = self.request_charger_enabled().await;
        let _ = self.request_charger_v_trickle_fast().await;
        let _ = self.request_charger_i_term().await;
        let _ = self.request_charger_enabled_recharging().await;
        let _ = self.request_charger_enabled_v_bat_low().await;
        let _ = self.request_charger_ntc_thermistor().await;
        let _ = self.request_charger_ntc_beta().await;
        let _ = self.request_charger_t_chg_resume().await;
        let _ = self.request_charger_t_chg_stop().await;
        let _ = self.request_charger_v_term_r().await;
        let _ = self.request_charger_t_cold().await;
        let _ = self.request_charger_t_cool().await;
        let _ = self.request_charger_t_warm().await;
        let _ = self.request_charger_t_hot().await;
        let _ = self.request_charger_bat_lim().await;

        for index in 0..self.counts().bucks {
            let _ = self.request_buck_v_out_normal(index).await;
            let _ = self.request_buck_v_out_retention(index).await;
            let _ = self.request_buck_mode(index).await;
            let _ = self.request_buck_enabled(index).await;
            let _ = self.request_buck_mode_control(index).await;
            let _ = self.request_buck_on_off_control(index).await;
            let _ = self.request_buck_retention_control(index).await;
            let _ = self.request_buck_active_discharge(index).await;
        }

        for index in 0..self.counts().ldos {
            let _ = self.request_ldo_voltage(index).await;
            let _ = self.request_ldo_enabled(index).await;
            let _ = self.request_ldo_mode(index).await;
            let _ = self.request_ldo_soft_start_enabled(index).await;
            let _ = self.request_ldo_soft_start(index).await;
            let _ = self.request_ldo_active_discharge(index).await;
            let _ = self.request_ldo_on_off_control(index).await;
        }

        for index in 0..self.counts().gpios {
            let _ = self.request_gpio_mode(index).await;
            let _ = self.request_gpio_pull(index).await;
            let _ = self.request_gpio_drive(index).await;
            let _ = self.request_gpio_debounce(index).await;
            let _ = self.request_gpio_open_drain(index).await;
        }

        for index in 0..self.counts().leds {
            let _ = self.request_led_mode(index).await;
        }

        let _ = self.request_pof_enabled().await;
        let _ = self.request_pof_polarity().await;
        let _ = self.request_pof_threshold().await;
        let _ = self.request_timer_mode().await;
        let _ = self.request_timer_prescaler().await;
        let _ = self.request_timer_period().await;
        let _ = self.request_ship_mode_time_to_active().await;
        let _ = self.request_ship_invert_polarity().await;
        let _ = self.request_ship_long_press_reset().await;
        let _ = self.request_ship_two_button_reset().await;
        let _ = self.request_fuel_gauge().await;
        let _ = self.request_active_battery_model().await;
        let _ = self.request_usb_powered().await;
        let _ = self.request_vbusin_current_limiter().await;
    }

    /// Read the kernel uptime and seed the audit clock and the overflow
    /// counter from it
    pub async fn sync_uptime(&self) -> Result<u64> {
        let response = self
            .send_command("kernel uptime", ResponseMatcher::literal("kernel uptime"))
            .await?;
        let uptime_ms = crate::protocol::parse_to_number(&response)? as u64;
        let _ = self
            .inner
            .session_tx
            .send(SessionMsg::SeedUptime {
                device_uptime_ms: uptime_ms,
            })
            .await;
        Ok(uptime_ms)
    }

    /// Probe the firmware version and compare against
    /// [`SUPPORTED_FW_VERSION`]
    pub async fn is_supported_version(&self) -> Result<(bool, String)> {
        let response = self
            .send_command("app_version", ResponseMatcher::literal("app_version"))
            .await?;
        let version = response
            .split_once('=')
            .map_or(response.trim(), |(_, v)| v.trim())
            .to_string();
        Ok((version == SUPPORTED_FW_VERSION, version))
    }

    /// Start periodic ADC sampling
    pub async fn start_adc_sample(&self, report_interval_ms: u32, sample_interval_ms: u32) -> Result<()> {
        let command = format!("npm_adc sample {sample_interval_ms} {report_interval_ms}");
        let response = self
            .send_command(&command, ResponseMatcher::literal(&command))
            .await?;
        self.inner
            .bus
            .emit_adc_settings(AdcSampleSettings::parse(&response));
        Ok(())
    }

    /// Stop periodic ADC sampling
    pub async fn stop_adc_sample(&self) -> Result<()> {
        self.send_command("npm_adc sample 0", ResponseMatcher::literal("npm_adc sample 0"))
            .await?;
        Ok(())
    }

    // --- value ranges the UI may offer ---------------------------------

    /// Valid charger termination voltages in V
    #[must_use]
    pub fn charger_voltage_range(&self) -> Vec<f64> {
        get_range(&[(3.5, 3.65, 0.05), (4.0, 4.45, 0.05)])
    }

    /// Valid charger current limits in mA
    #[must_use]
    pub fn charger_current_range(&self) -> RangeSpec {
        RangeSpec {
            min: 32.0,
            max: 800.0,
            decimals: 0,
            step: 2.0,
        }
    }

    /// Valid buck output voltages in V
    #[must_use]
    pub fn buck_voltage_range(&self) -> RangeSpec {
        RangeSpec {
            min: 1.0,
            max: 3.3,
            decimals: 1,
            step: 0.1,
        }
    }

    /// Valid LDO output voltages in V
    #[must_use]
    pub fn ldo_voltage_range(&self) -> RangeSpec {
        RangeSpec {
            min: 1.0,
            max: 3.3,
            decimals: 1,
            step: 0.1,
        }
    }

    /// Valid power-loss warning thresholds in V
    #[must_use]
    pub fn pof_threshold_range(&self) -> RangeSpec {
        RangeSpec {
            min: 2.6,
            max: 3.5,
            decimals: 1,
            step: 0.1,
        }
    }

    /// Valid USB input current limits in A
    #[must_use]
    pub fn usb_current_limiter_range(&self) -> Vec<f64> {
        let mut values = vec![0.1];
        values.extend(get_range(&[(0.5, 1.5, 0.1)]));
        values
    }

    // --- internals shared by the domain synchronizers ------------------

    /// True when setters should apply optimistically instead of talking to
    /// the device
    pub(crate) fn is_offline_mode(&self) -> bool {
        self.connection_state().is_offline_mode()
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// One command round-trip through the channel, gated on the state
    /// machine.
    ///
    /// A PMIC-side `IO error` in the rejection marks the device
    /// disconnected, independent of which command failed.
    pub(crate) async fn send_command(
        &self,
        command: &str,
        matcher: ResponseMatcher,
    ) -> Result<String> {
        if self.connection_state().is_unreachable() {
            return Err(PmicBridgeError::Disconnected);
        }
        let ShellLink::Attached(handle) = &self.inner.link else {
            return Err(PmicBridgeError::Disconnected);
        };

        match handle.request(command, matcher, None, true).await {
            CommandOutcome::Success(response) => Ok(response),
            CommandOutcome::Rejected(reason) => {
                if reason.contains("IO error") {
                    let _ = self.inner.session_tx.send(SessionMsg::PmicIoError).await;
                }
                Err(PmicBridgeError::CommandRejected {
                    command: command.to_string(),
                    response: reason,
                })
            }
            CommandOutcome::TimedOut => Err(PmicBridgeError::CommandTimeout {
                command: command.to_string(),
            }),
        }
    }

    /// `get` round-trip returning the numeric payload
    pub(crate) async fn get_number(&self, command: &str, matcher: ResponseMatcher) -> Result<f64> {
        let response = self.send_command(command, matcher).await?;
        crate::protocol::parse_to_number(&response)
    }

    /// `get` round-trip returning a 0/1 payload as bool
    pub(crate) async fn get_bool(&self, command: &str, matcher: ResponseMatcher) -> Result<bool> {
        Ok(self.get_number(command, matcher).await? != 0.0)
    }

    /// Ask the confirmation collaborator before a destructive write.
    ///
    /// Returns `true` when the write may proceed. Without a collaborator
    /// the write proceeds (headless operation); "yes, don't ask again" is
    /// remembered for the session.
    pub(crate) async fn confirm_destructive(&self, id: &'static str, message: String) -> bool {
        if self.inner.remembered.lock().unwrap().contains(id) {
            return true;
        }
        let Some(handler) = &self.inner.confirm else {
            return true;
        };

        match handler
            .confirm(ConfirmationRequest {
                id,
                title: "Warning",
                message,
            })
            .await
        {
            Confirmation::Confirm => true,
            Confirmation::ConfirmAndRemember => {
                self.inner.remembered.lock().unwrap().insert(id);
                true
            }
            Confirmation::Cancel => false,
        }
    }
}

/// Build the list of selectable values for stepped ranges
fn get_range(segments: &[(f64, f64, f64)]) -> Vec<f64> {
    let mut values = Vec::new();
    for &(min, max, step) in segments {
        let mut v = min;
        while v <= max + step / 2.0 {
            values.push((v * 100.0).round() / 100.0);
            v += step;
        }
    }
    values
}

struct SessionLoop {
    session_rx: mpsc::Receiver<SessionMsg>,
    shell_rx: Option<mpsc::Receiver<ShellEvent>>,
    state: SessionState,
}

struct SessionState {
    monitor: ConnectionMonitor,
    bus: EventBus,
    cmd: Option<CommandHandle>,
    auto_reboot: bool,
    last_raw_uptime_ms: u64,
    overflow_counter: u64,
    /// wall-clock ms minus device uptime ms, for the audit mirror
    uptime_delta_ms: i64,
}

impl SessionLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                msg = self.session_rx.recv() => match msg {
                    Some(msg) => self.state.handle_msg(msg).await,
                    None => break,
                },
                event = Self::next_shell_event(&mut self.shell_rx) => match event {
                    Some(event) => self.state.handle_shell_event(event).await,
                    None => {
                        if self.state.monitor.on_shell_lost() {
                            self.state.publish_state();
                        }
                        self.shell_rx = None;
                    }
                },
            }
        }
    }

    async fn next_shell_event(rx: &mut Option<mpsc::Receiver<ShellEvent>>) -> Option<ShellEvent> {
        match rx {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }
}

impl SessionState {
    fn publish_state(&self) {
        self.bus.emit_pmic_state(self.monitor.state());
    }

    async fn handle_msg(&mut self, msg: SessionMsg) {
        match msg {
            SessionMsg::SetAutoReboot(enabled) => {
                if enabled
                    && !self.auto_reboot
                    && self.monitor.state() == PmicState::PmicPendingReboot
                {
                    self.kernel_reset();
                    if self.monitor.on_reset_requested() {
                        self.publish_state();
                    }
                }
                self.auto_reboot = enabled;
            }
            SessionMsg::RequestKernelReset => {
                self.kernel_reset();
                if self.monitor.on_reset_requested() {
                    self.publish_state();
                }
            }
            SessionMsg::PmicIoError => {
                if self.monitor.on_pmic_io_error() {
                    self.publish_state();
                }
            }
            SessionMsg::SeedUptime { device_uptime_ms } => {
                self.uptime_delta_ms =
                    chrono::Utc::now().timestamp_millis() - device_uptime_ms as i64;
                self.overflow_counter = device_uptime_ms / MAX_TIMESTAMP;
            }
        }
    }

    async fn handle_shell_event(&mut self, event: ShellEvent) {
        match event {
            ShellEvent::Log(line) => match parse_log_line(&line) {
                Ok(event) => self.dispatch_log(event),
                // malformed lines are dropped, never fatal
                Err(e) => debug!("Dropping malformed log line: {}", e),
            },
            ShellEvent::Unsolicited(line) => debug!("Unsolicited shell output: {:?}", line),
            ShellEvent::CommandResolved {
                command,
                response,
                success,
            } => self.mirror_command(&command, &response, success),
            ShellEvent::IoError(reason) => {
                warn!("Shell I/O failure: {}", reason);
                if self.monitor.on_shell_lost() {
                    self.publish_state();
                }
            }
            ShellEvent::LinkClosed => {
                if self.monitor.on_shell_lost() {
                    self.publish_state();
                }
            }
        }
    }

    /// Mirror every resolved request into the logging stream for audit
    fn mirror_command(&self, command: &str, response: &str, success: bool) {
        let timestamp = chrono::Utc::now().timestamp_millis() - self.uptime_delta_ms;
        self.bus.emit_logging(LoggingRecord {
            event: LoggingEvent {
                timestamp_ms: timestamp.max(0) as u64,
                level: if success { LogLevel::Info } else { LogLevel::Warning },
                module: MODULE_SHELL_COMMANDS.to_string(),
                message: format!("command: \"{command}\" response: \"{response}\""),
            },
            data_pair: true,
        });
    }

    fn dispatch_log(&mut self, event: LoggingEvent) {
        let is_connection_sentinel = event.module == MODULE_PMIC
            && (event.message == MSG_NO_RESPONSE || event.message == MSG_PMIC_AVAILABLE);

        match event.module.as_str() {
            MODULE_PMIC => self.process_module_pmic(&event),
            MODULE_PMIC_ADC => self.process_adc(&event),
            MODULE_PMIC_IRQ => self.process_irq(&event),
            MODULE_CC_PROFILING => self.process_cc_profiling(&event),
            _ => {}
        }

        // any recognized line other than the sentinels means the PMIC is
        // talking to us again
        if !is_connection_sentinel && self.monitor.on_activity() {
            self.publish_state();
        }

        let data_pair = is_module_data_pair(&event.module);
        self.bus.emit_logging(LoggingRecord { event, data_pair });
    }

    fn process_module_pmic(&mut self, event: &LoggingEvent) {
        match event.message.as_str() {
            MSG_POWER_FAILURE => self.bus.emit_cc_state(CcProfilingState::Pof),
            MSG_NO_RESPONSE => {
                if self.monitor.on_no_response() {
                    self.publish_state();
                }
            }
            MSG_PMIC_AVAILABLE => match self.monitor.on_pmic_available(self.auto_reboot) {
                AvailableAction::KernelReset => {
                    self.kernel_reset();
                    self.publish_state();
                }
                AvailableAction::WaitForOperator => self.publish_state(),
                AvailableAction::Ignored => {}
            },
            "No USB connection" => self
                .bus
                .emit_usb_power(usb_power::UsbPowerUpdate::DetectStatus(
                    usb_power::UsbDetectStatus::NoConnection,
                )),
            "Default USB 100/500mA" => self
                .bus
                .emit_usb_power(usb_power::UsbPowerUpdate::DetectStatus(
                    usb_power::UsbDetectStatus::Usb100500mA,
                )),
            "1.5A High Power" => self
                .bus
                .emit_usb_power(usb_power::UsbPowerUpdate::DetectStatus(
                    usb_power::UsbDetectStatus::HighPower1A5,
                )),
            "3A High Power" => self
                .bus
                .emit_usb_power(usb_power::UsbPowerUpdate::DetectStatus(
                    usb_power::UsbDetectStatus::HighPower3A,
                )),
            _ => {}
        }
    }

    /// Decode an ADC sample and un-wrap its uptime monotonically
    fn process_adc(&mut self, event: &LoggingEvent) {
        let mut sample = AdcSample::decode(event);

        if sample.timestamp_ms < self.last_raw_uptime_ms {
            self.overflow_counter += 1;
        }
        self.last_raw_uptime_ms = sample.timestamp_ms;
        sample.timestamp_ms += MAX_TIMESTAMP * self.overflow_counter;

        self.bus.emit_adc(sample);
    }

    fn process_irq(&mut self, event: &LoggingEvent) {
        let irq = IrqEvent::decode(event);

        match irq.event.as_str() {
            "EVENTVBUSDETECTED" => self.bus.emit_usb_powered(true),
            "EVENTVBUSREMOVED" => self.bus.emit_usb_powered(false),
            "EVENTBATDETECTED" => self.bus.emit_battery_connected(true),
            "EVENTBATLOST" => self.bus.emit_battery_connected(false),
            "EVENTCHGERROR" => {
                // clear stale sections, then harvest the device error log
                self.bus.emit_error_logs(ErrorLogs::ChargerError(Vec::new()));
                self.bus.emit_error_logs(ErrorLogs::SensorError(Vec::new()));
                self.harvest_error_logs();
            }
            _ => {}
        }

        if irq.kind == "RSTCAUSE" {
            warn!("Reset cause: {}", irq.event);
            self.bus
                .emit_error_logs(ErrorLogs::ResetCause(vec![irq.event]));
        }
    }

    fn process_cc_profiling(&mut self, event: &LoggingEvent) {
        if event.message.contains('=') {
            self.bus.emit_profiling(ProfilingEvent::decode(event));
        } else if let Some(state) = CcProfilingState::from_message(&event.message) {
            self.bus.emit_cc_state(state);
        }
    }

    /// Issue the kernel reset without blocking the event loop
    fn kernel_reset(&self) {
        let Some(cmd) = self.cmd.clone() else {
            return;
        };
        info!("Issuing kernel reset");
        tokio::spawn(async move {
            let outcome = cmd
                .request(
                    KERNEL_RESET_COMMAND,
                    ResponseMatcher::literal(KERNEL_RESET_COMMAND),
                    None,
                    true,
                )
                .await;
            if !outcome.is_success() {
                warn!("Kernel reset request not confirmed: {:?}", outcome);
            }
        });
    }

    /// Read `npmx errlog check` and fan its sections out as error-log events
    fn harvest_error_logs(&self) {
        let Some(cmd) = self.cmd.clone() else {
            return;
        };
        let bus = self.bus.clone();
        tokio::spawn(async move {
            match cmd
                .request(
                    "npmx errlog check",
                    ResponseMatcher::literal("npmx errlog check"),
                    None,
                    true,
                )
                .await
            {
                CommandOutcome::Success(response) => {
                    for section in parse_error_log_sections(&response) {
                        match &section {
                            ErrorLogs::ResetCause(items) => {
                                warn!("Reset cause: {}", items.join(", "));
                            }
                            ErrorLogs::ChargerError(items) => {
                                error!("Charger errors: {}", items.join(", "));
                            }
                            ErrorLogs::SensorError(items) => {
                                error!("Sensor errors: {}", items.join(", "));
                            }
                        }
                        bus.emit_error_logs(section);
                    }
                }
                CommandOutcome::Rejected(reason) => {
                    warn!("Unable to read error log from device: {}", reason);
                }
                CommandOutcome::TimedOut => warn!("Reading latest error log timed out"),
            }
        });
    }
}

/// Split an `npmx errlog check` response into its labelled sections
fn parse_error_log_sections(response: &str) -> Vec<ErrorLogs> {
    fn section(label: &str, items: Vec<String>) -> Option<ErrorLogs> {
        match label {
            "RSTCAUSE:" => Some(ErrorLogs::ResetCause(items)),
            "CHARGER_ERROR:" => Some(ErrorLogs::ChargerError(items)),
            "SENSOR_ERROR:" => Some(ErrorLogs::SensorError(items)),
            _ => None,
        }
    }

    let mut sections = Vec::new();
    let mut current: Option<(String, Vec<String>)> = None;

    for line in response.lines() {
        let item = line.trim();
        if item.is_empty() {
            continue;
        }
        let is_label = item.ends_with(':')
            && item[..item.len() - 1]
                .chars()
                .all(|c| c.is_ascii_uppercase() || c == '_');
        if is_label {
            if let Some((label, items)) = current.take() {
                sections.extend(section(&label, items));
            }
            current = Some((item.to_string(), Vec::new()));
        } else if let Some((_, items)) = current.as_mut() {
            items.push(item.to_string());
        }
    }
    if let Some((label, items)) = current.take() {
        sections.extend(section(&label, items));
    }

    sections
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::shell::channel::SHELL_PROMPT;
    use crate::shell::transport::mocks::MockShellTransport;
    use std::time::Duration;

    /// An attached device over a scripted mock shell
    pub struct TestHarness {
        pub device: PmicDevice,
        pub mock: MockShellTransport,
        pub line_tx: mpsc::Sender<String>,
        served: Arc<Mutex<usize>>,
    }

    /// Build a connected session (no confirmation collaborator)
    pub fn attached() -> TestHarness {
        attached_with(None, SessionConfig::default())
    }

    pub fn attached_with(
        confirm: Option<Arc<dyn ConfirmationHandler>>,
        config: SessionConfig,
    ) -> TestHarness {
        let (mock, line_tx, line_rx) = MockShellTransport::with_lines();
        let device = PmicDevice::attach(mock.clone(), line_rx, config, confirm);
        TestHarness {
            device,
            mock,
            line_tx,
            served: Arc::new(Mutex::new(0)),
        }
    }

    impl TestHarness {
        /// Feed a raw log line into the session
        pub async fn push_log(&self, line: &str) {
            self.line_tx.send(line.to_string()).await.unwrap();
        }

        /// Wait for the next unserved command, echo it, and reply with the
        /// given payload lines plus the prompt. Returns the command text.
        pub async fn respond_next(&self, payload: &[&str]) -> String {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
            loop {
                let next = {
                    let sent = self.mock.sent();
                    let mut served = self.served.lock().unwrap();
                    if sent.len() > *served {
                        let command = sent[*served].clone();
                        *served += 1;
                        Some(command)
                    } else {
                        None
                    }
                };

                if let Some(command) = next {
                    self.line_tx.send(command.clone()).await.unwrap();
                    for line in payload {
                        self.line_tx.send((*line).to_string()).await.unwrap();
                    }
                    self.line_tx.send(SHELL_PROMPT.to_string()).await.unwrap();
                    return command;
                }

                if tokio::time::Instant::now() > deadline {
                    panic!("no command was sent to the shell");
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        /// Let spawned tasks and the event loop settle
        pub async fn settle(&self) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        /// Answer every command with `Value: 0` until the harness is
        /// dropped; useful for flows that issue dozens of writes
        pub fn spawn_auto_responder(&self) -> tokio::task::JoinHandle<()> {
            let mock = self.mock.clone();
            let line_tx = self.line_tx.clone();
            let served = Arc::clone(&self.served);
            tokio::spawn(async move {
                loop {
                    let next = {
                        let sent = mock.sent();
                        let mut served = served.lock().unwrap();
                        if sent.len() > *served {
                            let command = sent[*served].clone();
                            *served += 1;
                            Some(command)
                        } else {
                            None
                        }
                    };

                    match next {
                        Some(command) => {
                            if line_tx.send(command).await.is_err() {
                                break;
                            }
                            let _ = line_tx.send("Value: 0".to_string()).await;
                            let _ = line_tx.send(SHELL_PROMPT.to_string()).await;
                        }
                        None => tokio::time::sleep(Duration::from_millis(2)).await,
                    }
                }
            })
        }
    }
}
