//! # Profiling Sequencer
//!
//! Drives one battery-characterization run end to end: the operator walks
//! the early stages, the run itself advances on telemetry, and guard
//! conditions monitored while Resting/Profiling force the run to stop the
//! moment the electrical setup is disturbed.
//!
//! Stage order is fixed — `MissingSyncBoard → Configuration → Checklist →
//! Charging → Resting → Profiling → Complete` — and never skips; abort is
//! reachable from every non-terminal stage and runs the cleanup (stop
//! profiling, restore auto-reboot) exactly once.

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};

use super::{BatteryProfiler, CcProfile, SegmentBound};
use crate::device::buck::BuckUpdate;
use crate::device::events::{Alert, AlertLevel, PartialUpdate};
use crate::device::fuel_gauge::FuelGaugeUpdate;
use crate::device::ldo::LdoUpdate;
use crate::device::PmicDevice;
use crate::protocol::telemetry::{CcProfilingState, ProfilingEvent};

/// Default telemetry reporting rate during a run
pub const DEFAULT_REPORTING_RATE_MS: u32 = 1000;

/// Default pre-profiling rest duration in seconds
pub const DEFAULT_REST_DURATION_S: u32 = 900;

/// Stages of one characterization run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProfilingStage {
    MissingSyncBoard,
    Configuration,
    Checklist,
    Charging,
    Resting,
    Profiling,
    Complete,
}

impl ProfilingStage {
    fn next(self) -> Option<Self> {
        match self {
            Self::MissingSyncBoard => Some(Self::Configuration),
            Self::Configuration => Some(Self::Checklist),
            Self::Checklist => Some(Self::Charging),
            Self::Charging => Some(Self::Resting),
            Self::Resting => Some(Self::Profiling),
            Self::Profiling => Some(Self::Complete),
            Self::Complete => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Complete
    }
}

impl std::fmt::Display for ProfilingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::MissingSyncBoard => "MissingSyncBoard",
            Self::Configuration => "Configuration",
            Self::Checklist => "Checklist",
            Self::Charging => "Charging",
            Self::Resting => "Resting",
            Self::Profiling => "Profiling",
            Self::Complete => "Complete",
        };
        f.write_str(name)
    }
}

/// Declarative description of one characterization run
#[derive(Debug, Clone, PartialEq)]
pub struct BatteryProfile {
    pub name: String,

    /// Rated battery capacity in mAh
    pub capacity_mah: f64,

    /// Temperatures the battery is profiled at, in °C
    pub temperatures: Vec<i32>,

    /// Fully-charged open-circuit voltage in V
    pub v_upper_cutoff: f64,

    /// Discharge cutoff voltage in V
    pub v_lower_cutoff: f64,

    pub report_interval_cc_ms: u32,
    pub report_interval_ntc_ms: u32,

    /// Ordered load/rest segments
    pub segments: Vec<CcProfile>,
}

/// Live numbers for the run in progress
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub capacity_consumed_mah: f64,

    /// Blended progress estimate, 0–100
    pub progress_percent: f64,

    /// Latest battery temperature in °C
    pub latest_t_bat: f64,

    /// Latest load voltage in V
    pub latest_v_load: f64,
}

impl Default for RunStats {
    fn default() -> Self {
        Self {
            capacity_consumed_mah: 0.0,
            progress_percent: 0.0,
            latest_t_bat: 0.0,
            latest_v_load: 0.0,
        }
    }
}

/// Blend the theoretical discharge model with the measured consumption.
///
/// The theoretical rate weights each loaded segment by the voltage band it
/// covers between the cutoffs; as measured consumption approaches the rated
/// capacity the estimate asymptotically favors the measurement.
#[must_use]
pub fn estimate_progress(
    profile: &BatteryProfile,
    elapsed_s: f64,
    capacity_consumed_mah: f64,
) -> f64 {
    let delta_cutoff = profile.v_upper_cutoff - profile.v_lower_cutoff;
    if profile.capacity_mah <= 0.0 || delta_cutoff <= 0.0 {
        return 0.0;
    }

    let mut average_ma = 0.0;
    let mut last_cutoff = profile.v_upper_cutoff;
    for segment in &profile.segments {
        // leading rest segments carry no load and no voltage band
        if segment.i_load_ma == 0.0 {
            continue;
        }

        let charge_ma_ms = segment.i_load_ma * f64::from(segment.t_load_ms)
            + segment.i_rest_ma * f64::from(segment.t_rest_ms);
        let time_s = f64::from(segment.t_load_ms + segment.t_rest_ms) / 1000.0;
        let cutoff = match segment.bound {
            SegmentBound::VoltageCutoff(volts) => volts,
            SegmentBound::Cycles(_) => profile.v_lower_cutoff,
        };

        average_ma += (charge_ma_ms / 1000.0 / time_s) * ((last_cutoff - cutoff) / delta_cutoff);
        last_cutoff = cutoff;
    }

    let consumption_mah_per_s = average_ma.abs() / 3600.0;
    let theoretical = consumption_mah_per_s * elapsed_s / profile.capacity_mah;
    let actual = capacity_consumed_mah / profile.capacity_mah;
    let alpha = 1.0 - actual;

    ((theoretical * alpha + actual * actual) * 100.0).clamp(0.0, 100.0)
}

/// Electrical preconditions watched while Resting/Profiling
struct GuardInputs {
    usb_powered: bool,
    fuel_gauge: bool,
    battery_connected: bool,
    ldo_enabled: Vec<bool>,
    buck1_enabled: bool,
}

impl GuardInputs {
    fn new(ldo_count: usize) -> Self {
        Self {
            usb_powered: false,
            fuel_gauge: false,
            battery_connected: true,
            ldo_enabled: vec![false; ldo_count],
            buck1_enabled: false,
        }
    }

    /// First violated guard, phrased for the interruption message
    fn violation(&self) -> Option<&'static str> {
        if self.usb_powered {
            Some("USB power was connected")
        } else if self.fuel_gauge {
            Some("the fuel gauge was turned on")
        } else if !self.battery_connected {
            Some("the battery was disconnected")
        } else if self.ldo_enabled.iter().any(|&on| on) {
            Some("an LDO was enabled")
        } else if self.buck1_enabled {
            Some("buck 1 was enabled")
        } else {
            None
        }
    }
}

enum Command {
    Advance(ProfilingStage),
    BeginRun,
    Abort,
}

/// Handle to a running sequencer; the stage machine itself lives in a task
pub struct ProfilingSequencer {
    control_tx: mpsc::Sender<Command>,
    stage_rx: watch::Receiver<Option<ProfilingStage>>,
    stats_rx: watch::Receiver<RunStats>,
}

impl ProfilingSequencer {
    /// Start a sequencer for one profile; the session begins at
    /// `MissingSyncBoard`
    pub fn start(device: &PmicDevice, profile: BatteryProfile) -> Self {
        let (control_tx, control_rx) = mpsc::channel(8);
        let (stage_tx, stage_rx) = watch::channel(Some(ProfilingStage::MissingSyncBoard));
        let (stats_tx, stats_rx) = watch::channel(RunStats::default());

        let events = device.events();
        let channels = SequencerChannels {
            profiling_rx: events.subscribe_profiling(),
            cc_rx: events.subscribe_cc_state(),
            fuel_rx: events.subscribe_fuel_gauge(),
            usb_rx: events.subscribe_usb_powered(),
            battery_rx: events.subscribe_battery_connected(),
            ldo_rx: events.subscribe_ldo(),
            buck_rx: events.subscribe_buck(),
        };
        let task = SequencerTask {
            profiler: device.battery_profiler(),
            guards: GuardInputs::new(device.counts().ldos),
            profile,
            stage: Some(ProfilingStage::MissingSyncBoard),
            stage_tx,
            stats: RunStats::default(),
            stats_tx,
            run_started: None,
        };
        tokio::spawn(task.run(control_rx, channels));

        Self {
            control_tx,
            stage_rx,
            stats_rx,
        }
    }

    /// Current stage; `None` once the session returned to idle
    #[must_use]
    pub fn stage(&self) -> Option<ProfilingStage> {
        *self.stage_rx.borrow()
    }

    #[must_use]
    pub fn subscribe_stage(&self) -> watch::Receiver<Option<ProfilingStage>> {
        self.stage_rx.clone()
    }

    #[must_use]
    pub fn run_stats(&self) -> RunStats {
        self.stats_rx.borrow().clone()
    }

    /// Operator-driven forward transition (Configuration/Checklist/Charging)
    pub async fn advance(&self, to: ProfilingStage) {
        let _ = self.control_tx.send(Command::Advance(to)).await;
    }

    /// Leave `Charging`: upload the profile, start it, and enter `Resting`
    pub async fn begin_run(&self) {
        let _ = self.control_tx.send(Command::BeginRun).await;
    }

    /// Abort the session; idempotent, and runs the cleanup before idling
    pub async fn abort(&self) {
        let _ = self.control_tx.send(Command::Abort).await;
    }
}

/// Bus subscriptions the task listens on; kept apart from the state so the
/// select arms and the handlers borrow different things
struct SequencerChannels {
    profiling_rx: broadcast::Receiver<ProfilingEvent>,
    cc_rx: broadcast::Receiver<CcProfilingState>,
    fuel_rx: broadcast::Receiver<FuelGaugeUpdate>,
    usb_rx: broadcast::Receiver<bool>,
    battery_rx: broadcast::Receiver<bool>,
    ldo_rx: broadcast::Receiver<PartialUpdate<LdoUpdate>>,
    buck_rx: broadcast::Receiver<PartialUpdate<BuckUpdate>>,
}

struct SequencerTask {
    profiler: BatteryProfiler,
    guards: GuardInputs,
    profile: BatteryProfile,
    stage: Option<ProfilingStage>,
    stage_tx: watch::Sender<Option<ProfilingStage>>,
    stats: RunStats,
    stats_tx: watch::Sender<RunStats>,
    run_started: Option<Instant>,
}

impl SequencerTask {
    async fn run(
        mut self,
        mut control_rx: mpsc::Receiver<Command>,
        mut channels: SequencerChannels,
    ) {
        loop {
            tokio::select! {
                command = control_rx.recv() => match command {
                    Some(Command::Advance(to)) => self.advance(to),
                    Some(Command::BeginRun) => self.begin_run().await,
                    Some(Command::Abort) => self.abort().await,
                    None => break,
                },
                event = channels.profiling_rx.recv() => {
                    if let Ok(event) = event {
                        self.on_profiling_event(event);
                    }
                },
                state = channels.cc_rx.recv() => {
                    if let Ok(state) = state {
                        self.on_cc_state(state).await;
                    }
                },
                update = channels.fuel_rx.recv() => {
                    if let Ok(FuelGaugeUpdate::Enabled(on)) = update {
                        self.guards.fuel_gauge = on;
                        self.check_guards().await;
                    }
                },
                powered = channels.usb_rx.recv() => {
                    if let Ok(powered) = powered {
                        self.guards.usb_powered = powered;
                        self.check_guards().await;
                    }
                },
                connected = channels.battery_rx.recv() => {
                    if let Ok(connected) = connected {
                        self.guards.battery_connected = connected;
                        self.check_guards().await;
                    }
                },
                update = channels.ldo_rx.recv() => {
                    if let Ok(update) = update {
                        if let LdoUpdate::Enabled(on) = update.data {
                            if let Some(slot) = self.guards.ldo_enabled.get_mut(update.index) {
                                *slot = on;
                            }
                            self.check_guards().await;
                        }
                    }
                },
                update = channels.buck_rx.recv() => {
                    if let Ok(update) = update {
                        if update.index == 0 {
                            if let BuckUpdate::Enabled(on) = update.data {
                                self.guards.buck1_enabled = on;
                                self.check_guards().await;
                            }
                        }
                    }
                },
            }
        }
    }

    fn set_stage(&mut self, stage: Option<ProfilingStage>) {
        if self.stage == stage {
            return;
        }
        self.stage = stage;
        let _ = self.stage_tx.send(stage);
    }

    fn emit(&self, level: AlertLevel, message: String) {
        self.profiler.device().bus().emit_alerts(Alert::new(level, message));
    }

    fn advance(&mut self, to: ProfilingStage) {
        let operator_stage = matches!(
            to,
            ProfilingStage::Configuration | ProfilingStage::Checklist | ProfilingStage::Charging
        );
        match self.stage {
            Some(current) if operator_stage && current.next() == Some(to) => {
                info!("Profiling stage: {} -> {}", current, to);
                self.set_stage(Some(to));
            }
            _ => warn!("Ignoring out-of-order stage transition to {}", to),
        }
    }

    async fn begin_run(&mut self) {
        if self.stage != Some(ProfilingStage::Charging) {
            warn!("begin_run outside the Charging stage is ignored");
            return;
        }

        // the application must not reboot away mid-run
        self.profiler.device().set_auto_reboot(false).await;

        let result = async {
            self.profiler
                .set_profile(
                    self.profile.report_interval_cc_ms,
                    self.profile.report_interval_ntc_ms,
                    self.profile.v_lower_cutoff,
                    &self.profile.segments,
                )
                .await?;
            self.profiler.start_profiling().await
        }
        .await;

        match result {
            Ok(()) => {
                self.stats = RunStats::default();
                let _ = self.stats_tx.send(self.stats.clone());
                self.run_started = None;
                self.set_stage(Some(ProfilingStage::Resting));
            }
            Err(e) => {
                warn!("Failed to start profiling: {}", e);
                self.profiler.device().set_auto_reboot(true).await;
                self.set_stage(Some(ProfilingStage::Complete));
                self.emit(AlertLevel::Danger, format!("Failed to start profiling: {e}"));
            }
        }
    }

    fn on_profiling_event(&mut self, event: ProfilingEvent) {
        self.stats.latest_t_bat = (event.t_bat * 100.0).round() / 100.0;
        self.stats.latest_v_load = (event.v_load * 100.0).round() / 100.0;

        match self.stage {
            // seq restarting at 1 marks the first load segment: the rest
            // phase is over
            Some(ProfilingStage::Resting) if event.seq == 1 => {
                self.run_started = Some(Instant::now());
                self.set_stage(Some(ProfilingStage::Profiling));
            }
            Some(ProfilingStage::Profiling) => {
                self.stats.capacity_consumed_mah +=
                    event.i_load.abs() * f64::from(self.profile.report_interval_cc_ms) / 3600.0;

                let elapsed_s = self
                    .run_started
                    .map_or(0.0, |start| start.elapsed().as_secs_f64());
                self.stats.progress_percent =
                    estimate_progress(&self.profile, elapsed_s, self.stats.capacity_consumed_mah);
            }
            _ => {}
        }

        let _ = self.stats_tx.send(self.stats.clone());
    }

    async fn on_cc_state(&mut self, state: CcProfilingState) {
        match state {
            CcProfilingState::Ready => {
                self.complete(
                    AlertLevel::Success,
                    "Profiling is ready. All profiling cycles complete.".to_string(),
                )
                .await;
            }
            CcProfilingState::VCutOff => {
                self.complete(
                    AlertLevel::Success,
                    "Profiling is ready. vCutOff was reached.".to_string(),
                )
                .await;
            }
            CcProfilingState::ThermalError => {
                self.complete(
                    AlertLevel::Danger,
                    "Profiling was stopped due to thermal error.".to_string(),
                )
                .await;
            }
            // POF salvages a partial result mid-profiling but is fatal
            // while still resting
            CcProfilingState::Pof => match self.stage {
                Some(ProfilingStage::Profiling) => {
                    self.complete(
                        AlertLevel::Warning,
                        "Profiling POF event occurred before reaching vCutOff.".to_string(),
                    )
                    .await;
                }
                Some(ProfilingStage::Resting) => {
                    self.complete(
                        AlertLevel::Danger,
                        "Profiling POF event occurred before reaching vCutOff.".to_string(),
                    )
                    .await;
                }
                _ => {}
            },
        }
    }

    /// Terminal transition for a device-reported run outcome
    async fn complete(&mut self, level: AlertLevel, message: String) {
        let Some(stage) = self.stage else {
            return;
        };
        if !matches!(stage, ProfilingStage::Resting | ProfilingStage::Profiling) {
            return;
        }

        self.profiler.device().set_auto_reboot(true).await;
        self.set_stage(Some(ProfilingStage::Complete));
        self.emit(level, message);
    }

    /// A guard tripped while the run depends on a quiet electrical setup
    async fn check_guards(&mut self) {
        let Some(stage) = self.stage else {
            return;
        };
        if !matches!(stage, ProfilingStage::Resting | ProfilingStage::Profiling) {
            return;
        }
        let Some(reason) = self.guards.violation() else {
            return;
        };

        // transition first so a second observation of the same condition
        // cannot stop the profiler twice
        self.set_stage(Some(ProfilingStage::Complete));
        self.cleanup().await;
        self.emit(
            AlertLevel::Danger,
            format!("The profiling process was interrupted, as {reason} while {stage}."),
        );
    }

    /// Stop the device-side run and restore auto-reboot
    async fn cleanup(&mut self) {
        self.profiler.device().set_auto_reboot(true).await;
        if let Err(e) = self.profiler.stop_profiling().await {
            warn!("Stopping profiling during cleanup failed: {}", e);
        }
    }

    async fn abort(&mut self) {
        match self.stage {
            // already idle: calling abort twice is harmless
            None => {}
            Some(ProfilingStage::Complete) => self.set_stage(None),
            Some(_) => {
                self.cleanup().await;
                self.set_stage(None);
                info!("Profiling aborted by the operator");
                self.emit(
                    AlertLevel::Warning,
                    "Profiling was aborted. Progress for this run is lost.".to_string(),
                );
            }
        }
    }
}
