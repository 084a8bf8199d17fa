//! # Buck Regulator Domain
//!
//! Two buck converters, addressed by index. Buck 1 (index 0) powers the
//! I2C link this adapter depends on, so lowering its output or disabling
//! it goes through the confirmation collaborator first.

use serde::{Deserialize, Serialize};

use super::events::PartialUpdate;
use super::PmicDevice;
use crate::error::Result;
use crate::shell::ResponseMatcher;

/// Buck 1 output below this endangers the adapter's own communication
const BUCK1_MIN_SAFE_VOLTAGE: f64 = 1.7;

/// Confirmation ids for the destructive buck writes
const BUCK_VOUT_DIALOG_ID: &str = "pmic1300-setBuckVOut-0";
const BUCK_DISABLE_DIALOG_ID: &str = "pmic1300-setBuckEnabled-0";

/// Output voltage source selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuckMode {
    /// Follow the VSET pin
    VSet,
    /// Follow the software voltage register
    Software,
}

impl BuckMode {
    fn wire_value(&self) -> u8 {
        match self {
            Self::VSet => 0,
            Self::Software => 1,
        }
    }

    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::VSet),
            1 => Some(Self::Software),
            _ => None,
        }
    }
}

/// Converter switching behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuckModeControl {
    Auto,
    Pwm,
    Pfm,
}

impl BuckModeControl {
    fn wire_value(&self) -> u8 {
        match self {
            Self::Auto => 0,
            Self::Pwm => 1,
            Self::Pfm => 2,
        }
    }

    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Auto),
            1 => Some(Self::Pwm),
            2 => Some(Self::Pfm),
            _ => None,
        }
    }
}

/// One changed buck field (delivered as `PartialUpdate<BuckUpdate>`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BuckUpdate {
    /// Normal-mode output voltage in V
    VOutNormal(f64),
    /// Retention-mode output voltage in V
    VOutRetention(f64),
    Mode(BuckMode),
    Enabled(bool),
    ModeControl(BuckModeControl),
    /// GPIO pin driving on/off, `None` when software controlled
    OnOffControl(Option<u8>),
    /// GPIO pin driving retention, `None` when software controlled
    RetentionControl(Option<u8>),
    ActiveDischarge(bool),
}

/// GPIO binding encoding: `-1` means "not bound"
fn gpio_wire_value(pin: Option<u8>) -> i8 {
    pin.map_or(-1, |p| p as i8)
}

fn gpio_from_wire(value: f64) -> Option<u8> {
    if value < 0.0 {
        None
    } else {
        Some(value as u8)
    }
}

impl PmicDevice {
    fn check_buck_index(&self, index: usize) {
        assert!(
            index < self.counts().bucks,
            "buck index {index} out of range (device has {})",
            self.counts().bucks
        );
    }

    fn emit_buck_update(&self, index: usize, data: BuckUpdate) {
        self.bus().emit_buck(PartialUpdate { index, data });
    }

    // --- output voltage (normal) ---------------------------------------

    pub async fn request_buck_v_out_normal(&self, index: usize) -> Result<f64> {
        self.check_buck_index(index);
        let mv = self
            .get_number(
                &format!("npmx buck voltage normal get {index}"),
                ResponseMatcher::get_set("npmx buck voltage normal"),
            )
            .await?;
        let volts = mv / 1000.0;
        self.emit_buck_update(index, BuckUpdate::VOutNormal(volts));
        Ok(volts)
    }

    /// Set the normal-mode output voltage in V.
    ///
    /// Writing buck 1 below its safe threshold asks the confirmation
    /// collaborator first; a cancel re-reads the device value so the UI
    /// snaps back.
    pub async fn set_buck_v_out_normal(&self, index: usize, volts: f64) -> Result<()> {
        self.check_buck_index(index);

        if index == 0 && volts <= BUCK1_MIN_SAFE_VOLTAGE && !self.is_offline_mode() {
            let confirmed = self
                .confirm_destructive(
                    BUCK_VOUT_DIALOG_ID,
                    format!(
                        "Buck 1 powers the I2C communication this app depends on. \
                         Voltages at or below {BUCK1_MIN_SAFE_VOLTAGE} V can break the connection. \
                         Are you sure you want to continue?"
                    ),
                )
                .await;
            if !confirmed {
                let _ = self.request_buck_v_out_normal(index).await;
                return Ok(());
            }
        }

        if self.is_offline_mode() {
            self.emit_buck_update(index, BuckUpdate::VOutNormal(volts));
            self.set_buck_mode(index, BuckMode::Software).await?;
            return Ok(());
        }

        let command = format!(
            "npmx buck voltage normal set {index} {}",
            (volts * 1000.0).round() as i64
        );
        match self
            .send_command(&command, ResponseMatcher::get_set("npmx buck voltage normal"))
            .await
        {
            Ok(_) => {
                self.emit_buck_update(index, BuckUpdate::VOutNormal(volts));
                // the register only takes effect under software control
                self.set_buck_mode(index, BuckMode::Software).await
            }
            Err(e) => {
                self.spawn_reader(move |d| async move {
                    d.request_buck_v_out_normal(index).await.map(|_| ())
                });
                Err(e)
            }
        }
    }

    // --- output voltage (retention) ------------------------------------

    pub async fn request_buck_v_out_retention(&self, index: usize) -> Result<f64> {
        self.check_buck_index(index);
        let mv = self
            .get_number(
                &format!("npmx buck voltage retention get {index}"),
                ResponseMatcher::get_set("npmx buck voltage retention"),
            )
            .await?;
        let volts = mv / 1000.0;
        self.emit_buck_update(index, BuckUpdate::VOutRetention(volts));
        Ok(volts)
    }

    pub async fn set_buck_v_out_retention(&self, index: usize, volts: f64) -> Result<()> {
        self.check_buck_index(index);
        if self.is_offline_mode() {
            self.emit_buck_update(index, BuckUpdate::VOutRetention(volts));
            return Ok(());
        }

        let command = format!(
            "npmx buck voltage retention set {index} {}",
            (volts * 1000.0).round() as i64
        );
        match self
            .send_command(&command, ResponseMatcher::get_set("npmx buck voltage retention"))
            .await
        {
            Ok(_) => {
                self.emit_buck_update(index, BuckUpdate::VOutRetention(volts));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(move |d| async move {
                    d.request_buck_v_out_retention(index).await.map(|_| ())
                });
                Err(e)
            }
        }
    }

    // --- vout select (mode) --------------------------------------------

    pub async fn request_buck_mode(&self, index: usize) -> Result<BuckMode> {
        self.check_buck_index(index);
        let value = self
            .get_number(
                &format!("npmx buck vout_select get {index}"),
                ResponseMatcher::get_set("npmx buck vout_select"),
            )
            .await?;
        let mode = BuckMode::from_wire(value as u8).ok_or_else(|| {
            crate::error::PmicBridgeError::MalformedLine(format!("unknown buck mode: {value}"))
        })?;
        self.emit_buck_update(index, BuckUpdate::Mode(mode));
        Ok(mode)
    }

    pub async fn set_buck_mode(&self, index: usize, mode: BuckMode) -> Result<()> {
        self.check_buck_index(index);
        if self.is_offline_mode() {
            self.emit_buck_update(index, BuckUpdate::Mode(mode));
            return Ok(());
        }

        let command = format!("npmx buck vout_select set {index} {}", mode.wire_value());
        match self
            .send_command(&command, ResponseMatcher::get_set("npmx buck vout_select"))
            .await
        {
            Ok(_) => {
                self.emit_buck_update(index, BuckUpdate::Mode(mode));
                // the effective output follows the new source
                let _ = self.request_buck_v_out_normal(index).await;
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(move |d| async move {
                    d.request_buck_mode(index).await.map(|_| ())
                });
                Err(e)
            }
        }
    }

    // --- enable --------------------------------------------------------

    pub async fn request_buck_enabled(&self, index: usize) -> Result<bool> {
        self.check_buck_index(index);
        let enabled = self
            .get_bool(
                &format!("npmx buck status get {index}"),
                ResponseMatcher::get_set("npmx buck status"),
            )
            .await?;
        self.emit_buck_update(index, BuckUpdate::Enabled(enabled));
        Ok(enabled)
    }

    /// Enable or disable a buck. Disabling buck 1 can cut the adapter's own
    /// I2C link, so it is confirmation-gated; a cancel leaves everything
    /// untouched.
    pub async fn set_buck_enabled(&self, index: usize, enabled: bool) -> Result<()> {
        self.check_buck_index(index);

        if index == 0 && !enabled && !self.is_offline_mode() {
            let confirmed = self
                .confirm_destructive(
                    BUCK_DISABLE_DIALOG_ID,
                    "Disabling buck 1 can cut the I2C communication to the PMIC and \
                     disconnect this app. Are you sure you want to proceed?"
                        .to_string(),
                )
                .await;
            if !confirmed {
                return Ok(());
            }
        }

        if self.is_offline_mode() {
            self.emit_buck_update(index, BuckUpdate::Enabled(enabled));
            return Ok(());
        }

        let command = format!("npmx buck status set {index} {}", u8::from(enabled));
        match self
            .send_command(&command, ResponseMatcher::get_set("npmx buck status"))
            .await
        {
            Ok(_) => {
                self.emit_buck_update(index, BuckUpdate::Enabled(enabled));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(move |d| async move {
                    d.request_buck_enabled(index).await.map(|_| ())
                });
                Err(e)
            }
        }
    }

    // --- mode control (switching behavior) -----------------------------

    pub async fn request_buck_mode_control(&self, index: usize) -> Result<BuckModeControl> {
        self.check_buck_index(index);
        let value = self
            .get_number(
                &format!("powerup_buck mode get {index}"),
                ResponseMatcher::get_set("powerup_buck mode"),
            )
            .await?;
        let control = BuckModeControl::from_wire(value as u8).ok_or_else(|| {
            crate::error::PmicBridgeError::MalformedLine(format!("unknown buck mode control: {value}"))
        })?;
        self.emit_buck_update(index, BuckUpdate::ModeControl(control));
        Ok(control)
    }

    pub async fn set_buck_mode_control(&self, index: usize, control: BuckModeControl) -> Result<()> {
        self.check_buck_index(index);
        if self.is_offline_mode() {
            self.emit_buck_update(index, BuckUpdate::ModeControl(control));
            return Ok(());
        }

        let command = format!("powerup_buck mode set {index} {}", control.wire_value());
        match self
            .send_command(&command, ResponseMatcher::get_set("powerup_buck mode"))
            .await
        {
            Ok(_) => {
                self.emit_buck_update(index, BuckUpdate::ModeControl(control));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(move |d| async move {
                    d.request_buck_mode_control(index).await.map(|_| ())
                });
                Err(e)
            }
        }
    }

    // --- GPIO bindings --------------------------------------------------

    pub async fn request_buck_on_off_control(&self, index: usize) -> Result<Option<u8>> {
        self.check_buck_index(index);
        let value = self
            .get_number(
                &format!("npmx buck gpio on_off index get {index}"),
                ResponseMatcher::get_set("npmx buck gpio on_off index"),
            )
            .await?;
        let pin = gpio_from_wire(value);
        self.emit_buck_update(index, BuckUpdate::OnOffControl(pin));
        Ok(pin)
    }

    pub async fn set_buck_on_off_control(&self, index: usize, pin: Option<u8>) -> Result<()> {
        self.check_buck_index(index);
        if self.is_offline_mode() {
            self.emit_buck_update(index, BuckUpdate::OnOffControl(pin));
            return Ok(());
        }

        let command = format!("npmx buck gpio on_off index set {index} {}", gpio_wire_value(pin));
        match self
            .send_command(&command, ResponseMatcher::get_set("npmx buck gpio on_off index"))
            .await
        {
            Ok(_) => {
                self.emit_buck_update(index, BuckUpdate::OnOffControl(pin));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(move |d| async move {
                    d.request_buck_on_off_control(index).await.map(|_| ())
                });
                Err(e)
            }
        }
    }

    pub async fn request_buck_retention_control(&self, index: usize) -> Result<Option<u8>> {
        self.check_buck_index(index);
        let value = self
            .get_number(
                &format!("npmx buck gpio retention index get {index}"),
                ResponseMatcher::get_set("npmx buck gpio retention index"),
            )
            .await?;
        let pin = gpio_from_wire(value);
        self.emit_buck_update(index, BuckUpdate::RetentionControl(pin));
        Ok(pin)
    }

    pub async fn set_buck_retention_control(&self, index: usize, pin: Option<u8>) -> Result<()> {
        self.check_buck_index(index);
        if self.is_offline_mode() {
            self.emit_buck_update(index, BuckUpdate::RetentionControl(pin));
            return Ok(());
        }

        let command = format!(
            "npmx buck gpio retention index set {index} {}",
            gpio_wire_value(pin)
        );
        match self
            .send_command(&command, ResponseMatcher::get_set("npmx buck gpio retention index"))
            .await
        {
            Ok(_) => {
                self.emit_buck_update(index, BuckUpdate::RetentionControl(pin));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(move |d| async move {
                    d.request_buck_retention_control(index).await.map(|_| ())
                });
                Err(e)
            }
        }
    }

    // --- active discharge ----------------------------------------------

    pub async fn request_buck_active_discharge(&self, index: usize) -> Result<bool> {
        self.check_buck_index(index);
        let enabled = self
            .get_bool(
                &format!("npmx buck active_discharge get {index}"),
                ResponseMatcher::get_set("npmx buck active_discharge"),
            )
            .await?;
        self.emit_buck_update(index, BuckUpdate::ActiveDischarge(enabled));
        Ok(enabled)
    }

    pub async fn set_buck_active_discharge(&self, index: usize, enabled: bool) -> Result<()> {
        self.check_buck_index(index);
        if self.is_offline_mode() {
            self.emit_buck_update(index, BuckUpdate::ActiveDischarge(enabled));
            return Ok(());
        }

        let command = format!("npmx buck active_discharge set {index} {}", u8::from(enabled));
        match self
            .send_command(&command, ResponseMatcher::get_set("npmx buck active_discharge"))
            .await
        {
            Ok(_) => {
                self.emit_buck_update(index, BuckUpdate::ActiveDischarge(enabled));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(move |d| async move {
                    d.request_buck_active_discharge(index).await.map(|_| ())
                });
                Err(e)
            }
        }
    }
}
