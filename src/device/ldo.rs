//! # LDO / Load Switch Domain
//!
//! Two LDO/load-switch blocks, addressed by index.

use serde::{Deserialize, Serialize};

use super::events::PartialUpdate;
use super::PmicDevice;
use crate::error::{PmicBridgeError, Result};
use crate::shell::ResponseMatcher;

/// Block operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LdoMode {
    LoadSwitch,
    Ldo,
}

impl LdoMode {
    fn wire_value(&self) -> u8 {
        match self {
            Self::LoadSwitch => 0,
            Self::Ldo => 1,
        }
    }

    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::LoadSwitch),
            1 => Some(Self::Ldo),
            _ => None,
        }
    }
}

/// Soft-start current limits in mA
pub const LDO_SOFT_START_CURRENTS_MA: &[u32] = &[10, 20, 35, 50];

/// One changed LDO field (delivered as `PartialUpdate<LdoUpdate>`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LdoUpdate {
    /// Output voltage in V
    Voltage(f64),
    Enabled(bool),
    Mode(LdoMode),
    SoftStartEnabled(bool),
    /// Soft-start current in mA
    SoftStart(u32),
    ActiveDischarge(bool),
    /// GPIO pin driving on/off, `None` when software controlled
    OnOffControl(Option<u8>),
}

impl PmicDevice {
    fn check_ldo_index(&self, index: usize) {
        assert!(
            index < self.counts().ldos,
            "LDO index {index} out of range (device has {})",
            self.counts().ldos
        );
    }

    fn emit_ldo_update(&self, index: usize, data: LdoUpdate) {
        self.bus().emit_ldo(PartialUpdate { index, data });
    }

    /// Shared set flow: offline apply, write, emit, reconcile on failure
    async fn write_ldo(
        &self,
        index: usize,
        base: &'static str,
        value: String,
        update: LdoUpdate,
        reader: fn(&PmicDevice, usize),
    ) -> Result<()> {
        self.check_ldo_index(index);
        if self.is_offline_mode() {
            self.emit_ldo_update(index, update);
            return Ok(());
        }

        let command = format!("{base} set {index} {value}");
        match self
            .send_command(&command, ResponseMatcher::get_set(base))
            .await
        {
            Ok(_) => {
                self.emit_ldo_update(index, update);
                Ok(())
            }
            Err(e) => {
                reader(self, index);
                Err(e)
            }
        }
    }

    pub async fn request_ldo_voltage(&self, index: usize) -> Result<f64> {
        self.check_ldo_index(index);
        let mv = self
            .get_number(
                &format!("npmx ldsw ldo_voltage get {index}"),
                ResponseMatcher::get_set("npmx ldsw ldo_voltage"),
            )
            .await?;
        let volts = mv / 1000.0;
        self.emit_ldo_update(index, LdoUpdate::Voltage(volts));
        Ok(volts)
    }

    pub async fn set_ldo_voltage(&self, index: usize, volts: f64) -> Result<()> {
        self.write_ldo(
            index,
            "npmx ldsw ldo_voltage",
            format!("{}", (volts * 1000.0).round() as i64),
            LdoUpdate::Voltage(volts),
            |d, i| d.spawn_reader(move |d| async move { d.request_ldo_voltage(i).await.map(|_| ()) }),
        )
        .await
    }

    pub async fn request_ldo_enabled(&self, index: usize) -> Result<bool> {
        self.check_ldo_index(index);
        let enabled = self
            .get_bool(
                &format!("npmx ldsw status get {index}"),
                ResponseMatcher::get_set("npmx ldsw status"),
            )
            .await?;
        self.emit_ldo_update(index, LdoUpdate::Enabled(enabled));
        Ok(enabled)
    }

    pub async fn set_ldo_enabled(&self, index: usize, enabled: bool) -> Result<()> {
        self.write_ldo(
            index,
            "npmx ldsw status",
            u8::from(enabled).to_string(),
            LdoUpdate::Enabled(enabled),
            |d, i| d.spawn_reader(move |d| async move { d.request_ldo_enabled(i).await.map(|_| ()) }),
        )
        .await
    }

    pub async fn request_ldo_mode(&self, index: usize) -> Result<LdoMode> {
        self.check_ldo_index(index);
        let value = self
            .get_number(
                &format!("npmx ldsw mode get {index}"),
                ResponseMatcher::get_set("npmx ldsw mode"),
            )
            .await?;
        let mode = LdoMode::from_wire(value as u8)
            .ok_or_else(|| PmicBridgeError::MalformedLine(format!("unknown LDO mode: {value}")))?;
        self.emit_ldo_update(index, LdoUpdate::Mode(mode));
        Ok(mode)
    }

    pub async fn set_ldo_mode(&self, index: usize, mode: LdoMode) -> Result<()> {
        self.write_ldo(
            index,
            "npmx ldsw mode",
            mode.wire_value().to_string(),
            LdoUpdate::Mode(mode),
            |d, i| d.spawn_reader(move |d| async move { d.request_ldo_mode(i).await.map(|_| ()) }),
        )
        .await
    }

    pub async fn request_ldo_soft_start_enabled(&self, index: usize) -> Result<bool> {
        self.check_ldo_index(index);
        let enabled = self
            .get_bool(
                &format!("npmx ldsw soft_start enable get {index}"),
                ResponseMatcher::get_set("npmx ldsw soft_start enable"),
            )
            .await?;
        self.emit_ldo_update(index, LdoUpdate::SoftStartEnabled(enabled));
        Ok(enabled)
    }

    pub async fn set_ldo_soft_start_enabled(&self, index: usize, enabled: bool) -> Result<()> {
        self.write_ldo(
            index,
            "npmx ldsw soft_start enable",
            u8::from(enabled).to_string(),
            LdoUpdate::SoftStartEnabled(enabled),
            |d, i| {
                d.spawn_reader(move |d| async move {
                    d.request_ldo_soft_start_enabled(i).await.map(|_| ())
                })
            },
        )
        .await
    }

    pub async fn request_ldo_soft_start(&self, index: usize) -> Result<u32> {
        self.check_ldo_index(index);
        let ma = self
            .get_number(
                &format!("npmx ldsw soft_start current get {index}"),
                ResponseMatcher::get_set("npmx ldsw soft_start current"),
            )
            .await? as u32;
        self.emit_ldo_update(index, LdoUpdate::SoftStart(ma));
        Ok(ma)
    }

    pub async fn set_ldo_soft_start(&self, index: usize, ma: u32) -> Result<()> {
        self.write_ldo(
            index,
            "npmx ldsw soft_start current",
            ma.to_string(),
            LdoUpdate::SoftStart(ma),
            |d, i| {
                d.spawn_reader(move |d| async move { d.request_ldo_soft_start(i).await.map(|_| ()) })
            },
        )
        .await
    }

    pub async fn request_ldo_active_discharge(&self, index: usize) -> Result<bool> {
        self.check_ldo_index(index);
        let enabled = self
            .get_bool(
                &format!("npmx ldsw active_discharge get {index}"),
                ResponseMatcher::get_set("npmx ldsw active_discharge"),
            )
            .await?;
        self.emit_ldo_update(index, LdoUpdate::ActiveDischarge(enabled));
        Ok(enabled)
    }

    pub async fn set_ldo_active_discharge(&self, index: usize, enabled: bool) -> Result<()> {
        self.write_ldo(
            index,
            "npmx ldsw active_discharge",
            u8::from(enabled).to_string(),
            LdoUpdate::ActiveDischarge(enabled),
            |d, i| {
                d.spawn_reader(move |d| async move {
                    d.request_ldo_active_discharge(i).await.map(|_| ())
                })
            },
        )
        .await
    }

    pub async fn request_ldo_on_off_control(&self, index: usize) -> Result<Option<u8>> {
        self.check_ldo_index(index);
        let value = self
            .get_number(
                &format!("npmx ldsw gpio index get {index}"),
                ResponseMatcher::get_set("npmx ldsw gpio index"),
            )
            .await?;
        let pin = if value < 0.0 { None } else { Some(value as u8) };
        self.emit_ldo_update(index, LdoUpdate::OnOffControl(pin));
        Ok(pin)
    }

    pub async fn set_ldo_on_off_control(&self, index: usize, pin: Option<u8>) -> Result<()> {
        self.write_ldo(
            index,
            "npmx ldsw gpio index",
            pin.map_or(-1i8, |p| p as i8).to_string(),
            LdoUpdate::OnOffControl(pin),
            |d, i| {
                d.spawn_reader(move |d| async move {
                    d.request_ldo_on_off_control(i).await.map(|_| ())
                })
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testutil::attached;
    use crate::device::PmicDevice;

    #[tokio::test]
    async fn test_ldo_command_strings() {
        let harness = attached();

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.request_ldo_voltage(1).await });
        assert_eq!(
            harness.respond_next(&["Value: 3000 mV"]).await,
            "npmx ldsw ldo_voltage get 1"
        );
        assert_eq!(request.await.unwrap().unwrap(), 3.0);

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.set_ldo_mode(0, LdoMode::Ldo).await });
        assert_eq!(harness.respond_next(&[]).await, "npmx ldsw mode set 0 1");
        assert!(request.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_offline_ldo_write_emits_update() {
        let device = PmicDevice::offline(None);
        let mut updates = device.events().subscribe_ldo();

        device.set_ldo_enabled(0, true).await.unwrap();

        let update = updates.recv().await.unwrap();
        assert_eq!(update.index, 0);
        assert_eq!(update.data, LdoUpdate::Enabled(true));
    }

    #[tokio::test]
    async fn test_failed_ldo_write_reconciles() {
        let harness = attached();

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.set_ldo_soft_start(1, 35).await });

        assert_eq!(
            harness.respond_next(&["error: busy"]).await,
            "npmx ldsw soft_start current set 1 35"
        );
        assert_eq!(
            harness.respond_next(&["Value: 20 mA"]).await,
            "npmx ldsw soft_start current get 1"
        );
        assert!(request.await.unwrap().is_err());
    }

    #[tokio::test]
    #[should_panic(expected = "LDO index 2 out of range")]
    async fn test_out_of_range_ldo_index_panics() {
        let device = PmicDevice::offline(None);
        let _ = device.set_ldo_enabled(2, true).await;
    }

    #[test]
    fn test_soft_start_table() {
        assert_eq!(LDO_SOFT_START_CURRENTS_MA, &[10, 20, 35, 50]);
    }
}
