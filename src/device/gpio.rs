//! # GPIO Domain
//!
//! Five general-purpose pins, each with mode, pull, drive strength,
//! debounce, and open-drain configuration.

use serde::{Deserialize, Serialize};

use super::events::PartialUpdate;
use super::PmicDevice;
use crate::error::{PmicBridgeError, Result};
use crate::shell::ResponseMatcher;

/// Pin mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GpioMode {
    Input,
    InputLogic1,
    InputLogic0,
    InputRisingEdge,
    InputFallingEdge,
    Output,
    OutputLogic1,
    OutputLogic0,
    OutputInterrupt,
    OutputReset,
}

impl GpioMode {
    fn wire_value(&self) -> u8 {
        match self {
            Self::Input => 0,
            Self::InputLogic1 => 1,
            Self::InputLogic0 => 2,
            Self::InputRisingEdge => 3,
            Self::InputFallingEdge => 4,
            Self::Output => 5,
            Self::OutputLogic1 => 6,
            Self::OutputLogic0 => 7,
            Self::OutputInterrupt => 8,
            Self::OutputReset => 9,
        }
    }

    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Input),
            1 => Some(Self::InputLogic1),
            2 => Some(Self::InputLogic0),
            3 => Some(Self::InputRisingEdge),
            4 => Some(Self::InputFallingEdge),
            5 => Some(Self::Output),
            6 => Some(Self::OutputLogic1),
            7 => Some(Self::OutputLogic0),
            8 => Some(Self::OutputInterrupt),
            9 => Some(Self::OutputReset),
            _ => None,
        }
    }
}

/// Pin pull configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GpioPull {
    PullDown,
    PullUp,
    NoPull,
}

impl GpioPull {
    fn wire_value(&self) -> u8 {
        match self {
            Self::PullDown => 0,
            Self::PullUp => 1,
            Self::NoPull => 2,
        }
    }

    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::PullDown),
            1 => Some(Self::PullUp),
            2 => Some(Self::NoPull),
            _ => None,
        }
    }
}

/// Valid drive strengths in mA
pub const GPIO_DRIVE_STRENGTHS_MA: &[u8] = &[1, 6];

/// One changed GPIO field (delivered as `PartialUpdate<GpioUpdate>`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GpioUpdate {
    Mode(GpioMode),
    Pull(GpioPull),
    /// Drive strength in mA
    Drive(u8),
    Debounce(bool),
    OpenDrain(bool),
}

impl PmicDevice {
    fn check_gpio_index(&self, index: usize) {
        assert!(
            index < self.counts().gpios,
            "GPIO index {index} out of range (device has {})",
            self.counts().gpios
        );
    }

    fn emit_gpio_update(&self, index: usize, data: GpioUpdate) {
        self.bus().emit_gpio(PartialUpdate { index, data });
    }

    async fn write_gpio(
        &self,
        index: usize,
        base: &'static str,
        value: String,
        update: GpioUpdate,
        reader: fn(&PmicDevice, usize),
    ) -> Result<()> {
        self.check_gpio_index(index);
        if self.is_offline_mode() {
            self.emit_gpio_update(index, update);
            return Ok(());
        }

        let command = format!("{base} set {index} {value}");
        match self
            .send_command(&command, ResponseMatcher::get_set(base))
            .await
        {
            Ok(_) => {
                self.emit_gpio_update(index, update);
                Ok(())
            }
            Err(e) => {
                reader(self, index);
                Err(e)
            }
        }
    }

    pub async fn request_gpio_mode(&self, index: usize) -> Result<GpioMode> {
        self.check_gpio_index(index);
        let value = self
            .get_number(
                &format!("npmx gpio config mode get {index}"),
                ResponseMatcher::get_set("npmx gpio config mode"),
            )
            .await?;
        let mode = GpioMode::from_wire(value as u8)
            .ok_or_else(|| PmicBridgeError::MalformedLine(format!("unknown GPIO mode: {value}")))?;
        self.emit_gpio_update(index, GpioUpdate::Mode(mode));
        Ok(mode)
    }

    pub async fn set_gpio_mode(&self, index: usize, mode: GpioMode) -> Result<()> {
        self.write_gpio(
            index,
            "npmx gpio config mode",
            mode.wire_value().to_string(),
            GpioUpdate::Mode(mode),
            |d, i| d.spawn_reader(move |d| async move { d.request_gpio_mode(i).await.map(|_| ()) }),
        )
        .await
    }

    pub async fn request_gpio_pull(&self, index: usize) -> Result<GpioPull> {
        self.check_gpio_index(index);
        let value = self
            .get_number(
                &format!("npmx gpio config pull get {index}"),
                ResponseMatcher::get_set("npmx gpio config pull"),
            )
            .await?;
        let pull = GpioPull::from_wire(value as u8)
            .ok_or_else(|| PmicBridgeError::MalformedLine(format!("unknown GPIO pull: {value}")))?;
        self.emit_gpio_update(index, GpioUpdate::Pull(pull));
        Ok(pull)
    }

    pub async fn set_gpio_pull(&self, index: usize, pull: GpioPull) -> Result<()> {
        self.write_gpio(
            index,
            "npmx gpio config pull",
            pull.wire_value().to_string(),
            GpioUpdate::Pull(pull),
            |d, i| d.spawn_reader(move |d| async move { d.request_gpio_pull(i).await.map(|_| ()) }),
        )
        .await
    }

    pub async fn request_gpio_drive(&self, index: usize) -> Result<u8> {
        self.check_gpio_index(index);
        let ma = self
            .get_number(
                &format!("npmx gpio config drive get {index}"),
                ResponseMatcher::get_set("npmx gpio config drive"),
            )
            .await? as u8;
        self.emit_gpio_update(index, GpioUpdate::Drive(ma));
        Ok(ma)
    }

    pub async fn set_gpio_drive(&self, index: usize, ma: u8) -> Result<()> {
        self.write_gpio(
            index,
            "npmx gpio config drive",
            ma.to_string(),
            GpioUpdate::Drive(ma),
            |d, i| d.spawn_reader(move |d| async move { d.request_gpio_drive(i).await.map(|_| ()) }),
        )
        .await
    }

    pub async fn request_gpio_debounce(&self, index: usize) -> Result<bool> {
        self.check_gpio_index(index);
        let enabled = self
            .get_bool(
                &format!("npmx gpio config debounce get {index}"),
                ResponseMatcher::get_set("npmx gpio config debounce"),
            )
            .await?;
        self.emit_gpio_update(index, GpioUpdate::Debounce(enabled));
        Ok(enabled)
    }

    pub async fn set_gpio_debounce(&self, index: usize, enabled: bool) -> Result<()> {
        self.write_gpio(
            index,
            "npmx gpio config debounce",
            u8::from(enabled).to_string(),
            GpioUpdate::Debounce(enabled),
            |d, i| {
                d.spawn_reader(move |d| async move { d.request_gpio_debounce(i).await.map(|_| ()) })
            },
        )
        .await
    }

    pub async fn request_gpio_open_drain(&self, index: usize) -> Result<bool> {
        self.check_gpio_index(index);
        let enabled = self
            .get_bool(
                &format!("npmx gpio config open_drain get {index}"),
                ResponseMatcher::get_set("npmx gpio config open_drain"),
            )
            .await?;
        self.emit_gpio_update(index, GpioUpdate::OpenDrain(enabled));
        Ok(enabled)
    }

    pub async fn set_gpio_open_drain(&self, index: usize, enabled: bool) -> Result<()> {
        self.write_gpio(
            index,
            "npmx gpio config open_drain",
            u8::from(enabled).to_string(),
            GpioUpdate::OpenDrain(enabled),
            |d, i| {
                d.spawn_reader(move |d| async move {
                    d.request_gpio_open_drain(i).await.map(|_| ())
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
    async fn test_gpio_command_strings() {
        let harness = attached();

        let device = harness.device.clone();
        let request =
            tokio::spawn(async move { device.set_gpio_mode(4, GpioMode::OutputLogic1).await });
        assert_eq!(harness.respond_next(&[]).await, "npmx gpio config mode set 4 6");
        assert!(request.await.unwrap().is_ok());

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.request_gpio_pull(2).await });
        assert_eq!(
            harness.respond_next(&["Value: 1"]).await,
            "npmx gpio config pull get 2"
        );
        assert_eq!(request.await.unwrap().unwrap(), GpioPull::PullUp);
    }

    #[tokio::test]
    async fn test_offline_gpio_write_emits_update() {
        let device = PmicDevice::offline(None);
        let mut updates = device.events().subscribe_gpio();

        device.set_gpio_debounce(3, true).await.unwrap();

        let update = updates.recv().await.unwrap();
        assert_eq!(update.index, 3);
        assert_eq!(update.data, GpioUpdate::Debounce(true));
    }

    #[tokio::test]
    #[should_panic(expected = "GPIO index 5 out of range")]
    async fn test_out_of_range_gpio_index_panics() {
        let device = PmicDevice::offline(None);
        let _ = device.set_gpio_drive(5, 6).await;
    }

    #[test]
    fn test_gpio_mode_wire_round_trip() {
        for value in 0..=9 {
            let mode = GpioMode::from_wire(value).unwrap();
            assert_eq!(mode.wire_value(), value);
        }
        assert_eq!(GpioMode::from_wire(10), None);
    }
}
