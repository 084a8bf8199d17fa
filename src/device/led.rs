//! # LED Domain
//!
//! Three indicator LEDs; each is bound to one of the fixed functions or
//! left unused.

use serde::{Deserialize, Serialize};

use super::events::PartialUpdate;
use super::PmicDevice;
use crate::error::{PmicBridgeError, Result};
use crate::shell::ResponseMatcher;

/// LED function binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LedMode {
    /// Lit on charger error
    Error,
    /// Lit while charging
    Charging,
    /// Driven by the host
    Host,
    NotUsed,
}

impl LedMode {
    fn wire_value(&self) -> u8 {
        match self {
            Self::Error => 0,
            Self::Charging => 1,
            Self::Host => 2,
            Self::NotUsed => 3,
        }
    }

    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Error),
            1 => Some(Self::Charging),
            2 => Some(Self::Host),
            3 => Some(Self::NotUsed),
            _ => None,
        }
    }
}

/// One changed LED field (delivered as `PartialUpdate<LedUpdate>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedUpdate {
    Mode(LedMode),
}

impl PmicDevice {
    fn check_led_index(&self, index: usize) {
        assert!(
            index < self.counts().leds,
            "LED index {index} out of range (device has {})",
            self.counts().leds
        );
    }

    pub async fn request_led_mode(&self, index: usize) -> Result<LedMode> {
        self.check_led_index(index);
        let value = self
            .get_number(
                &format!("npmx led mode get {index}"),
                ResponseMatcher::get_set("npmx led mode"),
            )
            .await?;
        let mode = LedMode::from_wire(value as u8)
            .ok_or_else(|| PmicBridgeError::MalformedLine(format!("unknown LED mode: {value}")))?;
        self.bus().emit_led(PartialUpdate {
            index,
            data: LedUpdate::Mode(mode),
        });
        Ok(mode)
    }

    pub async fn set_led_mode(&self, index: usize, mode: LedMode) -> Result<()> {
        self.check_led_index(index);
        if self.is_offline_mode() {
            self.bus().emit_led(PartialUpdate {
                index,
                data: LedUpdate::Mode(mode),
            });
            return Ok(());
        }

        let command = format!("npmx led mode set {index} {}", mode.wire_value());
        match self
            .send_command(&command, ResponseMatcher::get_set("npmx led mode"))
            .await
        {
            Ok(_) => {
                self.bus().emit_led(PartialUpdate {
                    index,
                    data: LedUpdate::Mode(mode),
                });
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(move |d| async move { d.request_led_mode(index).await.map(|_| ()) });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testutil::attached;
    use crate::device::PmicDevice;

    #[tokio::test]
    async fn test_led_mode_round_trip() {
        let harness = attached();

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.set_led_mode(2, LedMode::Host).await });
        assert_eq!(harness.respond_next(&[]).await, "npmx led mode set 2 2");
        assert!(request.await.unwrap().is_ok());

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.request_led_mode(0).await });
        assert_eq!(harness.respond_next(&["Value: 1"]).await, "npmx led mode get 0");
        assert_eq!(request.await.unwrap().unwrap(), LedMode::Charging);
    }

    #[tokio::test]
    async fn test_failed_led_write_reads_back() {
        let harness = attached();

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.set_led_mode(1, LedMode::NotUsed).await });

        assert_eq!(
            harness.respond_next(&["error: invalid led"]).await,
            "npmx led mode set 1 3"
        );
        assert_eq!(harness.respond_next(&["Value: 0"]).await, "npmx led mode get 1");
        assert!(request.await.unwrap().is_err());
    }

    #[tokio::test]
    #[should_panic(expected = "LED index 3 out of range")]
    async fn test_out_of_range_led_index_panics() {
        let device = PmicDevice::offline(None);
        let _ = device.set_led_mode(3, LedMode::Host).await;
    }
}
