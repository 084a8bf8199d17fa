//! # Ship Mode Domain
//!
//! Ultra-low-power storage states plus the reset-button behavior around
//! them. Entering ship or hibernate mode cuts the rails; the device only
//! returns on a wake event.

use super::PmicDevice;
use crate::error::Result;
use crate::shell::ResponseMatcher;

/// One changed ship-mode field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipModeUpdate {
    /// Wake-button hold time in ms
    TimeToActive(u32),
    InvertPolarity(bool),
    LongPressReset(bool),
    TwoButtonReset(bool),
}

impl PmicDevice {
    pub async fn request_ship_mode_time_to_active(&self) -> Result<u32> {
        let ms = self
            .get_number("npmx ship config time get", ResponseMatcher::get_set("npmx ship config time"))
            .await? as u32;
        self.bus().emit_ship_mode(ShipModeUpdate::TimeToActive(ms));
        Ok(ms)
    }

    pub async fn set_ship_mode_time_to_active(&self, ms: u32) -> Result<()> {
        if self.is_offline_mode() {
            self.bus().emit_ship_mode(ShipModeUpdate::TimeToActive(ms));
            return Ok(());
        }
        match self
            .send_command(
                &format!("npmx ship config time set {ms}"),
                ResponseMatcher::get_set("npmx ship config time"),
            )
            .await
        {
            Ok(_) => {
                self.bus().emit_ship_mode(ShipModeUpdate::TimeToActive(ms));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(|d| async move {
                    d.request_ship_mode_time_to_active().await.map(|_| ())
                });
                Err(e)
            }
        }
    }

    pub async fn request_ship_invert_polarity(&self) -> Result<bool> {
        let enabled = self
            .get_bool(
                "npmx ship config inv_polarity get",
                ResponseMatcher::get_set("npmx ship config inv_polarity"),
            )
            .await?;
        self.bus().emit_ship_mode(ShipModeUpdate::InvertPolarity(enabled));
        Ok(enabled)
    }

    pub async fn set_ship_invert_polarity(&self, enabled: bool) -> Result<()> {
        if self.is_offline_mode() {
            self.bus().emit_ship_mode(ShipModeUpdate::InvertPolarity(enabled));
            return Ok(());
        }
        match self
            .send_command(
                &format!("npmx ship config inv_polarity set {}", u8::from(enabled)),
                ResponseMatcher::get_set("npmx ship config inv_polarity"),
            )
            .await
        {
            Ok(_) => {
                self.bus().emit_ship_mode(ShipModeUpdate::InvertPolarity(enabled));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(|d| async move {
                    d.request_ship_invert_polarity().await.map(|_| ())
                });
                Err(e)
            }
        }
    }

    pub async fn request_ship_long_press_reset(&self) -> Result<bool> {
        let enabled = self
            .get_bool(
                "powerup_ship longpress get",
                ResponseMatcher::get_set("powerup_ship longpress"),
            )
            .await?;
        self.bus().emit_ship_mode(ShipModeUpdate::LongPressReset(enabled));
        Ok(enabled)
    }

    pub async fn set_ship_long_press_reset(&self, enabled: bool) -> Result<()> {
        if self.is_offline_mode() {
            self.bus().emit_ship_mode(ShipModeUpdate::LongPressReset(enabled));
            return Ok(());
        }
        match self
            .send_command(
                &format!("powerup_ship longpress set {}", u8::from(enabled)),
                ResponseMatcher::get_set("powerup_ship longpress"),
            )
            .await
        {
            Ok(_) => {
                self.bus().emit_ship_mode(ShipModeUpdate::LongPressReset(enabled));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(|d| async move {
                    d.request_ship_long_press_reset().await.map(|_| ())
                });
                Err(e)
            }
        }
    }

    pub async fn request_ship_two_button_reset(&self) -> Result<bool> {
        let enabled = self
            .get_bool(
                "powerup_ship twobutton get",
                ResponseMatcher::get_set("powerup_ship twobutton"),
            )
            .await?;
        self.bus().emit_ship_mode(ShipModeUpdate::TwoButtonReset(enabled));
        Ok(enabled)
    }

    pub async fn set_ship_two_button_reset(&self, enabled: bool) -> Result<()> {
        if self.is_offline_mode() {
            self.bus().emit_ship_mode(ShipModeUpdate::TwoButtonReset(enabled));
            return Ok(());
        }
        match self
            .send_command(
                &format!("powerup_ship twobutton set {}", u8::from(enabled)),
                ResponseMatcher::get_set("powerup_ship twobutton"),
            )
            .await
        {
            Ok(_) => {
                self.bus().emit_ship_mode(ShipModeUpdate::TwoButtonReset(enabled));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(|d| async move {
                    d.request_ship_two_button_reset().await.map(|_| ())
                });
                Err(e)
            }
        }
    }

    /// Put the device into ship mode; this ends the session on purpose
    pub async fn enter_ship_mode(&self) -> Result<()> {
        self.send_command("npmx ship mode ship", ResponseMatcher::literal("npmx ship mode ship"))
            .await?;
        Ok(())
    }

    /// Put the device into hibernate mode (ship mode with wake-up timer)
    pub async fn enter_ship_hibernate_mode(&self) -> Result<()> {
        self.send_command(
            "npmx ship mode hibernate",
            ResponseMatcher::literal("npmx ship mode hibernate"),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testutil::attached;
    use crate::error::PmicBridgeError;

    #[tokio::test]
    async fn test_ship_mode_command_strings() {
        let harness = attached();

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.set_ship_mode_time_to_active(96).await });
        assert_eq!(harness.respond_next(&[]).await, "npmx ship config time set 96");
        assert!(request.await.unwrap().is_ok());

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.enter_ship_mode().await });
        assert_eq!(harness.respond_next(&[]).await, "npmx ship mode ship");
        assert!(request.await.unwrap().is_ok());

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.enter_ship_hibernate_mode().await });
        assert_eq!(harness.respond_next(&[]).await, "npmx ship mode hibernate");
        assert!(request.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_enter_ship_mode_requires_connection() {
        let device = crate::device::PmicDevice::offline(None);
        let err = device.enter_ship_mode().await.unwrap_err();
        assert!(matches!(err, PmicBridgeError::Disconnected));
    }
}
