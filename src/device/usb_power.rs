//! # USB Power Domain
//!
//! VBUS CC detect status and the input current limiter.

use super::PmicDevice;
use crate::error::{PmicBridgeError, Result};
use crate::shell::ResponseMatcher;

/// Result of USB CC line detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbDetectStatus {
    NoConnection,
    /// Standard downstream port, 100/500 mA
    Usb100500mA,
    /// 1.5 A high-power port
    HighPower1A5,
    /// 3 A high-power port
    HighPower3A,
}

impl UsbDetectStatus {
    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NoConnection),
            1 => Some(Self::Usb100500mA),
            2 => Some(Self::HighPower1A5),
            3 => Some(Self::HighPower3A),
            _ => None,
        }
    }
}

/// One changed USB power field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UsbPowerUpdate {
    DetectStatus(UsbDetectStatus),
    /// Input current limit in A
    CurrentLimiter(f64),
}

impl PmicDevice {
    /// Read the CC detect status
    pub async fn request_usb_powered(&self) -> Result<UsbDetectStatus> {
        let value = self
            .get_number(
                "npmx vbusin status cc get",
                ResponseMatcher::get_set("npmx vbusin status cc"),
            )
            .await?;
        let status = UsbDetectStatus::from_wire(value as u8).ok_or_else(|| {
            PmicBridgeError::MalformedLine(format!("unknown USB detect status: {value}"))
        })?;
        self.bus().emit_usb_power(UsbPowerUpdate::DetectStatus(status));
        Ok(status)
    }

    pub async fn request_vbusin_current_limiter(&self) -> Result<f64> {
        let ma = self
            .get_number(
                "npmx vbusin current_limit get",
                ResponseMatcher::get_set("npmx vbusin current_limit"),
            )
            .await?;
        let amps = ma / 1000.0;
        self.bus().emit_usb_power(UsbPowerUpdate::CurrentLimiter(amps));
        Ok(amps)
    }

    pub async fn set_vbusin_current_limiter(&self, amps: f64) -> Result<()> {
        if self.is_offline_mode() {
            self.bus().emit_usb_power(UsbPowerUpdate::CurrentLimiter(amps));
            return Ok(());
        }

        let command = format!("npmx vbusin current_limit set {}", (amps * 1000.0).round() as i64);
        match self
            .send_command(&command, ResponseMatcher::get_set("npmx vbusin current_limit"))
            .await
        {
            Ok(_) => {
                self.bus().emit_usb_power(UsbPowerUpdate::CurrentLimiter(amps));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(|d| async move {
                    d.request_vbusin_current_limiter().await.map(|_| ())
                });
                Err(e)
            }
        }
    }
}
