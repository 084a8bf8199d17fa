//! # Power-Loss Comparator Domain
//!
//! The POF block raises the power-failure warning the profiler treats as a
//! run terminator.

use serde::{Deserialize, Serialize};

use super::PmicDevice;
use crate::error::{PmicBridgeError, Result};
use crate::shell::ResponseMatcher;

/// Warning polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PofPolarity {
    ActiveLow,
    ActiveHigh,
}

impl PofPolarity {
    fn wire_value(&self) -> u8 {
        match self {
            Self::ActiveLow => 0,
            Self::ActiveHigh => 1,
        }
    }

    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::ActiveLow),
            1 => Some(Self::ActiveHigh),
            _ => None,
        }
    }
}

/// One changed POF field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PofUpdate {
    Enabled(bool),
    Polarity(PofPolarity),
    /// Warning threshold in V
    Threshold(f64),
}

impl PmicDevice {
    pub async fn request_pof_enabled(&self) -> Result<bool> {
        let enabled = self
            .get_bool("npmx pof status get", ResponseMatcher::get_set("npmx pof status"))
            .await?;
        self.bus().emit_pof(PofUpdate::Enabled(enabled));
        Ok(enabled)
    }

    pub async fn set_pof_enabled(&self, enabled: bool) -> Result<()> {
        if self.is_offline_mode() {
            self.bus().emit_pof(PofUpdate::Enabled(enabled));
            return Ok(());
        }
        match self
            .send_command(
                &format!("npmx pof status set {}", u8::from(enabled)),
                ResponseMatcher::get_set("npmx pof status"),
            )
            .await
        {
            Ok(_) => {
                self.bus().emit_pof(PofUpdate::Enabled(enabled));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(|d| async move { d.request_pof_enabled().await.map(|_| ()) });
                Err(e)
            }
        }
    }

    pub async fn request_pof_polarity(&self) -> Result<PofPolarity> {
        let value = self
            .get_number("npmx pof polarity get", ResponseMatcher::get_set("npmx pof polarity"))
            .await?;
        let polarity = PofPolarity::from_wire(value as u8).ok_or_else(|| {
            PmicBridgeError::MalformedLine(format!("unknown POF polarity: {value}"))
        })?;
        self.bus().emit_pof(PofUpdate::Polarity(polarity));
        Ok(polarity)
    }

    pub async fn set_pof_polarity(&self, polarity: PofPolarity) -> Result<()> {
        if self.is_offline_mode() {
            self.bus().emit_pof(PofUpdate::Polarity(polarity));
            return Ok(());
        }
        match self
            .send_command(
                &format!("npmx pof polarity set {}", polarity.wire_value()),
                ResponseMatcher::get_set("npmx pof polarity"),
            )
            .await
        {
            Ok(_) => {
                self.bus().emit_pof(PofUpdate::Polarity(polarity));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(|d| async move { d.request_pof_polarity().await.map(|_| ()) });
                Err(e)
            }
        }
    }

    pub async fn request_pof_threshold(&self) -> Result<f64> {
        let mv = self
            .get_number("npmx pof threshold get", ResponseMatcher::get_set("npmx pof threshold"))
            .await?;
        let volts = mv / 1000.0;
        self.bus().emit_pof(PofUpdate::Threshold(volts));
        Ok(volts)
    }

    pub async fn set_pof_threshold(&self, volts: f64) -> Result<()> {
        if self.is_offline_mode() {
            self.bus().emit_pof(PofUpdate::Threshold(volts));
            return Ok(());
        }
        match self
            .send_command(
                &format!("npmx pof threshold set {}", (volts * 1000.0).round() as i64),
                ResponseMatcher::get_set("npmx pof threshold"),
            )
            .await
        {
            Ok(_) => {
                self.bus().emit_pof(PofUpdate::Threshold(volts));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(|d| async move { d.request_pof_threshold().await.map(|_| ()) });
                Err(e)
            }
        }
    }
}
