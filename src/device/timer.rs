//! # Wake-Up Timer Domain

use serde::{Deserialize, Serialize};

use super::PmicDevice;
use crate::error::{PmicBridgeError, Result};
use crate::shell::ResponseMatcher;

/// Timer operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerMode {
    BootMonitor,
    WatchdogWarning,
    WatchdogReset,
    GeneralPurpose,
    Wakeup,
}

impl TimerMode {
    fn wire_value(&self) -> u8 {
        match self {
            Self::BootMonitor => 0,
            Self::WatchdogWarning => 1,
            Self::WatchdogReset => 2,
            Self::GeneralPurpose => 3,
            Self::Wakeup => 4,
        }
    }

    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::BootMonitor),
            1 => Some(Self::WatchdogWarning),
            2 => Some(Self::WatchdogReset),
            3 => Some(Self::GeneralPurpose),
            4 => Some(Self::Wakeup),
            _ => None,
        }
    }
}

/// Timer clock prescaler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerPrescaler {
    Slow,
    Fast,
}

impl TimerPrescaler {
    fn wire_value(&self) -> u8 {
        match self {
            Self::Slow => 0,
            Self::Fast => 1,
        }
    }

    #[must_use]
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Slow),
            1 => Some(Self::Fast),
            _ => None,
        }
    }
}

/// One changed timer field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerUpdate {
    Mode(TimerMode),
    Prescaler(TimerPrescaler),
    /// Compare period in timer ticks
    Period(u32),
}

impl PmicDevice {
    pub async fn request_timer_mode(&self) -> Result<TimerMode> {
        let value = self
            .get_number(
                "npmx timer config mode get",
                ResponseMatcher::get_set("npmx timer config mode"),
            )
            .await?;
        let mode = TimerMode::from_wire(value as u8)
            .ok_or_else(|| PmicBridgeError::MalformedLine(format!("unknown timer mode: {value}")))?;
        self.bus().emit_timer(TimerUpdate::Mode(mode));
        Ok(mode)
    }

    pub async fn set_timer_mode(&self, mode: TimerMode) -> Result<()> {
        if self.is_offline_mode() {
            self.bus().emit_timer(TimerUpdate::Mode(mode));
            return Ok(());
        }
        match self
            .send_command(
                &format!("npmx timer config mode set {}", mode.wire_value()),
                ResponseMatcher::get_set("npmx timer config mode"),
            )
            .await
        {
            Ok(_) => {
                self.bus().emit_timer(TimerUpdate::Mode(mode));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(|d| async move { d.request_timer_mode().await.map(|_| ()) });
                Err(e)
            }
        }
    }

    pub async fn request_timer_prescaler(&self) -> Result<TimerPrescaler> {
        let value = self
            .get_number(
                "npmx timer config prescaler get",
                ResponseMatcher::get_set("npmx timer config prescaler"),
            )
            .await?;
        let prescaler = TimerPrescaler::from_wire(value as u8).ok_or_else(|| {
            PmicBridgeError::MalformedLine(format!("unknown timer prescaler: {value}"))
        })?;
        self.bus().emit_timer(TimerUpdate::Prescaler(prescaler));
        Ok(prescaler)
    }

    pub async fn set_timer_prescaler(&self, prescaler: TimerPrescaler) -> Result<()> {
        if self.is_offline_mode() {
            self.bus().emit_timer(TimerUpdate::Prescaler(prescaler));
            return Ok(());
        }
        match self
            .send_command(
                &format!("npmx timer config prescaler set {}", prescaler.wire_value()),
                ResponseMatcher::get_set("npmx timer config prescaler"),
            )
            .await
        {
            Ok(_) => {
                self.bus().emit_timer(TimerUpdate::Prescaler(prescaler));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(|d| async move { d.request_timer_prescaler().await.map(|_| ()) });
                Err(e)
            }
        }
    }

    pub async fn request_timer_period(&self) -> Result<u32> {
        let ticks = self
            .get_number(
                "npmx timer config compare get",
                ResponseMatcher::get_set("npmx timer config compare"),
            )
            .await? as u32;
        self.bus().emit_timer(TimerUpdate::Period(ticks));
        Ok(ticks)
    }

    pub async fn set_timer_period(&self, ticks: u32) -> Result<()> {
        if self.is_offline_mode() {
            self.bus().emit_timer(TimerUpdate::Period(ticks));
            return Ok(());
        }
        match self
            .send_command(
                &format!("npmx timer config compare set {ticks}"),
                ResponseMatcher::get_set("npmx timer config compare"),
            )
            .await
        {
            Ok(_) => {
                self.bus().emit_timer(TimerUpdate::Period(ticks));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(|d| async move { d.request_timer_period().await.map(|_| ()) });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testutil::attached;

    #[tokio::test]
    async fn test_timer_command_strings() {
        let harness = attached();

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.set_timer_mode(TimerMode::Wakeup).await });
        assert_eq!(harness.respond_next(&[]).await, "npmx timer config mode set 4");
        assert!(request.await.unwrap().is_ok());

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.request_timer_period().await });
        assert_eq!(
            harness.respond_next(&["Value: 1024"]).await,
            "npmx timer config compare get"
        );
        assert_eq!(request.await.unwrap().unwrap(), 1024);
    }
}
