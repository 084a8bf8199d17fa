//! # Fuel Gauge Domain
//!
//! Gauge enable, active battery model selection, and the hardcoded/stored
//! model lists. Profiling requires the gauge OFF — the sequencer treats it
//! turning on as a fatal interruption.

use super::PmicDevice;
use crate::error::Result;
use crate::protocol::telemetry::{parse_hardcoded_battery_models, BatteryModel};
use crate::shell::ResponseMatcher;

/// One changed fuel-gauge field
#[derive(Debug, Clone, PartialEq)]
pub enum FuelGaugeUpdate {
    Enabled(bool),
    ActiveBatteryModel(BatteryModel),
    StoredBatteryModels(Vec<BatteryModel>),
}

impl PmicDevice {
    pub async fn request_fuel_gauge(&self) -> Result<bool> {
        let enabled = self
            .get_bool("fuel_gauge get", ResponseMatcher::get_set("fuel_gauge"))
            .await?;
        self.bus().emit_fuel_gauge(FuelGaugeUpdate::Enabled(enabled));
        Ok(enabled)
    }

    pub async fn set_fuel_gauge_enabled(&self, enabled: bool) -> Result<()> {
        if self.is_offline_mode() {
            self.bus().emit_fuel_gauge(FuelGaugeUpdate::Enabled(enabled));
            return Ok(());
        }

        match self
            .send_command(
                &format!("fuel_gauge set {}", u8::from(enabled)),
                ResponseMatcher::get_set("fuel_gauge"),
            )
            .await
        {
            Ok(_) => {
                self.bus().emit_fuel_gauge(FuelGaugeUpdate::Enabled(enabled));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(|d| async move { d.request_fuel_gauge().await.map(|_| ()) });
                Err(e)
            }
        }
    }

    /// Read the currently active battery model
    pub async fn request_active_battery_model(&self) -> Result<Option<BatteryModel>> {
        let response = self
            .send_command("fuel_gauge model get", ResponseMatcher::get_set("fuel_gauge model"))
            .await?;
        let model = crate::protocol::telemetry::parse_battery_model(&response);
        if let Some(model) = &model {
            self.bus()
                .emit_fuel_gauge(FuelGaugeUpdate::ActiveBatteryModel(model.clone()));
        }
        Ok(model)
    }

    /// Select the active battery model by name
    pub async fn set_active_battery_model(&self, name: &str) -> Result<()> {
        match self
            .send_command(
                &format!("fuel_gauge model set \"{name}\""),
                ResponseMatcher::get_set("fuel_gauge model"),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                self.spawn_reader(|d| async move {
                    d.request_active_battery_model().await.map(|_| ())
                });
                Err(e)
            }
        }
    }

    /// Read the device's hardcoded battery model list
    pub async fn hardcoded_battery_models(&self) -> Result<Vec<BatteryModel>> {
        let response = self
            .send_command("fuel_gauge model list", ResponseMatcher::literal("fuel_gauge model list"))
            .await?;
        let models = parse_hardcoded_battery_models(&response);
        self.bus()
            .emit_fuel_gauge(FuelGaugeUpdate::StoredBatteryModels(models.clone()));
        Ok(models)
    }

    /// Toggle the periodic battery status check the firmware runs
    pub async fn set_battery_status_check_enabled(&self, enabled: bool) -> Result<()> {
        self.send_command(
            &format!("npm_chg_status_check set {}", u8::from(enabled)),
            ResponseMatcher::get_set("npm_chg_status_check"),
        )
        .await?;
        Ok(())
    }
}
