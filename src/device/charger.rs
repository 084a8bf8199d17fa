//! # Charger Domain
//!
//! Readers and writers for the battery charger block. Writers follow the
//! synchronizer contract: while offline they apply optimistically and emit
//! the change event locally; on a failed write they re-issue the matching
//! reader so the UI resynchronizes with the device instead of trusting the
//! failed write either way.
//!
//! Charger writes have ordering dependencies — charging is disabled before
//! a limit changes — which is also why the bulk config applier runs this
//! domain strictly sequentially.

use serde::{Deserialize, Serialize};

use super::PmicDevice;
use crate::error::Result;
use crate::protocol::telemetry::ChargingStatus;
use crate::shell::ResponseMatcher;

/// NTC thermistor types the charger supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NtcThermistor {
    Ntc10k,
    Ntc47k,
    Ntc100k,
}

impl NtcThermistor {
    #[must_use]
    pub fn ohms(&self) -> u32 {
        match self {
            Self::Ntc10k => 10_000,
            Self::Ntc47k => 47_000,
            Self::Ntc100k => 100_000,
        }
    }

    #[must_use]
    pub fn from_ohms(ohms: u32) -> Option<Self> {
        match ohms {
            10_000 => Some(Self::Ntc10k),
            47_000 => Some(Self::Ntc47k),
            100_000 => Some(Self::Ntc100k),
            _ => None,
        }
    }
}

/// One changed charger field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChargerUpdate {
    /// Termination voltage in V
    VTerm(f64),
    /// Charging current limit in mA
    IChg(f64),
    Enabled(bool),
    /// Trickle charge voltage in V
    VTrickleFast(f64),
    /// Termination current in % of iChg
    ITerm(f64),
    EnableRecharging(bool),
    EnableVBatLow(bool),
    NtcThermistor(NtcThermistor),
    NtcBeta(u32),
    /// Die-temperature charging resume threshold in °C
    TChgResume(f64),
    /// Die-temperature charging stop threshold in °C
    TChgStop(f64),
    /// Warm termination voltage in V
    VTermR(f64),
    TCold(f64),
    TCool(f64),
    TWarm(f64),
    THot(f64),
    /// ADC full-scale battery current in mA
    BatLim(f64),
}

impl PmicDevice {
    fn emit_charger_update(&self, update: ChargerUpdate) {
        self.bus().emit_charger(update);
    }

    async fn write_charger(
        &self,
        command: String,
        base: &str,
        update: ChargerUpdate,
        reconcile: fn(&PmicDevice) -> (),
    ) -> Result<()> {
        match self
            .send_command(&command, ResponseMatcher::get_set(base))
            .await
        {
            Ok(_) => {
                self.emit_charger_update(update);
                Ok(())
            }
            Err(e) => {
                reconcile(self);
                Err(e)
            }
        }
    }

    // --- charging state ------------------------------------------------

    /// Read the charging-status byte and publish the decoded bitfield
    pub async fn request_pmic_charging_state(&self) -> Result<ChargingStatus> {
        let value = self
            .get_number(
                "npmx charger status all get",
                ResponseMatcher::get_set("npmx charger status all"),
            )
            .await?;
        let status = ChargingStatus::from_status_value(value as u8);
        self.bus().emit_charging_status(status);
        Ok(status)
    }

    // --- termination voltage (vTerm) -----------------------------------

    pub async fn request_charger_v_term(&self) -> Result<f64> {
        let mv = self
            .get_number(
                "npmx charger termination_voltage normal get",
                ResponseMatcher::get_set("npmx charger termination_voltage normal"),
            )
            .await?;
        let volts = mv / 1000.0;
        self.emit_charger_update(ChargerUpdate::VTerm(volts));
        Ok(volts)
    }

    /// Set the termination voltage in V; charging is disabled first because
    /// the device refuses limit changes while charging
    pub async fn set_charger_v_term(&self, volts: f64) -> Result<()> {
        self.set_charger_enabled(false).await?;

        if self.is_offline_mode() {
            self.emit_charger_update(ChargerUpdate::VTerm(volts));
            return Ok(());
        }

        self.write_charger(
            format!(
                "npmx charger termination_voltage normal set {}",
                millivolts(volts)
            ),
            "npmx charger termination_voltage normal",
            ChargerUpdate::VTerm(volts),
            |device| device.spawn_reader(|d| async move { d.request_charger_v_term().await.map(|_| ()) }),
        )
        .await
    }

    // --- charging current (iChg) ---------------------------------------

    pub async fn request_charger_i_chg(&self) -> Result<f64> {
        let ma = self
            .get_number(
                "npmx charger charging_current get",
                ResponseMatcher::get_set("npmx charger charging_current"),
            )
            .await?;
        self.emit_charger_update(ChargerUpdate::IChg(ma));
        Ok(ma)
    }

    /// Set the charging current limit in mA (charging disabled first)
    pub async fn set_charger_i_chg(&self, ma: f64) -> Result<()> {
        self.set_charger_enabled(false).await?;

        if self.is_offline_mode() {
            self.emit_charger_update(ChargerUpdate::IChg(ma));
            return Ok(());
        }

        self.write_charger(
            format!("npmx charger charging_current set {}", ma.round() as i64),
            "npmx charger charging_current",
            ChargerUpdate::IChg(ma),
            |device| device.spawn_reader(|d| async move { d.request_charger_i_chg().await.map(|_| ()) }),
        )
        .await
    }

    // --- charger module enable -----------------------------------------

    pub async fn request_charger_enabled(&self) -> Result<bool> {
        let enabled = self
            .get_bool(
                "npmx charger module charger get",
                ResponseMatcher::get_set("npmx charger module charger"),
            )
            .await?;
        self.emit_charger_update(ChargerUpdate::Enabled(enabled));
        Ok(enabled)
    }

    pub async fn set_charger_enabled(&self, enabled: bool) -> Result<()> {
        if self.is_offline_mode() {
            self.emit_charger_update(ChargerUpdate::Enabled(enabled));
            return Ok(());
        }

        let result = self
            .write_charger(
                format!("npmx charger module charger set {}", u8::from(enabled)),
                "npmx charger module charger",
                ChargerUpdate::Enabled(enabled),
                |device| {
                    device.spawn_reader(|d| async move {
                        d.request_charger_enabled().await.map(|_| ())
                    })
                },
            )
            .await;

        // charging state follows the module switch; refresh it regardless
        // of the write outcome
        let _ = self.request_pmic_charging_state().await;

        result
    }

    // --- trickle voltage -----------------------------------------------

    pub async fn request_charger_v_trickle_fast(&self) -> Result<f64> {
        let mv = self
            .get_number(
                "npmx charger trickle_voltage get",
                ResponseMatcher::get_set("npmx charger trickle_voltage"),
            )
            .await?;
        let volts = mv / 1000.0;
        self.emit_charger_update(ChargerUpdate::VTrickleFast(volts));
        Ok(volts)
    }

    pub async fn set_charger_v_trickle_fast(&self, volts: f64) -> Result<()> {
        if self.is_offline_mode() {
            self.emit_charger_update(ChargerUpdate::VTrickleFast(volts));
            return Ok(());
        }
        self.write_charger(
            format!("npmx charger trickle_voltage set {}", millivolts(volts)),
            "npmx charger trickle_voltage",
            ChargerUpdate::VTrickleFast(volts),
            |device| {
                device.spawn_reader(|d| async move {
                    d.request_charger_v_trickle_fast().await.map(|_| ())
                })
            },
        )
        .await
    }

    // --- termination current (iTerm) -----------------------------------

    pub async fn request_charger_i_term(&self) -> Result<f64> {
        let pct = self
            .get_number(
                "npmx charger termination_current get",
                ResponseMatcher::get_set("npmx charger termination_current"),
            )
            .await?;
        self.emit_charger_update(ChargerUpdate::ITerm(pct));
        Ok(pct)
    }

    pub async fn set_charger_i_term(&self, percent: f64) -> Result<()> {
        if self.is_offline_mode() {
            self.emit_charger_update(ChargerUpdate::ITerm(percent));
            return Ok(());
        }
        self.write_charger(
            format!("npmx charger termination_current set {}", percent.round() as i64),
            "npmx charger termination_current",
            ChargerUpdate::ITerm(percent),
            |device| device.spawn_reader(|d| async move { d.request_charger_i_term().await.map(|_| ()) }),
        )
        .await
    }

    // --- recharge / vbatlow switches -----------------------------------

    pub async fn request_charger_enabled_recharging(&self) -> Result<bool> {
        let enabled = self
            .get_bool(
                "npmx charger module recharge get",
                ResponseMatcher::get_set("npmx charger module recharge"),
            )
            .await?;
        self.emit_charger_update(ChargerUpdate::EnableRecharging(enabled));
        Ok(enabled)
    }

    pub async fn set_charger_enabled_recharging(&self, enabled: bool) -> Result<()> {
        if self.is_offline_mode() {
            self.emit_charger_update(ChargerUpdate::EnableRecharging(enabled));
            return Ok(());
        }
        self.write_charger(
            format!("npmx charger module recharge set {}", u8::from(enabled)),
            "npmx charger module recharge",
            ChargerUpdate::EnableRecharging(enabled),
            |device| {
                device.spawn_reader(|d| async move {
                    d.request_charger_enabled_recharging().await.map(|_| ())
                })
            },
        )
        .await
    }

    pub async fn request_charger_enabled_v_bat_low(&self) -> Result<bool> {
        let enabled = self
            .get_bool(
                "powerup_charger vbatlow get",
                ResponseMatcher::get_set("powerup_charger vbatlow"),
            )
            .await?;
        self.emit_charger_update(ChargerUpdate::EnableVBatLow(enabled));
        Ok(enabled)
    }

    pub async fn set_charger_enabled_v_bat_low(&self, enabled: bool) -> Result<()> {
        if self.is_offline_mode() {
            self.emit_charger_update(ChargerUpdate::EnableVBatLow(enabled));
            return Ok(());
        }
        self.write_charger(
            format!("powerup_charger vbatlow set {}", u8::from(enabled)),
            "powerup_charger vbatlow",
            ChargerUpdate::EnableVBatLow(enabled),
            |device| {
                device.spawn_reader(|d| async move {
                    d.request_charger_enabled_v_bat_low().await.map(|_| ())
                })
            },
        )
        .await
    }

    // --- NTC configuration ---------------------------------------------

    pub async fn request_charger_ntc_thermistor(&self) -> Result<NtcThermistor> {
        let ohms = self
            .get_number("npmx adc ntc type get", ResponseMatcher::get_set("npmx adc ntc type"))
            .await?;
        let ntc = NtcThermistor::from_ohms(ohms as u32).ok_or_else(|| {
            crate::error::PmicBridgeError::MalformedLine(format!("unknown NTC type: {ohms}"))
        })?;
        self.emit_charger_update(ChargerUpdate::NtcThermistor(ntc));
        Ok(ntc)
    }

    pub async fn set_charger_ntc_thermistor(&self, ntc: NtcThermistor) -> Result<()> {
        if self.is_offline_mode() {
            self.emit_charger_update(ChargerUpdate::NtcThermistor(ntc));
            return Ok(());
        }
        self.write_charger(
            format!("npmx adc ntc type set {}", ntc.ohms()),
            "npmx adc ntc type",
            ChargerUpdate::NtcThermistor(ntc),
            |device| {
                device.spawn_reader(|d| async move {
                    d.request_charger_ntc_thermistor().await.map(|_| ())
                })
            },
        )
        .await
    }

    pub async fn request_charger_ntc_beta(&self) -> Result<u32> {
        let beta = self
            .get_number("npmx adc ntc beta get", ResponseMatcher::get_set("npmx adc ntc beta"))
            .await? as u32;
        self.emit_charger_update(ChargerUpdate::NtcBeta(beta));
        Ok(beta)
    }

    pub async fn set_charger_ntc_beta(&self, beta: u32) -> Result<()> {
        if self.is_offline_mode() {
            self.emit_charger_update(ChargerUpdate::NtcBeta(beta));
            return Ok(());
        }
        self.write_charger(
            format!("npmx adc ntc beta set {beta}"),
            "npmx adc ntc beta",
            ChargerUpdate::NtcBeta(beta),
            |device| {
                device.spawn_reader(|d| async move { d.request_charger_ntc_beta().await.map(|_| ()) })
            },
        )
        .await
    }

    // --- die temperature thresholds ------------------------------------

    pub async fn request_charger_t_chg_resume(&self) -> Result<f64> {
        let celsius = self
            .get_number(
                "npmx charger die_temp resume get",
                ResponseMatcher::get_set("npmx charger die_temp resume"),
            )
            .await?;
        self.emit_charger_update(ChargerUpdate::TChgResume(celsius));
        Ok(celsius)
    }

    pub async fn set_charger_t_chg_resume(&self, celsius: f64) -> Result<()> {
        if self.is_offline_mode() {
            self.emit_charger_update(ChargerUpdate::TChgResume(celsius));
            return Ok(());
        }
        self.write_charger(
            format!("npmx charger die_temp resume set {}", celsius.round() as i64),
            "npmx charger die_temp resume",
            ChargerUpdate::TChgResume(celsius),
            |device| {
                device.spawn_reader(|d| async move {
                    d.request_charger_t_chg_resume().await.map(|_| ())
                })
            },
        )
        .await
    }

    pub async fn request_charger_t_chg_stop(&self) -> Result<f64> {
        let celsius = self
            .get_number(
                "npmx charger die_temp stop get",
                ResponseMatcher::get_set("npmx charger die_temp stop"),
            )
            .await?;
        self.emit_charger_update(ChargerUpdate::TChgStop(celsius));
        Ok(celsius)
    }

    pub async fn set_charger_t_chg_stop(&self, celsius: f64) -> Result<()> {
        if self.is_offline_mode() {
            self.emit_charger_update(ChargerUpdate::TChgStop(celsius));
            return Ok(());
        }
        self.write_charger(
            format!("npmx charger die_temp stop set {}", celsius.round() as i64),
            "npmx charger die_temp stop",
            ChargerUpdate::TChgStop(celsius),
            |device| {
                device
                    .spawn_reader(|d| async move { d.request_charger_t_chg_stop().await.map(|_| ()) })
            },
        )
        .await
    }

    // --- warm termination voltage (vTermR) ------------------------------

    pub async fn request_charger_v_term_r(&self) -> Result<f64> {
        let mv = self
            .get_number(
                "npmx charger termination_voltage warm get",
                ResponseMatcher::get_set("npmx charger termination_voltage warm"),
            )
            .await?;
        let volts = mv / 1000.0;
        self.emit_charger_update(ChargerUpdate::VTermR(volts));
        Ok(volts)
    }

    pub async fn set_charger_v_term_r(&self, volts: f64) -> Result<()> {
        if self.is_offline_mode() {
            self.emit_charger_update(ChargerUpdate::VTermR(volts));
            return Ok(());
        }
        self.write_charger(
            format!("npmx charger termination_voltage warm set {}", millivolts(volts)),
            "npmx charger termination_voltage warm",
            ChargerUpdate::VTermR(volts),
            |device| {
                device
                    .spawn_reader(|d| async move { d.request_charger_v_term_r().await.map(|_| ()) })
            },
        )
        .await
    }

    // --- NTC temperature window ----------------------------------------

    pub async fn request_charger_t_cold(&self) -> Result<f64> {
        self.request_ntc_temperature("cold", ChargerUpdate::TCold).await
    }

    pub async fn request_charger_t_cool(&self) -> Result<f64> {
        self.request_ntc_temperature("cool", ChargerUpdate::TCool).await
    }

    pub async fn request_charger_t_warm(&self) -> Result<f64> {
        self.request_ntc_temperature("warm", ChargerUpdate::TWarm).await
    }

    pub async fn request_charger_t_hot(&self) -> Result<f64> {
        self.request_ntc_temperature("hot", ChargerUpdate::THot).await
    }

    async fn request_ntc_temperature(
        &self,
        zone: &str,
        update: fn(f64) -> ChargerUpdate,
    ) -> Result<f64> {
        let base = format!("npmx charger ntc_temperature {zone}");
        let celsius = self
            .get_number(&format!("{base} get"), ResponseMatcher::get_set(&base))
            .await?;
        self.emit_charger_update(update(celsius));
        Ok(celsius)
    }

    pub async fn set_charger_t_cold(&self, celsius: f64) -> Result<()> {
        self.set_ntc_temperature("cold", celsius, ChargerUpdate::TCold).await
    }

    pub async fn set_charger_t_cool(&self, celsius: f64) -> Result<()> {
        self.set_ntc_temperature("cool", celsius, ChargerUpdate::TCool).await
    }

    pub async fn set_charger_t_warm(&self, celsius: f64) -> Result<()> {
        self.set_ntc_temperature("warm", celsius, ChargerUpdate::TWarm).await
    }

    pub async fn set_charger_t_hot(&self, celsius: f64) -> Result<()> {
        self.set_ntc_temperature("hot", celsius, ChargerUpdate::THot).await
    }

    async fn set_ntc_temperature(
        &self,
        zone: &'static str,
        celsius: f64,
        update: fn(f64) -> ChargerUpdate,
    ) -> Result<()> {
        if self.is_offline_mode() {
            self.emit_charger_update(update(celsius));
            return Ok(());
        }

        let base = format!("npmx charger ntc_temperature {zone}");
        match self
            .send_command(
                &format!("{base} set {}", celsius.round() as i64),
                ResponseMatcher::get_set(&base),
            )
            .await
        {
            Ok(_) => {
                self.emit_charger_update(update(celsius));
                Ok(())
            }
            Err(e) => {
                self.spawn_reader(move |d| async move {
                    d.request_ntc_temperature(zone, update).await.map(|_| ())
                });
                Err(e)
            }
        }
    }

    // --- ADC full-scale current (batLim) -------------------------------

    pub async fn request_charger_bat_lim(&self) -> Result<f64> {
        let ma = self
            .get_number("npm_adc fullscale get", ResponseMatcher::get_set("npm_adc fullscale"))
            .await?;
        self.emit_charger_update(ChargerUpdate::BatLim(ma));
        Ok(ma)
    }

    pub async fn set_charger_bat_lim(&self, ma: f64) -> Result<()> {
        if self.is_offline_mode() {
            self.emit_charger_update(ChargerUpdate::BatLim(ma));
            return Ok(());
        }
        self.write_charger(
            format!("npm_adc fullscale set {}", ma.round() as i64),
            "npm_adc fullscale",
            ChargerUpdate::BatLim(ma),
            |device| {
                device
                    .spawn_reader(|d| async move { d.request_charger_bat_lim().await.map(|_| ()) })
            },
        )
        .await
    }

    /// Run a reconciliation reader in the background, ignoring its result
    pub(crate) fn spawn_reader<F, Fut>(&self, reader: F)
    where
        F: FnOnce(PmicDevice) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send,
    {
        let device = self.clone();
        tokio::spawn(async move {
            let _ = reader(device).await;
        });
    }
}

/// Volts to the integer millivolts the shell expects
fn millivolts(volts: f64) -> i64 {
    (volts * 1000.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testutil::attached;
    use crate::device::PmicDevice;

    #[tokio::test]
    async fn test_request_charger_v_term_command_and_event() {
        let harness = attached();
        let mut updates = harness.device.events().subscribe_charger();

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.request_charger_v_term().await });

        let command = harness.respond_next(&["Value: 3600 mV"]).await;
        assert_eq!(command, "npmx charger termination_voltage normal get");

        assert_eq!(request.await.unwrap().unwrap(), 3.6);
        assert_eq!(updates.recv().await.unwrap(), ChargerUpdate::VTerm(3.6));
    }

    #[tokio::test]
    async fn test_set_charger_v_term_disables_charging_first() {
        let harness = attached();

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.set_charger_v_term(4.2).await });

        let first = harness.respond_next(&[]).await;
        assert_eq!(first, "npmx charger module charger set 0");

        // the charging-state refresh follows the module switch
        let second = harness.respond_next(&["Value: 0"]).await;
        assert_eq!(second, "npmx charger status all get");

        let third = harness.respond_next(&[]).await;
        assert_eq!(third, "npmx charger termination_voltage normal set 4200");

        assert!(request.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_offline_write_applies_optimistically() {
        let device = PmicDevice::offline(None);
        let mut updates = device.events().subscribe_charger();

        device.set_charger_i_chg(400.0).await.unwrap();

        // charging is switched off first, then the limit applies
        assert_eq!(updates.recv().await.unwrap(), ChargerUpdate::Enabled(false));
        assert_eq!(updates.recv().await.unwrap(), ChargerUpdate::IChg(400.0));
    }

    #[tokio::test]
    async fn test_failed_write_reissues_reader() {
        let harness = attached();

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.set_charger_ntc_beta(3380).await });

        let write = harness.respond_next(&["error: invalid parameter"]).await;
        assert_eq!(write, "npmx adc ntc beta set 3380");

        // the synchronizer reads the actual device state back
        let readback = harness.respond_next(&["Value: 3950"]).await;
        assert_eq!(readback, "npmx adc ntc beta get");

        assert!(request.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_charging_state_readback_decodes_bitfield() {
        let harness = attached();
        let mut status_rx = harness.device.events().subscribe_charging_status();

        let device = harness.device.clone();
        let request = tokio::spawn(async move { device.request_pmic_charging_state().await });

        let command = harness.respond_next(&["Value: 16"]).await;
        assert_eq!(command, "npmx charger status all get");

        let status = request.await.unwrap().unwrap();
        assert!(status.constant_voltage_charging);
        assert!(!status.constant_current_charging);
        assert_eq!(status_rx.recv().await.unwrap(), status);
    }

    #[test]
    fn test_ntc_thermistor_ohms_round_trip() {
        for ntc in [NtcThermistor::Ntc10k, NtcThermistor::Ntc47k, NtcThermistor::Ntc100k] {
            assert_eq!(NtcThermistor::from_ohms(ntc.ohms()), Some(ntc));
        }
        assert_eq!(NtcThermistor::from_ohms(22_000), None);
    }
}
