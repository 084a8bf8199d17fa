//! # Battery Profiler
//!
//! The `cc_profile` sub-protocol: upload a characterization profile, start
//! and stop the run, and consume the telemetry the firmware streams back
//! as `module_cc_profiling` records. The higher-level run orchestration
//! lives in [`sequencer`].

pub mod sequencer;

use crate::device::PmicDevice;
use crate::error::Result;
use crate::shell::ResponseMatcher;

/// Whether a profiling segment ends after a cycle count or at a voltage
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentBound {
    /// Run the load/rest pair this many times
    Cycles(u32),

    /// Repeat until the load voltage drops to this cutoff in V
    VoltageCutoff(f64),
}

/// One constant-current load/rest segment of a characterization profile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CcProfile {
    /// Load phase duration in ms
    pub t_load_ms: u32,

    /// Rest phase duration in ms
    pub t_rest_ms: u32,

    /// Load current in mA
    pub i_load_ma: f64,

    /// Rest current in mA
    pub i_rest_ma: f64,

    /// Segment termination: cycle-bounded or voltage-bounded
    pub bound: SegmentBound,
}

impl CcProfile {
    /// Wire form: `"tLoad,tRest,iLoad,iRest,(cycles|NaN)[,vCutoff]"`
    fn serialize(&self) -> String {
        let bound = match self.bound {
            SegmentBound::Cycles(cycles) => format!("{cycles}"),
            SegmentBound::VoltageCutoff(volts) => format!("NaN,{volts}"),
        };
        format!(
            "\"{},{},{},{},{}\"",
            self.t_load_ms, self.t_rest_ms, self.i_load_ma, self.i_rest_ma, bound
        )
    }
}

/// Handle to the profiling sub-protocol of one device session
#[derive(Clone)]
pub struct BatteryProfiler {
    device: PmicDevice,
}

impl PmicDevice {
    /// The profiling sub-protocol entry point
    #[must_use]
    pub fn battery_profiler(&self) -> BatteryProfiler {
        BatteryProfiler {
            device: self.clone(),
        }
    }
}

impl BatteryProfiler {
    /// Upload the profile: report intervals, global voltage cutoff, and the
    /// ordered segment list in one command
    pub async fn set_profile(
        &self,
        report_interval_cc_ms: u32,
        report_interval_ntc_ms: u32,
        v_cutoff: f64,
        segments: &[CcProfile],
    ) -> Result<()> {
        let segments: Vec<String> = segments.iter().map(CcProfile::serialize).collect();
        let command = format!(
            "cc_profile profile set {report_interval_cc_ms} {report_interval_ntc_ms} {v_cutoff} {} --print",
            segments.join(" ")
        );
        self.device
            .send_command(&command, ResponseMatcher::get_set("cc_profile profile"))
            .await?;
        Ok(())
    }

    /// Start the uploaded profile
    pub async fn start_profiling(&self) -> Result<()> {
        self.device
            .send_command("cc_profile start", ResponseMatcher::literal("cc_profile start"))
            .await?;
        self.device.bus().emit_profiling_active(true);
        Ok(())
    }

    /// Stop an ongoing run; harmless when nothing is running
    pub async fn stop_profiling(&self) -> Result<()> {
        self.device
            .send_command("cc_profile stop", ResponseMatcher::literal("cc_profile stop"))
            .await?;
        self.device.bus().emit_profiling_active(false);
        Ok(())
    }

    pub(crate) fn device(&self) -> &PmicDevice {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testutil::attached;

    #[test]
    fn test_segment_serialization_cycle_bounded() {
        let segment = CcProfile {
            t_load_ms: 500,
            t_rest_ms: 2500,
            i_load_ma: 600.0,
            i_rest_ma: 0.0,
            bound: SegmentBound::Cycles(120),
        };
        assert_eq!(segment.serialize(), "\"500,2500,600,0,120\"");
    }

    #[test]
    fn test_segment_serialization_voltage_bounded() {
        let segment = CcProfile {
            t_load_ms: 300_000,
            t_rest_ms: 1_800_000,
            i_load_ma: 150.5,
            i_rest_ma: 0.0,
            bound: SegmentBound::VoltageCutoff(3.9),
        };
        // a voltage-bounded segment carries NaN in the cycles slot
        assert_eq!(segment.serialize(), "\"300000,1800000,150.5,0,NaN,3.9\"");
    }

    #[tokio::test]
    async fn test_set_profile_command_shape() {
        let harness = attached();
        let profiler = harness.device.battery_profiler();

        let request = tokio::spawn(async move {
            profiler
                .set_profile(
                    1000,
                    60_000,
                    3.1,
                    &[
                        CcProfile {
                            t_load_ms: 500,
                            t_rest_ms: 2500,
                            i_load_ma: 600.0,
                            i_rest_ma: 0.0,
                            bound: SegmentBound::Cycles(120),
                        },
                        CcProfile {
                            t_load_ms: 600,
                            t_rest_ms: 2400,
                            i_load_ma: 300.0,
                            i_rest_ma: 0.0,
                            bound: SegmentBound::VoltageCutoff(3.3),
                        },
                    ],
                )
                .await
        });

        let command = harness.respond_next(&[]).await;
        assert_eq!(
            command,
            "cc_profile profile set 1000 60000 3.1 \"500,2500,600,0,120\" \"600,2400,300,0,NaN,3.3\" --print"
        );
        assert!(request.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_start_stop_round_trips_emit_state() {
        let harness = attached();
        let profiler = harness.device.battery_profiler();
        let mut active = harness.device.events().subscribe_profiling_active();

        let start = {
            let profiler = profiler.clone();
            tokio::spawn(async move { profiler.start_profiling().await })
        };
        assert_eq!(harness.respond_next(&[]).await, "cc_profile start");
        assert!(start.await.unwrap().is_ok());
        assert!(active.recv().await.unwrap());

        let stop = tokio::spawn(async move { profiler.stop_profiling().await });
        assert_eq!(harness.respond_next(&[]).await, "cc_profile stop");
        assert!(stop.await.unwrap().is_ok());
        assert!(!active.recv().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_start_does_not_claim_active() {
        let harness = attached();
        let profiler = harness.device.battery_profiler();
        let mut active = harness.device.events().subscribe_profiling_active();

        let start = tokio::spawn(async move { profiler.start_profiling().await });
        harness.respond_next(&["error: no profile set"]).await;
        assert!(start.await.unwrap().is_err());
        assert!(active.try_recv().is_err());
    }
}
