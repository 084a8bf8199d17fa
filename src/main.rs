//! # PMIC Bridge
//!
//! Desktop control-panel core for a battery-charging PMIC, talking to the
//! device's interactive shell over a serial port.
//!
//! This binary is the headless face of the library: it connects, starts
//! ADC sampling, and prints the typed event stream until Ctrl+C.

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod config;
mod device;
mod error;
mod profiler;
mod protocol;
mod shell;

use config::Config;
use device::{PmicDevice, SessionConfig};
use shell::transport::SerialShellTransport;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging: console plus a non-blocking rolling file
    let file_appender = tracing_appender::rolling::daily("logs", "pmic-bridge.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(file_writer.and(std::io::stdout))
        .init();

    info!("PMIC Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "pmic-bridge.toml".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Using default configuration ({config_path}: {e})");
            Config::default()
        }
    };

    let (transport, line_rx) =
        SerialShellTransport::open(&config.serial.port, config.serial.baud_rate)?;
    info!("PMIC shell opened at: {}", transport.device_path());

    let session = SessionConfig {
        channel: config.channel_config(),
        auto_reboot: config.device.auto_reboot,
    };
    let device = PmicDevice::attach(transport, line_rx, session, None);

    // Seed the audit clock, check the firmware, and start telemetry
    if let Err(e) = device.sync_uptime().await {
        warn!("Unable to read kernel uptime: {}", e);
    }
    match device.is_supported_version().await {
        Ok((true, version)) => info!("Firmware version {version}"),
        Ok((false, version)) => warn!(
            "Firmware version {version} differs from the supported {}",
            device.supported_version()
        ),
        Err(e) => warn!("Unable to read firmware version: {}", e),
    }
    if let Err(e) = device
        .start_adc_sample(config.adc.report_interval_ms, config.adc.sample_interval_ms)
        .await
    {
        warn!("Unable to start ADC sampling: {}", e);
    }

    let mut adc = device.events().subscribe_adc();
    let mut states = device.events().subscribe_pmic_state();
    let mut charging = device.events().subscribe_charging_status();
    let mut alerts = device.events().subscribe_alerts();

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            Ok(sample) = adc.recv() => {
                info!(
                    "ADC: vBat={:.2} V iBat={:.1} mA tBat={:.1} °C soc={:.1} %",
                    sample.v_bat, sample.i_bat_ma, sample.t_bat, sample.soc
                );
            }
            Ok(state) = states.recv() => {
                info!("Connection state: {}", state.label());
            }
            Ok(status) = charging.recv() => {
                info!(
                    "Charging: full={} trickle={} cc={} cv={}",
                    status.battery_full,
                    status.trickle_charge,
                    status.constant_current_charging,
                    status.constant_voltage_charging
                );
            }
            Ok(alert) = alerts.recv() => {
                info!("Alert [{:?}]: {}", alert.level, alert.message);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            else => break,
        }
    }

    if let Err(e) = device.stop_adc_sample().await {
        warn!("Unable to stop ADC sampling: {}", e);
    }

    Ok(())
}
