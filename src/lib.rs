//! # PMIC Bridge Library
//!
//! Desktop-side control core for a battery-charging PMIC reached through
//! its interactive serial shell.
//!
//! The crate turns one unordered, line-oriented text shell into a reliable
//! request/response command channel, a typed telemetry event stream, a
//! connection state machine, and a multi-stage battery-characterization
//! sequencer. Presentation, persistence, and the USB driver stay outside;
//! the crate ends at typed events and async entry points.

pub mod config;
pub mod device;
pub mod error;
pub mod profiler;
pub mod protocol;
pub mod shell;
