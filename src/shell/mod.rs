//! # Shell Module
//!
//! The device's interactive text shell as seen from the desktop side:
//! a dumb line transport plus the command channel that serializes
//! request/response traffic over it.

pub mod channel;
pub mod transport;

pub use channel::{
    ChannelConfig, CommandChannel, CommandHandle, CommandOutcome, ResponseMatcher, ShellEvent,
};
pub use transport::{SerialShellTransport, ShellTransport, SHELL_BAUD_RATE};
