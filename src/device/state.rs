//! # Device State Machine
//!
//! Tracks the PMIC's connection/power lifecycle from decoded log events and
//! command failures. The machine is owned by the device session's event
//! loop — every transition happens on that single task — and publishes
//! through a `watch` channel so command entry points can gate on the
//! current state without locking.

use tokio::sync::watch;
use tracing::info;

/// Connection state of one PMIC session
///
/// The lifecycle is cyclic: the device can disconnect and come back any
/// number of times within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmicState {
    /// No shell was ever attached; the adapter serves the UI optimistically
    Offline,

    /// The shell (evaluation kit) went away mid-session
    EkDisconnected,

    /// Shell attached and the PMIC is responsive
    PmicConnected,

    /// The shell reported `No response from PMIC.` or a PMIC I/O failure
    PmicDisconnected,

    /// The PMIC came back; waiting for an explicit reset request
    PmicPendingReboot,

    /// A kernel reset was issued; the application is restarting
    PmicPendingRebooting,
}

impl PmicState {
    /// True when no command may be sent at all (§4.3 "no connection")
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Offline | Self::EkDisconnected)
    }

    /// True when setters should apply optimistically and emit locally
    #[must_use]
    pub fn is_offline_mode(&self) -> bool {
        self.is_unreachable()
    }

    /// Stable label, matching the state names the UI shows
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::EkDisconnected => "ek-disconnected",
            Self::PmicConnected => "pmic-connected",
            Self::PmicDisconnected => "pmic-disconnected",
            Self::PmicPendingReboot => "pmic-pending-reboot",
            Self::PmicPendingRebooting => "pmic-pending-rebooting",
        }
    }
}

/// Effect requested by a `PMIC available` transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailableAction {
    /// Nothing to do (idempotent re-entry)
    Ignored,

    /// State changed to `PmicPendingReboot`; wait for the operator
    WaitForOperator,

    /// State changed to `PmicPendingRebooting`; issue a kernel reset now
    KernelReset,
}

/// Single-writer connection monitor
///
/// Constructed by the device session; all mutation happens on the event
/// loop task. Methods return `true` when the state actually changed so the
/// caller can fan the notification out on the event bus.
pub struct ConnectionMonitor {
    state: PmicState,
    watch_tx: watch::Sender<PmicState>,
}

impl ConnectionMonitor {
    pub fn new(initial: PmicState) -> (Self, watch::Receiver<PmicState>) {
        let (watch_tx, watch_rx) = watch::channel(initial);
        (
            Self {
                state: initial,
                watch_tx,
            },
            watch_rx,
        )
    }

    #[must_use]
    pub fn state(&self) -> PmicState {
        self.state
    }

    fn transition(&mut self, next: PmicState) -> bool {
        if self.state == next {
            return false;
        }
        info!("PMIC state: {} -> {}", self.state.label(), next.label());
        self.state = next;
        let _ = self.watch_tx.send(next);
        true
    }

    /// `No response from PMIC.` was logged
    pub fn on_no_response(&mut self) -> bool {
        self.transition(PmicState::PmicDisconnected)
    }

    /// A recognized log event arrived; communication resumed
    pub fn on_activity(&mut self) -> bool {
        if self.state == PmicState::PmicDisconnected {
            self.transition(PmicState::PmicConnected)
        } else {
            false
        }
    }

    /// `PMIC available. Application can be restarted.` was logged
    pub fn on_pmic_available(&mut self, auto_reboot: bool) -> AvailableAction {
        if self.state == PmicState::PmicPendingRebooting {
            // repeated availability lines must not regress the reboot
            return AvailableAction::Ignored;
        }

        if auto_reboot {
            self.transition(PmicState::PmicPendingRebooting);
            AvailableAction::KernelReset
        } else if self.state != PmicState::PmicPendingReboot {
            self.transition(PmicState::PmicPendingReboot);
            AvailableAction::WaitForOperator
        } else {
            AvailableAction::Ignored
        }
    }

    /// The operator asked for the deferred reset (or auto-reboot was
    /// re-enabled while waiting)
    pub fn on_reset_requested(&mut self) -> bool {
        self.transition(PmicState::PmicPendingRebooting)
    }

    /// The device rejected a command with an I/O error while we believed it
    /// connected
    pub fn on_pmic_io_error(&mut self) -> bool {
        if self.state == PmicState::PmicConnected {
            self.transition(PmicState::PmicDisconnected)
        } else {
            false
        }
    }

    /// The shell transport itself is gone
    pub fn on_shell_lost(&mut self) -> bool {
        self.transition(PmicState::EkDisconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_monitor() -> ConnectionMonitor {
        ConnectionMonitor::new(PmicState::PmicConnected).0
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(PmicState::Offline.label(), "offline");
        assert_eq!(PmicState::EkDisconnected.label(), "ek-disconnected");
        assert_eq!(PmicState::PmicConnected.label(), "pmic-connected");
        assert_eq!(PmicState::PmicDisconnected.label(), "pmic-disconnected");
        assert_eq!(PmicState::PmicPendingReboot.label(), "pmic-pending-reboot");
        assert_eq!(PmicState::PmicPendingRebooting.label(), "pmic-pending-rebooting");
    }

    #[test]
    fn test_unreachable_states_gate_commands() {
        assert!(PmicState::Offline.is_unreachable());
        assert!(PmicState::EkDisconnected.is_unreachable());
        assert!(!PmicState::PmicConnected.is_unreachable());
        assert!(!PmicState::PmicDisconnected.is_unreachable());
    }

    #[test]
    fn test_disconnect_reconnect_notifies_exactly_once_per_transition() {
        let mut monitor = connected_monitor();

        // repeated "No response" lines collapse into one notification
        assert!(monitor.on_no_response());
        assert!(!monitor.on_no_response());
        assert_eq!(monitor.state(), PmicState::PmicDisconnected);

        // a later recognized line reconnects exactly once
        assert!(monitor.on_activity());
        assert!(!monitor.on_activity());
        assert_eq!(monitor.state(), PmicState::PmicConnected);
    }

    #[test]
    fn test_pmic_available_with_auto_reboot() {
        let mut monitor = connected_monitor();

        assert_eq!(monitor.on_pmic_available(true), AvailableAction::KernelReset);
        assert_eq!(monitor.state(), PmicState::PmicPendingRebooting);

        // idempotent re-entry: a repeated line neither resets again nor
        // regresses to pending-reboot
        assert_eq!(monitor.on_pmic_available(true), AvailableAction::Ignored);
        assert_eq!(monitor.on_pmic_available(false), AvailableAction::Ignored);
        assert_eq!(monitor.state(), PmicState::PmicPendingRebooting);
    }

    #[test]
    fn test_pmic_available_without_auto_reboot_waits() {
        let mut monitor = connected_monitor();

        assert_eq!(
            monitor.on_pmic_available(false),
            AvailableAction::WaitForOperator
        );
        assert_eq!(monitor.state(), PmicState::PmicPendingReboot);
        assert_eq!(monitor.on_pmic_available(false), AvailableAction::Ignored);

        // the deferred reset finally fires
        assert!(monitor.on_reset_requested());
        assert_eq!(monitor.state(), PmicState::PmicPendingRebooting);
    }

    #[test]
    fn test_io_error_only_disconnects_while_connected() {
        let mut monitor = connected_monitor();
        assert!(monitor.on_pmic_io_error());
        assert_eq!(monitor.state(), PmicState::PmicDisconnected);

        // already disconnected: no duplicate notification
        assert!(!monitor.on_pmic_io_error());

        let (mut pending, _rx) = ConnectionMonitor::new(PmicState::PmicPendingRebooting);
        assert!(!pending.on_pmic_io_error());
        assert_eq!(pending.state(), PmicState::PmicPendingRebooting);
    }

    #[test]
    fn test_shell_loss_from_any_state() {
        for initial in [
            PmicState::PmicConnected,
            PmicState::PmicDisconnected,
            PmicState::PmicPendingReboot,
            PmicState::PmicPendingRebooting,
        ] {
            let (mut monitor, _rx) = ConnectionMonitor::new(initial);
            assert!(monitor.on_shell_lost());
            assert_eq!(monitor.state(), PmicState::EkDisconnected);
        }
    }

    #[test]
    fn test_watch_channel_publishes_transitions() {
        let (mut monitor, rx) = ConnectionMonitor::new(PmicState::PmicConnected);
        monitor.on_no_response();
        assert_eq!(*rx.borrow(), PmicState::PmicDisconnected);
    }
}
