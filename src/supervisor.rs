//! Reconnect policy as a pure state machine.
//!
//! The supervisor decides; the manager executes the returned
//! [`SupervisorAction`]. Reconnect timers are identified by a token so a
//! timer that fires after being superseded is ignored.

use log::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    Idle,
    Connecting,
    Connected,
    ReconnectPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    Nothing,
    /// Start a connect attempt on the link.
    Connect,
    /// The pending attempt succeeded; announce and fetch platform status.
    Connected,
    /// Cancel any pending timer and arm a new one with this token.
    ArmTimer(u64),
    CancelTimer,
    /// Close the link, clear cached platform status, unbind every session,
    /// and optionally arm a reconnect timer.
    Teardown { reconnect: Option<u64> },
}

#[derive(Debug)]
pub struct ReconnectSupervisor {
    phase: SupervisorPhase,
    shutdown: bool,
    timer_token: u64,
}

impl Default for ReconnectSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectSupervisor {
    pub fn new() -> Self {
        Self {
            phase: SupervisorPhase::Idle,
            shutdown: false,
            timer_token: 0,
        }
    }

    pub fn phase(&self) -> SupervisorPhase {
        self.phase
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown
    }

    fn next_timer(&mut self) -> u64 {
        self.timer_token += 1;
        self.timer_token
    }

    /// A sender registered.
    pub fn on_registered(&mut self) -> SupervisorAction {
        if self.shutdown {
            return SupervisorAction::Nothing;
        }
        match self.phase {
            SupervisorPhase::Idle => {
                self.phase = SupervisorPhase::Connecting;
                SupervisorAction::Connect
            }
            SupervisorPhase::ReconnectPending => {
                debug!("Supervisor: registration during reconnect delay, restarting timer");
                SupervisorAction::ArmTimer(self.next_timer())
            }
            SupervisorPhase::Connecting | SupervisorPhase::Connected => SupervisorAction::Nothing,
        }
    }

    pub fn on_connect_result(&mut self, succeeded: bool, has_members: bool) -> SupervisorAction {
        if self.phase != SupervisorPhase::Connecting || self.shutdown || !has_members {
            self.phase = SupervisorPhase::Idle;
            return if succeeded {
                SupervisorAction::Teardown { reconnect: None }
            } else {
                SupervisorAction::Nothing
            };
        }
        if succeeded {
            self.phase = SupervisorPhase::Connected;
            SupervisorAction::Connected
        } else {
            self.phase = SupervisorPhase::ReconnectPending;
            info!("Supervisor: connect failed, scheduling reconnect");
            SupervisorAction::ArmTimer(self.next_timer())
        }
    }

    /// The link reported an error or was closed.
    pub fn on_link_lost(&mut self, has_members: bool) -> SupervisorAction {
        if self.phase != SupervisorPhase::Connected {
            return SupervisorAction::Nothing;
        }
        if has_members && !self.shutdown {
            self.phase = SupervisorPhase::ReconnectPending;
            info!("Supervisor: link lost, scheduling reconnect");
            SupervisorAction::Teardown {
                reconnect: Some(self.next_timer()),
            }
        } else {
            self.phase = SupervisorPhase::Idle;
            SupervisorAction::Teardown { reconnect: None }
        }
    }

    /// The last sender deregistered.
    pub fn on_registry_empty(&mut self) -> SupervisorAction {
        match self.phase {
            SupervisorPhase::Connected => {
                self.phase = SupervisorPhase::Idle;
                SupervisorAction::Teardown { reconnect: None }
            }
            SupervisorPhase::ReconnectPending => {
                self.phase = SupervisorPhase::Idle;
                SupervisorAction::CancelTimer
            }
            // An in-flight attempt settles through `on_connect_result`.
            SupervisorPhase::Connecting | SupervisorPhase::Idle => SupervisorAction::Nothing,
        }
    }

    pub fn on_timer_fired(&mut self, token: u64, has_members: bool) -> SupervisorAction {
        if token != self.timer_token
            || self.phase != SupervisorPhase::ReconnectPending
            || self.shutdown
        {
            return SupervisorAction::Nothing;
        }
        if !has_members {
            self.phase = SupervisorPhase::Idle;
            return SupervisorAction::Nothing;
        }
        self.phase = SupervisorPhase::Connecting;
        SupervisorAction::Connect
    }

    /// Permanently stops reconnection.
    pub fn shutdown(&mut self) -> SupervisorAction {
        self.shutdown = true;
        let previous = self.phase;
        self.phase = SupervisorPhase::Idle;
        match previous {
            SupervisorPhase::Connected => SupervisorAction::Teardown { reconnect: None },
            SupervisorPhase::ReconnectPending => SupervisorAction::CancelTimer,
            SupervisorPhase::Connecting | SupervisorPhase::Idle => SupervisorAction::Nothing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_registration_connects_once() {
        let mut supervisor = ReconnectSupervisor::new();
        assert_eq!(supervisor.on_registered(), SupervisorAction::Connect);
        assert_eq!(supervisor.on_registered(), SupervisorAction::Nothing);
        assert_eq!(supervisor.phase(), SupervisorPhase::Connecting);
    }

    #[test]
    fn test_failed_connect_arms_timer_and_registration_rearms_it() {
        let mut supervisor = ReconnectSupervisor::new();
        supervisor.on_registered();
        let SupervisorAction::ArmTimer(first) = supervisor.on_connect_result(false, true) else {
            panic!("failed connect should arm a timer");
        };
        let SupervisorAction::ArmTimer(second) = supervisor.on_registered() else {
            panic!("registration should rearm the timer");
        };
        assert_ne!(first, second);
        assert_eq!(supervisor.on_timer_fired(first, true), SupervisorAction::Nothing);
        assert_eq!(supervisor.on_timer_fired(second, true), SupervisorAction::Connect);
        assert_eq!(supervisor.phase(), SupervisorPhase::Connecting);
    }

    #[test]
    fn test_link_lost_with_members_tears_down_and_schedules() {
        let mut supervisor = ReconnectSupervisor::new();
        supervisor.on_registered();
        assert_eq!(supervisor.on_connect_result(true, true), SupervisorAction::Connected);
        let action = supervisor.on_link_lost(true);
        assert!(matches!(
            action,
            SupervisorAction::Teardown {
                reconnect: Some(_)
            }
        ));
        assert_eq!(supervisor.phase(), SupervisorPhase::ReconnectPending);
        // A second loss report for the same connection is ignored.
        assert_eq!(supervisor.on_link_lost(true), SupervisorAction::Nothing);
    }

    #[test]
    fn test_link_lost_without_members_stays_idle() {
        let mut supervisor = ReconnectSupervisor::new();
        supervisor.on_registered();
        supervisor.on_connect_result(true, true);
        assert_eq!(
            supervisor.on_link_lost(false),
            SupervisorAction::Teardown { reconnect: None }
        );
        assert_eq!(supervisor.phase(), SupervisorPhase::Idle);
    }

    #[test]
    fn test_registry_empty_during_connect_tears_down_on_completion() {
        let mut supervisor = ReconnectSupervisor::new();
        supervisor.on_registered();
        assert_eq!(supervisor.on_registry_empty(), SupervisorAction::Nothing);
        assert_eq!(
            supervisor.on_connect_result(true, false),
            SupervisorAction::Teardown { reconnect: None }
        );
        assert_eq!(supervisor.phase(), SupervisorPhase::Idle);
    }

    #[test]
    fn test_registry_empty_cancels_pending_reconnect() {
        let mut supervisor = ReconnectSupervisor::new();
        supervisor.on_registered();
        let SupervisorAction::ArmTimer(token) = supervisor.on_connect_result(false, true) else {
            panic!("failed connect should arm a timer");
        };
        assert_eq!(supervisor.on_registry_empty(), SupervisorAction::CancelTimer);
        assert_eq!(supervisor.on_timer_fired(token, false), SupervisorAction::Nothing);
        assert_eq!(supervisor.phase(), SupervisorPhase::Idle);
    }

    #[test]
    fn test_shutdown_is_permanent() {
        let mut supervisor = ReconnectSupervisor::new();
        supervisor.on_registered();
        supervisor.on_connect_result(true, true);
        assert_eq!(
            supervisor.shutdown(),
            SupervisorAction::Teardown { reconnect: None }
        );
        assert_eq!(supervisor.on_registered(), SupervisorAction::Nothing);
        assert_eq!(supervisor.on_link_lost(true), SupervisorAction::Nothing);
        assert!(supervisor.is_shut_down());
    }

    #[test]
    fn test_connect_completing_after_shutdown_is_torn_down() {
        let mut supervisor = ReconnectSupervisor::new();
        supervisor.on_registered();
        assert_eq!(supervisor.shutdown(), SupervisorAction::Nothing);
        assert_eq!(
            supervisor.on_connect_result(true, true),
            SupervisorAction::Teardown { reconnect: None }
        );
        assert_eq!(supervisor.on_connect_result(false, true), SupervisorAction::Nothing);
    }
}
