// ── Runtime controller configuration ──
//
// Timings, role assignments, and simulation speed for one controller.
// Built by the config crate (or tests) and handed in; core never reads
// config files.

use std::time::Duration;

/// Every wait, poll, and dwell the controller performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Per-request reply deadline.
    pub request_timeout: Duration,
    /// TCP connect plus HELLO deadline for each link.
    pub connect_window: Duration,
    /// Card reader poll interval while waiting for a tap.
    pub tap_poll: Duration,
    /// Screen poll interval while waiting for a grade selection.
    pub event_poll: Duration,
    /// Hose poll interval while waiting for the nozzle to attach.
    pub hose_poll: Duration,
    /// Fueling loop cadence.
    pub fueling_tick: Duration,
    /// Inactivity window for grade selection and hose attach.
    pub idle_window: Duration,
    pub decline_dwell: Duration,
    pub abort_dwell: Duration,
    pub thank_you_dwell: Duration,
    /// How long the nozzle may stay detached mid-delivery.
    pub detach_grace: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(1),
            connect_window: Duration::from_secs(3),
            tap_poll: Duration::from_millis(250),
            event_poll: Duration::from_millis(200),
            hose_poll: Duration::from_millis(200),
            fueling_tick: Duration::from_millis(200),
            idle_window: Duration::from_secs(30),
            decline_dwell: Duration::from_secs(3),
            abort_dwell: Duration::from_secs(3),
            thank_you_dwell: Duration::from_secs(5),
            detach_grace: Duration::from_secs(10),
        }
    }
}

/// Which registry entry plays which part in a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRoles {
    pub screen: String,
    pub card_reader: String,
    pub card_server: String,
    pub station: String,
    pub hose: String,
    pub flow_meter: String,
}

impl Default for DeviceRoles {
    fn default() -> Self {
        Self {
            screen: "screen".into(),
            card_reader: "cardreader".into(),
            card_server: "cardserver".into(),
            station: "station".into(),
            hose: "hose".into(),
            flow_meter: "flowmeter".into(),
        }
    }
}

/// Configuration for one transaction controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub timing: Timing,
    pub roles: DeviceRoles,
    /// Simulated seconds of delivery per wall-clock second.
    pub sim_speed: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            timing: Timing::default(),
            roles: DeviceRoles::default(),
            sim_speed: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timing_matches_device_contract() {
        let timing = Timing::default();
        assert_eq!(timing.request_timeout, Duration::from_secs(1));
        assert_eq!(timing.connect_window, Duration::from_secs(3));
        assert_eq!(timing.tap_poll, Duration::from_millis(250));
        assert_eq!(timing.event_poll, Duration::from_millis(200));
        assert_eq!(timing.fueling_tick, Duration::from_millis(200));
    }

    #[test]
    fn default_roles_use_reference_names() {
        let roles = DeviceRoles::default();
        assert_eq!(roles.card_reader, "cardreader");
        assert_eq!(roles.flow_meter, "flowmeter");
    }
}
