//! Configuration for the forecourt controller.
//!
//! Defaults, a TOML file, and `FORECOURT_` environment variables are
//! layered with figment, validated, and translated into the runtime
//! types `forecourt-link` and `forecourt-core` consume. Neither of those
//! crates ever reads a file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use forecourt_core::{ControllerConfig, DeviceRoles, Timing};
use forecourt_link::{DeviceEndpoint, DeviceKind, Registry};

/// Name of the config file inside the platform config directory.
pub const CONFIG_FILE: &str = "forecourt.toml";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Simulated seconds of delivery per wall-clock second.
    #[serde(default = "default_sim_speed")]
    pub sim_speed: f64,

    /// Every device the controller may talk to.
    #[serde(default = "default_devices")]
    pub devices: Vec<DeviceEndpoint>,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub roles: RolesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sim_speed: default_sim_speed(),
            devices: default_devices(),
            timing: TimingConfig::default(),
            roles: RolesConfig::default(),
        }
    }
}

fn default_sim_speed() -> f64 {
    1.0
}

/// The reference station layout, all on loopback.
fn default_devices() -> Vec<DeviceEndpoint> {
    [
        ("screen", 5001, "screen-01", DeviceKind::Screen),
        ("hose", 5101, "hose-01", DeviceKind::Hose),
        ("cardreader", 5201, "cardr-01", DeviceKind::CardReader),
        ("cardserver", 5301, "cards-01", DeviceKind::CardServer),
        ("flowmeter", 5401, "flow-01", DeviceKind::FlowMeter),
        ("station", 5501, "station-01", DeviceKind::Station),
    ]
    .into_iter()
    .map(|(name, port, id, kind)| DeviceEndpoint::new(name, "127.0.0.1", port, id, kind))
    .collect()
}

/// Controller timings, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    pub request_timeout_ms: u64,
    pub connect_window_ms: u64,
    pub tap_poll_ms: u64,
    pub event_poll_ms: u64,
    pub hose_poll_ms: u64,
    pub fueling_tick_ms: u64,
    pub idle_window_ms: u64,
    pub decline_dwell_ms: u64,
    pub abort_dwell_ms: u64,
    pub thank_you_dwell_ms: u64,
    pub detach_grace_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Timing::default().into()
    }
}

impl From<Timing> for TimingConfig {
    fn from(t: Timing) -> Self {
        let ms = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        Self {
            request_timeout_ms: ms(t.request_timeout),
            connect_window_ms: ms(t.connect_window),
            tap_poll_ms: ms(t.tap_poll),
            event_poll_ms: ms(t.event_poll),
            hose_poll_ms: ms(t.hose_poll),
            fueling_tick_ms: ms(t.fueling_tick),
            idle_window_ms: ms(t.idle_window),
            decline_dwell_ms: ms(t.decline_dwell),
            abort_dwell_ms: ms(t.abort_dwell),
            thank_you_dwell_ms: ms(t.thank_you_dwell),
            detach_grace_ms: ms(t.detach_grace),
        }
    }
}

impl From<&TimingConfig> for Timing {
    fn from(t: &TimingConfig) -> Self {
        Self {
            request_timeout: Duration::from_millis(t.request_timeout_ms),
            connect_window: Duration::from_millis(t.connect_window_ms),
            tap_poll: Duration::from_millis(t.tap_poll_ms),
            event_poll: Duration::from_millis(t.event_poll_ms),
            hose_poll: Duration::from_millis(t.hose_poll_ms),
            fueling_tick: Duration::from_millis(t.fueling_tick_ms),
            idle_window: Duration::from_millis(t.idle_window_ms),
            decline_dwell: Duration::from_millis(t.decline_dwell_ms),
            abort_dwell: Duration::from_millis(t.abort_dwell_ms),
            thank_you_dwell: Duration::from_millis(t.thank_you_dwell_ms),
            detach_grace: Duration::from_millis(t.detach_grace_ms),
        }
    }
}

/// Device name per transaction role.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RolesConfig {
    pub screen: String,
    pub cardreader: String,
    pub cardserver: String,
    pub station: String,
    pub hose: String,
    pub flowmeter: String,
}

impl Default for RolesConfig {
    fn default() -> Self {
        let roles = DeviceRoles::default();
        Self {
            screen: roles.screen,
            cardreader: roles.card_reader,
            cardserver: roles.card_server,
            station: roles.station,
            hose: roles.hose,
            flowmeter: roles.flow_meter,
        }
    }
}

impl RolesConfig {
    fn assignments(&self) -> [(&'static str, &str, DeviceKind); 6] {
        [
            ("screen", &self.screen, DeviceKind::Screen),
            ("cardreader", &self.cardreader, DeviceKind::CardReader),
            ("cardserver", &self.cardserver, DeviceKind::CardServer),
            ("station", &self.station, DeviceKind::Station),
            ("hose", &self.hose, DeviceKind::Hose),
            ("flowmeter", &self.flowmeter, DeviceKind::FlowMeter),
        ]
    }
}

// ── Validation and translation ──────────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.is_empty() {
                return Err(invalid("devices", "device with an empty name"));
            }
            if !names.insert(device.name.as_str()) {
                return Err(invalid("devices", format!("duplicate device name '{}'", device.name)));
            }
            if device.port == 0 {
                return Err(invalid(
                    format!("devices.{}.port", device.name),
                    "port must be non-zero",
                ));
            }
        }

        for (role, name, kind) in self.roles.assignments() {
            let field = format!("roles.{role}");
            let device = self
                .devices
                .iter()
                .find(|d| d.name == name)
                .ok_or_else(|| invalid(&field, format!("no device named '{name}'")))?;
            if device.kind != kind {
                return Err(invalid(
                    field,
                    format!("device '{name}' is a {}, expected a {kind}", device.kind),
                ));
            }
        }

        let t = &self.timing;
        for (field, value) in [
            ("timing.request_timeout_ms", t.request_timeout_ms),
            ("timing.connect_window_ms", t.connect_window_ms),
            ("timing.tap_poll_ms", t.tap_poll_ms),
            ("timing.event_poll_ms", t.event_poll_ms),
            ("timing.hose_poll_ms", t.hose_poll_ms),
            ("timing.fueling_tick_ms", t.fueling_tick_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }

        if !(self.sim_speed.is_finite() && self.sim_speed > 0.0) {
            return Err(invalid(
                "sim_speed",
                format!("must be a positive number, got {}", self.sim_speed),
            ));
        }

        Ok(())
    }

    pub fn endpoints(&self) -> Vec<DeviceEndpoint> {
        self.devices.clone()
    }

    /// A registry over the configured devices, using the configured
    /// connect window.
    pub fn registry(&self) -> Registry {
        Registry::new(self.endpoints())
            .with_connect_window(Duration::from_millis(self.timing.connect_window_ms))
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            timing: Timing::from(&self.timing),
            roles: DeviceRoles {
                screen: self.roles.screen.clone(),
                card_reader: self.roles.cardreader.clone(),
                card_server: self.roles.cardserver.clone(),
                station: self.roles.station.clone(),
                hose: self.roles.hose.clone(),
                flow_meter: self.roles.flowmeter.clone(),
            },
            sim_speed: self.sim_speed,
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "forecourt", "forecourt").map_or_else(
        || dirs_fallback().join(CONFIG_FILE),
        |dirs| dirs.config_dir().join(CONFIG_FILE),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("forecourt");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// The layered sources: defaults, then the TOML file at `path` if it
/// exists, then `FORECOURT_*` variables (`__` separates nested keys).
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("FORECOURT_").split("__"))
}

/// Load and validate the config, from `path` or the platform default.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path).extract()?;
    config.validate()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize `cfg` to TOML at `path`, creating parent directories.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, cfg.to_toml()?)?;
    Ok(())
}
