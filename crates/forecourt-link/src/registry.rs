// ── Device registry ──
//
// Static endpoint table plus a lazily populated name → Link cache.
// Each name owns a `OnceCell`, so concurrent first callers share one
// open attempt and everybody after the first success gets the same Link.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::Error;
use crate::link::{DEFAULT_CONNECT_WINDOW, Link};

/// What role a device plays at the station.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceKind {
    Screen,
    CardReader,
    CardServer,
    Station,
    Hose,
    FlowMeter,
}

impl DeviceKind {
    /// Token that addresses this kind of device in request and reply lines.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Screen => "SCREEN",
            Self::CardReader => "CARDREADER",
            Self::CardServer => "CARDSERVER",
            Self::Station => "STATION",
            Self::Hose => "HOSE",
            Self::FlowMeter => "FLOWMETER",
        }
    }
}

/// Where a device lives and who it claims to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub device_id: String,
    pub kind: DeviceKind,
}

impl DeviceEndpoint {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        device_id: impl Into<String>,
        kind: DeviceKind,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            device_id: device_id.into(),
            kind,
        }
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Named table of device endpoints with one cached [`Link`] per name.
pub struct Registry {
    endpoints: Vec<DeviceEndpoint>,
    links: DashMap<String, Arc<OnceCell<Arc<Link>>>>,
    connect_window: Duration,
}

impl Registry {
    pub fn new(endpoints: Vec<DeviceEndpoint>) -> Self {
        Self {
            endpoints,
            links: DashMap::new(),
            connect_window: DEFAULT_CONNECT_WINDOW,
        }
    }

    /// Override how long each open may take (connect + HELLO).
    pub fn with_connect_window(mut self, window: Duration) -> Self {
        self.connect_window = window;
        self
    }

    /// All endpoints, in configuration order.
    pub fn endpoints(&self) -> &[DeviceEndpoint] {
        &self.endpoints
    }

    pub fn endpoint(&self, name: &str) -> Option<&DeviceEndpoint> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// `true` once a link for `name` has been opened.
    pub fn is_open(&self, name: &str) -> bool {
        self.links
            .get(name)
            .is_some_and(|cell| cell.initialized())
    }

    /// The cached link for `name`, opening it on first use.
    ///
    /// Connect and handshake failures are returned as-is and leave the
    /// slot empty; the registry never retries on its own.
    pub async fn link(&self, name: &str) -> Result<Arc<Link>, Error> {
        let endpoint = self.endpoint(name).ok_or_else(|| Error::UnknownDevice {
            name: name.to_owned(),
        })?;

        let cell = Arc::clone(&self.links.entry(name.to_owned()).or_default());

        let link = cell
            .get_or_try_init(|| async {
                debug!(device = %endpoint.name, addr = %endpoint.address(), "opening link");
                Link::open_within(
                    &endpoint.host,
                    endpoint.port,
                    &endpoint.device_id,
                    self.connect_window,
                )
                .await
                .map(Arc::new)
            })
            .await?;

        Ok(Arc::clone(link))
    }

    /// Close every opened link.
    ///
    /// Keeps going after a failure and returns the first error seen.
    pub async fn close_all(&self) -> Result<(), Error> {
        let opened: Vec<(String, Arc<Link>)> = self
            .links
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .get()
                    .map(|link| (entry.key().clone(), Arc::clone(link)))
            })
            .collect();

        let mut first_error = None;
        for (name, link) in opened {
            if let Err(e) = link.close().await {
                warn!(device = %name, error = %e, "close failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("endpoints", &self.endpoints)
            .field("open", &self.links.len())
            .field("connect_window", &self.connect_window)
            .finish()
    }
}
