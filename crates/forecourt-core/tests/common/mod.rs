// Scripted forecourt: every device role served on its own ephemeral port,
// driven by one shared, mutable script.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use forecourt_core::{ControllerConfig, DeviceRoles, Timing};
use forecourt_link::{DeviceEndpoint, DeviceKind, Registry};

/// What the fake devices do. Tests tweak it before (or while) running.
#[derive(Debug, Clone)]
pub struct Script {
    /// Card taps handed out one per poll.
    pub taps: VecDeque<String>,
    /// Grade the customer picks once the menu is shown.
    pub grade: Option<String>,
    pub fuels: String,
    pub prices: HashMap<String, String>,
    pub capacity: String,
    pub current: String,
    /// Nozzle goes in as soon as the attach prompt is shown.
    pub attach_on_prompt: bool,
    /// Armed STATUS polls (1-based) during which the nozzle reads detached.
    pub detached_polls: Option<(usize, usize)>,
    /// Armed STATUS poll at which the pump reads disarmed.
    pub disarm_at: Option<usize>,
    /// Request lines (by prefix) that never get an answer.
    pub muted: Vec<String>,
    /// Request lines (by prefix) answered only after `SLOW_REPLY`.
    pub slow: Vec<String>,
    /// Request lines (by prefix) on which the device closes its socket.
    pub hang_up: Vec<String>,
    /// Hose STATUS reports `FULL:1`.
    pub report_full: bool,

    attached: bool,
    armed: bool,
    armed_polls: usize,
    pending_screen_event: Option<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            taps: VecDeque::new(),
            grade: Some("Regular".into()),
            fuels: "Regular=3.49,Plus=3.79,Premium=4.09".into(),
            prices: HashMap::from([
                ("Regular".into(), "PRICE:3.49".into()),
                ("Plus".into(), "PRICE:3.79".into()),
                ("Premium".into(), "PRICE:4.09".into()),
            ]),
            capacity: "15.000".into(),
            current: "3.200".into(),
            attach_on_prompt: true,
            detached_polls: None,
            disarm_at: None,
            muted: Vec::new(),
            slow: Vec::new(),
            hang_up: Vec::new(),
            report_full: false,
            attached: false,
            armed: false,
            armed_polls: 0,
            pending_screen_event: None,
        }
    }
}

impl Script {
    pub fn tap(mut self, card: &str) -> Self {
        self.taps.push_back(card.into());
        self
    }

    pub fn price(mut self, fuel: &str, payload: &str) -> Self {
        self.prices.insert(fuel.into(), payload.into());
        self
    }

    pub fn tank(mut self, capacity: &str, current: &str) -> Self {
        self.capacity = capacity.into();
        self.current = current.into();
        self
    }
}

/// Delay applied to `Script::slow` requests.
pub const SLOW_REPLY: Duration = Duration::from_millis(300);

/// A device's answer: `(is_event, payload)`.
type Answer = Option<(bool, String)>;

#[derive(Debug, Default)]
struct Shared {
    script: Script,
    lines: Vec<String>,
}

impl Shared {
    fn handle(&mut self, kind: DeviceKind, line: &str) -> Answer {
        self.lines.push(line.to_owned());
        if self.script.muted.iter().any(|prefix| line.starts_with(prefix)) {
            return None;
        }

        let script = &mut self.script;
        let reply = |payload: &str| Some((false, payload.to_owned()));
        let fields: Vec<&str> = line.splitn(4, '|').collect();
        let (verb, payload) = (fields.get(1).copied(), fields.get(3).copied().unwrap_or(""));

        match (kind, verb) {
            (DeviceKind::Screen, Some("READY")) => reply("ALLOWPAYMENT"),
            (DeviceKind::Screen, Some("DISPLAY")) => {
                let state = payload.trim_matches('"');
                if state.starts_with("GRADE_MENU:") {
                    script.pending_screen_event =
                        script.grade.as_ref().map(|g| format!("GRADE_SELECTED:{g}"));
                }
                if state.starts_with("FUEL_SELECTED:") && script.attach_on_prompt {
                    script.attached = true;
                }
                reply("OK")
            }
            (DeviceKind::Screen, Some("CHECK")) => match script.pending_screen_event.take() {
                Some(event) => Some((true, event)),
                None => reply("NONE"),
            },
            (DeviceKind::CardReader, Some("CHECK")) => match script.taps.pop_front() {
                Some(card) => Some((true, format!("CARDTAP:{card}"))),
                None => reply("NONE"),
            },
            (DeviceKind::CardServer, Some("AUTH")) => {
                let even = payload.trim().parse::<i64>().is_ok_and(|d| d % 2 == 0);
                reply(if even { "AUTH:YES" } else { "AUTH:NO" })
            }
            (DeviceKind::Station, Some("LIST")) => reply(&format!("LIST:{}", script.fuels)),
            (DeviceKind::Station, Some("GETPRICE")) => {
                let answer = script.prices.get(payload.trim()).cloned();
                reply(answer.as_deref().unwrap_or("ERR:NO_SUCH_FUEL"))
            }
            (DeviceKind::Hose, Some("START")) => {
                script.armed = true;
                reply("OK")
            }
            (DeviceKind::Hose, Some("STOP")) => {
                script.armed = false;
                reply("OK")
            }
            (DeviceKind::Hose, Some("STATUS")) => {
                let mut attached = script.attached;
                if script.armed {
                    script.armed_polls += 1;
                    let n = script.armed_polls;
                    if script.disarm_at == Some(n) {
                        script.armed = false;
                    }
                    if let Some((from, to)) = script.detached_polls {
                        attached = attached && !(from..to).contains(&n);
                    }
                }
                reply(&format!(
                    "STATE:{},ARMED:{},FULL:{},CAP:{},CUR:{}",
                    u8::from(attached),
                    u8::from(script.armed),
                    u8::from(script.report_full),
                    script.capacity,
                    script.current
                ))
            }
            (DeviceKind::FlowMeter, _) => None,
            _ => reply("OK"),
        }
    }
}

/// All six devices, listening on 127.0.0.1.
pub struct Forecourt {
    shared: Arc<Mutex<Shared>>,
    endpoints: Vec<DeviceEndpoint>,
}

const DEVICES: [(&str, &str, DeviceKind); 6] = [
    ("screen", "screen-01", DeviceKind::Screen),
    ("cardreader", "cardr-01", DeviceKind::CardReader),
    ("cardserver", "cards-01", DeviceKind::CardServer),
    ("station", "station-01", DeviceKind::Station),
    ("hose", "hose-01", DeviceKind::Hose),
    ("flowmeter", "flow-01", DeviceKind::FlowMeter),
];

impl Forecourt {
    pub async fn start(script: Script) -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            script,
            lines: Vec::new(),
        }));

        let mut endpoints = Vec::new();
        for (name, device_id, kind) in DEVICES {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            tokio::spawn(serve(listener, device_id, kind, Arc::clone(&shared)));
            endpoints.push(DeviceEndpoint::new(name, "127.0.0.1", port, device_id, kind));
        }

        Self { shared, endpoints }
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::new(Registry::new(self.endpoints.clone()).with_connect_window(Duration::from_secs(1)))
    }

    pub fn script(&self, edit: impl FnOnce(&mut Script)) {
        edit(&mut self.shared.lock().unwrap().script);
    }

    /// Every request line received, in arrival order.
    pub fn lines(&self) -> Vec<String> {
        self.shared.lock().unwrap().lines.clone()
    }

    pub fn lines_to(&self, device: &str) -> Vec<String> {
        let prefix = format!("{device}|");
        self.lines()
            .into_iter()
            .filter(|l| l.starts_with(&prefix))
            .collect()
    }

    /// Display states sent to the screen, in order.
    pub fn screen_states(&self) -> Vec<String> {
        self.lines_to("SCREEN")
            .iter()
            .filter_map(|l| l.strip_prefix("SCREEN|DISPLAY|MAIN|"))
            .map(|p| p.trim_matches('"').to_owned())
            .collect()
    }

    pub fn position(&self, line: &str) -> Option<usize> {
        self.lines().iter().position(|l| l == line)
    }
}

async fn serve(
    listener: TcpListener,
    device_id: &'static str,
    kind: DeviceKind,
    shared: Arc<Mutex<Shared>>,
) {
    while let Ok((stream, _)) = listener.accept().await {
        tokio::spawn(connection(stream, device_id, kind, Arc::clone(&shared)));
    }
}

async fn connection(
    stream: TcpStream,
    device_id: &'static str,
    kind: DeviceKind,
    shared: Arc<Mutex<Shared>>,
) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    match lines.next_line().await {
        Ok(Some(hello)) if hello == "HELLO main v1" => {}
        _ => return,
    }
    if write
        .write_all(format!("HELLO {device_id} v1\n").as_bytes())
        .await
        .is_err()
    {
        return;
    }

    while let Ok(Some(line)) = lines.next_line().await {
        let (answer, slow) = {
            let mut shared = shared.lock().unwrap();
            if shared.script.hang_up.iter().any(|p| line.starts_with(p.as_str())) {
                shared.lines.push(line.trim().to_owned());
                return;
            }
            let slow = shared.script.slow.iter().any(|p| line.starts_with(p.as_str()));
            (shared.handle(kind, line.trim()), slow)
        };
        let Some((event, payload)) = answer else {
            continue;
        };
        if slow {
            tokio::time::sleep(SLOW_REPLY).await;
        }
        let kind_tag = if event { "EVENT" } else { "REPLY" };
        let out = format!("MAIN|{kind_tag}|{}|\"{payload}\"\n", kind.wire_name());
        if write.write_all(out.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Short timings so scenarios finish in well under a second.
pub fn fast_config() -> ControllerConfig {
    ControllerConfig {
        timing: Timing {
            request_timeout: Duration::from_millis(500),
            connect_window: Duration::from_secs(1),
            tap_poll: Duration::from_millis(10),
            event_poll: Duration::from_millis(10),
            hose_poll: Duration::from_millis(10),
            fueling_tick: Duration::from_millis(20),
            idle_window: Duration::from_millis(300),
            decline_dwell: Duration::from_millis(10),
            abort_dwell: Duration::from_millis(10),
            thank_you_dwell: Duration::from_millis(10),
            detach_grace: Duration::from_secs(5),
        },
        roles: DeviceRoles::default(),
        sim_speed: 50.0,
    }
}
