// ── Typed device clients ──
//
// Thin wrappers around a shared `Link`, one per device role. Each knows
// its request lines and how to read the replies; none of them keep state.

use std::sync::Arc;
use std::time::Duration;

use forecourt_link::wire::Payload;
use forecourt_link::{DeviceKind, Link, Reply, Request, Verb};
use tracing::debug;

use crate::error::{AbortCode, CoreError};

/// Request/reply plumbing shared by every client.
#[derive(Debug, Clone)]
struct Channel {
    link: Arc<Link>,
    kind: DeviceKind,
    timeout: Duration,
}

impl Channel {
    fn new(link: Arc<Link>, kind: DeviceKind, timeout: Duration) -> Self {
        Self {
            link,
            kind,
            timeout,
        }
    }

    fn line(&self, verb: Verb, target: &str, payload: Payload<'_>) -> String {
        Request {
            device: self.kind.wire_name(),
            verb,
            target,
            payload,
        }
        .to_string()
    }

    async fn raw(
        &self,
        verb: Verb,
        target: &str,
        payload: Payload<'_>,
    ) -> Result<String, CoreError> {
        let line = self.line(verb, target, payload);
        Ok(self.link.request(&line, self.timeout).await?)
    }

    async fn call(
        &self,
        verb: Verb,
        target: &str,
        payload: Payload<'_>,
    ) -> Result<Reply, CoreError> {
        let raw = self.raw(verb, target, payload).await?;
        Ok(raw.parse::<Reply>()?)
    }
}

// ── Screen ──────────────────────────────────────────────────────────

/// Customer-facing display.
#[derive(Debug, Clone)]
pub struct Screen(Channel);

impl Screen {
    pub fn new(link: Arc<Link>, timeout: Duration) -> Self {
        Self(Channel::new(link, DeviceKind::Screen, timeout))
    }

    /// Ask whether the station may take payments; returns the screen's answer.
    pub async fn ready(&self) -> Result<String, CoreError> {
        let reply = self.0.call(Verb::Ready, "MAIN", Payload::None).await?;
        Ok(reply.payload)
    }

    pub async fn display(&self, state: &str) -> Result<(), CoreError> {
        self.0.call(Verb::Display, "MAIN", Payload::Quoted(state)).await?;
        Ok(())
    }

    /// The pending customer input, if any.
    pub async fn poll_event(&self) -> Result<Option<String>, CoreError> {
        let reply = self.0.call(Verb::Check, "EVENT", Payload::None).await?;
        Ok(pending_event(reply))
    }
}

// ── Card reader ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CardReader(Channel);

impl CardReader {
    pub fn new(link: Arc<Link>, timeout: Duration) -> Self {
        Self(Channel::new(link, DeviceKind::CardReader, timeout))
    }

    /// Text of a pending `CARDTAP:<x>` event, trimmed and not yet validated.
    pub async fn poll_tap(&self) -> Result<Option<String>, CoreError> {
        let reply = self.0.call(Verb::Check, "EVENT", Payload::None).await?;
        Ok(pending_event(reply)
            .and_then(|payload| payload.strip_prefix("CARDTAP:").map(|tap| tap.trim().to_owned())))
    }
}

// ── Authorizer ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Authorizer(Channel);

impl Authorizer {
    pub fn new(link: Arc<Link>, timeout: Duration) -> Self {
        Self(Channel::new(link, DeviceKind::CardServer, timeout))
    }

    /// `true` only if the reply line carries `AUTH:YES`. Anything else,
    /// malformed lines included, is a decline.
    pub async fn authorize(&self, card: i64) -> Result<bool, CoreError> {
        let card = card.to_string();
        let raw = self.0.raw(Verb::Auth, "START", Payload::Token(&card)).await?;
        let approved = raw.contains("AUTH:YES");
        debug!(approved, reply = %raw, "authorization answered");
        Ok(approved)
    }
}

// ── Station ─────────────────────────────────────────────────────────

/// One sellable fuel grade.
#[derive(Debug, Clone, PartialEq)]
pub struct Grade {
    pub name: String,
    pub price: f64,
}

/// The station's grade list, parsed plus the text it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct FuelList {
    pub grades: Vec<Grade>,
    /// `name=price` entries exactly as the station sent them.
    pub csv: String,
}

impl FuelList {
    /// Parse the payload of a `LIST:` reply.
    pub fn parse(payload: &str) -> Result<Self, CoreError> {
        let csv = payload
            .strip_prefix("LIST:")
            .ok_or_else(|| CoreError::bad_reply(payload))?
            .trim();

        let grades = csv
            .split(',')
            .map(|entry| {
                let (name, price) = entry
                    .split_once('=')
                    .ok_or_else(|| CoreError::bad_reply(payload))?;
                let price = price
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| CoreError::bad_reply(payload))?;
                Ok(Grade {
                    name: name.trim().to_owned(),
                    price,
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;

        Ok(Self {
            grades,
            csv: csv.to_owned(),
        })
    }

    pub fn contains(&self, fuel: &str) -> bool {
        self.grades.iter().any(|g| g.name == fuel)
    }
}

#[derive(Debug, Clone)]
pub struct Station(Channel);

impl Station {
    pub fn new(link: Arc<Link>, timeout: Duration) -> Self {
        Self(Channel::new(link, DeviceKind::Station, timeout))
    }

    pub async fn fuels(&self) -> Result<FuelList, CoreError> {
        let reply = self.0.call(Verb::List, "FUELS", Payload::None).await?;
        FuelList::parse(&reply.payload)
    }

    /// Unit price of `fuel` as reported. Range checks are the caller's.
    pub async fn price(&self, fuel: &str) -> Result<f64, CoreError> {
        let reply = self.0.call(Verb::GetPrice, "FUEL", Payload::Token(fuel)).await?;
        parse_price(&reply.payload)
    }
}

fn parse_price(payload: &str) -> Result<f64, CoreError> {
    if payload.trim() == "ERR:NO_SUCH_FUEL" {
        return Err(AbortCode::NoSuchFuel.into());
    }
    let price = payload
        .strip_prefix("PRICE:")
        .ok_or_else(|| CoreError::bad_reply(payload))?;
    price
        .trim()
        .parse::<f64>()
        .map_err(|_| AbortCode::BadPrice.into())
}

// ── Hose ────────────────────────────────────────────────────────────

/// Snapshot of the nozzle and the vehicle tank behind it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoseStatus {
    /// Nozzle is in the vehicle.
    pub attached: bool,
    /// Pump is enabled.
    pub armed: bool,
    /// The tank reports full.
    pub full: bool,
    /// Tank capacity in gallons.
    pub capacity: f64,
    /// Fuel already in the tank, in gallons.
    pub current: f64,
}

impl HoseStatus {
    /// Parse `STATE:{0|1},ARMED:{0|1},FULL:{0|1},CAP:<f>,CUR:<f>`.
    /// Field order does not matter; all five must be present.
    pub fn parse(payload: &str) -> Result<Self, CoreError> {
        let bad = || CoreError::bad_reply(payload);

        let mut attached = None;
        let mut armed = None;
        let mut full = None;
        let mut capacity = None;
        let mut current = None;

        for field in payload.split(',') {
            let (key, value) = field.split_once(':').ok_or_else(bad)?;
            let value = value.trim();
            match key.trim() {
                "STATE" => attached = Some(parse_flag(value).ok_or_else(bad)?),
                "ARMED" => armed = Some(parse_flag(value).ok_or_else(bad)?),
                "FULL" => full = Some(parse_flag(value).ok_or_else(bad)?),
                "CAP" => capacity = Some(value.parse::<f64>().map_err(|_| bad())?),
                "CUR" => current = Some(value.parse::<f64>().map_err(|_| bad())?),
                _ => {}
            }
        }

        Ok(Self {
            attached: attached.ok_or_else(bad)?,
            armed: armed.ok_or_else(bad)?,
            full: full.ok_or_else(bad)?,
            capacity: capacity.ok_or_else(bad)?,
            current: current.ok_or_else(bad)?,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "0" => Some(false),
        "1" => Some(true),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct Hose(Channel);

impl Hose {
    pub fn new(link: Arc<Link>, timeout: Duration) -> Self {
        Self(Channel::new(link, DeviceKind::Hose, timeout))
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        self.0.call(Verb::Start, "MAIN", Payload::None).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), CoreError> {
        self.0.call(Verb::Stop, "MAIN", Payload::None).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<HoseStatus, CoreError> {
        let reply = self.0.call(Verb::Status, "MAIN", Payload::None).await?;
        HoseStatus::parse(&reply.payload)
    }
}

// ── Flow meter ──────────────────────────────────────────────────────

/// Totalizer display. Updates are never acknowledged.
#[derive(Debug, Clone)]
pub struct FlowMeter(Channel);

impl FlowMeter {
    pub fn new(link: Arc<Link>, timeout: Duration) -> Self {
        Self(Channel::new(link, DeviceKind::FlowMeter, timeout))
    }

    pub async fn update(&self, gallons: &str, flowing: bool) -> Result<(), CoreError> {
        let payload = format!("GAL:{gallons},FLOWING:{}", u8::from(flowing));
        let line = self.0.line(Verb::Update, "MAIN", Payload::Quoted(&payload));
        Ok(self.0.link.send(&line).await?)
    }
}

/// Payload of an event reply, `None` for the "nothing pending" answer.
fn pending_event(reply: Reply) -> Option<String> {
    (reply.is_event() && !reply.is_empty()).then_some(reply.payload)
}
