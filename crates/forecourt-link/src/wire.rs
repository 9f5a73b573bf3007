//! Line grammar for the device protocol.
//!
//! Every exchange is one UTF-8 line terminated by `\n`:
//!
//! ```text
//! client → device   <DEVICE>|<VERB>|<TARGET>|<PAYLOAD>
//! device → client   MAIN|REPLY|<DEVICE>|"<payload>"
//!                   MAIN|EVENT|<DEVICE>|"<payload>"
//! ```
//!
//! The connection opens with `HELLO main v1` answered by
//! `HELLO <device-id> v1`.

use std::fmt;
use std::str::FromStr;

use strum::{AsRefStr, Display, EnumString};

use crate::error::Error;

/// Protocol revision spoken by this crate.
pub const PROTOCOL_VERSION: &str = "v1";

/// Identity the controller announces in its HELLO.
pub const CLIENT_ID: &str = "main";

/// Address every device reply is tagged with.
const REPLY_ADDRESS: &str = "MAIN";

/// Reply payload a device sends when it has nothing pending.
pub const NO_EVENT: &str = "NONE";

// ── Handshake ───────────────────────────────────────────────────────

/// The line the controller sends first on every new connection.
pub fn hello_line() -> String {
    format!("HELLO {CLIENT_ID} {PROTOCOL_VERSION}")
}

/// A device's answer to the HELLO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub device_id: String,
    pub version: String,
}

impl Hello {
    /// Parse `HELLO <id> <ver>`. Returns `None` for anything else.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix("HELLO ")?;
        let mut parts = rest.split_whitespace();
        let device_id = parts.next()?.to_owned();
        let version = parts.next()?.to_owned();
        Some(Self { device_id, version })
    }
}

// ── Requests ────────────────────────────────────────────────────────

/// Request verbs across all device kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verb {
    // screen
    Ready,
    Display,
    Check,
    // card reader
    DevCtl,
    // authorizer
    Auth,
    // station
    List,
    GetPrice,
    // hose
    Get,
    Set,
    Start,
    Stop,
    Status,
    // flow meter
    Update,
    // control variants
    GetState,
}

/// The fourth field of a request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    /// Literal `None`.
    None,
    /// Written as-is.
    Token(&'a str),
    /// Written between double quotes.
    Quoted(&'a str),
}

/// One client → device request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request<'a> {
    pub device: &'a str,
    pub verb: Verb,
    pub target: &'a str,
    pub payload: Payload<'a>,
}

impl<'a> Request<'a> {
    pub fn new(device: &'a str, verb: Verb, target: &'a str) -> Self {
        Self {
            device,
            verb,
            target,
            payload: Payload::None,
        }
    }

    pub fn token(mut self, token: &'a str) -> Self {
        self.payload = Payload::Token(token);
        self
    }

    pub fn quoted(mut self, text: &'a str) -> Self {
        self.payload = Payload::Quoted(text);
        self
    }
}

impl fmt::Display for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}|", self.device, self.verb, self.target)?;
        match self.payload {
            Payload::None => f.write_str("None"),
            Payload::Token(token) => f.write_str(&single_line(token)),
            Payload::Quoted(text) => write!(f, "\"{}\"", single_line(text)),
        }
    }
}

/// Line breaks inside a field would split the frame; flatten them.
fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

// ── Replies ─────────────────────────────────────────────────────────

/// Whether a device line answers the request directly or surfaces a
/// pending occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum ReplyKind {
    Reply,
    Event,
}

/// One device → client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub device: String,
    pub payload: String,
}

impl Reply {
    pub fn is_event(&self) -> bool {
        self.kind == ReplyKind::Event
    }

    /// `true` for the "nothing pending" reply.
    pub fn is_empty(&self) -> bool {
        self.payload == NO_EVENT
    }

    /// The payload with `prefix` stripped, if it starts with it.
    pub fn field(&self, prefix: &str) -> Option<&str> {
        self.payload.strip_prefix(prefix)
    }
}

impl FromStr for Reply {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.splitn(4, '|');
        let (Some(address), Some(kind), Some(device), Some(raw)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::malformed(line));
        };

        if address != REPLY_ADDRESS {
            return Err(Error::malformed(line));
        }
        let kind = ReplyKind::from_str(kind).map_err(|_| Error::malformed(line))?;

        Ok(Self {
            kind,
            device: device.to_owned(),
            payload: unquote(raw).to_owned(),
        })
    }
}

/// Text between the first and last double quote, or the trimmed field
/// when it is not quoted.
fn unquote(raw: &str) -> &str {
    let raw = raw.trim();
    match (raw.find('"'), raw.rfind('"')) {
        (Some(first), Some(last)) if last > first => &raw[first + 1..last],
        _ => raw,
    }
}
