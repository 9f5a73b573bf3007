// ── Core error types ──
//
// What the controller and its callers see. Link-layer failures are
// translated by `From<forecourt_link::Error>` into variants that say
// whether a session can recover from them.

use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Short machine-readable code shown on the screen when a session aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AbortCode {
    /// Card tap payload is not an integer.
    BadTap,
    /// Card tap payload is a negative integer.
    NegTap,
    /// Hose reported a negative capacity or level.
    BadTank,
    /// Hose reported more fuel in the tank than it holds.
    Overfill,
    NegPrice,
    /// Price below one cent.
    BadPrice,
    NegGal,
    /// Station does not sell the selected grade.
    NoSuchFuel,
    /// A device did not answer in time.
    DeviceTimeout,
    /// A device answered with something unparseable.
    BadReply,
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to device at {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    #[error("Device identity check failed: {message}")]
    IdentityMismatch { message: String },

    #[error("Device disconnected")]
    DeviceDisconnected,

    #[error("Device I/O error: {reason}")]
    Io { reason: String },

    #[error("Device did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Unexpected device reply: {reply:?}")]
    BadReply { reply: String },

    #[error("Unknown device: {name}")]
    UnknownDevice { name: String },

    // ── Session errors ───────────────────────────────────────────────
    #[error("Session aborted: {0}")]
    Abort(AbortCode),

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    pub(crate) fn bad_reply(reply: impl Into<String>) -> Self {
        Self::BadReply {
            reply: reply.into(),
        }
    }

    /// The code a session shows when this error ends it, or `None` if the
    /// error is fatal to the controller.
    pub fn abort_code(&self) -> Option<AbortCode> {
        match self {
            Self::Abort(code) => Some(*code),
            Self::Timeout { .. } => Some(AbortCode::DeviceTimeout),
            Self::BadReply { .. } => Some(AbortCode::BadReply),
            _ => None,
        }
    }

    /// Returns `true` if the controller cannot continue.
    pub fn is_fatal(&self) -> bool {
        self.abort_code().is_none()
    }
}

impl From<AbortCode> for CoreError {
    fn from(code: AbortCode) -> Self {
        Self::Abort(code)
    }
}

// ── Conversion from link-layer errors ────────────────────────────────

impl From<forecourt_link::Error> for CoreError {
    fn from(err: forecourt_link::Error) -> Self {
        use forecourt_link::Error as LinkError;

        match err {
            LinkError::Connect { addr, reason } => CoreError::ConnectionFailed { addr, reason },
            LinkError::Handshake { addr, reply } => CoreError::ConnectionFailed {
                addr,
                reason: match reply {
                    Some(reply) => format!("unexpected handshake reply {reply:?}"),
                    None => "no handshake reply".into(),
                },
            },
            e @ (LinkError::DeviceIdMismatch { .. }
            | LinkError::ProtocolVersionMismatch { .. }) => CoreError::IdentityMismatch {
                message: e.to_string(),
            },
            LinkError::Timeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            LinkError::ConnectionClosed => CoreError::DeviceDisconnected,
            LinkError::Io(e) => CoreError::Io {
                reason: e.to_string(),
            },
            LinkError::MalformedReply { reply } => CoreError::BadReply { reply },
            LinkError::UnknownDevice { name } => CoreError::UnknownDevice { name },
        }
    }
}
