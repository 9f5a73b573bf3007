use thiserror::Error;

/// Top-level error type for the `forecourt-link` crate.
///
/// Covers every failure mode of a device link: connect, handshake,
/// per-request transport, reply parsing, and registry lookup.
/// `forecourt-core` decides which of these end a session and which
/// end the process.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connect ─────────────────────────────────────────────────────
    /// TCP connect failed or did not complete inside the connect window.
    #[error("Cannot connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    // ── Handshake ───────────────────────────────────────────────────
    /// The device answered the HELLO with something that is not `HELLO <id> <ver>`,
    /// or did not answer at all.
    #[error("Bad handshake from {addr}: {reply:?}")]
    Handshake { addr: String, reply: Option<String> },

    /// The device identified itself as somebody else.
    #[error("Device id mismatch: expected {expected}, got {got}")]
    DeviceIdMismatch { expected: String, got: String },

    /// The device speaks a different protocol revision.
    #[error("Protocol version mismatch: expected {expected}, got {got}")]
    ProtocolVersionMismatch { expected: String, got: String },

    // ── Transport ───────────────────────────────────────────────────
    /// No reply line arrived before the per-call deadline.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The peer closed the connection (EOF), or the link was closed locally.
    #[error("Device closed connection")]
    ConnectionClosed,

    /// Any other socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Data ────────────────────────────────────────────────────────
    /// A reply line that does not follow the reply grammar.
    #[error("Malformed reply: {reply:?}")]
    MalformedReply { reply: String },

    // ── Registry ────────────────────────────────────────────────────
    /// No endpoint with this name is configured.
    #[error("Unknown device: {name}")]
    UnknownDevice { name: String },
}

impl Error {
    /// Returns `true` if the request deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if the link can no longer be used.
    ///
    /// Timeouts and malformed replies leave a link usable; connect,
    /// handshake, and closed-connection failures do not.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Timeout { .. } | Self::MalformedReply { .. })
    }

    pub(crate) fn malformed(reply: impl Into<String>) -> Self {
        Self::MalformedReply {
            reply: reply.into(),
        }
    }
}
