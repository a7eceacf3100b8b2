//! Connection states of a session.

use std::fmt;

/// Connection state of a [`Session`](crate::Session).
///
/// A session starts `Disconnected`, moves to `HandshakeSent` once the
/// transport opens and the `connect` command is written, and becomes
/// `Connected` when the server answers `"ok"`. Any teardown returns it to
/// `Disconnected`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum State {
    /// No live transport.
    #[default]
    Disconnected,
    /// The handshake is in flight.
    HandshakeSent,
    /// The handshake succeeded; queued requests flow.
    Connected,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::HandshakeSent => "handshake sent",
            Self::Connected => "connected",
        })
    }
}
