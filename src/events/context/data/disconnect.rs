use crate::{error::ConnectionError, id::GuildId, model::CloseCode as VoiceCloseCode};

/// Voice connection details gathered at termination or failure.
///
/// In the event of a failure, this event data is gathered after
/// any resume attempt has been made.
#[derive(Debug)]
#[non_exhaustive]
pub struct DisconnectData<'a> {
    /// The location that a voice connection was terminated.
    pub kind: DisconnectKind,
    /// The cause of any connection failure.
    ///
    /// If `None`, then this disconnect was requested by the user in some way
    /// (i.e., leaving or changing voice channels).
    pub reason: Option<DisconnectReason>,
    /// ID of the target voice channel's parent guild.
    pub guild_id: GuildId,
    /// Unique string describing this session for validation/authentication purposes.
    pub session_id: &'a str,
}

/// The location that a voice connection was terminated.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum DisconnectKind {
    /// The voice driver failed to connect to the server.
    ///
    /// This requires explicit handling at the gateway level
    /// to either reconnect or fully disconnect.
    Connect,
    /// The voice driver failed to resume its session with the server.
    ///
    /// This requires explicit handling at the gateway level
    /// to either reconnect or fully disconnect.
    Reconnect,
    /// The voice connection was terminated mid-session by either
    /// the user or Discord.
    ///
    /// If `reason == None`, then this disconnection is either
    /// a full disconnect or a user-requested channel change.
    /// Otherwise, this is likely a session expiry (requiring user
    /// handling to fully disconnect/reconnect).
    Runtime,
}

/// The reason that a voice connection failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// This (re)connection attempt was dropped due to another request.
    AttemptDiscarded,
    /// A host-specific I/O error caused the fault; this is likely transient, and
    /// should be retried some time later.
    Io,
    /// Linnet and Discord disagreed on the protocol used to establish a
    /// voice connection, or on the encryption mode to use.
    ProtocolViolation,
    /// The driver was started without a frame source or connection details.
    Configuration,
    /// A voice connection was not established in the specified time.
    TimedOut,
    /// The Websocket connection was closed by Discord.
    ///
    /// This typically indicates that the voice session has expired,
    /// and a new one needs to be requested via the gateway.
    WsClosed(Option<VoiceCloseCode>),
}

impl From<&ConnectionError> for DisconnectReason {
    fn from(e: &ConnectionError) -> Self {
        use ConnectionError::*;

        match e {
            AttemptDiscarded => Self::AttemptDiscarded,
            Configuration(_) => Self::Configuration,
            Negotiation(_)
            | Crypto(_)
            | CryptoModeInvalid
            | EndpointUrl
            | IllegalDiscoveryResponse
            | IllegalIp => Self::ProtocolViolation,
            Io(_) => Self::Io,
            WsClosed(code) => Self::WsClosed(code.and_then(VoiceCloseCode::from_u16)),
            TimedOut => Self::TimedOut,
        }
    }
}
