//! Connection errors and convenience types.

use crate::driver::{CryptoError, NegotiationError};
use std::{error::Error as StdError, fmt, io::Error as IoError, sync::Arc};

/// Errors encountered while connecting to a Discord voice server over the driver.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The driver was stopped, or its tasks shut down, before this attempt finished.
    AttemptDiscarded,
    /// The driver was started before it had everything it needs.
    Configuration(ConfigurationError),
    /// An error occurred while installing the session key.
    Crypto(CryptoError),
    /// The server offered no encryption mode from [`Config::crypto_modes`].
    ///
    /// [`Config::crypto_modes`]: crate::Config::crypto_modes
    Negotiation(NegotiationError),
    /// Server did not return the negotiated crypto mode in its session description.
    CryptoModeInvalid,
    /// An indicator that an endpoint URL was invalid.
    EndpointUrl,
    /// Discord failed to correctly respond to IP discovery.
    IllegalDiscoveryResponse,
    /// Could not parse Discord's view of our IP.
    IllegalIp,
    /// Miscellaneous I/O error.
    Io(Arc<IoError>),
    /// The control websocket closed before the handshake completed.
    WsClosed(Option<u16>),
    /// Connection attempt timed out.
    TimedOut,
}

/// Reasons a driver refuses to start.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// No [`FrameSource`] was attached via [`Driver::set_frame_source`].
    ///
    /// [`FrameSource`]: crate::driver::FrameSource
    /// [`Driver::set_frame_source`]: crate::driver::Driver::set_frame_source
    NoFrameSource,
    /// The session ID, token, or endpoint has not been supplied.
    MissingConnectionInfo,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFrameSource => write!(f, "no frame source attached"),
            Self::MissingConnectionInfo => write!(f, "session id, token or endpoint missing"),
        }
    }
}

impl From<ConfigurationError> for Error {
    fn from(e: ConfigurationError) -> Self {
        Error::Configuration(e)
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Error::Crypto(e)
    }
}

impl From<NegotiationError> for Error {
    fn from(e: NegotiationError) -> Self {
        Error::Negotiation(e)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Error {
        Error::Io(Arc::new(e))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to connect to Discord RTP server: ")?;
        use Error::*;
        match self {
            AttemptDiscarded => write!(f, "connection attempt was aborted/discarded"),
            Configuration(e) => write!(f, "driver misconfigured ({e})"),
            Crypto(e) => write!(f, "{e}"),
            Negotiation(e) => write!(f, "{e}"),
            CryptoModeInvalid => write!(f, "server changed negotiated encryption mode"),
            EndpointUrl => write!(f, "endpoint URL received from gateway was invalid"),
            IllegalDiscoveryResponse => write!(f, "IP discovery/NAT punching response was invalid"),
            IllegalIp => write!(f, "IP discovery/NAT punching response had bad IP value"),
            Io(e) => write!(f, "{e}"),
            WsClosed(Some(code)) => write!(f, "websocket closed with code {code}"),
            WsClosed(None) => write!(f, "websocket closed"),
            TimedOut => write!(f, "connection attempt timed out"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Crypto(e) => Some(e),
            Error::Negotiation(e) => Some(e),
            Error::Io(e) => Some(e.as_ref()),
            Error::AttemptDiscarded
            | Error::Configuration(_)
            | Error::CryptoModeInvalid
            | Error::EndpointUrl
            | Error::IllegalDiscoveryResponse
            | Error::IllegalIp
            | Error::WsClosed(_)
            | Error::TimedOut => None,
        }
    }
}

/// Convenience type for Discord voice/driver connection error handling.
pub type Result<T> = std::result::Result<T, Error>;
