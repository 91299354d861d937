use crate::{constants::CLIENT_CLOSE_REASON, model::Event};

use async_tungstenite::{
    tokio::{connect_async, ConnectStream},
    tungstenite::{
        error::Error as TungsteniteError,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    WebSocketStream,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt,
    StreamExt,
};
use serde_json::Error as JsonError;
use std::{error::Error as StdError, fmt};
use tracing::{debug, instrument};
use url::Url;

type Inner = WebSocketStream<ConnectStream>;

pub(crate) struct WsStream(Inner);

impl WsStream {
    #[instrument(skip(url), fields(url = %url))]
    pub(crate) async fn connect(url: &Url) -> Result<Self> {
        let (stream, _) = connect_async(url.as_str()).await?;

        Ok(Self(stream))
    }

    /// Separates the socket into halves for the writer and reader tasks.
    pub(crate) fn split(self) -> (WsSink, WsReader) {
        let (sink, stream) = self.0.split();
        (WsSink(sink), WsReader(stream))
    }
}

pub(crate) struct WsSink(SplitSink<Inner, Message>);

impl WsSink {
    pub(crate) async fn send_json(&mut self, value: &Event) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.0.send(Message::Text(text)).await?;

        Ok(())
    }

    /// Sends a normal closure frame and flushes the socket.
    pub(crate) async fn close(&mut self) -> Result<()> {
        self.0
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: CLIENT_CLOSE_REASON.into(),
            })))
            .await?;
        self.0.close().await?;

        Ok(())
    }
}

pub(crate) struct WsReader(SplitStream<Inner>);

impl WsReader {
    /// Waits for the next complete message.
    ///
    /// Returns `Ok(None)` for frames which carry no gateway event (pings, pongs,
    /// unparseable JSON), and [`Error::WsClosed`] once the peer closes or the stream ends.
    pub(crate) async fn recv_json(&mut self) -> Result<Option<Event>> {
        match self.0.next().await {
            Some(Ok(message)) => convert_ws_message(message),
            Some(Err(e)) => Err(e.into()),
            None => Err(Error::WsClosed(None)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the control websocket.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A message could not be serialized.
    Json(JsonError),

    /// The discord voice gateway does not support or offer zlib compression.
    /// As a result, only text messages are expected.
    UnexpectedBinaryMessage(Vec<u8>),

    /// The underlying socket failed.
    Ws(TungsteniteError),

    /// The peer closed the connection, possibly with a close frame.
    WsClosed(Option<CloseFrame<'static>>),
}

impl Error {
    /// Close code sent by the peer, if any.
    pub(crate) fn close_code(&self) -> Option<u16> {
        match self {
            Self::WsClosed(Some(frame)) => Some(u16::from(frame.code)),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice gateway websocket failed: ")?;
        match self {
            Self::Json(e) => write!(f, "{e}"),
            Self::UnexpectedBinaryMessage(b) => write!(f, "received {}B binary message", b.len()),
            Self::Ws(e) => write!(f, "{e}"),
            Self::WsClosed(Some(frame)) => write!(f, "closed ({frame})"),
            Self::WsClosed(None) => write!(f, "closed without a close frame"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Ws(e) => Some(e),
            Self::UnexpectedBinaryMessage(_) | Self::WsClosed(_) => None,
        }
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Error {
        match e {
            TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed =>
                Error::WsClosed(None),
            e => Error::Ws(e),
        }
    }
}

#[inline]
pub(crate) fn convert_ws_message(message: Message) -> Result<Option<Event>> {
    Ok(match message {
        Message::Text(payload) => serde_json::from_str(&payload)
            .map_err(|e| {
                debug!("Unexpected JSON: {e}. Payload: {payload}");
                e
            })
            .ok(),
        Message::Binary(bytes) => {
            return Err(Error::UnexpectedBinaryMessage(bytes));
        },
        Message::Close(frame) => {
            return Err(Error::WsClosed(frame.map(CloseFrame::into_owned)));
        },
        // Ping/Pong message behaviour is internally handled by tungstenite.
        _ => None,
    })
}
