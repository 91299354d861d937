use super::{payload::*, OpCode};
use serde::{
    de::Error as DeError,
    ser::SerializeStruct,
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use serde_json::Value;

/// A gateway envelope, pairing an opcode with its payload.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Event {
    /// Opens a new voice session.
    Identify(Identify),
    /// Chooses the media transport and encryption mode.
    SelectProtocol(SelectProtocol),
    /// Completes the handshake with the media endpoint.
    Ready(Ready),
    /// Keeps the connection alive.
    Heartbeat(Heartbeat),
    /// Hands over the encryption key.
    SessionDescription(SessionDescription),
    /// Updates who is speaking.
    Speaking(Speaking),
    /// Acknowledges a heartbeat.
    HeartbeatAck(HeartbeatAck),
    /// Resumes a dropped session.
    Resume(Resume),
    /// Gives the heartbeat interval.
    Hello(Hello),
    /// Acknowledges a successful resume.
    Resumed,
    /// A client announced its SSRCs.
    ClientConnect(ClientConnect),
    /// A client left the channel.
    ClientDisconnect(ClientDisconnect),
    /// An opcode this library does not handle, with its raw value and payload.
    Unknown(i64, Value),
}

impl Event {
    /// Returns the opcode of this event.
    #[must_use]
    pub fn kind(&self) -> OpCode {
        match self {
            Self::Identify(_) => OpCode::Identify,
            Self::SelectProtocol(_) => OpCode::SelectProtocol,
            Self::Ready(_) => OpCode::Ready,
            Self::Heartbeat(_) => OpCode::Heartbeat,
            Self::SessionDescription(_) => OpCode::SessionDescription,
            Self::Speaking(_) => OpCode::Speaking,
            Self::HeartbeatAck(_) => OpCode::HeartbeatAck,
            Self::Resume(_) => OpCode::Resume,
            Self::Hello(_) => OpCode::Hello,
            Self::Resumed => OpCode::Resumed,
            Self::ClientConnect(_) => OpCode::ClientConnect,
            Self::ClientDisconnect(_) => OpCode::ClientDisconnect,
            Self::Unknown(..) => OpCode::Unknown,
        }
    }
}

macro_rules! impl_from_payload {
    ($($Payload:ident),+) => {
        $(
            impl From<$Payload> for Event {
                fn from(p: $Payload) -> Self {
                    Self::$Payload(p)
                }
            }
        )+
    };
}

impl_from_payload!(
    Identify,
    SelectProtocol,
    Ready,
    Heartbeat,
    SessionDescription,
    Speaking,
    HeartbeatAck,
    Resume,
    Hello,
    ClientConnect,
    ClientDisconnect
);

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Event", 2)?;

        match self {
            Self::Unknown(op, _) => s.serialize_field("op", op)?,
            other => s.serialize_field("op", &other.kind().value())?,
        }

        match self {
            Self::Identify(p) => s.serialize_field("d", p)?,
            Self::SelectProtocol(p) => s.serialize_field("d", p)?,
            Self::Ready(p) => s.serialize_field("d", p)?,
            Self::Heartbeat(p) => s.serialize_field("d", p)?,
            Self::SessionDescription(p) => s.serialize_field("d", p)?,
            Self::Speaking(p) => s.serialize_field("d", p)?,
            Self::HeartbeatAck(p) => s.serialize_field("d", p)?,
            Self::Resume(p) => s.serialize_field("d", p)?,
            Self::Hello(p) => s.serialize_field("d", p)?,
            Self::Resumed => s.serialize_field("d", &Value::Null)?,
            Self::ClientConnect(p) => s.serialize_field("d", p)?,
            Self::ClientDisconnect(p) => s.serialize_field("d", p)?,
            Self::Unknown(_, v) => s.serialize_field("d", v)?,
        }

        s.end()
    }
}

#[derive(Deserialize)]
struct RawEvent {
    op: i64,
    #[serde(default)]
    d: Value,
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let RawEvent { op, d } = RawEvent::deserialize(deserializer)?;

        let event = match OpCode::from(op) {
            OpCode::Identify => serde_json::from_value(d).map(Self::Identify),
            OpCode::SelectProtocol => serde_json::from_value(d).map(Self::SelectProtocol),
            OpCode::Ready => serde_json::from_value(d).map(Self::Ready),
            OpCode::Heartbeat => serde_json::from_value(d).map(Self::Heartbeat),
            OpCode::SessionDescription =>
                serde_json::from_value(d).map(Self::SessionDescription),
            OpCode::Speaking => serde_json::from_value(d).map(Self::Speaking),
            OpCode::HeartbeatAck => serde_json::from_value(d).map(Self::HeartbeatAck),
            OpCode::Resume => serde_json::from_value(d).map(Self::Resume),
            OpCode::Hello => serde_json::from_value(d).map(Self::Hello),
            OpCode::Resumed => Ok(Self::Resumed),
            OpCode::ClientConnect => serde_json::from_value(d).map(Self::ClientConnect),
            OpCode::ClientDisconnect => serde_json::from_value(d).map(Self::ClientDisconnect),
            OpCode::Unknown => Ok(Self::Unknown(op, d)),
        };

        event.map_err(D::Error::custom)
    }
}
