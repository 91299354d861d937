/// Operation codes of the voice gateway envelope.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(i16)]
pub enum OpCode {
    /// Begin a voice websocket connection.
    Identify = 0,
    /// Select the voice protocol.
    SelectProtocol = 1,
    /// Complete the websocket handshake.
    Ready = 2,
    /// Keep the websocket connection alive.
    Heartbeat = 3,
    /// Describe the session.
    SessionDescription = 4,
    /// Indicate which users are speaking.
    Speaking = 5,
    /// Sent to acknowledge a received client heartbeat.
    HeartbeatAck = 6,
    /// Resume a connection.
    Resume = 7,
    /// Time to wait between sending heartbeats in milliseconds.
    Hello = 8,
    /// Acknowledge a successful session resume.
    Resumed = 9,
    /// A client has connected to the voice channel.
    ClientConnect = 12,
    /// A client has disconnected from the voice channel.
    ClientDisconnect = 13,
    /// Any opcode not understood by this library.
    Unknown = -1,
}

impl OpCode {
    /// Returns the numeric value of this opcode as it appears on the wire.
    #[must_use]
    pub fn value(self) -> i16 {
        self as i16
    }
}

impl From<i64> for OpCode {
    fn from(value: i64) -> Self {
        use OpCode::*;
        match value {
            0 => Identify,
            1 => SelectProtocol,
            2 => Ready,
            3 => Heartbeat,
            4 => SessionDescription,
            5 => Speaking,
            6 => HeartbeatAck,
            7 => Resume,
            8 => Hello,
            9 => Resumed,
            12 => ClientConnect,
            13 => ClientDisconnect,
            _ => Unknown,
        }
    }
}
