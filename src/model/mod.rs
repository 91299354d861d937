//! Payloads, opcodes and close codes of the voice gateway protocol.
//!
//! Every control message travels as a JSON envelope `{"op": <opcode>, "d": <payload>}`,
//! represented here by [`Event`].

mod close_code;
mod event;
mod opcode;
pub mod payload;
mod speaking_state;

pub use self::{
    close_code::CloseCode,
    event::Event,
    opcode::OpCode,
    payload::{Codec, ProtocolData},
    speaking_state::SpeakingState,
};

/// Protocol constants shared by the gateway and the RTP sender.
pub mod constants {
    /// Voice gateway protocol version requested in the connection URL.
    pub const GATEWAY_VERSION: u8 = 4;
}
