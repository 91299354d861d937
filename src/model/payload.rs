//! Bodies carried in the `d` field of each gateway envelope.

use super::SpeakingState;
use crate::{
    constants::OPUS_PAYLOAD_TYPE,
    id::{GuildId, UserId},
};
use serde::{Deserialize, Serialize};
use std::{fmt, net::IpAddr};

/// Opens a new voice session.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct Identify {
    /// Guild whose voice server is being joined.
    pub server_id: GuildId,
    /// The bot's own user.
    pub user_id: UserId,
    /// Session ID from the main gateway's voice state update.
    pub session_id: String,
    /// Token from the main gateway's voice server update.
    pub token: String,
}

impl fmt::Debug for Identify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identify")
            .field("server_id", &self.server_id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("token", &"<secret>")
            .finish()
    }
}

/// Resumes a voice session after the control connection dropped.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct Resume {
    /// Guild of the session being resumed.
    pub server_id: GuildId,
    /// Session ID given in the original [`Identify`].
    pub session_id: String,
    /// Token given in the original [`Identify`].
    pub token: String,
}

impl fmt::Debug for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resume")
            .field("server_id", &self.server_id)
            .field("session_id", &self.session_id)
            .field("token", &"<secret>")
            .finish()
    }
}

/// Tells the server where to send media and how it is encrypted.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SelectProtocol {
    /// Transport protocol, always `"udp"`.
    pub protocol: String,
    /// Address and encryption settings for the media transport.
    pub data: ProtocolData,
    /// Fresh identifier for this media connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtc_connection_id: Option<String>,
    /// Codecs this client will send.
    #[serde(default)]
    pub codecs: Vec<Codec>,
}

/// Externally visible UDP address of this client, and the chosen encryption mode.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProtocolData {
    /// External IP address found by IP discovery.
    pub address: IpAddr,
    /// External UDP port found by IP discovery.
    pub port: u16,
    /// Name of the chosen encryption mode.
    pub mode: String,
}

/// A codec offered during protocol selection.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Codec {
    /// Codec name, such as `"opus"`.
    pub name: String,
    /// RTP payload type used for this codec.
    pub payload_type: u8,
    /// Preference among offered codecs.
    pub priority: u32,
    /// Media kind, `"audio"` or `"video"`.
    #[serde(rename = "type")]
    pub kind: String,
}

impl Codec {
    /// The single Opus audio codec sent by this library.
    #[must_use]
    pub fn opus() -> Self {
        Self {
            name: "opus".into(),
            payload_type: OPUS_PAYLOAD_TYPE,
            priority: 1000,
            kind: "audio".into(),
        }
    }
}

/// Server handshake reply describing the media endpoint.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ready {
    /// SSRC assigned to this client's audio.
    pub ssrc: u32,
    /// Address of the voice server's media socket.
    pub ip: IpAddr,
    /// Port of the voice server's media socket.
    pub port: u16,
    /// Encryption modes the server accepts.
    pub modes: Vec<String>,
}

/// Keepalive, carrying a nonce which the server echoes back.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Heartbeat {
    /// Client-chosen value, here the send time in milliseconds.
    pub nonce: u64,
}

/// Acknowledgement of a [`Heartbeat`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HeartbeatAck {
    /// Nonce of the heartbeat being acknowledged.
    pub nonce: u64,
}

/// First message of every control connection.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Hello {
    /// Milliseconds between heartbeats.
    pub heartbeat_interval: f64,
}

/// Encryption mode and key assigned to this session.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct SessionDescription {
    /// Name of the encryption mode the server settled on.
    pub mode: String,
    /// Key for encrypting voice packets.
    pub secret_key: Vec<u8>,
}

impl fmt::Debug for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDescription")
            .field("mode", &self.mode)
            .field("secret_key", &"<secret>")
            .finish()
    }
}

/// Speaking indicator for an SSRC.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Speaking {
    /// Delay to apply to the audio, always zero for bots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u32>,
    /// Kind of audio being sent.
    pub speaking: SpeakingState,
    /// SSRC whose state changed.
    pub ssrc: u32,
    /// User owning `ssrc`, present on updates from the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// SSRC announcement, sent by this client after protocol selection
/// and received when other clients join.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClientConnect {
    /// User who connected, present on messages from the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// SSRC of the user's audio.
    pub audio_ssrc: u32,
    /// SSRC of the user's video, or zero.
    #[serde(default)]
    pub video_ssrc: u32,
    /// SSRC of the user's retransmissions, or zero.
    #[serde(default)]
    pub rtx_ssrc: u32,
}

/// Another client left the voice channel.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClientDisconnect {
    /// User who left.
    pub user_id: UserId,
}
