//! Constants affecting driver function and API handling.

use discortp::rtp::RtpType;
use std::time::Duration;

/// The voice gateway version used by the library.
pub const VOICE_GATEWAY_VERSION: u8 = crate::model::constants::GATEWAY_VERSION;

/// Sample rate of audio to be sent to Discord.
pub const SAMPLE_RATE_RAW: usize = 48_000;

/// Number of audio frames/packets to be sent per second.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Length of time between any two audio frames.
pub const TIMESTEP_LENGTH: Duration = Duration::from_millis(1000 / AUDIO_FRAME_RATE as u64);

/// Length (in milliseconds) of any audio frame.
pub const FRAME_LEN_MS: usize = 1000 / AUDIO_FRAME_RATE;

/// Number of samples in one complete frame of audio per channel.
///
/// This is also the amount the RTP timestamp advances with each packet.
pub const MONO_FRAME_SIZE: usize = SAMPLE_RATE_RAW / AUDIO_FRAME_RATE;

/// Number of frames held between the frame producer and the packet sender.
///
/// One second of audio.
pub const FRAME_QUEUE_LENGTH: usize = (1000 + (FRAME_LEN_MS - 1)) / FRAME_LEN_MS;

/// Maximum number of consecutive silent frames sent during an underrun
/// before the sender waits for real audio.
pub const MAX_SILENCE_FRAMES: usize = 5;

/// Maximum packet size for a voice packet.
///
/// Set a safe amount below the Ethernet MTU to avoid fragmentation/rejection.
pub const VOICE_PACKET_MAX: usize = 1460;

/// Largest Opus frame accepted from a frame source.
///
/// Any frame of this size fits in [`VOICE_PACKET_MAX`] under every encryption mode.
pub const FRAME_BUFFER_SIZE: usize =
    VOICE_PACKET_MAX - RTP_HEADER_LEN - crate::driver::TAG_SIZE - crate::driver::NONCE_SIZE;

/// Opus silent frame, used to signal speech start and end (and prevent audio glitching).
pub const SILENT_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// The one (and only) RTP version.
pub const RTP_VERSION: u8 = 2;

/// Dynamic payload type negotiated for Opus audio.
pub const OPUS_PAYLOAD_TYPE: u8 = 120;

/// Profile type used by Discord's Opus audio traffic.
pub const RTP_PROFILE_TYPE: RtpType = RtpType::Dynamic(OPUS_PAYLOAD_TYPE);

/// Size of the fixed RTP header used for voice packets.
pub const RTP_HEADER_LEN: usize = 12;

/// Size of an IP discovery request or response datagram.
pub const IP_DISCOVERY_LEN: usize = 70;

/// Default number of control messages buffered for the websocket writer.
pub const WS_QUEUE_LENGTH: usize = 10;

/// Close reason sent when the client shuts a gateway connection.
pub const CLIENT_CLOSE_REASON: &str = "Disconnected by client.";
