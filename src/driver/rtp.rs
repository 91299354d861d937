//! Fixed RTP header layout used for outgoing voice packets.

use crate::constants::{RTP_HEADER_LEN, RTP_PROFILE_TYPE, RTP_VERSION};
#[cfg(test)]
use discortp::rtp::RtpPacket;
use discortp::rtp::MutableRtpPacket;

/// Returns the 12-byte header for one voice packet.
///
/// The header carries no padding, extension, CSRCs or marker bit.
#[must_use]
pub fn encode_rtp_header(sequence: u16, timestamp: u32, ssrc: u32) -> [u8; RTP_HEADER_LEN] {
    let mut header = [0u8; RTP_HEADER_LEN];
    write_rtp_header(&mut header, sequence, timestamp, ssrc);
    header
}

/// Writes a voice packet header into the start of `buf`.
///
/// # Panics
/// Panics if `buf` is shorter than [`RTP_HEADER_LEN`].
pub fn write_rtp_header(buf: &mut [u8], sequence: u16, timestamp: u32, ssrc: u32) {
    let len = buf.len();
    let Some(mut rtp) = MutableRtpPacket::new(buf) else {
        panic!("RTP header needs {RTP_HEADER_LEN}B, buffer has {len}B");
    };

    rtp.set_version(RTP_VERSION);
    rtp.set_padding(0);
    rtp.set_extension(0);
    rtp.set_csrc_count(0);
    rtp.set_marker(0);
    rtp.set_payload_type(RTP_PROFILE_TYPE);
    rtp.set_sequence(sequence.into());
    rtp.set_timestamp(timestamp.into());
    rtp.set_ssrc(ssrc);
}

/// Reads the sequence number, timestamp and SSRC back out of a voice packet.
#[cfg(test)]
pub(crate) fn read_rtp_header(buf: &[u8]) -> Option<(u16, u32, u32)> {
    RtpPacket::new(buf).map(|rtp| {
        (
            rtp.get_sequence().0 .0,
            rtp.get_timestamp().0 .0,
            rtp.get_ssrc(),
        )
    })
}
