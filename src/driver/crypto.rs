//! Encryption schemes supported by Discord's secure RTP negotiation.
use crate::constants::RTP_HEADER_LEN;
use byteorder::{ByteOrder, NetworkEndian};
use rand::Rng;
use std::{error::Error as StdError, fmt, num::Wrapping};
use xsalsa20poly1305::{
    aead::{AeadInPlace, KeyInit},
    Nonce,
    Tag,
    XSalsa20Poly1305 as Cipher,
};

pub use xsalsa20poly1305::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Number of counter bytes carried by [`CryptoMode::Lite`] packets.
const LITE_NONCE_LEN: usize = 4;

/// Variants of the XSalsa20Poly1305 encryption scheme.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CryptoMode {
    /// The RTP header is used as the source of nonce bytes for the packet.
    ///
    /// Equivalent to a nonce of at most 48b (6B) at no extra packet overhead:
    /// the RTP sequence number and timestamp are the varying quantities.
    Normal,
    /// An additional 4B counter suffix is used as the source of nonce bytes for the packet.
    /// This nonce value increments by `1` with each packet.
    ///
    /// Nonce width of 4B (32b), at an extra 4B per packet (~0.2 kB/s).
    Lite,
    /// An additional random 24B suffix is used as the source of nonce bytes for the packet.
    /// This is regenerated randomly for each packet.
    ///
    /// Full nonce width of 24B (192b), at an extra 24B per packet (~1.2 kB/s).
    Suffix,
}

impl CryptoMode {
    /// Every mode this library can speak, in its default preference order.
    pub const ALL: [CryptoMode; 3] = [CryptoMode::Normal, CryptoMode::Lite, CryptoMode::Suffix];

    /// Returns the name of a mode as it will appear during negotiation.
    #[must_use]
    pub fn to_request_str(self) -> &'static str {
        match self {
            Self::Normal => "xsalsa20_poly1305",
            Self::Lite => "xsalsa20_poly1305_lite",
            Self::Suffix => "xsalsa20_poly1305_suffix",
        }
    }

    /// Parses a mode name offered by (or returned from) the server.
    #[must_use]
    pub fn from_request_str(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.to_request_str() == name)
    }

    /// Returns the number of nonce bytes appended after the encrypted payload.
    #[must_use]
    pub fn nonce_suffix_len(self) -> usize {
        match self {
            Self::Normal => 0,
            Self::Lite => LITE_NONCE_LEN,
            Self::Suffix => NONCE_SIZE,
        }
    }

    /// Calculates the number of additional bytes required compared
    /// to an unencrypted payload.
    #[must_use]
    pub fn payload_overhead(self) -> usize {
        TAG_SIZE + self.nonce_suffix_len()
    }

    /// Size of a complete RTP packet carrying `payload_len` bytes of audio.
    #[must_use]
    pub fn packet_size(self, payload_len: usize) -> usize {
        RTP_HEADER_LEN + payload_len + self.payload_overhead()
    }

    /// Builds the 24-byte nonce for one packet.
    ///
    /// `Normal` copies the RTP header into the leading bytes, `Lite` writes `counter`
    /// big-endian into the leading bytes, and `Suffix` draws a fresh random nonce
    /// (ignoring both inputs). All remaining bytes are zero.
    #[must_use]
    pub fn generate_nonce(self, rtp_header: &[u8; RTP_HEADER_LEN], counter: u32) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];

        match self {
            Self::Normal => nonce[..RTP_HEADER_LEN].copy_from_slice(rtp_header),
            Self::Lite => NetworkEndian::write_u32(&mut nonce[..LITE_NONCE_LEN], counter),
            Self::Suffix => rand::thread_rng().fill(&mut nonce[..]),
        }

        nonce
    }

    /// Chooses the first mode in `offered` (server preference order) which also
    /// appears in `supported`.
    ///
    /// # Errors
    /// Fails if the server offered no mode this client is willing to use.
    pub fn negotiate<S: AsRef<str>>(
        offered: &[S],
        supported: &[CryptoMode],
    ) -> Result<Self, NegotiationError> {
        offered
            .iter()
            .filter_map(|name| Self::from_request_str(name.as_ref()))
            .find(|mode| supported.contains(mode))
            .ok_or_else(|| NegotiationError {
                offered: offered.iter().map(|s| s.as_ref().to_string()).collect(),
            })
    }
}

/// Errors raised by packet encryption and key setup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CryptoError {
    /// An output buffer did not have the size required by its input.
    BufferSize {
        /// Number of bytes the operation needs.
        expected: usize,
        /// Number of bytes supplied.
        actual: usize,
    },
    /// A secret key was not [`KEY_SIZE`] bytes long.
    KeyLength(usize),
    /// A nonce was not [`NONCE_SIZE`] bytes long.
    NonceLength(usize),
    /// The cipher rejected the operation, e.g. a packet failed authentication.
    Aead,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice packet cryptography failed: ")?;
        match self {
            Self::BufferSize { expected, actual } =>
                write!(f, "buffer holds {actual}B, but {expected}B are required"),
            Self::KeyLength(l) => write!(f, "key was {l}B, expected {KEY_SIZE}B"),
            Self::NonceLength(l) => write!(f, "nonce was {l}B, expected {NONCE_SIZE}B"),
            Self::Aead => write!(f, "cipher rejected the packet"),
        }
    }
}

impl StdError for CryptoError {}

/// The server offered no encryption mode this client supports.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NegotiationError {
    /// Mode names offered by the server, in its order.
    pub offered: Vec<String>,
}

impl fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "server offered no supported encryption mode (offered: {:?})",
            self.offered
        )
    }
}

impl StdError for NegotiationError {}

fn build_cipher(key: &[u8]) -> Result<Cipher, CryptoError> {
    Cipher::new_from_slice(key).map_err(|_| CryptoError::KeyLength(key.len()))
}

fn check_nonce(nonce: &[u8]) -> Result<&Nonce, CryptoError> {
    if nonce.len() == NONCE_SIZE {
        Ok(Nonce::from_slice(nonce))
    } else {
        Err(CryptoError::NonceLength(nonce.len()))
    }
}

/// Seals `plaintext` into `out` as `MAC ‖ ciphertext`.
///
/// # Errors
/// `out` must be exactly `plaintext.len() + TAG_SIZE` bytes long, and the key and
/// nonce must have their exact sizes.
pub fn encrypt(
    plaintext: &[u8],
    nonce: &[u8],
    key: &[u8],
    out: &mut [u8],
) -> Result<usize, CryptoError> {
    let expected = plaintext.len() + TAG_SIZE;
    if out.len() != expected {
        return Err(CryptoError::BufferSize {
            expected,
            actual: out.len(),
        });
    }

    let cipher = build_cipher(key)?;
    let nonce = check_nonce(nonce)?;

    let (tag_bytes, body) = out.split_at_mut(TAG_SIZE);
    body.copy_from_slice(plaintext);
    let tag = cipher
        .encrypt_in_place_detached(nonce, b"", body)
        .map_err(|_| CryptoError::Aead)?;
    tag_bytes.copy_from_slice(&tag[..]);

    Ok(expected)
}

/// Opens a `MAC ‖ ciphertext` buffer produced by [`encrypt`] into `out`.
///
/// # Errors
/// `out` must be exactly `ciphertext.len() - TAG_SIZE` bytes long; authentication
/// failure is reported as [`CryptoError::Aead`].
pub fn decrypt(
    ciphertext: &[u8],
    nonce: &[u8],
    key: &[u8],
    out: &mut [u8],
) -> Result<usize, CryptoError> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::BufferSize {
            expected: TAG_SIZE,
            actual: ciphertext.len(),
        });
    }

    let expected = ciphertext.len() - TAG_SIZE;
    if out.len() != expected {
        return Err(CryptoError::BufferSize {
            expected,
            actual: out.len(),
        });
    }

    let cipher = build_cipher(key)?;
    let nonce = check_nonce(nonce)?;

    let (tag_bytes, body) = ciphertext.split_at(TAG_SIZE);
    out.copy_from_slice(body);
    cipher
        .decrypt_in_place_detached(nonce, b"", out, Tag::from_slice(tag_bytes))
        .map_err(|_| CryptoError::Aead)?;

    Ok(expected)
}

/// Negotiated mode and key for one voice session.
///
/// Both are installed together on receipt of a session description, and are
/// read-only thereafter.
#[derive(Clone)]
pub struct SessionKeys {
    pub(crate) mode: CryptoMode,
    pub(crate) cipher: Cipher,
}

impl SessionKeys {
    pub(crate) fn new(mode: CryptoMode, secret_key: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            mode,
            cipher: build_cipher(secret_key)?,
        })
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("mode", &self.mode)
            .field("cipher", &"<secret>")
            .finish()
    }
}

/// Per-stream nonce state for outgoing packets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct CryptoState {
    mode: CryptoMode,
    lite_counter: Wrapping<u32>,
}

impl From<CryptoMode> for CryptoState {
    fn from(mode: CryptoMode) -> Self {
        Self {
            mode,
            lite_counter: Wrapping(rand::random::<u32>()),
        }
    }
}

impl CryptoState {
    pub(crate) fn kind(&self) -> CryptoMode {
        self.mode
    }

    /// Encrypts a packet laid out as `header ‖ [TAG_SIZE spare] ‖ payload ‖ [suffix spare]`,
    /// returning the final packet length.
    ///
    /// The RTP header must already be written, and `payload_len` bytes of audio must
    /// sit directly after the spare tag space.
    pub(crate) fn encrypt_packet(
        &mut self,
        cipher: &Cipher,
        packet: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, CryptoError> {
        let total = self.mode.packet_size(payload_len);
        if packet.len() < total {
            return Err(CryptoError::BufferSize {
                expected: total,
                actual: packet.len(),
            });
        }

        let mut header = [0u8; RTP_HEADER_LEN];
        header.copy_from_slice(&packet[..RTP_HEADER_LEN]);

        let nonce = self.mode.generate_nonce(&header, self.lite_counter.0);
        if self.mode == CryptoMode::Lite {
            self.lite_counter += Wrapping(1);
        }

        let body_start = RTP_HEADER_LEN + TAG_SIZE;
        let body_end = body_start + payload_len;
        let suffix_len = self.mode.nonce_suffix_len();
        packet[body_end..body_end + suffix_len].copy_from_slice(&nonce[..suffix_len]);

        let tag = cipher
            .encrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                b"",
                &mut packet[body_start..body_end],
            )
            .map_err(|_| CryptoError::Aead)?;
        packet[RTP_HEADER_LEN..body_start].copy_from_slice(&tag[..]);

        Ok(total)
    }
}

/// Decrypts a complete voice packet in place, returning the range of the packet
/// holding the recovered payload.
#[cfg(test)]
pub(crate) fn decrypt_packet(
    mode: CryptoMode,
    cipher: &Cipher,
    packet: &mut [u8],
) -> Result<std::ops::Range<usize>, CryptoError> {
    let min = mode.packet_size(0);
    if packet.len() < min {
        return Err(CryptoError::BufferSize {
            expected: min,
            actual: packet.len(),
        });
    }

    let suffix_len = mode.nonce_suffix_len();
    let body_start = RTP_HEADER_LEN + TAG_SIZE;
    let body_end = packet.len() - suffix_len;

    let mut nonce = [0u8; NONCE_SIZE];
    match mode {
        CryptoMode::Normal => nonce[..RTP_HEADER_LEN].copy_from_slice(&packet[..RTP_HEADER_LEN]),
        CryptoMode::Lite | CryptoMode::Suffix =>
            nonce[..suffix_len].copy_from_slice(&packet[body_end..]),
    }

    let (head, body) = packet.split_at_mut(body_start);
    let tag = Tag::clone_from_slice(&head[RTP_HEADER_LEN..]);
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&nonce),
            b"",
            &mut body[..body_end - body_start],
            &tag,
        )
        .map_err(|_| CryptoError::Aead)?;

    Ok(body_start..body_end)
}
