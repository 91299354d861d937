use crate::{
    constants::{FRAME_QUEUE_LENGTH, MAX_SILENCE_FRAMES, WS_QUEUE_LENGTH},
    driver::CryptoMode,
};
use std::time::Duration;

/// Configuration for drivers and calls.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Config {
    /// Encryption modes this client is willing to use.
    ///
    /// During the handshake, the first mode in the server's offered list which also
    /// appears here is chosen. If none match, the connection fails.
    ///
    /// Defaults to every [`CryptoMode`].
    pub crypto_modes: Vec<CryptoMode>,

    /// Configures the amount of time to wait for Discord to reply with connection information
    /// if [`Call::join`]/[`join_gateway`] are used.
    ///
    /// This is a useful fallback in the event that:
    ///  * the underlying Discord client restarts and loses a join request, or
    ///  * a channel join fails because the bot is already believed to be there.
    ///
    /// Defaults to 10 seconds. If set to `None`, connections will never time out.
    ///
    /// [`Call::join`]: crate::Call::join
    /// [`join_gateway`]: crate::Call::join_gateway
    pub gateway_timeout: Option<Duration>,

    /// Bounds each connection or reconnection attempt of the driver, from the websocket
    /// opening until the session is ready to send audio.
    ///
    /// Defaults to 10 seconds. If set to `None`, attempts may wait forever.
    pub driver_timeout: Option<Duration>,

    /// Bounds the UDP IP discovery exchange.
    ///
    /// Defaults to 5 seconds. If set to `None`, discovery waits until the attempt
    /// is otherwise abandoned.
    pub ip_discovery_timeout: Option<Duration>,

    /// Longest time the packet sender waits for its frame queue to fill before it
    /// starts transmitting anyway.
    ///
    /// Defaults to 1 second.
    pub preload_timeout: Duration,

    /// Number of Opus frames buffered between the frame producer and the packet sender.
    ///
    /// Defaults to 50 (one second of audio).
    pub frame_queue_length: usize,

    /// Number of consecutive silent frames sent when the frame queue runs dry, before
    /// the sender waits for real audio.
    ///
    /// Defaults to 5.
    pub max_silence_frames: usize,

    /// Number of outgoing control messages held for the websocket writer. When full,
    /// the oldest message is dropped.
    ///
    /// Defaults to 10.
    pub ws_queue_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crypto_modes: CryptoMode::ALL.to_vec(),
            gateway_timeout: Some(Duration::from_secs(10)),
            driver_timeout: Some(Duration::from_secs(10)),
            ip_discovery_timeout: Some(Duration::from_secs(5)),
            preload_timeout: Duration::from_secs(1),
            frame_queue_length: FRAME_QUEUE_LENGTH,
            max_silence_frames: MAX_SILENCE_FRAMES,
            ws_queue_length: WS_QUEUE_LENGTH,
        }
    }
}

impl Config {
    /// Sets this `Config`'s accepted encryption modes.
    #[must_use]
    pub fn crypto_modes(mut self, crypto_modes: Vec<CryptoMode>) -> Self {
        self.crypto_modes = crypto_modes;
        self
    }

    /// Sets this `Config`'s timeout for joining a voice channel.
    #[must_use]
    pub fn gateway_timeout(mut self, gateway_timeout: Option<Duration>) -> Self {
        self.gateway_timeout = gateway_timeout;
        self
    }

    /// Sets this `Config`'s timeout for establishing a voice connection.
    #[must_use]
    pub fn driver_timeout(mut self, driver_timeout: Option<Duration>) -> Self {
        self.driver_timeout = driver_timeout;
        self
    }

    /// Sets this `Config`'s timeout for UDP IP discovery.
    #[must_use]
    pub fn ip_discovery_timeout(mut self, ip_discovery_timeout: Option<Duration>) -> Self {
        self.ip_discovery_timeout = ip_discovery_timeout;
        self
    }

    /// Sets this `Config`'s bound on the preload wait.
    #[must_use]
    pub fn preload_timeout(mut self, preload_timeout: Duration) -> Self {
        self.preload_timeout = preload_timeout;
        self
    }

    /// Sets this `Config`'s frame queue length.
    #[must_use]
    pub fn frame_queue_length(mut self, frame_queue_length: usize) -> Self {
        self.frame_queue_length = frame_queue_length.max(1);
        self
    }

    /// Sets this `Config`'s limit on consecutive silent frames.
    #[must_use]
    pub fn max_silence_frames(mut self, max_silence_frames: usize) -> Self {
        self.max_silence_frames = max_silence_frames;
        self
    }

    /// Sets this `Config`'s websocket send queue length.
    #[must_use]
    pub fn ws_queue_length(mut self, ws_queue_length: usize) -> Self {
        self.ws_queue_length = ws_queue_length.max(1);
        self
    }
}
