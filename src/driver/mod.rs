//! Runner for a voice connection.
//!
//! Each driver owns one gateway session, run as a small group of Tokio tasks:
//!  * a session task, which holds the connection state machine,
//!  * a websocket reader and writer, and a heartbeat task per connection attempt,
//!  * a frame producer and paced packet sender once audio is flowing,
//!  * an event task, which runs user [`EventHandler`]s away from the audio path.
//!
//! Audio is pulled from a [`FrameSource`], usually a [`Player`].
//!
//! [`Player`]: crate::tracks::Player

pub(crate) mod connection;
pub(crate) mod crypto;
pub mod rtp;
pub(crate) mod tasks;
#[cfg(test)]
pub(crate) mod test_impls;

pub use crate::config::Config;
pub use connection::{ConnectionUpdate, GatewayState};
use connection::{
    error::{Error, Result},
    SharedStatus,
};
pub use crypto::{
    decrypt,
    encrypt,
    CryptoError,
    CryptoMode,
    NegotiationError,
    SessionKeys,
    KEY_SIZE,
    NONCE_SIZE,
    TAG_SIZE,
};
pub(crate) use crypto::CryptoState;

use crate::{
    events::EventData,
    id::{GuildId, UserId},
    ConnectionInfo,
    Event,
    EventHandler,
};
use async_trait::async_trait;
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use flume::{r#async::RecvFut, Sender};
use std::{fmt, sync::Arc, time::Duration};
use tasks::message::CoreMessage;
use tokio::sync::watch;
use tracing::instrument;

/// A producer of encoded Opus frames, pulled once per packet by a driver.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Writes the next Opus frame into `buf`, returning its length.
    ///
    /// This may wait for as long as it needs to. A return value of `0` marks the
    /// end of audio.
    async fn provide_frame(&self, buf: &mut [u8]) -> usize;
}

/// The control object for a Discord voice connection, handling connection,
/// encryption, packet pacing, and event generation.
///
/// Dropping a driver disconnects it.
pub struct Driver {
    config: Config,
    guild_id: GuildId,
    status: Arc<SharedStatus>,
    sender: Sender<CoreMessage>,
}

impl Driver {
    /// Creates a new voice driver for `user_id` in `guild_id`.
    ///
    /// This spawns the driver's tasks, and so must be called from within a Tokio
    /// runtime.
    #[inline]
    #[must_use]
    pub fn new(guild_id: GuildId, user_id: UserId, config: Config) -> Self {
        let status = Arc::new(SharedStatus::new());
        let sender = tasks::start(guild_id, user_id, config.clone(), status.clone());

        Driver {
            config,
            guild_id,
            status,
            sender,
        }
    }

    /// Attaches the source of audio for this driver.
    ///
    /// A driver cannot start without one. Replacing the source while streaming
    /// restarts the packet sender against the new source.
    #[instrument(skip(self, source))]
    pub fn set_frame_source<S: FrameSource + 'static>(&self, source: S) {
        self.set_shared_frame_source(Arc::new(source));
    }

    /// Attaches an already shared source of audio for this driver.
    pub fn set_shared_frame_source(&self, source: Arc<dyn FrameSource>) {
        self.send(CoreMessage::SetFrameSource(source));
    }

    /// Updates the session ID, token, or voice server endpoint.
    ///
    /// Missing or empty fields keep their existing values. If anything changes after
    /// the driver has started, the session cannot be resumed: the driver identifies
    /// again from scratch on a new websocket.
    #[instrument(skip(self))]
    pub fn set_connection_info(&self, update: ConnectionUpdate) {
        self.send(CoreMessage::SetConnectionInfo(update));
    }

    /// Starts the gateway session.
    ///
    /// The returned future resolves once audio can be sent, or the attempt fails.
    /// It need not be awaited: the session runs either way. Starting a driver which
    /// is already started only waits for the running attempt.
    #[instrument(skip(self))]
    pub fn start(&self) -> Connect {
        let (tx, rx) = flume::bounded(1);
        self.send(CoreMessage::Start(tx));

        Connect {
            inner: rx.into_recv_async(),
        }
    }

    /// Sets full connection info, then starts the gateway session.
    #[instrument(skip(self))]
    pub fn connect(&self, info: ConnectionInfo) -> Connect {
        let (tx, rx) = flume::bounded(1);
        self.raw_connect(info, tx);

        Connect {
            inner: rx.into_recv_async(),
        }
    }

    /// Connects with the given info, reporting the outcome over `tx`.
    ///
    /// If the driver is already running with this info, `tx` only learns the
    /// result of the running attempt.
    pub(crate) fn raw_connect(&self, info: ConnectionInfo, tx: Sender<Result<()>>) {
        self.set_connection_info(ConnectionUpdate::new(
            Some(info.session_id),
            Some(info.token),
            Some(info.endpoint),
        ));
        self.send(CoreMessage::Start(tx));
    }

    /// Leaves the voice channel, stopping all tasks of the session.
    ///
    /// Stopping a driver which is not running does nothing.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        self.send(CoreMessage::Stop);
    }

    /// Returns the current state of the gateway session.
    #[must_use]
    pub fn state(&self) -> GatewayState {
        *self.status.state.borrow()
    }

    /// Subscribes to changes of the gateway session's state.
    #[must_use]
    pub fn state_watcher(&self) -> watch::Receiver<GatewayState> {
        self.status.state.subscribe()
    }

    /// Round-trip time of the last acknowledged heartbeat.
    #[must_use]
    pub fn ping(&self) -> Option<Duration> {
        *self.status.ping.lock()
    }

    /// SSRC assigned by the voice server, once Ready has been received.
    #[must_use]
    pub fn ssrc(&self) -> Option<u32> {
        *self.status.ssrc.lock()
    }

    /// Guild this driver belongs to.
    #[must_use]
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Returns this driver's current configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sets the configuration for this driver.
    ///
    /// Changes take effect from the next connection attempt.
    #[instrument(skip(self))]
    pub fn set_config(&mut self, config: Config) {
        self.config = config.clone();
        self.send(CoreMessage::SetConfig(config));
    }

    /// Attach a global event handler to this driver.
    ///
    /// Handlers for [`Event::Track`] are never fired here: attach them to a
    /// [`Player`] instead.
    ///
    /// [`Player`]: crate::tracks::Player
    #[instrument(skip(self, action))]
    pub fn add_global_event<F: EventHandler + 'static>(&self, event: Event, action: F) {
        self.send(CoreMessage::AddEvent(EventData::new(event, action)));
    }

    /// Removes all global event handlers from this driver.
    #[instrument(skip(self))]
    pub fn remove_all_global_events(&self) {
        self.send(CoreMessage::RemoveGlobalEvents);
    }

    fn send(&self, msg: CoreMessage) {
        // The session task lives as long as this handle.
        drop(self.sender.send(msg));
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("guild_id", &self.guild_id)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        drop(self.sender.send(CoreMessage::Poison));
    }
}

/// Future for a call to [`Driver::start`].
///
/// This future awaits the *result* of a connection; the driver
/// is messaged at the time of the call.
///
/// [`Driver::start`]: Driver::start
pub struct Connect {
    inner: RecvFut<'static, Result<()>>,
}

impl Future for Connect {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(r) => Poll::Ready(r.map_err(|_| Error::AttemptDiscarded).and_then(|x| x)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        connection::error::ConfigurationError,
        crypto::decrypt_packet,
        rtp::read_rtp_header,
        test_impls::*,
        *,
    };
    use crate::{
        events::{
            context_data::{DisconnectKind, DisconnectReason},
            CoreEvent,
            EventContext,
        },
        model::{payload::Hello, CloseCode as VoiceCloseCode, Event as GatewayEvent, OpCode},
        tracks::{MemorySource, Player, Track},
    };
    use flume::Receiver;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::time::{sleep, timeout};

    #[derive(Clone, Debug, PartialEq)]
    enum Seen {
        Connect(u32),
        Reconnect(u32),
        Disconnect(DisconnectKind, Option<DisconnectReason>),
    }

    struct Watch(flume::Sender<Seen>);

    #[async_trait]
    impl EventHandler for Watch {
        async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
            let seen = match ctx {
                EventContext::DriverConnect(c) => Seen::Connect(c.ssrc),
                EventContext::DriverReconnect(c) => Seen::Reconnect(c.ssrc),
                EventContext::DriverDisconnect(d) => Seen::Disconnect(d.kind, d.reason),
                _ => return None,
            };
            drop(self.0.send(seen));
            None
        }
    }

    fn driver(server: &MockServer, config: Config) -> (Driver, Receiver<Seen>) {
        let driver = Driver::new(GuildId::from(1), UserId::from(2), config);
        driver.set_connection_info(ConnectionUpdate::new(
            Some("session".into()),
            Some("token".into()),
            Some(server.endpoint.clone()),
        ));

        let (tx, rx) = flume::unbounded();
        for evt in [
            CoreEvent::DriverConnect,
            CoreEvent::DriverReconnect,
            CoreEvent::DriverDisconnect,
        ] {
            driver.add_global_event(evt.into(), Watch(tx.clone()));
        }

        (driver, rx)
    }

    fn playing(frames: u8) -> Player {
        let player = Player::new();
        player
            .enqueue(Track::new(MemorySource::new((0..frames).map(|i| vec![i; 40]))))
            .unwrap();
        player.start();
        player
    }

    async fn next_seen(seen: &Receiver<Seen>) -> Seen {
        timeout(Duration::from_secs(5), seen.recv_async())
            .await
            .expect("no driver event fired")
            .unwrap()
    }

    async fn wait_for_state(driver: &Driver, state: GatewayState) {
        let mut watcher = driver.state_watcher();
        timeout(Duration::from_secs(5), watcher.wait_for(|s| *s == state))
            .await
            .expect("state never reached")
            .unwrap();
    }

    /// Connects `driver` through one full handshake with `server`.
    async fn connect(server: &MockServer, driver: &Driver, seen: &Receiver<Seen>) -> MockConn {
        let connect = driver.start();
        let conn = server.accept().await;
        server.handshake(&conn, CryptoMode::Normal).await;

        connect.await.unwrap();
        assert_eq!(next_seen(seen).await, Seen::Connect(MOCK_SSRC));
        conn
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn connects_and_streams_encrypted_audio() {
        let server = MockServer::new().await;
        let (driver, seen) = driver(&server, Config::default());
        driver.set_frame_source(playing(100));

        let connect = driver.start();
        let conn = server.accept().await;
        let select = server.handshake(&conn, CryptoMode::Lite).await;

        connect.await.unwrap();
        assert_eq!(next_seen(&seen).await, Seen::Connect(MOCK_SSRC));
        assert_eq!(driver.state(), GatewayState::Ready);
        assert_eq!(driver.ssrc(), Some(MOCK_SSRC));

        let GatewayEvent::SelectProtocol(select) = select else {
            panic!("expected SelectProtocol, saw {select:?}");
        };
        assert_eq!(select.protocol, "udp");
        assert_eq!(select.data.mode, "xsalsa20_poly1305_lite");
        assert_eq!(select.data.address, IpAddr::V4(Ipv4Addr::LOCALHOST));

        let GatewayEvent::Speaking(speaking) = conn.expect(OpCode::Speaking).await else {
            unreachable!();
        };
        assert_eq!(speaking.ssrc, MOCK_SSRC);

        let keys = SessionKeys::new(CryptoMode::Lite, &MOCK_KEY).unwrap();
        let mut packet = server.next_packet().await;
        let (_, _, ssrc) = read_rtp_header(&packet).unwrap();
        assert_eq!(ssrc, MOCK_SSRC);
        let range = decrypt_packet(keys.mode, &keys.cipher, &mut packet).unwrap();
        assert_eq!(&packet[range], &[0u8; 40][..]);

        while driver.ping().is_none() {
            sleep(Duration::from_millis(10)).await;
        }
    }

    async fn resume_after(kill: impl FnOnce(&MockConn)) {
        let server = MockServer::new().await;
        let (driver, seen) = driver(&server, Config::default());
        driver.set_frame_source(playing(200));

        let conn = connect(&server, &driver, &seen).await;
        kill(&conn);

        let conn = server.accept().await;
        conn.send(Hello {
            heartbeat_interval: 50.0,
        });
        let GatewayEvent::Resume(resume) = conn.expect(OpCode::Resume).await else {
            unreachable!();
        };
        assert_eq!(resume.session_id, "session");
        assert_eq!(resume.server_id, GuildId::from(1));
        wait_for_state(&driver, GatewayState::Resuming).await;

        conn.send(GatewayEvent::Resumed);
        assert_eq!(next_seen(&seen).await, Seen::Reconnect(MOCK_SSRC));
        assert_eq!(driver.state(), GatewayState::Ready);

        // Audio carries on over the original media socket.
        conn.expect(OpCode::Speaking).await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn resumes_after_dropped_socket() {
        resume_after(MockConn::drop_socket).await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn resumes_after_server_crash() {
        resume_after(|conn| conn.close(4015)).await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn resumed_stream_has_no_gaps() {
        let server = MockServer::new().await;
        let (driver, seen) = driver(&server, Config::default());
        driver.set_frame_source(playing(200));

        let keys = SessionKeys::new(CryptoMode::Normal, &MOCK_KEY).unwrap();
        let read = |mut packet: Vec<u8>| {
            let (seq, ts, _) = read_rtp_header(&packet).unwrap();
            let range = decrypt_packet(keys.mode, &keys.cipher, &mut packet).unwrap();
            (seq, ts, packet[range][0])
        };

        let conn = connect(&server, &driver, &seen).await;
        let mut packets = vec![];
        for _ in 0..5 {
            packets.push(read(server.next_packet().await));
        }

        conn.drop_socket();
        let conn = server.accept().await;
        conn.send(Hello {
            heartbeat_interval: 50.0,
        });
        conn.expect(OpCode::Resume).await;
        conn.send(GatewayEvent::Resumed);
        assert_eq!(next_seen(&seen).await, Seen::Reconnect(MOCK_SSRC));

        while packets.len() < 20 {
            packets.push(read(server.next_packet().await));
        }

        for (i, pair) in packets.windows(2).enumerate() {
            assert_eq!(pair[1].0, pair[0].0.wrapping_add(1), "sequence gap after packet {i}");
            assert_eq!(pair[1].1, pair[0].1.wrapping_add(960), "timestamp gap after packet {i}");
        }
        let frames: Vec<u8> = packets.iter().map(|p| p.2).collect();
        assert_eq!(frames, (0..20).collect::<Vec<u8>>());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn forced_disconnect_is_final() {
        let server = MockServer::new().await;
        let (driver, seen) = driver(&server, Config::default());
        driver.set_frame_source(playing(200));

        let conn = connect(&server, &driver, &seen).await;
        conn.close(4014);

        assert_eq!(
            next_seen(&seen).await,
            Seen::Disconnect(
                DisconnectKind::Runtime,
                Some(DisconnectReason::WsClosed(Some(VoiceCloseCode::Disconnected)))
            )
        );
        wait_for_state(&driver, GatewayState::Disconnected).await;
        assert_eq!(driver.ssrc(), None);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn failed_resume_is_final() {
        let server = MockServer::new().await;
        let (driver, seen) = driver(&server, Config::default());
        driver.set_frame_source(playing(200));

        let conn = connect(&server, &driver, &seen).await;
        conn.drop_socket();

        let conn = server.accept().await;
        conn.close(4006);

        assert_eq!(
            next_seen(&seen).await,
            Seen::Disconnect(
                DisconnectKind::Reconnect,
                Some(DisconnectReason::WsClosed(Some(VoiceCloseCode::SessionInvalid)))
            )
        );
        wait_for_state(&driver, GatewayState::Disconnected).await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn start_checks_configuration() {
        let server = MockServer::new().await;
        let (driver, _seen) = driver(&server, Config::default());
        assert!(matches!(
            driver.start().await,
            Err(Error::Configuration(ConfigurationError::NoFrameSource))
        ));

        let bare = Driver::new(GuildId::from(1), UserId::from(2), Config::default());
        bare.set_frame_source(playing(1));
        assert!(matches!(
            bare.start().await,
            Err(Error::Configuration(ConfigurationError::MissingConnectionInfo))
        ));
        assert_eq!(bare.state(), GatewayState::Disconnected);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn unsupported_modes_fail_the_connection() {
        let server = MockServer::new().await;
        let (driver, seen) = driver(&server, Config::default());
        driver.set_frame_source(playing(1));

        let connect = driver.start();
        let conn = server.accept().await;
        conn.send(Hello {
            heartbeat_interval: 50.0,
        });
        conn.expect(OpCode::Identify).await;
        conn.send(server.ready(&["aead_aes256_gcm_rtpsize"]));

        assert!(matches!(connect.await, Err(Error::Negotiation(_))));
        assert_eq!(
            next_seen(&seen).await,
            Seen::Disconnect(
                DisconnectKind::Connect,
                Some(DisconnectReason::ProtocolViolation)
            )
        );
        wait_for_state(&driver, GatewayState::Disconnected).await;
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn silent_server_times_out() {
        let server = MockServer::new().await;
        let config = Config::default().driver_timeout(Some(Duration::from_millis(200)));
        let (driver, seen) = driver(&server, config);
        driver.set_frame_source(playing(1));

        let connect = driver.start();
        let _conn = server.accept().await;

        assert!(matches!(connect.await, Err(Error::TimedOut)));
        assert_eq!(
            next_seen(&seen).await,
            Seen::Disconnect(DisconnectKind::Connect, Some(DisconnectReason::TimedOut))
        );
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn stop_is_idempotent() {
        let server = MockServer::new().await;
        let (driver, seen) = driver(&server, Config::default());
        driver.set_frame_source(playing(200));

        let conn = connect(&server, &driver, &seen).await;
        driver.stop();
        driver.stop();

        assert_eq!(
            next_seen(&seen).await,
            Seen::Disconnect(DisconnectKind::Runtime, None)
        );
        conn.closed().await;
        wait_for_state(&driver, GatewayState::Disconnected).await;

        sleep(Duration::from_millis(100)).await;
        assert!(seen.is_empty());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn new_connection_info_identifies_afresh() {
        let server = MockServer::new().await;
        let (driver, seen) = driver(&server, Config::default());
        driver.set_frame_source(playing(200));

        let old = connect(&server, &driver, &seen).await;
        driver.set_connection_info(ConnectionUpdate::new(
            Some("other-session".into()),
            None,
            None,
        ));
        old.closed().await;

        let conn = server.accept().await;
        conn.send(Hello {
            heartbeat_interval: 50.0,
        });
        let GatewayEvent::Identify(identify) = conn.expect(OpCode::Identify).await else {
            unreachable!();
        };
        assert_eq!(identify.session_id, "other-session");
        assert_eq!(identify.token, "token");
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn unchanged_connection_info_is_ignored() {
        let server = MockServer::new().await;
        let (driver, seen) = driver(&server, Config::default());
        driver.set_frame_source(playing(200));

        let _conn = connect(&server, &driver, &seen).await;
        driver.set_connection_info(ConnectionUpdate::new(
            Some("session".into()),
            Some(String::new()),
            None,
        ));

        sleep(Duration::from_millis(100)).await;
        assert_eq!(driver.state(), GatewayState::Ready);
        assert!(seen.is_empty());
    }
}
