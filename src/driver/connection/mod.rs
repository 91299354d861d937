//! The voice gateway session: one state machine per driver, fed by every task it spawns.

mod discovery;
pub mod error;

use super::{
    tasks::{
        heartbeat,
        message::*,
        poller::{MediaStream, Poller},
        ws::{self as ws_task, Outbox},
    },
    Config,
    CryptoMode,
    FrameSource,
    SessionKeys,
};
use crate::{
    constants::VOICE_GATEWAY_VERSION,
    events::{
        context_data::DisconnectKind,
        internal_data::{InternalConnect, InternalDisconnect},
        InternalContext,
    },
    id::{GuildId, UserId},
    model::{
        payload::{
            ClientConnect,
            Codec,
            HeartbeatAck,
            Hello,
            Identify,
            Ready,
            Resume,
            SelectProtocol,
            SessionDescription,
        },
        CloseCode as VoiceCloseCode,
        Event as GatewayEvent,
        ProtocolData,
    },
};
use error::{Error, Result};
use flume::Sender;
use parking_lot::Mutex;
use std::{fmt, net::IpAddr, sync::Arc, time::Duration};
use tokio::{
    net::UdpSocket,
    select,
    spawn,
    sync::watch,
    time::{timeout, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, trace, warn};
use tracing_futures::Instrument;
use url::Url;
use uuid::Uuid;

/// Lifecycle state of a driver's gateway session.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum GatewayState {
    /// Not started, stopped, or failed for good.
    Disconnected,
    /// Opening the first websocket of a session.
    Connecting,
    /// Websocket open, waiting for the server's Hello.
    AwaitingHello,
    /// Identify sent, waiting for Ready.
    Identifying,
    /// Resume sent, waiting for Resumed.
    Resuming,
    /// Performing UDP IP discovery.
    DiscoveringUdp,
    /// Protocol selected, waiting for the session key.
    AwaitingSessionDescription,
    /// Streaming audio.
    Ready,
    /// Opening a new websocket to resume a dropped session.
    Reconnecting,
}

/// A partial update to the details needed to reach a voice server.
///
/// Only fields which are present and non-empty replace the driver's current values.
#[derive(Clone, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct ConnectionUpdate {
    /// Session ID from this user's voice state.
    pub session_id: Option<String>,
    /// Voice server token.
    pub token: Option<String>,
    /// Voice server endpoint, as `host[:port]`.
    pub endpoint: Option<String>,
}

impl ConnectionUpdate {
    /// Creates an update replacing every non-empty field given.
    #[must_use]
    pub fn new(
        session_id: Option<String>,
        token: Option<String>,
        endpoint: Option<String>,
    ) -> Self {
        Self {
            session_id,
            token,
            endpoint,
        }
    }
}

impl fmt::Debug for ConnectionUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionUpdate")
            .field("session_id", &self.session_id)
            .field("token", &self.token.as_ref().map(|_| "<secret>"))
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Status readable from driver handles without a round trip to the session task.
#[derive(Debug)]
pub(crate) struct SharedStatus {
    pub(crate) state: watch::Sender<GatewayState>,
    pub(crate) ping: Mutex<Option<Duration>>,
    pub(crate) ssrc: Mutex<Option<u32>>,
}

impl SharedStatus {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(GatewayState::Disconnected);
        Self {
            state,
            ping: Mutex::new(None),
            ssrc: Mutex::new(None),
        }
    }
}

/// Tasks and channels belonging to one websocket.
struct Attempt {
    idx: usize,
    token: CancellationToken,
    outbox: Option<Outbox>,
    heartbeat_gate: Sender<(Duration, Outbox)>,
    poller: Option<CancellationToken>,
}

/// Normalises a voice server endpoint into a websocket URL.
///
/// Endpoints which already name a scheme are used as given.
pub(crate) fn generate_url(endpoint: &str) -> Result<Url> {
    let endpoint = endpoint.strip_suffix(":80").unwrap_or(endpoint);
    let url = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("wss://{endpoint}/?v={VOICE_GATEWAY_VERSION}")
    };

    Url::parse(&url).map_err(|_| Error::EndpointUrl)
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.is_empty())
}

pub(crate) struct Session {
    guild_id: GuildId,
    user_id: UserId,
    config: Config,
    interconnect: Interconnect,
    status: Arc<SharedStatus>,

    session_id: Option<String>,
    token: Option<String>,
    endpoint: Option<String>,
    source: Option<Arc<dyn FrameSource>>,

    started: bool,
    should_resume: bool,
    reconnecting: bool,
    connected_once: bool,

    scope: CancellationToken,
    attempt: Option<Attempt>,
    attempt_count: usize,
    deadline: Option<Instant>,
    waiters: Vec<Sender<Result<()>>>,

    ssrc: Option<u32>,
    mode: Option<CryptoMode>,
    udp: Option<Arc<UdpSocket>>,
    keys: Option<Arc<SessionKeys>>,
    media: Option<MediaStream>,
    last_heartbeat: Option<(u64, Instant)>,
}

impl Session {
    pub(crate) fn new(
        guild_id: GuildId,
        user_id: UserId,
        config: Config,
        interconnect: Interconnect,
        status: Arc<SharedStatus>,
    ) -> Self {
        Self {
            guild_id,
            user_id,
            config,
            interconnect,
            status,

            session_id: None,
            token: None,
            endpoint: None,
            source: None,

            started: false,
            should_resume: false,
            reconnecting: false,
            connected_once: false,

            scope: CancellationToken::new(),
            attempt: None,
            attempt_count: 0,
            deadline: None,
            waiters: vec![],

            ssrc: None,
            mode: None,
            udp: None,
            keys: None,
            media: None,
            last_heartbeat: None,
        }
    }

    /// Instant at which the current attempt is abandoned.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn state(&self) -> GatewayState {
        *self.status.state.borrow()
    }

    fn set_state(&self, state: GatewayState) {
        let old = self.status.state.send_replace(state);
        if old != state {
            debug!("Gateway state {:?} -> {:?}.", old, state);
        }
    }

    /// Applies one message from a driver handle or from one of this session's tasks.
    pub(crate) fn handle(&mut self, msg: CoreMessage) {
        match msg {
            CoreMessage::Start(tx) => self.start(tx),
            CoreMessage::Stop => self.stop(),
            CoreMessage::SetConnectionInfo(update) => self.update_info(update),
            CoreMessage::SetFrameSource(source) => {
                self.source = Some(source.clone());
                let token = self.scope.child_token();
                if let Some(media) = self.media.as_mut() {
                    info!("Frame source replaced while streaming.");
                    info_span!("producer", guild = %self.guild_id)
                        .in_scope(|| media.set_source(source, token));
                }
            },
            CoreMessage::SetConfig(config) => {
                self.config = config;
            },
            CoreMessage::AddEvent(evt) => {
                drop(
                    self.interconnect
                        .events
                        .send(EventMessage::AddGlobalEvent(evt)),
                );
            },
            CoreMessage::RemoveGlobalEvents => {
                drop(self.interconnect.events.send(EventMessage::RemoveGlobalEvents));
            },
            CoreMessage::Ws(idx, evt) if self.is_current(idx) => self.on_transport(evt),
            CoreMessage::Discovered(idx, res) if self.is_current(idx) => match res {
                Ok(d) => self.on_discovered(d),
                Err(e) => self.fail(e),
            },
            CoreMessage::HeartbeatSent(idx, nonce, at) if self.is_current(idx) => {
                self.last_heartbeat = Some((nonce, at));
            },
            CoreMessage::PollerFailed(idx, e) if self.is_current(idx) => {
                error!("Packet sender failed: {e}.");
                self.fail(e);
            },
            CoreMessage::Ws(idx, _)
            | CoreMessage::Discovered(idx, _)
            | CoreMessage::HeartbeatSent(idx, ..)
            | CoreMessage::PollerFailed(idx, _) => {
                debug!("Discarding report from stale attempt {idx}.");
            },
            CoreMessage::Poison => {},
        }
    }

    fn is_current(&self, idx: usize) -> bool {
        self.attempt
            .as_ref()
            .is_some_and(|a| a.idx == idx && !a.token.is_cancelled())
    }

    fn start(&mut self, tx: Sender<Result<()>>) {
        if self.source.is_none() {
            drop(tx.send(Err(error::ConfigurationError::NoFrameSource.into())));
            return;
        }

        if self.session_id.is_none() || self.token.is_none() || self.endpoint.is_none() {
            drop(tx.send(Err(error::ConfigurationError::MissingConnectionInfo.into())));
            return;
        }

        if self.started {
            if self.state() == GatewayState::Ready {
                drop(tx.send(Ok(())));
            } else {
                self.waiters.push(tx);
            }
            return;
        }

        info!("Starting voice session.");
        self.started = true;
        self.connected_once = false;
        self.waiters.push(tx);
        self.begin_attempt(GatewayState::Connecting);
    }

    /// Tears down the session at the user's request.
    #[instrument(skip(self))]
    pub(crate) fn stop(&mut self) {
        if !self.started {
            return;
        }

        info!("Stopping voice session.");
        self.fire_disconnect(DisconnectKind::Runtime, None);
        self.resolve_waiters(Err(Error::AttemptDiscarded));
        self.teardown();
    }

    fn update_info(&mut self, update: ConnectionUpdate) {
        let mut changed = false;
        for (slot, value) in [
            (&mut self.session_id, update.session_id),
            (&mut self.token, update.token),
            (&mut self.endpoint, update.endpoint),
        ] {
            if let Some(value) = non_empty(value) {
                changed |= slot.as_deref() != Some(value.as_str());
                *slot = Some(value);
            }
        }

        if self.started && changed {
            // A new voice server cannot resume the old session.
            info!("Connection info changed, identifying afresh.");
            self.should_resume = false;
            self.reconnecting = self.connected_once;
            self.keys = None;
            self.media = None;
            self.udp = None;
            self.begin_attempt(GatewayState::Connecting);
        }
    }

    /// Replaces any running attempt with a new websocket and heartbeat task.
    fn begin_attempt(&mut self, state: GatewayState) {
        if let Some(old) = self.attempt.take() {
            old.token.cancel();
        }

        let Some(endpoint) = self.endpoint.as_deref() else {
            self.fail(error::ConfigurationError::MissingConnectionInfo.into());
            return;
        };

        let url = match generate_url(endpoint) {
            Ok(url) => url,
            Err(e) => {
                self.fail(e);
                return;
            },
        };

        self.attempt_count += 1;
        let idx = self.attempt_count;
        let token = self.scope.child_token();
        let (gate_tx, gate_rx) = flume::bounded(1);

        let span = info_span!("attempt", guild = %self.guild_id, idx);
        spawn(
            ws_task::runner(
                url,
                idx,
                self.config.ws_queue_length,
                self.interconnect.core.clone(),
                token.clone(),
            )
            .instrument(span.clone()),
        );
        spawn(
            heartbeat::runner(idx, gate_rx, self.interconnect.core.clone(), token.clone())
                .instrument(span),
        );

        self.attempt = Some(Attempt {
            idx,
            token,
            outbox: None,
            heartbeat_gate: gate_tx,
            poller: None,
        });
        self.last_heartbeat = None;
        self.deadline = self.config.driver_timeout.map(|t| Instant::now() + t);
        self.set_state(state);
    }

    /// Called once the current attempt has exceeded its deadline.
    pub(crate) fn timed_out(&mut self) {
        self.deadline = None;
        warn!("Connection attempt timed out in {:?}.", self.state());
        self.fail(Error::TimedOut);
    }

    fn on_transport(&mut self, evt: TransportEvent) {
        match evt {
            TransportEvent::Connected(outbox) => {
                if let Some(attempt) = self.attempt.as_mut() {
                    attempt.outbox = Some(outbox);
                }
                if self.state() != GatewayState::Reconnecting {
                    self.set_state(GatewayState::AwaitingHello);
                }
            },
            TransportEvent::Message(msg) => self.on_message(msg),
            TransportEvent::Closed(info) => self.on_closed(&info),
        }
    }

    fn send(&self, msg: impl Into<GatewayEvent>) {
        let msg = msg.into();
        trace!("Queueing {:?}.", msg);
        match self.attempt.as_ref().and_then(|a| a.outbox.as_ref()) {
            Some(outbox) =>
                if !outbox.send(msg) {
                    debug!("Websocket writer has gone away.");
                },
            None => debug!("No websocket for {:?}.", msg.kind()),
        }
    }

    fn on_message(&mut self, msg: GatewayEvent) {
        match msg {
            GatewayEvent::Hello(h) => self.on_hello(h),
            GatewayEvent::Ready(r) => self.on_ready(r),
            GatewayEvent::SessionDescription(desc) => self.on_session_description(desc),
            GatewayEvent::Resumed => self.on_resumed(),
            GatewayEvent::HeartbeatAck(ack) => self.on_heartbeat_ack(ack),
            GatewayEvent::Speaking(s) => {
                self.interconnect
                    .fire(InternalContext::SpeakingStateUpdate(s));
            },
            GatewayEvent::ClientDisconnect(c) => {
                self.interconnect.fire(InternalContext::ClientDisconnect(c));
            },
            other => {
                trace!("Ignoring {:?}.", other.kind());
            },
        }
    }

    fn on_hello(&mut self, hello: Hello) {
        let Some(attempt) = self.attempt.as_ref() else {
            return;
        };
        let Some(outbox) = attempt.outbox.clone() else {
            return;
        };

        match Duration::try_from_secs_f64(hello.heartbeat_interval / 1000.0) {
            Ok(interval) if !interval.is_zero() => {
                info!("Hello: heartbeat interval {:?}.", interval);
                drop(attempt.heartbeat_gate.try_send((interval, outbox)));
            },
            _ => warn!(
                "Unusable heartbeat interval {}, not heartbeating.",
                hello.heartbeat_interval
            ),
        }

        let (Some(session_id), Some(token)) = (self.session_id.clone(), self.token.clone())
        else {
            return;
        };

        if self.should_resume {
            info!("Resuming session.");
            self.send(Resume {
                server_id: self.guild_id,
                session_id,
                token,
            });
            self.set_state(GatewayState::Resuming);
        } else {
            info!("Identifying.");
            self.send(Identify {
                server_id: self.guild_id,
                user_id: self.user_id,
                session_id,
                token,
            });
            self.set_state(GatewayState::Identifying);
        }
    }

    fn on_ready(&mut self, ready: Ready) {
        let mode = match CryptoMode::negotiate(&ready.modes, &self.config.crypto_modes) {
            Ok(mode) => mode,
            Err(e) => {
                error!("{e}.");
                self.fail(e.into());
                return;
            },
        };

        info!(
            "Ready: ssrc {}, media at {}:{}, using {:?}.",
            ready.ssrc, ready.ip, ready.port, mode
        );

        self.ssrc = Some(ready.ssrc);
        *self.status.ssrc.lock() = Some(ready.ssrc);
        self.mode = Some(mode);
        self.set_state(GatewayState::DiscoveringUdp);

        let Some(attempt) = self.attempt.as_ref() else {
            return;
        };

        let idx = attempt.idx;
        let token = attempt.token.clone();
        let core = self.interconnect.core.clone();
        let bound = self.config.ip_discovery_timeout;

        spawn(
            async move {
                let res = select! {
                    res = discover_udp(ready.ip, ready.port, ready.ssrc, bound) => res,
                    () = token.cancelled() => return,
                };
                drop(core.send(CoreMessage::Discovered(idx, res)));
            }
            .instrument(info_span!("discovery", guild = %self.guild_id, idx)),
        );
    }

    fn on_discovered(&mut self, discovery: Discovery) {
        let (Some(ssrc), Some(mode)) = (self.ssrc, self.mode) else {
            return;
        };

        info!(
            "Discovered external address {}:{}.",
            discovery.address, discovery.port
        );

        self.udp = Some(Arc::new(discovery.udp));
        self.should_resume = true;

        let rtc_connection_id = Uuid::new_v4().to_string();
        info!("New connection id {rtc_connection_id}.");

        self.send(SelectProtocol {
            protocol: "udp".into(),
            data: ProtocolData {
                address: discovery.address,
                port: discovery.port,
                mode: mode.to_request_str().into(),
            },
            rtc_connection_id: Some(rtc_connection_id),
            codecs: vec![Codec::opus()],
        });
        self.send(ClientConnect {
            user_id: None,
            audio_ssrc: ssrc,
            video_ssrc: 0,
            rtx_ssrc: 0,
        });

        info!("Waiting for session description.");
        self.set_state(GatewayState::AwaitingSessionDescription);
    }

    fn on_session_description(&mut self, desc: SessionDescription) {
        let Some(mode) = self.mode else {
            debug!("Session description arrived before Ready.");
            return;
        };

        if CryptoMode::from_request_str(&desc.mode) != Some(mode) {
            self.fail(Error::CryptoModeInvalid);
            return;
        }

        // New keys start a new RTP stream.
        self.media = None;
        match SessionKeys::new(mode, &desc.secret_key) {
            Ok(keys) => self.keys = Some(Arc::new(keys)),
            Err(e) => {
                self.fail(e.into());
                return;
            },
        }

        self.start_poller();
        self.mark_ready();
    }

    fn on_resumed(&mut self) {
        if self.keys.is_none() || self.udp.is_none() {
            debug!("Resumed without an established media session.");
            return;
        }

        info!("Session resumed.");
        self.should_resume = true;
        self.start_poller();
        self.mark_ready();
    }

    fn on_heartbeat_ack(&mut self, ack: HeartbeatAck) {
        match self.last_heartbeat.take() {
            Some((nonce, at)) if nonce == ack.nonce => {
                let ping = at.elapsed();
                trace!("Heartbeat ACK after {:?}.", ping);
                *self.status.ping.lock() = Some(ping);
            },
            Some((nonce, _)) => warn!(
                "Heartbeat nonce mismatch! Expected {}, saw {}.",
                nonce, ack.nonce
            ),
            None => trace!("Unsolicited heartbeat ACK."),
        }
    }

    fn on_closed(&mut self, info: &CloseInfo) {
        let known = info.code.and_then(VoiceCloseCode::from_u16);
        let code_allows = known.map_or(true, VoiceCloseCode::should_resume);

        info!(
            "Websocket closed ({:?}, {:?}): {}.",
            info.code, known, info.reason
        );

        if self.should_resume && !self.reconnecting && !self.scope.is_cancelled() && code_allows {
            self.reconnecting = true;
            self.begin_attempt(GatewayState::Reconnecting);
        } else {
            self.fail(Error::WsClosed(info.code));
        }
    }

    /// Starts a sender for the current websocket, creating the media stream on first use.
    ///
    /// A resumed session hands the existing stream to the new sender, so queued audio
    /// and the RTP counters carry over.
    fn start_poller(&mut self) {
        let (Some(keys), Some(udp), Some(ssrc), Some(source)) = (
            self.keys.clone(),
            self.udp.clone(),
            self.ssrc,
            self.source.clone(),
        ) else {
            return;
        };
        let Some(attempt) = self.attempt.as_mut() else {
            return;
        };
        let Some(outbox) = attempt.outbox.clone() else {
            return;
        };

        if let Some(old) = attempt.poller.take() {
            old.cancel();
        }

        if self.media.is_none() {
            let mut media = MediaStream::new(keys.mode, self.config.frame_queue_length);
            let token = self.scope.child_token();
            info_span!("producer", guild = %self.guild_id)
                .in_scope(|| media.set_source(source, token));
            self.media = Some(media);
        }
        let Some(stream) = self.media.as_ref().map(MediaStream::handle) else {
            return;
        };

        let token = attempt.token.child_token();
        let poller = Poller {
            idx: attempt.idx,
            ssrc,
            keys,
            udp,
            outbox,
            stream,
            core: self.interconnect.core.clone(),
            max_silence_frames: self.config.max_silence_frames,
            preload_timeout: self.config.preload_timeout,
        };

        info_span!("poller", guild = %self.guild_id, idx = attempt.idx)
            .in_scope(|| poller.spawn(token.clone()));
        attempt.poller = Some(token);
    }

    fn mark_ready(&mut self) {
        let reconnect = self.reconnecting;
        self.reconnecting = false;
        self.connected_once = true;
        self.deadline = None;
        self.set_state(GatewayState::Ready);

        let data = InternalConnect {
            server: self.endpoint.clone().unwrap_or_default(),
            ssrc: self.ssrc.unwrap_or_default(),
            guild_id: self.guild_id,
            session_id: self.session_id.clone().unwrap_or_default(),
        };

        if reconnect {
            info!("Reconnected.");
            self.interconnect.fire(InternalContext::DriverReconnect(data));
        } else {
            info!("Connected.");
            self.interconnect.fire(InternalContext::DriverConnect(data));
        }

        self.resolve_waiters(Ok(()));
    }

    /// Ends the session after an unrecoverable error.
    fn fail(&mut self, e: Error) {
        error!("Voice session failed: {e}.");

        let kind = if self.reconnecting {
            DisconnectKind::Reconnect
        } else if self.connected_once {
            DisconnectKind::Runtime
        } else {
            DisconnectKind::Connect
        };

        self.fire_disconnect(kind, Some(&e));
        self.resolve_waiters(Err(e));
        self.teardown();
    }

    fn fire_disconnect(&self, kind: DisconnectKind, e: Option<&Error>) {
        self.interconnect
            .fire(InternalContext::DriverDisconnect(InternalDisconnect {
                kind,
                reason: e.map(Into::into),
                guild_id: self.guild_id,
                session_id: self.session_id.clone().unwrap_or_default(),
            }));
    }

    fn resolve_waiters(&mut self, res: Result<()>) {
        for tx in self.waiters.drain(..) {
            // Other side may not be listening: this is fine.
            drop(tx.send(res.clone()));
        }
    }

    /// Cancels every task of this session and forgets all negotiated state.
    ///
    /// Connection info and the frame source are kept, so the session may be started again.
    fn teardown(&mut self) {
        self.scope.cancel();
        self.scope = CancellationToken::new();
        self.attempt = None;
        self.deadline = None;

        self.started = false;
        self.should_resume = false;
        self.reconnecting = false;

        self.ssrc = None;
        self.mode = None;
        self.udp = None;
        self.keys = None;
        self.media = None;
        self.last_heartbeat = None;
        *self.status.ssrc.lock() = None;
        *self.status.ping.lock() = None;

        self.set_state(GatewayState::Disconnected);
    }

    /// Final cleanup once the driver itself is dropped.
    pub(crate) fn shutdown(&mut self) {
        self.stop();
        self.resolve_waiters(Err(Error::AttemptDiscarded));
        self.interconnect.poison();
    }
}

/// Binds a fresh UDP socket towards the media server and learns our external address.
async fn discover_udp(
    ip: IpAddr,
    port: u16,
    ssrc: u32,
    bound: Option<Duration>,
) -> Result<Discovery> {
    let udp = UdpSocket::bind("0.0.0.0:0").await?;
    udp.connect((ip, port)).await?;

    let (address, port) = match bound {
        Some(t) => timeout(t, discovery::discover(&udp, ssrc))
            .await
            .map_err(|_| Error::TimedOut)??,
        None => discovery::discover(&udp, ssrc).await?,
    };

    Ok(Discovery { udp, address, port })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_normalised() {
        assert_eq!(
            generate_url("voice.example.com:80").unwrap().as_str(),
            "wss://voice.example.com/?v=4"
        );
        assert_eq!(
            generate_url("voice.example.com:2096").unwrap().as_str(),
            "wss://voice.example.com:2096/?v=4"
        );
        assert_eq!(
            generate_url("ws://127.0.0.1:9000/").unwrap().as_str(),
            "ws://127.0.0.1:9000/"
        );
        assert!(matches!(generate_url("bad host"), Err(Error::EndpointUrl)));
    }

    #[test]
    fn updates_redact_tokens() {
        let update = ConnectionUpdate::new(None, Some("hunter2".into()), None);
        assert!(!format!("{update:?}").contains("hunter2"));
    }
}
