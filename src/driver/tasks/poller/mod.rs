//! The packet pacer: a producer loop pulls Opus frames from the frame source into
//! a bounded channel, and a sender loop drains it on a fixed 20ms clock.
//!
//! Both the channel and the RTP counters belong to a [`MediaStream`], which lives as
//! long as the negotiated media session. Senders are replaced with each websocket,
//! and producers with each frame source, without losing queued audio.

mod pool;

use pool::{AudioFrame, BufferPool};

use super::{message::*, ws::Outbox};
use crate::{
    constants::*,
    driver::{
        connection::error::{Error, Result},
        rtp::write_rtp_header,
        CryptoMode,
        CryptoState,
        FrameSource,
        SessionKeys,
    },
    model::{payload::Speaking, SpeakingState},
};
use flume::{Receiver, Sender, TryRecvError};
use rand::random;
use std::{io::ErrorKind, sync::Arc, time::Duration};
use tokio::{
    net::UdpSocket,
    select,
    spawn,
    sync::{Mutex, Notify, OwnedMutexGuard},
    time::{sleep_until, timeout, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use tracing_futures::Instrument;

/// Counters of one RTP stream, carried from each sender loop to the next.
pub(crate) struct RtpState {
    crypto: CryptoState,
    sequence: u16,
    timestamp: u32,
    silence_frames: usize,
    preloaded: bool,
}

impl RtpState {
    fn new(mode: CryptoMode) -> Self {
        Self {
            crypto: CryptoState::from(mode),
            sequence: random(),
            timestamp: random(),
            silence_frames: 0,
            preloaded: false,
        }
    }
}

/// The parts of a [`MediaStream`] a sender loop needs.
#[derive(Clone)]
pub(crate) struct StreamHandle {
    frames: Receiver<AudioFrame>,
    preload: Arc<Notify>,
    rtp: Arc<Mutex<RtpState>>,
}

/// Queued audio and RTP state for one negotiated media session.
pub(crate) struct MediaStream {
    tx: Sender<AudioFrame>,
    pool: BufferPool,
    handle: StreamHandle,
    producer: Option<CancellationToken>,
}

impl MediaStream {
    pub(crate) fn new(mode: CryptoMode, frame_queue_length: usize) -> Self {
        let capacity = frame_queue_length.max(1);
        let (tx, frames) = flume::bounded(capacity);

        Self {
            tx,
            pool: BufferPool::new(FRAME_BUFFER_SIZE, capacity + 2),
            handle: StreamHandle {
                frames,
                preload: Arc::new(Notify::new()),
                rtp: Arc::new(Mutex::new(RtpState::new(mode))),
            },
            producer: None,
        }
    }

    /// Replaces the producer loop, keeping every frame already queued.
    pub(crate) fn set_source(&mut self, source: Arc<dyn FrameSource>, token: CancellationToken) {
        if let Some(old) = self.producer.replace(token.clone()) {
            old.cancel();
        }

        spawn(
            produce(
                source,
                self.tx.clone(),
                self.pool.clone(),
                self.handle.preload.clone(),
                token,
            )
            .in_current_span(),
        );
    }

    pub(crate) fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.cancel();
        }
    }
}

/// Everything one sender loop needs, fixed for its lifetime.
pub(crate) struct Poller {
    pub idx: usize,
    pub ssrc: u32,
    pub keys: Arc<SessionKeys>,
    pub udp: Arc<UdpSocket>,
    pub outbox: Outbox,
    pub stream: StreamHandle,
    pub core: Sender<CoreMessage>,
    pub max_silence_frames: usize,
    pub preload_timeout: Duration,
}

impl Poller {
    /// Spawns the sender loop, bound to `token`.
    ///
    /// The loop takes over the stream's RTP counters once any previous sender has exited.
    pub(crate) fn spawn(self, token: CancellationToken) {
        spawn(
            async move {
                let idx = self.idx;
                let core = self.core.clone();

                let rtp = select! {
                    rtp = self.stream.rtp.clone().lock_owned() => rtp,
                    () = token.cancelled() => return,
                };

                let mut sender = PacketSender::new(self, rtp);
                if let Err(e) = sender.run(token).await {
                    drop(core.send(CoreMessage::PollerFailed(idx, e)));
                }
            }
            .in_current_span(),
        );
    }
}

#[instrument(skip_all)]
async fn produce(
    source: Arc<dyn FrameSource>,
    tx: Sender<AudioFrame>,
    pool: BufferPool,
    preloaded: Arc<Notify>,
    token: CancellationToken,
) {
    let mut released = false;

    loop {
        let mut buf = pool.take();
        let len = select! {
            len = source.provide_frame(&mut buf[..]) => len,
            () = token.cancelled() => break,
        };

        if len == 0 {
            debug!("Frame source ended.");
            break;
        }

        let frame = pool.frame(buf, len);
        select! {
            sent = tx.send_async(frame) => if sent.is_err() {
                break;
            },
            () = token.cancelled() => break,
        }

        if !released && tx.is_full() {
            trace!("Frame queue preloaded.");
            released = true;
            preloaded.notify_one();
        }
    }

    // Releases the sender if the source ran dry before the queue filled.
    preloaded.notify_one();
    trace!("Producer exited.");
}

struct PacketSender {
    poller: Poller,
    rtp: OwnedMutexGuard<RtpState>,
    packet: Box<[u8; VOICE_PACKET_MAX]>,
}

impl PacketSender {
    fn new(poller: Poller, rtp: OwnedMutexGuard<RtpState>) -> Self {
        Self {
            poller,
            rtp,
            packet: Box::new([0u8; VOICE_PACKET_MAX]),
        }
    }

    async fn run(&mut self, token: CancellationToken) -> Result<()> {
        let rx = self.poller.stream.frames.clone();

        if !self.rtp.preloaded {
            let preload = self.poller.stream.preload.clone();
            select! {
                waited = timeout(self.poller.preload_timeout, preload.notified()) => if waited.is_err() {
                    debug!("Preload timed out with {} frames queued.", rx.len());
                },
                () = token.cancelled() => return Ok(()),
            }
            self.rtp.preloaded = true;
        }

        info!("Speaking as {}.", self.poller.ssrc);
        self.poller.outbox.send(Speaking {
            delay: Some(0),
            speaking: SpeakingState::MICROPHONE,
            ssrc: self.poller.ssrc,
            user_id: None,
        });

        let mut next_tick = Instant::now();

        loop {
            select! {
                () = sleep_until(next_tick) => {},
                () = token.cancelled() => break,
            }

            match rx.try_recv() {
                Ok(frame) => self.send_frame(&frame).await?,
                Err(TryRecvError::Empty)
                    if self.rtp.silence_frames < self.poller.max_silence_frames =>
                {
                    self.send_silence().await?;
                },
                Err(TryRecvError::Empty) => {
                    trace!("Underrun: waiting for audio.");
                    let frame = select! {
                        frame = rx.recv_async() => frame,
                        () = token.cancelled() => break,
                    };

                    let Ok(frame) = frame else {
                        break;
                    };

                    self.send_frame(&frame).await?;
                    next_tick = Instant::now();
                },
                Err(TryRecvError::Disconnected) => break,
            }

            next_tick += TIMESTEP_LENGTH;
        }

        trace!("Sender exited.");
        Ok(())
    }

    async fn send_frame(&mut self, frame: &AudioFrame) -> Result<()> {
        self.rtp.silence_frames = 0;
        self.send_payload(frame.payload()).await
    }

    async fn send_silence(&mut self) -> Result<()> {
        self.rtp.silence_frames += 1;
        self.send_payload(&SILENT_FRAME).await
    }

    async fn send_payload(&mut self, payload: &[u8]) -> Result<()> {
        let rtp = &mut *self.rtp;
        let mode = rtp.crypto.kind();
        if mode.packet_size(payload.len()) > self.packet.len() {
            warn!("Dropping oversized {}B frame.", payload.len());
            return Ok(());
        }

        let packet = &mut self.packet[..];
        write_rtp_header(
            &mut packet[..RTP_HEADER_LEN],
            rtp.sequence,
            rtp.timestamp,
            self.poller.ssrc,
        );

        let body = RTP_HEADER_LEN + crate::driver::TAG_SIZE;
        packet[body..body + payload.len()].copy_from_slice(payload);

        let size = rtp
            .crypto
            .encrypt_packet(&self.poller.keys.cipher, packet, payload.len())?;

        match self.poller.udp.send(&packet[..size]).await {
            Ok(_) => {},
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::ConnectionRefused | ErrorKind::Interrupted
                ) =>
            {
                debug!("Dropped voice packet: {e}.");
            },
            Err(e) => return Err(Error::from(e)),
        }

        rtp.sequence = rtp.sequence.wrapping_add(1);
        rtp.timestamp = rtp.timestamp.wrapping_add(MONO_FRAME_SIZE as u32);

        Ok(())
    }
}
