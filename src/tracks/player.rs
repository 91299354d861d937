use super::{AudioSource, Track, TrackError, TrackInfo, TrackResult};
use crate::{
    driver::{
        tasks::{self, message::EventMessage},
        FrameSource,
    },
    events::{Event, EventData, EventHandler, InternalContext},
};
use async_trait::async_trait;
use flume::Sender;
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, instrument, warn};

/// Playback state of a [`Player`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum PlayerState {
    /// No track is current: either the player is not started, or its queue ran
    /// dry before a new track was added.
    Idle,
    /// A track is current and frames are being read from it.
    Playing,
    /// A track is current, but frame reads wait until the player resumes.
    Paused,
    /// The player has been stopped for good.
    Stopped,
}

/// A queue of audio sources, played one after the other.
///
/// This is the [`FrameSource`] usually attached to a [`Driver`]. Every mutation
/// happens under a single lock, which is held while sources are swapped but never
/// across a source read: a [`skip`] arriving mid-read leaves that frame intact and
/// takes effect on the next read.
///
/// Cloning a `Player` yields another handle to the same queue.
///
/// [`Driver`]: crate::driver::Driver
/// [`skip`]: Player::skip
#[derive(Clone)]
pub struct Player {
    inner: Arc<Shared>,
}

struct Shared {
    core: Mutex<PlayerCore>,
    signal: watch::Sender<Signal>,
    events: Sender<EventMessage>,
}

#[derive(Default)]
struct PlayerCore {
    queue: VecDeque<Track>,
    current: Option<Current>,
    started: bool,
    paused: bool,
    stopped: bool,
}

type SharedSource = Arc<AsyncMutex<Box<dyn AudioSource>>>;

struct Current {
    info: TrackInfo,
    source: SharedSource,
}

/// Wakes readers waiting on the pause gate or for a track to appear.
#[derive(Clone, Copy, Debug, Default)]
struct Signal {
    paused: bool,
    stopped: bool,
    version: u64,
}

impl Player {
    /// Creates an empty, unstarted player.
    ///
    /// This spawns the player's event task, and so must be called from within
    /// a Tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        let (evt_tx, evt_rx) = flume::unbounded();
        tokio::spawn(tasks::events::runner(evt_rx));
        let (signal, _) = watch::channel(Signal::default());

        Self {
            inner: Arc::new(Shared {
                core: Mutex::new(PlayerCore::default()),
                signal,
                events: evt_tx,
            }),
        }
    }

    /// Begins playback, making the first queued track current.
    ///
    /// Does nothing if the player was already started or has stopped.
    #[instrument(skip(self))]
    pub fn start(&self) {
        let mut core = self.inner.core.lock();
        if core.started || core.stopped {
            return;
        }

        core.started = true;
        self.promote_next(&mut core);
        self.notify(&core);
    }

    /// Adds a track to the back of the queue, returning its metadata.
    ///
    /// If the player is started but idle, the track becomes current immediately.
    ///
    /// # Errors
    /// Fails with [`TrackError::Finished`] once the player has stopped.
    #[instrument(skip(self, track), fields(track = ?track.info))]
    pub fn enqueue(&self, track: Track) -> TrackResult<TrackInfo> {
        let mut core = self.inner.core.lock();
        if core.stopped {
            return Err(TrackError::Finished);
        }

        let info = track.info.clone();
        core.queue.push_back(track);
        info!("Track added to queue, {} waiting.", core.queue.len());

        if core.started && core.current.is_none() {
            self.promote_next(&mut core);
        }
        self.notify(&core);

        Ok(info)
    }

    /// Ends the current track and moves to the next queued one.
    ///
    /// Returns `false` (and changes nothing) if the queue is empty, or if the player
    /// is unstarted or stopped.
    #[instrument(skip(self))]
    pub fn skip(&self) -> bool {
        let mut core = self.inner.core.lock();
        if !core.started || core.stopped || core.queue.is_empty() {
            return false;
        }

        if let Some(old) = core.current.take() {
            info!("Skipping track {:?}.", old.info);
            self.fire(InternalContext::TrackEnd(old.info));
        }
        self.promote_next(&mut core);
        self.notify(&core);

        true
    }

    /// Toggles between playing and paused, returning the new state.
    #[instrument(skip(self))]
    pub fn pause_or_resume(&self) -> PlayerState {
        let mut core = self.inner.core.lock();
        if !core.stopped {
            core.paused = !core.paused;
            self.notify(&core);
        }

        core.state()
    }

    /// Stops playback for good, disposing of the current and all queued tracks.
    ///
    /// Later calls do nothing. Frame reads return `0` from this point on.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let mut core = self.inner.core.lock();
        self.stop_locked(&mut core);
    }

    /// Seeking is not supported by any source.
    ///
    /// # Errors
    /// Always fails with [`TrackError::SeekUnsupported`].
    pub fn seek(&self, _position: Duration) -> TrackResult<()> {
        Err(TrackError::SeekUnsupported)
    }

    /// Returns the current playback state.
    #[must_use]
    pub fn state(&self) -> PlayerState {
        self.inner.core.lock().state()
    }

    /// Returns the metadata of the current track, if any.
    #[must_use]
    pub fn current(&self) -> Option<TrackInfo> {
        self.inner
            .core
            .lock()
            .current
            .as_ref()
            .map(|c| c.info.clone())
    }

    /// Returns the metadata of every track waiting behind the current one.
    #[must_use]
    pub fn queued(&self) -> Vec<TrackInfo> {
        self.inner
            .core
            .lock()
            .queue
            .iter()
            .map(|t| t.info.clone())
            .collect()
    }

    /// Attach an event handler to this player.
    ///
    /// # Errors
    /// Only [`Event::Track`] events can be fired by a player; others are rejected with
    /// [`TrackError::InvalidTrackEvent`].
    pub fn add_event<F: EventHandler + 'static>(&self, event: Event, action: F) -> TrackResult<()> {
        if !matches!(event, Event::Track(_)) {
            return Err(TrackError::InvalidTrackEvent);
        }

        self.inner
            .events
            .send(EventMessage::AddGlobalEvent(EventData::new(event, action)))
            .map_err(|_| TrackError::Finished)
    }

    /// Removes all event handlers from this player.
    pub fn remove_all_events(&self) {
        drop(self.inner.events.send(EventMessage::RemoveGlobalEvents));
    }

    fn fire(&self, ctx: InternalContext) {
        // Nobody may be listening: this is fine.
        drop(self.inner.events.send(EventMessage::FireEvent(ctx)));
    }

    fn notify(&self, core: &PlayerCore) {
        self.inner.signal.send_modify(|s| {
            s.paused = core.paused;
            s.stopped = core.stopped;
            s.version = s.version.wrapping_add(1);
        });
    }

    fn promote_next(&self, core: &mut PlayerCore) {
        if let Some(track) = core.queue.pop_front() {
            info!("Now playing {:?}.", track.info);
            self.fire(InternalContext::TrackStart(track.info.clone()));
            core.current = Some(Current {
                info: track.info,
                source: Arc::new(AsyncMutex::new(track.source)),
            });
        }
    }

    fn stop_locked(&self, core: &mut PlayerCore) {
        if core.stopped {
            return;
        }

        core.stopped = true;
        if let Some(old) = core.current.take() {
            self.fire(InternalContext::TrackEnd(old.info));
        }
        core.queue.clear();
        self.notify(core);

        info!("Player stopped.");
        drop(self.inner.events.send(EventMessage::Poison));
    }

    /// Moves past `ended`, unless a concurrent skip or stop already did.
    fn advance(&self, ended: &TrackInfo, error: Option<String>) {
        let mut core = self.inner.core.lock();
        if core.current.as_ref().map(|c| c.info.uuid) != Some(ended.uuid) {
            debug!("Track {:?} was replaced mid-read.", ended.uuid);
            return;
        }

        let old = core.current.take();
        match error {
            Some(e) => {
                warn!("Track {:?} failed: {e}.", ended);
                self.fire(InternalContext::TrackError(ended.clone(), e));
            },
            None => self.fire(InternalContext::TrackEnd(ended.clone())),
        }

        if core.queue.is_empty() {
            self.fire(InternalContext::PlayerFinished);
            self.stop_locked(&mut core);
        } else {
            self.promote_next(&mut core);
            self.notify(&core);
        }

        drop(core);
        drop(old);
    }

    async fn next_frame(&self, buf: &mut [u8]) -> usize {
        let mut signal = self.inner.signal.subscribe();

        loop {
            let stopped = signal
                .wait_for(|s| s.stopped || !s.paused)
                .await
                .map(|s| s.stopped);
            if !matches!(stopped, Ok(false)) {
                return 0;
            }

            let current = {
                let core = self.inner.core.lock();
                if core.stopped {
                    return 0;
                }
                if core.paused {
                    continue;
                }

                core.current
                    .as_ref()
                    .map(|c| (c.info.clone(), c.source.clone()))
            };

            let Some((info, source)) = current else {
                // Idle: wait for a start, enqueue or stop.
                if signal.changed().await.is_err() {
                    return 0;
                }
                continue;
            };

            let read = source.lock().await.read(buf).await;
            drop(source);

            match read {
                Ok(n) if n > 0 => return n.min(buf.len()),
                Ok(_) => self.advance(&info, None),
                Err(e) => self.advance(&info, Some(e.to_string())),
            }
        }
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerCore {
    fn state(&self) -> PlayerState {
        if self.stopped {
            PlayerState::Stopped
        } else if self.current.is_none() {
            PlayerState::Idle
        } else if self.paused {
            PlayerState::Paused
        } else {
            PlayerState::Playing
        }
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("state", &self.state())
            .finish()
    }
}

#[async_trait]
impl FrameSource for Player {
    async fn provide_frame(&self, buf: &mut [u8]) -> usize {
        self.next_frame(buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        events::{EventContext, TrackEvent},
        tracks::MemorySource,
    };
    use flume::Receiver;
    use std::{
        io::{Error as IoError, ErrorKind},
        sync::atomic::{AtomicBool, Ordering},
    };
    use tokio::time::{sleep, timeout};

    #[derive(Clone, Debug, PartialEq)]
    enum Seen {
        Start(Option<String>),
        End(Option<String>),
        Error(Option<String>),
        Finished,
    }

    struct Recorder(Sender<Seen>);

    #[async_trait]
    impl EventHandler for Recorder {
        async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
            let seen = match ctx {
                EventContext::TrackStart(t) => Seen::Start(t.title.clone()),
                EventContext::TrackEnd(t) => Seen::End(t.title.clone()),
                EventContext::TrackError { track, .. } => Seen::Error(track.title.clone()),
                EventContext::PlayerFinished => Seen::Finished,
                _ => return None,
            };
            drop(self.0.send(seen));
            None
        }
    }

    fn record(player: &Player) -> Receiver<Seen> {
        let (tx, rx) = flume::unbounded();
        for evt in [
            TrackEvent::Start,
            TrackEvent::End,
            TrackEvent::Error,
            TrackEvent::Finished,
        ] {
            player.add_event(evt.into(), Recorder(tx.clone())).unwrap();
        }
        rx
    }

    fn track(title: &str, frames: usize) -> Track {
        Track::new(MemorySource::new((0..frames).map(|i| vec![i as u8; 3]))).title(title)
    }

    fn titled(title: &str) -> Option<String> {
        Some(title.to_string())
    }

    /// Drains events until the player's event task has exited.
    async fn all_events(rx: Receiver<Seen>) -> Vec<Seen> {
        let mut out = vec![];
        while let Ok(seen) = rx.recv_async().await {
            out.push(seen);
        }
        out
    }

    struct ChannelSource(Receiver<IoResultFrame>);
    type IoResultFrame = Result<Vec<u8>, ErrorKind>;

    #[async_trait]
    impl AudioSource for ChannelSource {
        async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.recv_async().await {
                Ok(Ok(frame)) => {
                    buf[..frame.len()].copy_from_slice(&frame);
                    Ok(frame.len())
                },
                Ok(Err(kind)) => Err(IoError::new(kind, "source broke")),
                Err(_) => Ok(0),
            }
        }
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn skips_drain_queue_then_playback_finishes_once() {
        let player = Player::new();
        let events = record(&player);

        for title in ["a", "b", "c"] {
            player.enqueue(track(title, 2)).unwrap();
        }
        player.enqueue(track("d", 0)).unwrap();

        assert!(!player.skip());
        player.start();
        assert_eq!(player.current().and_then(|t| t.title), titled("a"));

        assert!(player.skip());
        assert!(player.skip());
        assert!(player.skip());
        assert!(!player.skip());
        assert_eq!(player.current().and_then(|t| t.title), titled("d"));

        let mut buf = [0u8; 16];
        assert_eq!(player.provide_frame(&mut buf).await, 0);
        assert_eq!(player.provide_frame(&mut buf).await, 0);
        assert_eq!(player.state(), PlayerState::Stopped);

        let seen = all_events(events).await;
        assert_eq!(seen, vec![
            Seen::Start(titled("a")),
            Seen::End(titled("a")),
            Seen::Start(titled("b")),
            Seen::End(titled("b")),
            Seen::Start(titled("c")),
            Seen::End(titled("c")),
            Seen::Start(titled("d")),
            Seen::End(titled("d")),
            Seen::Finished,
        ]);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn frames_flow_across_track_boundaries() {
        let player = Player::new();
        player.enqueue(track("a", 1)).unwrap();
        player.enqueue(track("b", 2)).unwrap();
        player.start();

        let mut buf = [0u8; 16];
        let mut lens = vec![];
        loop {
            let n = player.provide_frame(&mut buf).await;
            lens.push(n);
            if n == 0 {
                break;
            }
        }

        assert_eq!(lens, vec![3, 3, 3, 0]);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn pause_during_blocked_read_is_honoured_next_read() {
        let (tx, rx) = flume::unbounded();
        let player = Player::new();
        player.enqueue(Track::new(ChannelSource(rx))).unwrap();
        player.start();

        let reader = player.clone();
        let first = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            reader.provide_frame(&mut buf).await
        });
        sleep(Duration::from_millis(20)).await;

        let state = timeout(Duration::from_millis(500), async { player.pause_or_resume() })
            .await
            .expect("pause must not wait on the in-flight read");
        assert_eq!(state, PlayerState::Paused);

        tx.send(Ok(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(first.await.unwrap(), 4);

        let reader = player.clone();
        let second = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            reader.provide_frame(&mut buf).await
        });
        tx.send(Ok(vec![5, 6])).unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());
        assert_eq!(tx.len(), 1);

        assert_eq!(player.pause_or_resume(), PlayerState::Playing);
        assert_eq!(second.await.unwrap(), 2);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn skip_mid_read_keeps_frame_and_applies_next() {
        let (tx, rx) = flume::unbounded();
        let player = Player::new();
        player.enqueue(Track::new(ChannelSource(rx)).title("slow")).unwrap();
        player.enqueue(track("next", 1)).unwrap();
        player.start();

        let reader = player.clone();
        let first = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let n = reader.provide_frame(&mut buf).await;
            buf[..n].to_vec()
        });
        sleep(Duration::from_millis(20)).await;

        assert!(player.skip());
        tx.send(Ok(vec![9, 9, 9, 9, 9])).unwrap();
        assert_eq!(first.await.unwrap(), vec![9, 9, 9, 9, 9]);

        let mut buf = [0u8; 16];
        assert_eq!(player.provide_frame(&mut buf).await, 3);
        assert_eq!(&buf[..3], &[0, 0, 0]);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn source_errors_are_reported_and_skipped() {
        let (tx, rx) = flume::unbounded();
        let player = Player::new();
        let events = record(&player);
        player.enqueue(Track::new(ChannelSource(rx)).title("broken")).unwrap();
        player.enqueue(track("fine", 1)).unwrap();
        player.start();

        tx.send(Err(ErrorKind::ConnectionReset)).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(player.provide_frame(&mut buf).await, 3);
        assert_eq!(player.provide_frame(&mut buf).await, 0);

        let seen = all_events(events).await;
        assert_eq!(seen, vec![
            Seen::Start(titled("broken")),
            Seen::Error(titled("broken")),
            Seen::Start(titled("fine")),
            Seen::End(titled("fine")),
            Seen::Finished,
        ]);
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AudioSource for DropFlag {
        async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            buf[0] = 1;
            Ok(1)
        }
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn stop_disposes_every_source_and_is_terminal() {
        let flags: Vec<_> = (0..3).map(|_| Arc::new(AtomicBool::new(false))).collect();
        let player = Player::new();
        for flag in &flags {
            player.enqueue(Track::new(DropFlag(flag.clone()))).unwrap();
        }
        player.start();

        let mut buf = [0u8; 4];
        assert_eq!(player.provide_frame(&mut buf).await, 1);

        player.stop();
        player.stop();
        assert!(flags.iter().all(|f| f.load(Ordering::SeqCst)));
        assert_eq!(player.state(), PlayerState::Stopped);
        assert_eq!(player.provide_frame(&mut buf).await, 0);
        assert_eq!(player.pause_or_resume(), PlayerState::Stopped);
        assert!(!player.skip());
        assert_eq!(
            player.enqueue(track("late", 1)).unwrap_err(),
            TrackError::Finished
        );
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn idle_reader_wakes_on_enqueue() {
        let player = Player::new();
        player.start();
        assert_eq!(player.state(), PlayerState::Idle);

        let reader = player.clone();
        let waiting = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            reader.provide_frame(&mut buf).await
        });
        sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        player.enqueue(track("late", 1)).unwrap();
        assert_eq!(waiting.await.unwrap(), 3);
        assert_eq!(player.state(), PlayerState::Playing);
    }

    #[tokio::test]
    async fn unsupported_operations_are_errors() {
        let player = Player::new();
        assert_eq!(
            player.seek(Duration::from_secs(1)),
            Err(TrackError::SeekUnsupported)
        );
        assert_eq!(
            player.add_event(
                crate::events::CoreEvent::DriverConnect.into(),
                Recorder(flume::unbounded().0)
            ),
            Err(TrackError::InvalidTrackEvent)
        );
    }
}
