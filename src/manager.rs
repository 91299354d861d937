use crate::{
    error::{JoinError, JoinResult},
    id::{ChannelId, GuildId, UserId},
    shards::Sharder,
    tracks::{Player, PlayerState},
    Call,
    Config,
};
use dashmap::DashMap;
use parking_lot::RwLock as PRwLock;
use std::{fmt, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// A shard-aware struct responsible for managing [`Call`]s and their [`Player`]s.
///
/// This manager transparently maps guild state and a source of shard information
/// into individual calls, and forwards state updates which affect call state.
/// Each guild has at most one call and one player: joining a channel attaches
/// the guild's player to its call's driver.
pub struct Manager {
    user_id: UserId,
    shard_count: u64,
    sharder: Box<dyn Sharder>,
    calls: DashMap<GuildId, Arc<Mutex<Call>>>,
    players: DashMap<GuildId, Player>,
    config: PRwLock<Config>,
}

impl Manager {
    /// Create a new manager for the bot `user_id`, sending voice state updates
    /// through `sharder` across `shard_count` gateway shards.
    #[must_use]
    pub fn new<S, U>(sharder: S, shard_count: u64, user_id: U) -> Self
    where
        S: Sharder + 'static,
        U: Into<UserId>,
    {
        Self::from_config(sharder, shard_count, user_id, Config::default())
    }

    /// Create a new manager, using the given configuration for every call.
    #[must_use]
    pub fn from_config<S, U>(sharder: S, shard_count: u64, user_id: U, config: Config) -> Self
    where
        S: Sharder + 'static,
        U: Into<UserId>,
    {
        Self {
            user_id: user_id.into(),
            shard_count: shard_count.max(1),
            sharder: Box::new(sharder),
            calls: DashMap::new(),
            players: DashMap::new(),
            config: PRwLock::new(config),
        }
    }

    /// Retrieves a [`Call`] for the given guild, if one already exists.
    pub fn get<G: Into<GuildId>>(&self, guild_id: G) -> Option<Arc<Mutex<Call>>> {
        self.calls
            .get(&guild_id.into())
            .map(|mapref| Arc::clone(&mapref))
    }

    /// Retrieves a [`Call`] for the given guild, creating a new one if
    /// none is found.
    ///
    /// This will not join any calls, or cause connection state to change.
    /// If the sharder has no handle for the guild's shard, the new call can only
    /// fail to join, with [`JoinError::NoSender`].
    #[inline]
    pub fn get_or_insert<G>(&self, guild_id: G) -> Arc<Mutex<Call>>
    where
        G: Into<GuildId>,
    {
        self._get_or_insert(guild_id.into())
    }

    fn _get_or_insert(&self, guild_id: GuildId) -> Arc<Mutex<Call>> {
        self.get(guild_id).unwrap_or_else(|| {
            self.calls
                .entry(guild_id)
                .or_insert_with(|| {
                    let shard = shard_id(guild_id.get(), self.shard_count);
                    let handle = self.sharder.get_shard(shard);
                    if handle.is_none() {
                        warn!("No handle for shard {shard}: is shard_count correct?");
                    }

                    let call = Call::new_raw_cfg(
                        guild_id,
                        handle,
                        self.user_id,
                        self.config.read().clone(),
                    );

                    Arc::new(Mutex::new(call))
                })
                .clone()
        })
    }

    /// Retrieves the [`Player`] for the given guild, if one already exists.
    pub fn get_player<G: Into<GuildId>>(&self, guild_id: G) -> Option<Player> {
        self.players
            .get(&guild_id.into())
            .map(|mapref| mapref.clone())
    }

    /// Retrieves the [`Player`] for the given guild, creating a new one if
    /// none is found.
    ///
    /// A player which has stopped, including one whose queue ran dry, is replaced
    /// by a fresh one. The replacement becomes a call's audio source on its next
    /// [`join`].
    ///
    /// [`join`]: Manager::join
    pub fn get_or_insert_player<G: Into<GuildId>>(&self, guild_id: G) -> Player {
        let mut player = self
            .players
            .entry(guild_id.into())
            .or_insert_with(Player::new);

        if player.state() == PlayerState::Stopped {
            debug!("Replacing stopped player.");
            *player = Player::new();
        }

        player.clone()
    }

    /// Creates an iterator for all [`Call`]s currently managed.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.calls.iter().map(|x| (*x.key(), Arc::clone(x.value()))),
        }
    }

    /// Returns a copy of the configuration given to new calls.
    #[must_use]
    pub fn config(&self) -> Config {
        self.config.read().clone()
    }

    /// Sets a shared configuration for all drivers created from this
    /// manager.
    ///
    /// Changes made here will apply to new Call and Driver instances only.
    pub fn set_config(&self, new_config: Config) {
        let mut config = self.config.write();
        *config = new_config;
    }

    /// Connects to a target by retrieving its relevant [`Call`] and
    /// connecting, or creating the handler if required.
    ///
    /// The guild's [`Player`] (created if needed) becomes the call's audio source.
    ///
    /// This can also switch to the given channel, if a handler already exists
    /// for the target and the current connected channel is not equal to the
    /// given channel. The channel _must_ be in the provided guild: this is _not_
    /// checked by the library.
    ///
    /// The host must feed its voice state and voice server events to
    /// [`process_voice_state`] and [`process_voice_server`] on another task
    /// while this future is pending.
    ///
    /// NOTE: an `Err(..)` value will still create a [`Call`] accessible via [`get`].
    ///
    /// [`get`]: Manager::get
    /// [`process_voice_state`]: Manager::process_voice_state
    /// [`process_voice_server`]: Manager::process_voice_server
    #[inline]
    pub async fn join<C, G>(&self, guild_id: G, channel_id: C) -> JoinResult<Arc<Mutex<Call>>>
    where
        C: Into<ChannelId>,
        G: Into<GuildId>,
    {
        self._join(guild_id.into(), channel_id.into()).await
    }

    #[instrument(skip(self))]
    async fn _join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> JoinResult<Arc<Mutex<Call>>> {
        let call = self.get_or_insert(guild_id);
        let player = self.get_or_insert_player(guild_id);

        let stage_1 = {
            let mut handler = call.lock().await;
            handler.set_frame_source(player);
            handler.join(channel_id).await
        };

        match stage_1 {
            Ok(chan) => chan.await.map(|()| call),
            Err(e) => Err(e),
        }
    }

    /// Retrieves the [handler][`Call`] for the given target and leaves the
    /// associated voice channel, if connected.
    ///
    /// This will _not_ drop the handler or the guild's [`Player`], preserving
    /// settings and queued tracks. Consider calling [`remove`] to release tasks
    /// and memory.
    ///
    /// [`remove`]: Manager::remove
    #[inline]
    pub async fn leave<G: Into<GuildId>>(&self, guild_id: G) -> JoinResult<()> {
        self._leave(guild_id.into()).await
    }

    async fn _leave(&self, guild_id: GuildId) -> JoinResult<()> {
        if let Some(call) = self.get(guild_id) {
            let mut handler = call.lock().await;
            handler.leave().await
        } else {
            Err(JoinError::NoCall)
        }
    }

    /// Leaves the voice channel of the given guild, then drops its [`Call`]
    /// and stops its [`Player`].
    ///
    /// An Err(...) value implies that the gateway could not be contacted,
    /// and that leaving should be attempted again later (i.e., after reconnect).
    #[inline]
    pub async fn remove<G: Into<GuildId>>(&self, guild_id: G) -> JoinResult<()> {
        self._remove(guild_id.into()).await
    }

    async fn _remove(&self, guild_id: GuildId) -> JoinResult<()> {
        self.leave(guild_id).await?;
        self.calls.remove(&guild_id);
        if let Some((_, player)) = self.players.remove(&guild_id) {
            player.stop();
        }
        Ok(())
    }

    /// Handles a voice state update seen on the host's gateway.
    ///
    /// Updates for users other than this bot, or for guilds without a call,
    /// are ignored. A missing `channel_id` means the bot was removed from voice.
    #[instrument(skip(self))]
    pub async fn process_voice_state<G, U>(
        &self,
        guild_id: G,
        user_id: U,
        session_id: String,
        channel_id: Option<ChannelId>,
    ) where
        G: Into<GuildId> + fmt::Debug,
        U: Into<UserId> + fmt::Debug,
    {
        if user_id.into() != self.user_id {
            return;
        }

        if let Some(call) = self.get(guild_id) {
            let mut handler = call.lock().await;
            handler.update_state(session_id, channel_id);
        }
    }

    /// Handles a voice server update seen on the host's gateway.
    ///
    /// A missing endpoint means Discord is allocating a new voice server, and
    /// another update will follow.
    #[instrument(skip(self, token))]
    pub async fn process_voice_server<G>(&self, guild_id: G, endpoint: Option<String>, token: String)
    where
        G: Into<GuildId> + fmt::Debug,
    {
        let Some(endpoint) = endpoint else {
            debug!("Voice server update without an endpoint.");
            return;
        };

        if let Some(call) = self.get(guild_id) {
            let mut handler = call.lock().await;
            handler.update_server(endpoint, token);
        }
    }

    /// Handles this bot being removed from a guild.
    ///
    /// The guild's call and player are dropped without contacting Discord.
    #[instrument(skip(self))]
    pub async fn process_guild_leave<G>(&self, guild_id: G)
    where
        G: Into<GuildId> + fmt::Debug,
    {
        let guild_id = guild_id.into();

        if let Some((_, call)) = self.calls.remove(&guild_id) {
            call.lock().await.leave_local();
        }
        if let Some((_, player)) = self.players.remove(&guild_id) {
            player.stop();
        }
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("user_id", &self.user_id)
            .field("shard_count", &self.shard_count)
            .field("calls", &self.calls.len())
            .field("players", &self.players.len())
            .field("config", &*self.config.read())
            .finish()
    }
}

impl<'a> IntoIterator for &'a Manager {
    type Item = <Iter<'a> as Iterator>::Item;

    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

type DashMapIter<'a> = dashmap::iter::Iter<'a, GuildId, Arc<Mutex<Call>>>;
type InnerIter<'a> = std::iter::Map<
    DashMapIter<'a>,
    fn(<DashMapIter<'a> as Iterator>::Item) -> (GuildId, Arc<Mutex<Call>>),
>;

/// An iterator over all [`Call`]s currently stored in the manager instance.
pub struct Iter<'a> {
    inner: InnerIter<'a>,
}

impl Iterator for Iter<'_> {
    type Item = (GuildId, Arc<Mutex<Call>>);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[inline]
fn shard_id(guild_id: u64, shard_count: u64) -> u64 {
    (guild_id >> 22) % shard_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        driver::{test_impls::*, CryptoMode, FrameSource, GatewayState},
        shards::{Shard, VoiceStateUpdate},
        tracks::{MemorySource, Track},
    };
    use flume::Receiver;
    use std::time::Duration;

    const GUILD: u64 = 1;
    const BOT: u64 = 2;
    const CHANNEL: u64 = 3;
    const OTHER_GUILD: u64 = 2;

    fn manager(config: Config) -> (Arc<Manager>, Receiver<VoiceStateUpdate>) {
        let (tx, rx) = flume::unbounded();
        let manager = Manager::from_config(Shard::new(tx), 1, BOT, config);
        (Arc::new(manager), rx)
    }

    struct NoShards;

    impl Sharder for NoShards {
        fn get_shard(&self, _shard_id: u64) -> Option<Shard> {
            None
        }
    }

    #[test]
    fn shards_follow_guild_ids() {
        assert_eq!(shard_id(0, 4), 0);
        assert_eq!(shard_id(5 << 22, 4), 1);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn registries_insert_once() {
        let (manager, _rx) = manager(Config::default());

        let a = manager.get_or_insert(GUILD);
        let b = manager.get_or_insert(GUILD);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(manager.get(OTHER_GUILD).is_none());
        assert_eq!(manager.iter().count(), 1);

        assert!(manager.get_player(GUILD).is_none());
        let player = manager.get_or_insert_player(GUILD);
        player.stop();
        assert_eq!(manager.get_player(GUILD).unwrap().state(), PlayerState::Stopped);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn finished_players_are_replaced() {
        let (manager, _rx) = manager(Config::default());

        let player = manager.get_or_insert_player(GUILD);
        player
            .enqueue(Track::new(MemorySource::new([vec![1u8; 4]])))
            .unwrap();
        player.start();

        let mut buf = [0u8; 16];
        assert_eq!(player.provide_frame(&mut buf).await, 4);
        assert_eq!(player.provide_frame(&mut buf).await, 0);
        assert_eq!(player.state(), PlayerState::Stopped);

        let fresh = manager.get_or_insert_player(GUILD);
        assert_eq!(fresh.state(), PlayerState::Idle);
        assert!(fresh
            .enqueue(Track::new(MemorySource::new([vec![2u8; 4]])))
            .is_ok());
        assert_eq!(manager.get_player(GUILD).unwrap().queued().len(), 1);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn join_completes_through_gateway_events() {
        let server = MockServer::new().await;
        let (manager, rx) = manager(Config::default());

        let join = tokio::spawn({
            let manager = manager.clone();
            async move { manager.join(GUILD, CHANNEL).await.map(|_| ()) }
        });

        let update = rx.recv_async().await.unwrap();
        assert_eq!(update.channel_id, Some(ChannelId::from(3)));

        // Updates about other users are not ours to act on.
        manager
            .process_voice_state(GUILD, 99u64, "wrong".into(), Some(ChannelId::from(3)))
            .await;
        manager
            .process_voice_state(GUILD, BOT, "session".into(), Some(ChannelId::from(3)))
            .await;
        manager
            .process_voice_server(GUILD, Some(server.endpoint.clone()), "token".into())
            .await;

        let conn = server.accept().await;
        conn.send(crate::model::payload::Hello {
            heartbeat_interval: 50.0,
        });
        let crate::model::Event::Identify(identify) =
            conn.expect(crate::model::OpCode::Identify).await
        else {
            unreachable!();
        };
        assert_eq!(identify.session_id, "session");
        assert_eq!(identify.token, "token");

        conn.send(server.ready(&[CryptoMode::Normal.to_request_str()]));
        conn.expect(crate::model::OpCode::ClientConnect).await;
        conn.send(crate::model::payload::SessionDescription {
            mode: CryptoMode::Normal.to_request_str().into(),
            secret_key: MOCK_KEY.to_vec(),
        });

        join.await.unwrap().unwrap();

        let call = manager.get(GUILD).unwrap();
        let handler = call.lock().await;
        assert_eq!(handler.state(), GatewayState::Ready);
        assert_eq!(handler.current_channel(), Some(ChannelId::from(3)));
        assert!(manager.get_player(GUILD).is_some());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn join_times_out_without_voice_server() {
        let config = Config::default().gateway_timeout(Some(Duration::from_millis(100)));
        let (manager, _rx) = manager(config);

        let res = manager.join(GUILD, CHANNEL).await;
        assert!(matches!(res, Err(JoinError::TimedOut)));
        assert!(manager.get(GUILD).is_some());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn leave_and_remove() {
        let (manager, rx) = manager(Config::default());
        assert!(matches!(manager.leave(GUILD).await, Err(JoinError::NoCall)));

        manager.get_or_insert(GUILD);
        let player = manager.get_or_insert_player(GUILD);

        manager.remove(GUILD).await.unwrap();
        assert_eq!(rx.try_recv().unwrap().channel_id, None);
        assert!(manager.get(GUILD).is_none());
        assert_eq!(player.state(), PlayerState::Stopped);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn guild_leave_drops_everything_silently() {
        let (manager, rx) = manager(Config::default());
        manager.get_or_insert(GUILD);
        let player = manager.get_or_insert_player(GUILD);

        manager.process_guild_leave(GUILD).await;
        assert!(manager.get(GUILD).is_none());
        assert!(manager.get_player(GUILD).is_none());
        assert_eq!(player.state(), PlayerState::Stopped);
        assert!(rx.is_empty());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn missing_shards_cannot_join() {
        let manager = Manager::new(NoShards, 1, BOT);
        assert!(matches!(manager.join(GUILD, CHANNEL).await, Err(JoinError::NoSender)));
    }
}
