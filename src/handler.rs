use crate::{
    driver::Driver,
    error::{ConnectionResult, JoinError, JoinResult},
    id::{ChannelId, GuildId, UserId},
    info::{ConnectionInfo, ConnectionProgress},
    join::Join,
    shards::{Shard, VoiceUpdate},
    Config,
};
use flume::Sender;
use std::{
    fmt::Debug,
    ops::{Deref, DerefMut},
};
use tracing::{debug, instrument};

/// Completion channels of an in-flight join.
///
/// The first is told once Discord has sent every part of the connection
/// info, which ends the gateway timeout; the second receives the result of
/// the driver's connection attempt.
#[derive(Clone, Debug)]
struct Pending {
    gateway: Sender<()>,
    driver: Sender<ConnectionResult<()>>,
}

/// The Call handler is responsible for a single voice connection, acting
/// as a clean API above the inner state and gateway message management.
///
/// A Call exposes all control methods of [`Driver`] via `Deref(Mut)`.
///
/// [`Driver`]: struct@Driver
#[derive(Debug)]
pub struct Call {
    connection: Option<(ConnectionProgress, Pending)>,

    /// The internal controller of the voice connection.
    driver: Driver,

    guild_id: GuildId,
    /// Whether the current handler is set to deafen voice connections.
    self_deaf: bool,
    /// Whether the current handler is set to mute voice connections.
    self_mute: bool,
    user_id: UserId,
    /// Will be set when a `Call` is made via the [`new`]
    /// method.
    ///
    /// When set via [`standalone`](`Call::standalone`), it will not be
    /// present.
    ///
    /// [`new`]: Call::new
    /// [`standalone`]: Call::standalone
    ws: Option<Shard>,
}

impl Call {
    /// Creates a new Call, which will send out WebSocket messages via
    /// the given shard.
    ///
    /// This spawns the call's driver, and so must be called from within a Tokio
    /// runtime.
    #[inline]
    #[instrument]
    pub fn new<G, U>(guild_id: G, ws: Shard, user_id: U) -> Self
    where
        G: Into<GuildId> + Debug,
        U: Into<UserId> + Debug,
    {
        Self::new_raw_cfg(guild_id.into(), Some(ws), user_id.into(), Config::default())
    }

    /// Creates a new Call, configuring the driver as specified.
    #[inline]
    #[instrument]
    pub fn from_config<G, U>(guild_id: G, ws: Shard, user_id: U, config: Config) -> Self
    where
        G: Into<GuildId> + Debug,
        U: Into<UserId> + Debug,
    {
        Self::new_raw_cfg(guild_id.into(), Some(ws), user_id.into(), config)
    }

    /// Creates a new, standalone Call which is not connected via
    /// WebSocket to the Gateway.
    ///
    /// Actions such as muting, deafening, and switching channels will not
    /// reach Discord through this Call: the values will only be internally
    /// updated, and [`update_state`] and [`update_server`] must be called by hand.
    ///
    /// [`update_state`]: Call::update_state
    /// [`update_server`]: Call::update_server
    #[inline]
    #[instrument]
    pub fn standalone<G, U>(guild_id: G, user_id: U) -> Self
    where
        G: Into<GuildId> + Debug,
        U: Into<UserId> + Debug,
    {
        Self::new_raw_cfg(guild_id.into(), None, user_id.into(), Config::default())
    }

    /// Creates a new standalone Call from the given configuration file.
    #[inline]
    #[instrument]
    pub fn standalone_from_config<G, U>(guild_id: G, user_id: U, config: Config) -> Self
    where
        G: Into<GuildId> + Debug,
        U: Into<UserId> + Debug,
    {
        Self::new_raw_cfg(guild_id.into(), None, user_id.into(), config)
    }

    pub(crate) fn new_raw_cfg(
        guild_id: GuildId,
        ws: Option<Shard>,
        user_id: UserId,
        config: Config,
    ) -> Self {
        Call {
            connection: None,
            driver: Driver::new(guild_id, user_id, config),
            guild_id,
            self_deaf: false,
            self_mute: false,
            user_id,
            ws,
        }
    }

    #[instrument(skip(self))]
    fn do_connect(&mut self) {
        let Some((progress, pending)) = &self.connection else {
            return;
        };
        let Some(info) = progress.info() else {
            return;
        };

        // It's okay if the receiver hung up.
        _ = pending.gateway.send(());
        self.driver.raw_connect(info, pending.driver.clone());
    }

    /// Sets whether the current connection is to be deafened.
    ///
    /// If there is no live voice connection, then this only acts as a settings
    /// update for future connections.
    ///
    /// **Note**: Unlike in the official client, you _can_ be deafened while
    /// not being muted.
    #[instrument(skip(self))]
    pub async fn deafen(&mut self, deaf: bool) -> JoinResult<()> {
        self.self_deaf = deaf;

        self.update().await
    }

    /// Returns whether the current connection is self-deafened in this server.
    ///
    /// This is purely cosmetic.
    #[must_use]
    pub fn is_deaf(&self) -> bool {
        self.self_deaf
    }

    /// Sets whether the current connection is to be muted.
    ///
    /// This only changes how the bot is displayed: audio attached to the driver
    /// is still sent.
    #[instrument(skip(self))]
    pub async fn mute(&mut self, mute: bool) -> JoinResult<()> {
        self.self_mute = mute;

        self.update().await
    }

    /// Returns whether the current connection is self-muted in this server.
    #[must_use]
    pub fn is_mute(&self) -> bool {
        self.self_mute
    }

    /// Connect or switch to the given voice channel by its Id.
    ///
    /// This function acts as a future in two stages:
    /// * The first `await` sends the request over the gateway.
    /// * The second `await`s the driver's connection attempt.
    ///   To prevent deadlock, any mutexes around this Call
    ///   *must* be released before this result is queried.
    ///
    /// When using [`Manager::join`], this pattern is correctly handled for you.
    ///
    /// [`Manager::join`]: crate::Manager::join
    #[instrument(skip(self))]
    #[inline]
    pub async fn join<C>(&mut self, channel_id: C) -> JoinResult<Join>
    where
        C: Into<ChannelId> + Debug,
    {
        self._join(channel_id.into()).await
    }

    async fn _join(&mut self, channel_id: ChannelId) -> JoinResult<Join> {
        let (tx, rx) = flume::unbounded();
        let (gw_tx, gw_rx) = flume::unbounded();

        let current = match &self.connection {
            Some((progress, _)) if progress.channel_id() == channel_id => progress.info(),
            _ => None,
        };

        if let Some(info) = current {
            // Already in this channel: politely ask the driver to connect, which
            // only *actually* reconnects if it had a problem earlier.
            debug!("Already joined {channel_id}, reusing connection info.");
            _ = gw_tx.send(());
            self.driver.raw_connect(info, tx);

            return Ok(Join::new(rx.into_recv_async(), gw_rx.into_recv_async(), None));
        }

        if self.connection.as_ref().is_some_and(|(p, _)| p.in_progress()) {
            self.leave().await?;
        }

        self.connection = Some((
            ConnectionProgress::new(self.guild_id, self.user_id, channel_id),
            Pending {
                gateway: gw_tx,
                driver: tx,
            },
        ));

        let timeout = self.config().gateway_timeout;

        self.update()
            .await
            .map(|()| Join::new(rx.into_recv_async(), gw_rx.into_recv_async(), timeout))
    }

    /// Returns the current voice connection details for this Call,
    /// if available.
    #[must_use]
    pub fn current_connection(&self) -> Option<ConnectionInfo> {
        self.connection.as_ref().and_then(|(progress, _)| progress.info())
    }

    /// Returns `id` of the channel, if connected or connecting to any.
    ///
    /// This remains set after a connection failure, to allow for reconnection
    /// as needed. This will change if moved into another voice channel by an
    /// admin, and will be unset if kicked from a voice channel.
    #[must_use]
    pub fn current_channel(&self) -> Option<ChannelId> {
        self.connection
            .as_ref()
            .map(|(progress, _)| progress.channel_id())
    }

    /// Leaves the current voice channel, disconnecting from it.
    ///
    /// This does _not_ forget settings, like whether to be self-deafened or
    /// self-muted.
    #[instrument(skip(self))]
    pub async fn leave(&mut self) -> JoinResult<()> {
        self.leave_local();

        self.update().await
    }

    /// Forgets any joined channel and stops the driver, without telling Discord.
    pub(crate) fn leave_local(&mut self) {
        self.connection = None;
        self.driver.stop();
    }

    /// Updates the voice server data.
    ///
    /// You should only need to use this if you initialized the `Call` via
    /// [`standalone`].
    ///
    /// [`standalone`]: Call::standalone
    #[instrument(skip(self, token))]
    pub fn update_server(&mut self, endpoint: String, token: String) {
        let try_conn = self
            .connection
            .as_mut()
            .is_some_and(|(progress, _)| progress.apply_server_update(endpoint, token));

        if try_conn {
            self.do_connect();
        }
    }

    /// Updates the internal voice state of the current user.
    ///
    /// A `channel_id` of `None` means this user was removed from voice, and
    /// stops the driver.
    ///
    /// You should only need to use this if you initialized the `Call` via
    /// [`standalone`].
    ///
    /// [`standalone`]: Call::standalone
    #[instrument(skip(self))]
    pub fn update_state(&mut self, session_id: String, channel_id: Option<ChannelId>) {
        let Some(channel_id) = channel_id else {
            // Likely that we were disconnected by an admin.
            self.leave_local();
            return;
        };

        let try_conn = self
            .connection
            .as_mut()
            .is_some_and(|(progress, _)| progress.apply_state_update(session_id, channel_id));

        if try_conn {
            self.do_connect();
        }
    }

    /// Send an update for the current session over WS.
    ///
    /// Fails with [`JoinError::NoSender`] if initialized via [`standalone`].
    ///
    /// [`standalone`]: Call::standalone
    #[instrument(skip(self))]
    async fn update(&mut self) -> JoinResult<()> {
        let Some(ws) = self.ws.as_ref() else {
            return Err(JoinError::NoSender);
        };

        ws.update_voice_state(
            self.guild_id,
            self.current_channel(),
            self.self_deaf,
            self.self_mute,
        )
        .await
    }
}

impl Deref for Call {
    type Target = Driver;

    fn deref(&self) -> &Self::Target {
        &self.driver
    }
}

impl DerefMut for Call {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.driver
    }
}
