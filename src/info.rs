use crate::id::{ChannelId, GuildId, UserId};
use std::fmt;

/// Voice session details gathered so far for one join request.
///
/// A join completes once both halves have arrived from the host's gateway: the
/// session ID from this user's voice state, and the token and endpoint from the
/// guild's voice server update. These arrive in either order.
#[derive(Clone)]
pub(crate) struct ConnectionProgress {
    channel_id: ChannelId,
    guild_id: GuildId,
    user_id: UserId,
    session_id: Option<String>,
    endpoint: Option<String>,
    token: Option<String>,
}

impl ConnectionProgress {
    pub(crate) fn new(guild_id: GuildId, user_id: UserId, channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            guild_id,
            user_id,
            session_id: None,
            endpoint: None,
            token: None,
        }
    }

    pub(crate) fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub(crate) fn in_progress(&self) -> bool {
        self.info().is_none()
    }

    /// Full connection details, once every piece has been received.
    pub(crate) fn info(&self) -> Option<ConnectionInfo> {
        let (Some(session_id), Some(endpoint), Some(token)) =
            (&self.session_id, &self.endpoint, &self.token)
        else {
            return None;
        };

        Some(ConnectionInfo {
            channel_id: Some(self.channel_id),
            endpoint: endpoint.clone(),
            guild_id: self.guild_id,
            session_id: session_id.clone(),
            token: token.clone(),
            user_id: self.user_id,
        })
    }

    /// Applies a voice state update, returning whether the driver should now
    /// (re)connect.
    pub(crate) fn apply_state_update(&mut self, session_id: String, channel_id: ChannelId) -> bool {
        if self.channel_id != channel_id {
            // Likely that the bot was moved to a different channel by an admin.
            // Discord follows this with a fresh voice server update.
            self.channel_id = channel_id;
            self.endpoint = None;
            self.token = None;
        }

        let changed = self.session_id.as_deref() != Some(session_id.as_str());
        self.session_id = Some(session_id);

        changed && !self.in_progress()
    }

    /// Applies a voice server update, returning whether the driver should now
    /// (re)connect.
    pub(crate) fn apply_server_update(&mut self, endpoint: String, token: String) -> bool {
        let changed = self.endpoint.as_deref() != Some(endpoint.as_str())
            || self.token.as_deref() != Some(token.as_str());

        self.endpoint = Some(endpoint);
        self.token = Some(token);

        changed && !self.in_progress()
    }
}

impl fmt::Debug for ConnectionProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProgress")
            .field("channel_id", &self.channel_id)
            .field("guild_id", &self.guild_id)
            .field("user_id", &self.user_id)
            .field("session_id", &self.session_id)
            .field("endpoint", &self.endpoint)
            .field("token_is_some", &self.token.is_some())
            .finish()
    }
}

/// Parameters and information needed to start communicating with Discord's voice servers.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct ConnectionInfo {
    /// ID of the voice channel being joined, if it is known.
    ///
    /// This is not needed to establish a connection, but can be useful
    /// for book-keeping.
    pub channel_id: Option<ChannelId>,
    /// Address of the voice websocket gateway server assigned to this call.
    pub endpoint: String,
    /// ID of the target voice channel's parent guild.
    ///
    /// Bots cannot connect to a guildless (i.e., direct message) voice call.
    pub guild_id: GuildId,
    /// Unique string describing this session for validation/authentication purposes.
    pub session_id: String,
    /// Ephemeral secret used to validate the above session.
    pub token: String,
    /// UserID of this bot.
    pub user_id: UserId,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("channel_id", &self.channel_id)
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("session_id", &self.session_id)
            .field("token", &"<secret>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress() -> ConnectionProgress {
        ConnectionProgress::new(GuildId::from(1), UserId::from(2), ChannelId::from(3))
    }

    #[test]
    fn completes_in_either_order() {
        let mut a = progress();
        assert!(!a.apply_state_update("s".into(), ChannelId::from(3)));
        assert!(a.apply_server_update("host".into(), "t".into()));

        let mut b = progress();
        assert!(!b.apply_server_update("host".into(), "t".into()));
        assert!(b.apply_state_update("s".into(), ChannelId::from(3)));

        assert_eq!(a.info(), b.info());
        let info = a.info().unwrap();
        assert_eq!(info.channel_id, Some(ChannelId::from(3)));
        assert_eq!(info.endpoint, "host");
    }

    #[test]
    fn repeats_do_not_reconnect() {
        let mut p = progress();
        p.apply_state_update("s".into(), ChannelId::from(3));
        p.apply_server_update("host".into(), "t".into());

        assert!(!p.apply_state_update("s".into(), ChannelId::from(3)));
        assert!(!p.apply_server_update("host".into(), "t".into()));
        assert!(p.apply_server_update("other-host".into(), "t".into()));
        assert!(p.apply_state_update("s2".into(), ChannelId::from(3)));
    }

    #[test]
    fn channel_move_waits_for_new_server() {
        let mut p = progress();
        p.apply_state_update("s".into(), ChannelId::from(3));
        p.apply_server_update("host".into(), "t".into());

        assert!(!p.apply_state_update("s".into(), ChannelId::from(4)));
        assert!(p.in_progress());
        assert_eq!(p.channel_id(), ChannelId::from(4));
        assert!(p.apply_server_update("host".into(), "t".into()));
    }

    #[test]
    fn debug_redacts_token() {
        let mut p = progress();
        p.apply_state_update("s".into(), ChannelId::from(3));
        p.apply_server_update("host".into(), "hunter2".into());

        assert!(!format!("{p:?}").contains("hunter2"));
        assert!(!format!("{:?}", p.info().unwrap()).contains("hunter2"));
    }
}
