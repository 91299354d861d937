//! Handles for sending voice state updates over a host bot's gateway connections.
//!
//! Linnet does not hold a Discord gateway connection of its own. Joining and leaving
//! a channel is signalled through whatever library the host bot uses, which in turn
//! must pass the resulting voice state and voice server events back to
//! [`Manager::process_voice_state`] and [`Manager::process_voice_server`].
//!
//! [`Manager::process_voice_state`]: crate::Manager::process_voice_state
//! [`Manager::process_voice_server`]: crate::Manager::process_voice_server

use crate::{
    error::{JoinError, JoinResult},
    id::*,
};
use async_trait::async_trait;
use flume::Sender;
use std::{fmt, sync::Arc};

/// Trait for a generic shard handle to send voice state updates to Discord.
///
/// This is intended to wrap a message channel to a single shard: Linnet only
/// needs to send voice state updates (gateway opcode 4) to join or leave a
/// channel.
#[async_trait]
pub trait VoiceUpdate {
    /// Send a voice update message to the inner shard handle.
    async fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_deaf: bool,
        self_mute: bool,
    ) -> JoinResult<()>;
}

/// Trait for a shard cluster or other source of shard handles.
pub trait Sharder: Send + Sync {
    /// Get access to the handle for `shard_id`.
    fn get_shard(&self, shard_id: u64) -> Option<Shard>;
}

/// A reference to an individual websocket connection.
#[derive(Clone)]
pub struct Shard(Arc<dyn VoiceUpdate + Send + Sync>);

impl Shard {
    /// Wraps a handle to one shard.
    pub fn new<V: VoiceUpdate + Send + Sync + 'static>(handle: V) -> Self {
        Self(Arc::new(handle))
    }
}

impl From<Arc<dyn VoiceUpdate + Send + Sync>> for Shard {
    fn from(handle: Arc<dyn VoiceUpdate + Send + Sync>) -> Self {
        Self(handle)
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shard").field(&"<dyn VoiceUpdate>").finish()
    }
}

#[async_trait]
impl VoiceUpdate for Shard {
    async fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_deaf: bool,
        self_mute: bool,
    ) -> JoinResult<()> {
        self.0
            .update_voice_state(guild_id, channel_id, self_deaf, self_mute)
            .await
    }
}

/// A bot with a single gateway connection serves every shard ID from it.
impl Sharder for Shard {
    fn get_shard(&self, _shard_id: u64) -> Option<Shard> {
        Some(self.clone())
    }
}

/// A voice state update to be sent by the host over its gateway connection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct VoiceStateUpdate {
    /// Guild whose voice channel is being joined or left.
    pub guild_id: GuildId,
    /// Target channel, or `None` to leave.
    pub channel_id: Option<ChannelId>,
    /// Whether to join self-deafened.
    pub self_deaf: bool,
    /// Whether to join self-muted.
    pub self_mute: bool,
}

/// Hands updates to a task owned by the host, which forwards them to Discord.
#[async_trait]
impl VoiceUpdate for Sender<VoiceStateUpdate> {
    async fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_deaf: bool,
        self_mute: bool,
    ) -> JoinResult<()> {
        self.send_async(VoiceStateUpdate {
            guild_id,
            channel_id,
            self_deaf,
            self_mute,
        })
        .await
        .map_err(|_| JoinError::NoSender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_shards_forward_updates() {
        let (tx, rx) = flume::unbounded();
        let shard = Shard::new(tx);

        let handle = shard.get_shard(7).unwrap();
        handle
            .update_voice_state(GuildId::from(1), Some(ChannelId::from(2)), true, false)
            .await
            .unwrap();

        assert_eq!(rx.try_recv(), Ok(VoiceStateUpdate {
            guild_id: GuildId::from(1),
            channel_id: Some(ChannelId::from(2)),
            self_deaf: true,
            self_mute: false,
        }));

        drop(rx);
        assert!(matches!(
            handle.update_voice_state(GuildId::from(1), None, false, false).await,
            Err(JoinError::NoSender)
        ));
    }
}
