use super::context_data::*;
use crate::id::GuildId;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) struct InternalConnect {
    pub server: String,
    pub ssrc: u32,
    pub guild_id: GuildId,
    pub session_id: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct InternalDisconnect {
    pub kind: DisconnectKind,
    pub reason: Option<DisconnectReason>,
    pub guild_id: GuildId,
    pub session_id: String,
}

impl<'a> From<&'a InternalConnect> for ConnectData<'a> {
    fn from(val: &'a InternalConnect) -> Self {
        Self {
            server: &val.server,
            ssrc: val.ssrc,
            guild_id: val.guild_id,
            session_id: &val.session_id,
        }
    }
}

impl<'a> From<&'a InternalDisconnect> for DisconnectData<'a> {
    fn from(val: &'a InternalDisconnect) -> Self {
        Self {
            kind: val.kind,
            reason: val.reason,
            guild_id: val.guild_id,
            session_id: &val.session_id,
        }
    }
}
