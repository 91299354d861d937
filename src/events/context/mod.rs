pub mod data;
pub(crate) mod internal_data;

use super::{CoreEvent, Event, TrackEvent};
use crate::{
    model::payload::{ClientDisconnect, Speaking},
    tracks::TrackInfo,
};
pub use data as context_data;
use data::*;
use internal_data::*;

/// Information about which track or connection change fired an event.
#[derive(Debug)]
#[non_exhaustive]
pub enum EventContext<'a> {
    /// A track became the current track of its player.
    TrackStart(&'a TrackInfo),
    /// A track ended, was skipped, or was stopped.
    TrackEnd(&'a TrackInfo),
    /// Reading a track failed; the player moves on to the next track.
    TrackError {
        /// The failing track.
        track: &'a TrackInfo,
        /// Description of the read failure.
        error: &'a str,
    },
    /// A player ran out of queued tracks and stopped.
    PlayerFinished,
    /// Speaking state update, typically describing how another voice
    /// user is transmitting audio data. Clients must send at least one such
    /// packet to allow SSRC/UserID matching.
    SpeakingStateUpdate(Speaking),
    /// Fired whenever a client disconnects.
    ClientDisconnect(ClientDisconnect),
    /// Fires when this driver successfully connects to a voice channel.
    DriverConnect(ConnectData<'a>),
    /// Fires when this driver successfully reconnects after a network error.
    DriverReconnect(ConnectData<'a>),
    /// Fires when this driver fails to connect to, or drops from, a voice channel.
    DriverDisconnect(DisconnectData<'a>),
}

#[derive(Clone, Debug)]
pub(crate) enum InternalContext {
    TrackStart(TrackInfo),
    TrackEnd(TrackInfo),
    TrackError(TrackInfo, String),
    PlayerFinished,
    SpeakingStateUpdate(Speaking),
    ClientDisconnect(ClientDisconnect),
    DriverConnect(InternalConnect),
    DriverReconnect(InternalConnect),
    DriverDisconnect(InternalDisconnect),
}

impl InternalContext {
    pub(crate) fn to_user_context(&self) -> EventContext<'_> {
        match self {
            Self::TrackStart(t) => EventContext::TrackStart(t),
            Self::TrackEnd(t) => EventContext::TrackEnd(t),
            Self::TrackError(t, e) => EventContext::TrackError { track: t, error: e },
            Self::PlayerFinished => EventContext::PlayerFinished,
            Self::SpeakingStateUpdate(evt) => EventContext::SpeakingStateUpdate(*evt),
            Self::ClientDisconnect(evt) => EventContext::ClientDisconnect(*evt),
            Self::DriverConnect(evt) => EventContext::DriverConnect(ConnectData::from(evt)),
            Self::DriverReconnect(evt) => EventContext::DriverReconnect(ConnectData::from(evt)),
            Self::DriverDisconnect(evt) =>
                EventContext::DriverDisconnect(DisconnectData::from(evt)),
        }
    }
}

impl EventContext<'_> {
    /// Retrieve the event class for an event (i.e., when matching
    /// an event against the registered listeners).
    #[must_use]
    pub fn to_event(&self) -> Event {
        match self {
            Self::TrackStart(_) => TrackEvent::Start.into(),
            Self::TrackEnd(_) => TrackEvent::End.into(),
            Self::TrackError { .. } => TrackEvent::Error.into(),
            Self::PlayerFinished => TrackEvent::Finished.into(),
            Self::SpeakingStateUpdate(_) => CoreEvent::SpeakingStateUpdate.into(),
            Self::ClientDisconnect(_) => CoreEvent::ClientDisconnect.into(),
            Self::DriverConnect(_) => CoreEvent::DriverConnect.into(),
            Self::DriverReconnect(_) => CoreEvent::DriverReconnect.into(),
            Self::DriverDisconnect(_) => CoreEvent::DriverDisconnect.into(),
        }
    }
}
