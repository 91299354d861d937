/// Voice core events occur on changes in connection state, and on receipt
/// of signalling about other users.
///
/// Core events persist while the `action` in [`EventData`]
/// returns `None`.
///
/// To obtain a user's SSRC, you must use [`SpeakingStateUpdate`] events.
///
/// [`EventData`]: super::EventData
/// [`SpeakingStateUpdate`]: Self::SpeakingStateUpdate
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum CoreEvent {
    /// Speaking state update from the WS gateway, typically describing how another voice
    /// user is transmitting audio data.
    SpeakingStateUpdate,

    /// Fires whenever a user disconnects from the same stream as the bot.
    ClientDisconnect,

    /// Fires when this driver successfully connects to a voice channel.
    DriverConnect,

    /// Fires when this driver successfully reconnects after a network error
    /// or a voice server change.
    DriverReconnect,

    /// Fires when this driver fails to connect to, or drops from, a voice channel.
    DriverDisconnect,
}
