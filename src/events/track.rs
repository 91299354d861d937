/// Track events correspond to a [`Player`] moving through its queue.
///
/// Track events persist while the `action` in [`EventData`]
/// returns `None`.
///
/// [`Player`]: crate::tracks::Player
/// [`EventData`]: super::EventData
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum TrackEvent {
    /// A track became the current track.
    Start,
    /// The current track reached its end, or was skipped.
    End,
    /// Reading the current track failed. The player then moves on.
    Error,
    /// The last queued track ended and the player stopped.
    Finished,
}
