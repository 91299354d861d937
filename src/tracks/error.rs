use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// Errors associated with control and manipulation of a [`Player`].
///
/// [`Player`]: super::Player
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum TrackError {
    /// The operation failed because the player has been stopped.
    Finished,
    /// The supplied event listener can never be fired by a player, and should
    /// be attached to the driver instead.
    InvalidTrackEvent,
    /// Seeking within a track is not supported.
    SeekUnsupported,
}

impl Display for TrackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "failed to operate on player: ")?;
        match self {
            TrackError::Finished => write!(f, "player was stopped"),
            TrackError::InvalidTrackEvent => {
                write!(f, "given event listener can't be fired on a track")
            },
            TrackError::SeekUnsupported => write!(f, "tracks cannot seek"),
        }
    }
}

impl Error for TrackError {}

/// Alias for most calls to a [`Player`].
///
/// [`Player`]: super::Player
pub type TrackResult<T> = Result<T, TrackError>;
