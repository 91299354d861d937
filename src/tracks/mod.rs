//! Queued playback of Opus audio sources.
//!
//! A [`Player`] owns a queue of [`Track`]s, and hands out their frames one at a time
//! through [`FrameSource::provide_frame`]. Attach it to a [`Driver`] (or let the
//! [`Manager`] do so on join) to stream it into a voice channel.
//!
//! [`FrameSource::provide_frame`]: crate::driver::FrameSource::provide_frame
//! [`Driver`]: crate::driver::Driver
//! [`Manager`]: crate::Manager

mod error;
mod player;
mod source;

pub use self::{
    error::*,
    player::{Player, PlayerState},
    source::*,
};

use uuid::Uuid;

/// Identity and metadata of a queued track, sent with every track event.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct TrackInfo {
    /// Unique identifier for this track.
    pub uuid: Uuid,
    /// Human-readable title, if one was given.
    pub title: Option<String>,
}

/// An audio source awaiting playback, and its metadata.
pub struct Track {
    pub(crate) info: TrackInfo,
    pub(crate) source: Box<dyn AudioSource>,
}

impl Track {
    /// Wraps a source as a new track with a random UUID.
    pub fn new<S: AudioSource + 'static>(source: S) -> Self {
        Self {
            info: TrackInfo {
                uuid: Uuid::new_v4(),
                title: None,
            },
            source: Box::new(source),
        }
    }

    /// Sets this track's title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.info.title = Some(title.into());
        self
    }

    /// Returns this track's identity and metadata.
    #[must_use]
    pub fn info(&self) -> &TrackInfo {
        &self.info
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("info", &self.info)
            .field("source", &"<dyn AudioSource>")
            .finish()
    }
}
