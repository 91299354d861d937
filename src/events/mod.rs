//! Events relating to tracks, players and voice connection state.
//!
//! ## Which events can I handle?
//! Track events ([`TrackEvent`]) are raised by a [`Player`] as it moves through its
//! queue, and are registered with [`Player::add_event`]. Core events ([`CoreEvent`])
//! are raised by a [`Driver`] as its connection changes state, and are registered with
//! [`Driver::add_global_event`].
//!
//! Handlers run on a dedicated task per player or driver, so slow handlers delay
//! later events but never audio.
//!
//! [`Player`]: crate::tracks::Player
//! [`Player::add_event`]: crate::tracks::Player::add_event
//! [`Driver`]: crate::driver::Driver
//! [`Driver::add_global_event`]: crate::driver::Driver::add_global_event

mod context;
mod core;
mod store;
mod track;

pub use self::{
    context::*,
    core::*,
    track::*,
};
pub(crate) use store::EventStore;

use async_trait::async_trait;
use std::fmt;

/// Trait to handle an event which can be fired per-track, or globally.
///
/// These may be feasibly reused between several event sources.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Respond to one received event.
    ///
    /// Returning `None` keeps this handler registered for the same event. Returning
    /// `Some(Event::Cancel)` removes it, and any other event moves it to that event.
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event>;
}

/// Classes of event which may trigger an [`EventHandler`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Event {
    /// Playback events raised by a [`Player`].
    ///
    /// [`Player`]: crate::tracks::Player
    Track(TrackEvent),
    /// Connection events raised by a [`Driver`].
    ///
    /// [`Driver`]: crate::driver::Driver
    Core(CoreEvent),
    /// Cancels the event, if it was intended to persist.
    Cancel,
}

impl From<TrackEvent> for Event {
    fn from(evt: TrackEvent) -> Self {
        Event::Track(evt)
    }
}

impl From<CoreEvent> for Event {
    fn from(evt: CoreEvent) -> Self {
        Event::Core(evt)
    }
}

/// An [`EventHandler`] bound to the class of event it listens for.
pub struct EventData {
    pub(crate) event: Event,
    pub(crate) action: Box<dyn EventHandler>,
}

impl EventData {
    /// Create a representation of an event and its associated handler.
    pub fn new<F: EventHandler + 'static>(event: Event, action: F) -> Self {
        Self {
            event,
            action: Box::new(action),
        }
    }
}

impl fmt::Debug for EventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventData")
            .field("event", &self.event)
            .field("action", &"<fn>")
            .finish()
    }
}
