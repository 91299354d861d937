#![allow(missing_docs)]

mod core;
mod events;
mod ws;

pub use self::{core::*, events::*, ws::*};

use crate::events::InternalContext;
use flume::Sender;

/// Channels shared by every task of one driver.
#[derive(Clone, Debug)]
pub struct Interconnect {
    pub core: Sender<CoreMessage>,
    pub events: Sender<EventMessage>,
}

impl Interconnect {
    pub fn fire(&self, ctx: InternalContext) {
        // Event thread may have been poisoned: this is fine.
        drop(self.events.send(EventMessage::FireEvent(ctx)));
    }

    pub fn poison(&self) {
        drop(self.events.send(EventMessage::Poison));
    }
}
