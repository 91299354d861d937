#![allow(missing_docs)]

use crate::events::{EventData, InternalContext};

#[derive(Debug)]
pub enum EventMessage {
    AddGlobalEvent(EventData),
    RemoveGlobalEvents,
    FireEvent(InternalContext),

    Poison,
}
