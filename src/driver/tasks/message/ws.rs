#![allow(missing_docs)]

use crate::{driver::tasks::ws::Outbox, model::Event as GatewayEvent};

/// Reports from one websocket attempt to the driver core.
#[derive(Debug)]
pub enum TransportEvent {
    /// The socket is open; messages pushed to the outbox are written in order.
    Connected(Outbox),
    /// One complete, parsed gateway message.
    Message(GatewayEvent),
    /// The socket is gone, for any reason. Sent once per attempt.
    Closed(CloseInfo),
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CloseInfo {
    pub code: Option<u16>,
    pub reason: String,
}
