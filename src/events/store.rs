use super::{Event, EventContext, EventData};
use std::collections::HashMap;
use tracing::trace;

/// Storage for [`EventData`], keyed by the event each handler listens for.
#[derive(Debug, Default)]
pub(crate) struct EventStore {
    handlers: HashMap<Event, Vec<EventData>>,
}

impl EventStore {
    pub(crate) fn add_event(&mut self, evt: EventData) {
        if evt.event == Event::Cancel {
            return;
        }

        self.handlers.entry(evt.event).or_default().push(evt);
    }

    /// Runs every handler listening for `ctx`, applying each handler's reply.
    pub(crate) async fn process(&mut self, ctx: &EventContext<'_>) {
        let event = ctx.to_event();
        let Some(handlers) = self.handlers.remove(&event) else {
            return;
        };

        let mut kept = Vec::with_capacity(handlers.len());
        let mut moved = Vec::new();

        for mut data in handlers {
            match data.action.act(ctx).await {
                None => kept.push(data),
                Some(Event::Cancel) => trace!("Handler for {:?} cancelled.", event),
                Some(new_event) => {
                    data.event = new_event;
                    moved.push(data);
                },
            }
        }

        if !kept.is_empty() {
            self.handlers.insert(event, kept);
        }

        for data in moved {
            self.add_event(data);
        }
    }

    pub(crate) fn remove_handlers(&mut self) {
        self.handlers.clear();
    }
}
