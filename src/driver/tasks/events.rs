use super::message::*;
use crate::events::EventStore;
use flume::Receiver;
use tracing::{info, instrument, trace};

#[instrument(skip(evt_rx))]
pub(crate) async fn runner(evt_rx: Receiver<EventMessage>) {
    let mut global = EventStore::default();

    while let Ok(msg) = evt_rx.recv_async().await {
        match msg {
            EventMessage::AddGlobalEvent(data) => {
                info!("Global event added.");
                global.add_event(data);
            },
            EventMessage::RemoveGlobalEvents => {
                global.remove_handlers();
            },
            EventMessage::FireEvent(ctx) => {
                let ctx = ctx.to_user_context();
                trace!("Firing event {:?}.", ctx.to_event());

                global.process(&ctx).await;
            },
            EventMessage::Poison => break,
        }
    }

    trace!("Event thread exited.");
}
