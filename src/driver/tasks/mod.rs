#![allow(missing_docs)]

pub(crate) mod events;
pub(crate) mod heartbeat;
pub mod message;
pub(crate) mod poller;
pub(crate) mod ws;

use super::connection::{Session, SharedStatus};
use crate::{
    id::{GuildId, UserId},
    Config,
};
use flume::{Receiver, Sender};
use message::*;
use std::{future, sync::Arc};
use tokio::{select, spawn, time::sleep_until};
use tracing::{info_span, instrument, trace};
use tracing_futures::Instrument;

/// Spawns the session and event tasks of a new driver, returning its control channel.
pub(crate) fn start(
    guild_id: GuildId,
    user_id: UserId,
    config: Config,
    status: Arc<SharedStatus>,
) -> Sender<CoreMessage> {
    let (tx, rx) = flume::unbounded();
    let (evt_tx, evt_rx) = flume::unbounded();

    let span = info_span!("driver", guild = %guild_id);

    spawn(
        async move {
            trace!("Event processor started.");
            events::runner(evt_rx).await;
            trace!("Event processor finished.");
        }
        .instrument(span.clone()),
    );

    let interconnect = Interconnect {
        core: tx.clone(),
        events: evt_tx,
    };
    let session = Session::new(guild_id, user_id, config, interconnect, status);

    spawn(
        async move {
            trace!("Driver started.");
            runner(session, rx).await;
            trace!("Driver finished.");
        }
        .instrument(span),
    );

    tx
}

#[instrument(skip(session, rx))]
async fn runner(mut session: Session, rx: Receiver<CoreMessage>) {
    loop {
        let deadline = session.deadline();
        let expired = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => future::pending().await,
            }
        };

        select! {
            msg = rx.recv_async() => match msg {
                Ok(CoreMessage::Poison) | Err(_) => break,
                Ok(msg) => session.handle(msg),
            },
            () = expired => session.timed_out(),
        }
    }

    trace!("Main thread exited");
    session.shutdown();
}
