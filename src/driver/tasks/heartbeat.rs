use super::{message::*, ws::Outbox};
use crate::model::payload::Heartbeat;
use flume::{Receiver, Sender};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::{
    select,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, trace};

/// Heartbeats for one connection attempt.
///
/// Nothing is sent until `gate` yields the interval announced by Hello. A missed
/// acknowledgement only affects the measured ping: liveness is left to the websocket.
#[instrument(skip(gate, core, token))]
pub(crate) async fn runner(
    idx: usize,
    gate: Receiver<(Duration, Outbox)>,
    core: Sender<CoreMessage>,
    token: CancellationToken,
) {
    let (interval, outbox) = select! {
        opened = gate.recv_async() => match opened {
            Ok(opened) => opened,
            Err(_) => return,
        },
        () = token.cancelled() => return,
    };

    info!("Heartbeating every {:?}.", interval);

    loop {
        select! {
            () = sleep_until(Instant::now() + interval) => {},
            () = token.cancelled() => break,
        }

        let nonce = unix_millis();

        // Record first: the ack may overtake us otherwise.
        if core
            .send(CoreMessage::HeartbeatSent(idx, nonce, Instant::now()))
            .is_err()
        {
            break;
        }

        if !outbox.send(Heartbeat { nonce }) {
            break;
        }

        trace!("Sent heartbeat {nonce}.");
    }

    trace!("Heartbeat task exited.");
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
