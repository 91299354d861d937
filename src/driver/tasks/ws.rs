use super::message::*;
use crate::{
    model::Event as GatewayEvent,
    ws::{Error as WsError, Result as WsResult, WsSink, WsStream},
};
use flume::{Receiver, Sender, TrySendError};
use std::sync::Arc;
use tokio::{select, spawn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};
use tracing_futures::Instrument;
use url::Url;

/// Ordered, bounded queue of control messages waiting for the websocket writer.
///
/// When the queue is full, the oldest waiting message is dropped to make room.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: Sender<GatewayEvent>,
    evict: Arc<Receiver<GatewayEvent>>,
}

impl Outbox {
    pub(crate) fn new(capacity: usize) -> (Self, Receiver<GatewayEvent>) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (
            Self {
                tx,
                evict: Arc::new(rx.clone()),
            },
            rx,
        )
    }

    /// Queues `msg`, returning `false` if the writer has gone away.
    pub(crate) fn send(&self, msg: impl Into<GatewayEvent>) -> bool {
        // The writer holds the only receiver besides our own.
        if self.tx.receiver_count() < 2 {
            return false;
        }

        let mut msg = msg.into();
        loop {
            match self.tx.try_send(msg) {
                Ok(()) => return true,
                Err(TrySendError::Full(m)) => {
                    if let Ok(old) = self.evict.try_recv() {
                        debug!("Outbox full, dropped queued {:?}.", old.kind());
                    }
                    msg = m;
                },
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }
}

fn close_info(e: &WsError) -> CloseInfo {
    CloseInfo {
        code: e.close_code(),
        reason: e.to_string(),
    }
}

/// Runs one websocket attempt: connect, then read until the socket dies or `token`
/// is cancelled.
///
/// Exactly one [`TransportEvent::Closed`] is reported for a failed or dropped socket.
/// Nothing is reported once `token` is cancelled.
#[instrument(skip(url, core, token), fields(url = %url))]
pub(crate) async fn runner(
    url: Url,
    idx: usize,
    queue_len: usize,
    core: Sender<CoreMessage>,
    token: CancellationToken,
) {
    let report = |info: CloseInfo| {
        if !token.is_cancelled() {
            drop(core.send(CoreMessage::Ws(idx, TransportEvent::Closed(info))));
        }
    };

    let stream = select! {
        s = WsStream::connect(&url) => s,
        () = token.cancelled() => return,
    };

    let (sink, mut reader) = match stream {
        Ok(s) => s.split(),
        Err(e) => {
            warn!("Websocket connection failed: {e}.");
            report(close_info(&e));
            return;
        },
    };

    let (outbox, out_rx) = Outbox::new(queue_len);
    if core
        .send(CoreMessage::Ws(idx, TransportEvent::Connected(outbox)))
        .is_err()
    {
        return;
    }

    let mut writer = spawn(writer(sink, out_rx, token.clone()).in_current_span());

    let closed = loop {
        select! {
            msg = reader.recv_json() => match msg {
                Ok(Some(msg)) => {
                    trace!("Received {:?}.", msg);
                    if core.send(CoreMessage::Ws(idx, TransportEvent::Message(msg))).is_err() {
                        break None;
                    }
                },
                Ok(None) => {},
                Err(e) => {
                    debug!("Websocket read ended: {e}.");
                    break Some(close_info(&e));
                },
            },
            res = &mut writer => break match res {
                Ok(Err(e)) => Some(close_info(&e)),
                _ => None,
            },
        }
    };

    writer.abort();

    if let Some(info) = closed {
        report(info);
    }

    trace!("WS reader exited.");
}

async fn writer(
    mut sink: WsSink,
    rx: Receiver<GatewayEvent>,
    token: CancellationToken,
) -> WsResult<()> {
    loop {
        select! {
            biased;
            () = token.cancelled() => break,
            msg = rx.recv_async() => match msg {
                Ok(msg) => {
                    trace!("Sending {:?}.", msg);
                    sink.send_json(&msg).await?;
                },
                Err(_) => break,
            },
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Failed to close websocket cleanly: {e}.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{payload::Heartbeat, OpCode};

    #[test]
    fn full_outbox_drops_oldest() {
        let (outbox, rx) = Outbox::new(2);

        for nonce in 0..5 {
            assert!(outbox.send(Heartbeat { nonce }));
        }

        let left: Vec<_> = rx.drain().collect();
        assert_eq!(left, vec![
            GatewayEvent::from(Heartbeat { nonce: 3 }),
            GatewayEvent::from(Heartbeat { nonce: 4 }),
        ]);
    }

    #[test]
    fn outbox_reports_dead_writer() {
        let (outbox, rx) = Outbox::new(1);
        let clone = outbox.clone();
        assert!(clone.send(GatewayEvent::Resumed));
        assert_eq!(rx.try_recv().map(|e| e.kind()), Ok(OpCode::Resumed));

        drop(rx);
        assert!(!outbox.send(GatewayEvent::Resumed));
        assert!(!clone.send(GatewayEvent::Resumed));
    }
}
