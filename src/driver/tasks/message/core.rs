#![allow(missing_docs)]

use super::TransportEvent;
use crate::{
    driver::{
        connection::{
            error::{Error, Result},
            ConnectionUpdate,
        },
        Config,
        FrameSource,
    },
    events::EventData,
};
use flume::Sender;
use std::{fmt, net::IpAddr, sync::Arc};
use tokio::{net::UdpSocket, time::Instant};

pub struct Discovery {
    pub udp: UdpSocket,
    pub address: IpAddr,
    pub port: u16,
}

pub enum CoreMessage {
    Start(Sender<Result<()>>),
    Stop,
    SetConnectionInfo(ConnectionUpdate),
    SetFrameSource(Arc<dyn FrameSource>),
    SetConfig(Config),
    AddEvent(EventData),
    RemoveGlobalEvents,

    // Task reports, tagged with the connection attempt they belong to.
    Ws(usize, TransportEvent),
    Discovered(usize, Result<Discovery>),
    HeartbeatSent(usize, u64, Instant),
    PollerFailed(usize, Error),

    Poison,
}

impl fmt::Debug for CoreMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start(_) => write!(f, "Start"),
            Self::Stop => write!(f, "Stop"),
            Self::SetConnectionInfo(u) => write!(f, "SetConnectionInfo({u:?})"),
            Self::SetFrameSource(_) => write!(f, "SetFrameSource"),
            Self::SetConfig(c) => write!(f, "SetConfig({c:?})"),
            Self::AddEvent(e) => write!(f, "AddEvent({e:?})"),
            Self::RemoveGlobalEvents => write!(f, "RemoveGlobalEvents"),
            Self::Ws(i, e) => write!(f, "Ws({i}, {e:?})"),
            Self::Discovered(i, r) => write!(
                f,
                "Discovered({i}, {:?})",
                r.as_ref().map(|d| (d.address, d.port))
            ),
            Self::HeartbeatSent(i, n, _) => write!(f, "HeartbeatSent({i}, {n})"),
            Self::PollerFailed(i, e) => write!(f, "PollerFailed({i}, {e:?})"),
            Self::Poison => write!(f, "Poison"),
        }
    }
}
