#![allow(missing_docs)]

//! A scripted voice server on loopback: one websocket listener plus one UDP media socket.

use crate::{
    constants::IP_DISCOVERY_LEN,
    driver::{CryptoMode, KEY_SIZE},
    model::{
        payload::{HeartbeatAck, Hello, Ready, SessionDescription},
        Event as GatewayEvent,
        OpCode,
    },
};
use async_tungstenite::{
    tokio::accept_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};
use byteorder::{ByteOrder, NetworkEndian};
use flume::{Receiver, Sender};
use futures::StreamExt;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{
    net::{TcpListener, UdpSocket},
    select,
    spawn,
    time::timeout,
};

pub const MOCK_SSRC: u32 = 42;
pub const MOCK_KEY: [u8; KEY_SIZE] = [9u8; KEY_SIZE];

enum ServerCmd {
    Send(GatewayEvent),
    Close(u16),
    Drop,
}

/// One accepted websocket. Heartbeats are acknowledged without involving the test.
pub struct MockConn {
    from_client: Receiver<GatewayEvent>,
    to_client: Sender<ServerCmd>,
}

impl MockConn {
    pub async fn recv(&self) -> GatewayEvent {
        timeout(Duration::from_secs(5), self.from_client.recv_async())
            .await
            .expect("client went quiet")
            .expect("client hung up")
    }

    /// Receives until a message of `kind` arrives, discarding others.
    pub async fn expect(&self, kind: OpCode) -> GatewayEvent {
        loop {
            let msg = self.recv().await;
            if msg.kind() == kind {
                return msg;
            }
        }
    }

    pub fn send(&self, msg: impl Into<GatewayEvent>) {
        self.to_client.send(ServerCmd::Send(msg.into())).unwrap();
    }

    pub fn close(&self, code: u16) {
        self.to_client.send(ServerCmd::Close(code)).unwrap();
    }

    pub fn drop_socket(&self) {
        self.to_client.send(ServerCmd::Drop).unwrap();
    }

    /// Resolves once the client closes or drops this socket.
    pub async fn closed(&self) {
        while self.from_client.recv_async().await.is_ok() {}
    }
}

pub struct MockServer {
    pub endpoint: String,
    pub media_addr: SocketAddr,
    pub packets: Receiver<Vec<u8>>,
    conns: Receiver<MockConn>,
}

impl MockServer {
    pub async fn new() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}/", listener.local_addr().unwrap());
        let (conn_tx, conns) = flume::unbounded();
        spawn(serve_ws(listener, conn_tx));

        let media = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let media_addr = media.local_addr().unwrap();
        let (packet_tx, packets) = flume::unbounded();
        spawn(serve_media(media, packet_tx));

        Self {
            endpoint,
            media_addr,
            packets,
            conns,
        }
    }

    pub async fn accept(&self) -> MockConn {
        timeout(Duration::from_secs(5), self.conns.recv_async())
            .await
            .expect("client never connected")
            .unwrap()
    }

    pub fn ready(&self, modes: &[&str]) -> Ready {
        Ready {
            ssrc: MOCK_SSRC,
            ip: self.media_addr.ip(),
            port: self.media_addr.port(),
            modes: modes.iter().map(|m| (*m).to_string()).collect(),
        }
    }

    /// Runs a full Identify handshake on `conn`, returning the protocol the client selected.
    pub async fn handshake(&self, conn: &MockConn, mode: CryptoMode) -> GatewayEvent {
        conn.send(Hello {
            heartbeat_interval: 50.0,
        });
        conn.expect(OpCode::Identify).await;
        conn.send(self.ready(&[mode.to_request_str()]));

        let select = conn.expect(OpCode::SelectProtocol).await;
        conn.expect(OpCode::ClientConnect).await;

        conn.send(SessionDescription {
            mode: mode.to_request_str().into(),
            secret_key: MOCK_KEY.to_vec(),
        });

        select
    }

    pub async fn next_packet(&self) -> Vec<u8> {
        timeout(Duration::from_secs(5), self.packets.recv_async())
            .await
            .expect("no voice packet arrived")
            .unwrap()
    }
}

async fn serve_ws(listener: TcpListener, conns: Sender<MockConn>) {
    while let Ok((tcp, _)) = listener.accept().await {
        let Ok(mut ws) = accept_async(tcp).await else {
            continue;
        };

        let (evt_tx, from_client) = flume::unbounded();
        let (to_client, cmd_rx) = flume::unbounded();
        if conns
            .send(MockConn {
                from_client,
                to_client,
            })
            .is_err()
        {
            break;
        }

        spawn(async move {
            loop {
                select! {
                    msg = ws.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let Ok(evt) = serde_json::from_str::<GatewayEvent>(&text) else {
                                continue;
                            };
                            if let GatewayEvent::Heartbeat(hb) = evt {
                                let ack = GatewayEvent::from(HeartbeatAck { nonce: hb.nonce });
                                let text = serde_json::to_string(&ack).unwrap();
                                if ws.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            } else if evt_tx.send(evt).is_err() {
                                break;
                            }
                        },
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {},
                    },
                    cmd = cmd_rx.recv_async() => match cmd {
                        Ok(ServerCmd::Send(evt)) => {
                            let text = serde_json::to_string(&evt).unwrap();
                            if ws.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        },
                        Ok(ServerCmd::Close(code)) => {
                            drop(ws.send(Message::Close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: "mock close".into(),
                            }))).await);
                            break;
                        },
                        Ok(ServerCmd::Drop) | Err(_) => break,
                    },
                }
            }
        });
    }
}

async fn serve_media(socket: UdpSocket, packets: Sender<Vec<u8>>) {
    let mut buf = [0u8; 2048];
    while let Ok((len, from)) = socket.recv_from(&mut buf).await {
        let datagram = &buf[..len];
        let is_discovery = len == IP_DISCOVERY_LEN && datagram[4..].iter().all(|&b| b == 0);

        if is_discovery {
            let mut reply = [0u8; IP_DISCOVERY_LEN];
            reply[..4].copy_from_slice(&datagram[..4]);
            let address = IpAddr::V4(Ipv4Addr::LOCALHOST).to_string();
            reply[4..4 + address.len()].copy_from_slice(address.as_bytes());
            NetworkEndian::write_u16(&mut reply[68..], from.port());
            drop(socket.send_to(&reply, from).await);
        } else if packets.send(datagram.to_vec()).is_err() {
            break;
        }
    }
}
