//! UDP IP discovery, used to learn this client's externally visible address.

use super::error::{Error, Result};
use crate::constants::IP_DISCOVERY_LEN;
use byteorder::{ByteOrder, NativeEndian, NetworkEndian};
use std::{net::IpAddr, str::FromStr};
use tokio::net::UdpSocket;
use tracing::{debug, instrument};

const ADDRESS_RANGE: std::ops::Range<usize> = 4..68;

/// Builds the discovery request for `ssrc`.
pub(crate) fn discovery_request(ssrc: u32) -> [u8; IP_DISCOVERY_LEN] {
    let mut bytes = [0u8; IP_DISCOVERY_LEN];
    NativeEndian::write_u32(&mut bytes[..4], ssrc);
    bytes
}

/// Extracts the address and port reported in a discovery reply.
pub(crate) fn parse_discovery_response(bytes: &[u8]) -> Result<(IpAddr, u16)> {
    if bytes.len() != IP_DISCOVERY_LEN {
        return Err(Error::IllegalDiscoveryResponse);
    }

    // The address is NUL-padded; spoofing precludes assuming anything past the
    // first NUL, so we only trust the prefix.
    let raw = &bytes[ADDRESS_RANGE];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());

    let address = std::str::from_utf8(&raw[..end])
        .ok()
        .and_then(|s| IpAddr::from_str(s).ok())
        .ok_or(Error::IllegalIp)?;
    let port = NetworkEndian::read_u16(&bytes[ADDRESS_RANGE.end..]);

    Ok((address, port))
}

/// Sends a discovery request over a connected socket, and waits for the first
/// well-formed reply.
///
/// Datagrams of any other size are skipped. This does not time out by itself.
#[instrument(skip(udp))]
pub(crate) async fn discover(udp: &UdpSocket, ssrc: u32) -> Result<(IpAddr, u16)> {
    udp.send(&discovery_request(ssrc)).await?;

    let mut bytes = [0u8; IP_DISCOVERY_LEN + 1];
    loop {
        let len = udp.recv(&mut bytes).await?;
        if len == IP_DISCOVERY_LEN {
            return parse_discovery_response(&bytes[..len]);
        }

        debug!("Ignoring {len}B datagram during IP discovery.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(address: &str, port: u16) -> [u8; IP_DISCOVERY_LEN] {
        let mut bytes = [0u8; IP_DISCOVERY_LEN];
        bytes[4..4 + address.len()].copy_from_slice(address.as_bytes());
        NetworkEndian::write_u16(&mut bytes[68..], port);
        bytes
    }

    #[test]
    fn request_carries_ssrc() {
        let bytes = discovery_request(0xAABB_CCDD);
        assert_eq!(NativeEndian::read_u32(&bytes[..4]), 0xAABB_CCDD);
        assert!(bytes[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn reply_parses_address_and_port() {
        let mut bytes = reply("203.0.113.5", 0);
        bytes[68] = 0x1F;
        bytes[69] = 0x90;

        let (address, port) = parse_discovery_response(&bytes).unwrap();
        assert_eq!(address, "203.0.113.5".parse::<IpAddr>().unwrap());
        assert_eq!(port, 8080);
    }

    #[test]
    fn reply_parses_ipv6() {
        let (address, port) = parse_discovery_response(&reply("2001:db8::1", 50000)).unwrap();
        assert_eq!(address, "2001:db8::1".parse::<IpAddr>().unwrap());
        assert_eq!(port, 50000);
    }

    #[test]
    fn malformed_replies_are_rejected() {
        assert!(matches!(
            parse_discovery_response(&[0u8; 12]),
            Err(Error::IllegalDiscoveryResponse)
        ));
        assert!(matches!(
            parse_discovery_response(&reply("not-an-ip", 1)),
            Err(Error::IllegalIp)
        ));
    }

    #[tokio::test]
    #[ntest::timeout(5_000)]
    async fn discovery_skips_short_datagrams() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.local_addr().unwrap()).await.unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 128];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, IP_DISCOVERY_LEN);
            assert_eq!(NativeEndian::read_u32(&buf[..4]), 77);

            server.send_to(&[1, 2, 3], from).await.unwrap();
            server.send_to(&reply("127.0.0.1", 4321), from).await.unwrap();
        });

        let (address, port) = discover(&client, 77).await.unwrap();
        assert_eq!(address, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(port, 4321);
        responder.await.unwrap();
    }
}
