//! Raw IP socket backend.
//!
//! A raw socket sees every TCP packet on the host regardless of port, so
//! the port filter runs in user space. The kernel delivers IPv4 packets
//! with their IP header attached; IPv6 raw sockets deliver the transport
//! payload directly.

use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::{SNAPLEN, build_record, wants_segment};
use crate::error::{CaptureError, Result};
use crate::listener::ListenerConfig;

/// Open the socket and hand it to a capture thread. Bind errors are
/// fatal; everything after that is best-effort.
pub(crate) fn start(
    config: &ListenerConfig,
    expire: Duration,
    records: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let socket = open(&config.addr, expire)?;
    let port = config.port;
    let track_response = config.track_response;
    std::thread::Builder::new()
        .name("httptap-rawsock".into())
        .spawn(move || run(socket, port, track_response, records, shutdown))?;
    Ok(())
}

fn open(addr: &str, expire: Duration) -> Result<Socket> {
    let ip: IpAddr = if addr.is_empty() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        addr.parse()
            .map_err(|_| CaptureError::BindAddr(addr.to_string()))?
    };
    let domain = if ip.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::RAW, Some(Protocol::TCP))?;
    socket.bind(&SockAddr::from(SocketAddr::new(ip, 0)))?;
    // The timeout doubles as the shutdown poll interval.
    socket.set_read_timeout(Some(expire))?;
    Ok(socket)
}

fn run(
    socket: Socket,
    port: u16,
    track_response: bool,
    records: mpsc::Sender<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
) {
    let mut buf = [MaybeUninit::<u8>::uninit(); SNAPLEN];

    loop {
        if *shutdown.borrow() {
            break;
        }
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(read) => read,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(e) => {
                if *shutdown.borrow() {
                    break;
                }
                warn!(error = %e, "raw socket read failed");
                continue;
            }
        };

        // SAFETY: recv_from initialized the first `len` bytes of `buf`.
        let data = unsafe { std::slice::from_raw_parts(buf.as_ptr().cast::<u8>(), len) };

        let Some((src, segment)) = strip_ip_header(data, &from) else {
            continue;
        };
        if !wants_segment(segment, port, track_response) {
            continue;
        }
        if records.try_send(build_record(src, segment)).is_err() {
            debug!("inbound queue full; dropping raw socket packet");
        }
    }
    debug!("raw socket capture stopped");
}

/// Locate the TCP segment and its source address in a raw socket read.
fn strip_ip_header<'a>(data: &'a [u8], from: &SockAddr) -> Option<(IpAddr, &'a [u8])> {
    if let Some(SocketAddr::V6(v6)) = from.as_socket() {
        // No IP header on IPv6 raw sockets; the sender address says who.
        return Some((IpAddr::V6(*v6.ip()), data));
    }
    if data.first()? >> 4 != 4 {
        return None;
    }
    let header_len = (data[0] & 0x0F) as usize * 4;
    if data.len() <= header_len || header_len < 20 {
        return None;
    }
    let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    Some((IpAddr::V4(src), &data[header_len..]))
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use socket2::SockAddr;

    use super::strip_ip_header;

    fn ipv4_packet(src: [u8; 4], tcp: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; 20];
        data[0] = 0x45; // version 4, IHL 5
        data[12..16].copy_from_slice(&src);
        data.extend_from_slice(tcp);
        data
    }

    fn v4_from() -> SockAddr {
        SockAddr::from(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)), 0))
    }

    #[test]
    fn test_strip_ipv4_header() {
        let data = ipv4_packet([192, 168, 0, 7], b"TCPSEGMENT");
        let (src, segment) = strip_ip_header(&data, &v4_from()).unwrap();
        assert_eq!(src, IpAddr::V4(Ipv4Addr::new(192, 168, 0, 7)));
        assert_eq!(segment, b"TCPSEGMENT");
    }

    #[test]
    fn test_strip_ipv4_with_options() {
        let mut data = vec![0u8; 24];
        data[0] = 0x46; // IHL 6: four bytes of options
        data[12..16].copy_from_slice(&[10, 0, 0, 1]);
        data.extend_from_slice(b"SEG");
        let (_, segment) = strip_ip_header(&data, &v4_from()).unwrap();
        assert_eq!(segment, b"SEG");
    }

    #[test]
    fn test_strip_rejects_truncated() {
        // IHL claims 15 words but the packet is 20 bytes.
        let mut data = ipv4_packet([10, 0, 0, 1], b"SEG");
        data[0] = 0x4F;
        assert!(strip_ip_header(&data, &v4_from()).is_none());
        assert!(strip_ip_header(&[], &v4_from()).is_none());
    }
}
