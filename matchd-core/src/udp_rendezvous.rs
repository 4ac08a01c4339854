//! UDP hole-punch rendezvous (spec.md §7).
//!
//! Each emulator sends its quark token as a UDP datagram to this port so
//! the server can see the public address/port its NAT mapped it to. The
//! first arrival for a quark is parked; the second arrival completes the
//! pairing, and each peer is told the other's address so direct UDP
//! traffic between them has a punched hole to flow through.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;

use byteorder::{LittleEndian, WriteBytesExt};
use tokio::net::UdpSocket;

/// Encode a peer address the way an emulator client expects to read it
/// back: four bytes of IPv4 address followed by a little-endian port.
fn encode_peer_addr(addr: SocketAddr) -> Option<Vec<u8>> {
    let IpAddr::V4(ipv4) = addr.ip() else {
        return None;
    };
    let mut out = Vec::with_capacity(6);
    out.extend_from_slice(&ipv4.octets());
    out.write_u16::<LittleEndian>(addr.port()).expect("writes into a Vec<u8> never fail");
    Some(out)
}

/// The one piece of state this service needs: quark token → the address of
/// whichever peer arrived first.
#[derive(Default)]
pub struct RendezvousTable {
    waiting: Mutex<HashMap<String, SocketAddr>>,
}

impl RendezvousTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `addr` as waiting for `quark`, or — if a peer is already
    /// waiting — completes the pairing and returns both addresses in
    /// arrival order (first, second).
    fn pair(&self, quark: &str, addr: SocketAddr) -> Option<(SocketAddr, SocketAddr)> {
        let mut waiting = self.waiting.lock().unwrap();
        if let Some(first) = waiting.remove(quark) {
            Some((first, addr))
        } else {
            waiting.insert(quark.to_string(), addr);
            None
        }
    }
}

/// Runs the rendezvous loop until the socket errors out. Intended to be
/// spawned as its own long-lived task alongside the TCP accept loop.
pub async fn serve(socket: UdpSocket, table: &RendezvousTable) -> std::io::Result<()> {
    let mut buf = [0u8; 512];
    loop {
        let (n, addr) = socket.recv_from(&mut buf).await?;
        let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();

        if text == "ok" || text.is_empty() {
            continue;
        }

        let reply = format!("ok {text}");
        let _ = socket.send_to(reply.as_bytes(), addr).await;

        if let Some((first, second)) = table.pair(&text, addr) {
            if let Some(bytes) = encode_peer_addr(second) {
                let _ = socket.send_to(&bytes, first).await;
            }
            if let Some(bytes) = encode_peer_addr(first) {
                let _ = socket.send_to(&bytes, second).await;
            }
            tracing::info!(quark = %text, %first, %second, "holepunch linked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn first_arrival_waits_second_completes() {
        let table = RendezvousTable::new();
        assert!(table.pair("quark-1", addr(1)).is_none());
        let (first, second) = table.pair("quark-1", addr(2)).unwrap();
        assert_eq!(first, addr(1));
        assert_eq!(second, addr(2));
    }

    #[test]
    fn pairing_consumes_the_waiting_entry() {
        let table = RendezvousTable::new();
        table.pair("quark-1", addr(1));
        table.pair("quark-1", addr(2));
        assert!(table.pair("quark-1", addr(3)).is_none());
    }

    #[test]
    fn encodes_ipv4_address_with_little_endian_port() {
        let bytes = encode_peer_addr(addr(258)).unwrap();
        assert_eq!(&bytes[0..4], &[127, 0, 0, 1]);
        assert_eq!(&bytes[4..6], &258u16.to_le_bytes());
    }
}
