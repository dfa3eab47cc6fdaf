use std::time::Instant;

use crate::http1::{self, HttpRequest, HttpResponse};
use crate::packet::{ConnectionId, TcpPacket};

/// The segments of one logical HTTP request or response.
///
/// Packets are kept in insertion order but assembled in sequence-number
/// order; the message is the unit the reassembly engine indexes, expires
/// and finally emits. The `data_seq`/`data_ack`/`response_ack` fields are
/// projections the engine maintains to find this message's other half:
/// the body segment of a 100-continue POST, or the server response that
/// will acknowledge the request's last byte.
#[derive(Debug, Clone)]
pub struct TcpMessage {
    /// Sequence number of the first packet added
    pub seq: u32,
    /// Acknowledgement number shared by this message's packets
    pub ack: u32,
    /// Source IP of the first packet added
    pub addr: std::net::IpAddr,
    /// Source port of the first packet added
    pub src_port: u16,
    /// Destination port of the first packet added
    pub dst_port: u16,
    /// Whether this travels toward the tapped port (a request)
    pub is_incoming: bool,
    /// For the headers half of a 100-continue POST: the sequence number
    /// its body half will carry. Zero otherwise.
    pub data_seq: u32,
    /// For a message that absorbed a 100-continue body half: the body's
    /// original, pre-alias ack. Zero otherwise.
    pub data_ack: u32,
    /// Ack number the server's response will carry: the sequence number
    /// one past this message's last payload byte. Incoming messages only.
    pub response_ack: u32,
    /// Connection key of the paired message in the other direction,
    /// stamped by the engine when this message is emitted.
    pub assoc: Option<ConnectionId>,
    packets: Vec<TcpPacket>,
    start: Instant,
    end: Instant,
}

impl TcpMessage {
    /// Start a message from the packet that opens it. The packet itself is
    /// still added with [`add`](Self::add).
    pub fn new(first: &TcpPacket, is_incoming: bool) -> Self {
        Self {
            seq: first.seq,
            ack: first.ack(),
            addr: first.addr,
            src_port: first.src_port,
            dst_port: first.dst_port,
            is_incoming,
            data_seq: 0,
            data_ack: 0,
            response_ack: 0,
            assoc: None,
            packets: Vec::with_capacity(1),
            start: first.arrived_at,
            end: first.arrived_at,
        }
    }

    /// Append a packet, widening the message's time window.
    pub fn add(&mut self, packet: TcpPacket) {
        self.start = self.start.min(packet.arrived_at);
        self.end = self.end.max(packet.arrived_at);
        self.packets.push(packet);
    }

    /// Connection key this message lives under.
    pub fn id(&self) -> ConnectionId {
        ConnectionId {
            ack: self.ack,
            src_port: self.src_port,
            dst_port: self.dst_port,
        }
    }

    /// Predicted connection key of the paired response: ports swapped,
    /// ack set to [`response_ack`](Self::response_ack).
    pub fn response_id(&self) -> ConnectionId {
        ConnectionId {
            ack: self.response_ack,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }

    /// Recompute [`response_ack`](Self::response_ack) from the packet that
    /// reaches furthest into the stream. Called after every append on the
    /// incoming side.
    pub fn update_response_ack(&mut self) {
        if let Some(last) = self.packets.iter().max_by_key(|p| p.seq_end()) {
            self.response_ack = last.seq_end();
        }
    }

    /// Earliest packet arrival.
    pub fn start(&self) -> Instant {
        self.start
    }

    /// Latest packet arrival; the expiration sweep measures idleness from
    /// here.
    pub fn end(&self) -> Instant {
        self.end
    }

    /// Packets in insertion order.
    pub fn packets(&self) -> &[TcpPacket] {
        &self.packets
    }

    /// Number of packets collected so far.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// True when no packet has been added yet.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Tear the message apart for re-association under a different ack.
    pub fn into_packets(self) -> Vec<TcpPacket> {
        self.packets
    }

    /// Splice the `Expect: 100-continue` line out of the packet at
    /// `index` (insertion order).
    pub fn strip_expect_continue(&mut self, index: usize) {
        if let Some(p) = self.packets.get_mut(index) {
            p.strip_expect_continue();
        }
    }

    /// Concatenated payload in sequence order, ties broken by arrival.
    pub fn bytes(&self) -> Vec<u8> {
        self.ordered()
            .iter()
            .flat_map(|p| p.payload().iter().copied())
            .collect()
    }

    /// True once the payload is gapless in sequence order and parses as a
    /// complete HTTP/1.x message: headers received, and the body either
    /// satisfies its `Content-Length`, ends with the terminal chunk, or is
    /// absent by method/status rules.
    pub fn is_finished(&self) -> bool {
        let Some(data) = self.contiguous_bytes() else {
            return false;
        };
        if self.is_incoming {
            http1::request_complete(&data)
        } else {
            http1::response_complete(&data)
        }
    }

    /// Typed view of a finished incoming message.
    pub fn to_request(&self) -> Option<HttpRequest> {
        http1::try_parse_request(&self.contiguous_bytes()?)
    }

    /// Typed view of a finished outgoing message.
    pub fn to_response(&self) -> Option<HttpResponse> {
        http1::try_parse_response(&self.contiguous_bytes()?)
    }

    fn ordered(&self) -> Vec<&TcpPacket> {
        let mut ordered: Vec<&TcpPacket> = self.packets.iter().collect();
        ordered.sort_by_key(|p| p.seq);
        ordered
    }

    /// Payload in sequence order, or `None` while there is a gap. The
    /// advance per packet counts spliced-out bytes, so a stripped `Expect`
    /// line does not read as a hole in the stream.
    fn contiguous_bytes(&self) -> Option<Vec<u8>> {
        let ordered = self.ordered();
        let mut expected = ordered.first()?.seq;
        let mut data = Vec::new();
        for p in ordered {
            if p.seq != expected {
                return None;
            }
            data.extend_from_slice(p.payload());
            expected = p.seq_end();
        }
        Some(data)
    }
}
