use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tcpsession::{ConnectionId, TcpMessage, TcpPacket};
use tracing::trace;

/// Stitches captured TCP segments back into logical HTTP messages.
///
/// Single-threaded by construction: one packet (or one sweep) at a time
/// mutates the state, so none of the indices need locks. The engine keeps
/// four side-indices over the live messages:
///
/// - `ack_aliases` collapses the two ack numbers of a 100-continue pair
///   onto the canonical one, so both halves land in one message.
/// - `seq_with_data` lets a 100-continue header block announce the
///   sequence number its body will carry, so the body is recognized on
///   arrival — or retroactively, if it arrived first.
/// - `resp_aliases` maps the ack a server response will carry straight to
///   the request message expecting it.
/// - `resp_without_req` holds responses observed before their request
///   finished (segment reordering on busy links).
///
/// Pairing is a relation owned by the engine (`assoc`), not pointers
/// between messages; emitted messages carry their peer's [`ConnectionId`].
pub struct Reassembler {
    port: u16,
    track_response: bool,
    expire: Duration,
    messages: HashMap<ConnectionId, TcpMessage>,
    ack_aliases: HashMap<u32, u32>,
    seq_with_data: HashMap<u32, u32>,
    resp_aliases: HashMap<u32, ConnectionId>,
    resp_without_req: HashMap<u32, ConnectionId>,
    assoc: HashMap<ConnectionId, ConnectionId>,
}

impl Reassembler {
    /// Create an engine for traffic tapped on `port`. Messages idle for
    /// `expire` are evicted by [`sweep`](Self::sweep).
    pub fn new(port: u16, track_response: bool, expire: Duration) -> Self {
        Self {
            port,
            track_response,
            expire,
            messages: HashMap::new(),
            ack_aliases: HashMap::new(),
            seq_with_data: HashMap::new(),
            resp_aliases: HashMap::new(),
            resp_without_req: HashMap::new(),
            assoc: HashMap::new(),
        }
    }

    /// Feed one captured segment; returns every message that completed as
    /// a result, requests always ahead of their responses.
    pub fn process(&mut self, packet: TcpPacket) -> Vec<TcpMessage> {
        let mut out = Vec::new();
        // 100-continue fix-ups tear a message apart and requeue its
        // packets; a worklist bounds that instead of recursing.
        let mut queue = VecDeque::from([packet]);
        while let Some(p) = queue.pop_front() {
            self.process_one(p, &mut queue, &mut out);
        }
        out
    }

    fn process_one(
        &mut self,
        mut packet: TcpPacket,
        queue: &mut VecDeque<TcpPacket>,
        out: &mut Vec<TcpMessage>,
    ) {
        let is_incoming = packet.dst_port == self.port;
        let mut aliased_from = None;

        // A segment whose seq was announced by an Expect: 100-continue
        // header block is the body half of that POST. Any message already
        // accumulated under the body's own ack (later body segments that
        // outran this one) is torn down and its packets reprocessed under
        // the canonical ack, ahead of the current packet.
        if let Some(&parent_ack) = self.seq_with_data.get(&packet.seq)
            && packet.ack() != parent_ack
        {
            let stale: Vec<ConnectionId> = self
                .messages
                .values()
                .filter(|m| m.ack == packet.ack() && m.addr == packet.addr)
                .map(|m| m.id())
                .collect();

            let mut displaced = Vec::new();
            for id in &stale {
                if let Some(m) = self.remove_message(id) {
                    self.unlink_assoc(id);
                    for mut p in m.into_packets() {
                        p.set_ack(parent_ack);
                        displaced.push(p);
                    }
                }
            }

            self.ack_aliases.insert(packet.ack(), parent_ack);
            let headers_id = ConnectionId {
                ack: parent_ack,
                src_port: packet.src_port,
                dst_port: packet.dst_port,
            };
            if let Some(m) = self.messages.get_mut(&headers_id) {
                m.data_ack = packet.ack();
            }
            aliased_from = Some(packet.ack());
            packet.set_ack(parent_ack);

            // Keep the original arrival order: displaced packets first,
            // then this one. Reentry is safe — the ack now matches the
            // canonical one, so this branch cannot trigger again.
            if !displaced.is_empty() {
                displaced.push(packet);
                for p in displaced.into_iter().rev() {
                    queue.push_front(p);
                }
                return;
            }
        }

        if let Some(&alias) = self.ack_aliases.get(&packet.ack()) {
            aliased_from.get_or_insert(packet.ack());
            packet.set_ack(alias);
        }

        // A response may arrive for a request that already predicted its
        // ack; resolve the pairing before the message exists.
        let resp_req = if is_incoming {
            None
        } else {
            self.resp_aliases.get(&packet.ack()).copied()
        };

        let id = packet.id();
        if !self.messages.contains_key(&id) {
            self.messages.insert(id, TcpMessage::new(&packet, is_incoming));
            if !is_incoming {
                match resp_req {
                    Some(req_id) => self.link_assoc(id, req_id),
                    None => {
                        self.resp_without_req.insert(packet.ack(), id);
                    }
                }
            }
        }

        let is_expect_header = packet.has_expect_continue();
        let packet_ack = packet.ack();
        let body_seq = packet.seq_end();

        let header_index = {
            let message = self
                .messages
                .get_mut(&id)
                .expect("message was just ensured");
            message.add(packet);
            if let Some(orig) = aliased_from
                && orig != packet_ack
            {
                message.data_ack = orig;
            }
            message.len() - 1
        };

        if is_expect_header {
            self.register_expect(id, body_seq, packet_ack);
            // Splice the Expect line out of the header block. Done after
            // the merge so the body's seq was computed from wire lengths.
            if let Some(m) = self.messages.get_mut(&id) {
                m.strip_expect_continue(header_index);
            }
        }

        if is_incoming {
            let (stale_ack, response_ack) = {
                let message = self
                    .messages
                    .get_mut(&id)
                    .expect("message was just ensured");
                let stale = (message.len() > 1).then_some(message.response_ack);
                message.update_response_ack();
                (stale, message.response_ack)
            };
            if let Some(stale) = stale_ack {
                self.resp_aliases.remove(&stale);
            }
            self.resp_aliases.insert(response_ack, id);
        }

        if !self.messages.get(&id).is_some_and(TcpMessage::is_finished) {
            return;
        }

        if is_incoming {
            if self.track_response {
                // Hold the request until its response shows up; they are
                // emitted together, request first.
                let resp_id = self.messages.get(&id).map(TcpMessage::response_id);
                if let Some(resp_id) = resp_id
                    && self.messages.contains_key(&resp_id)
                {
                    self.dispatch(id, out);
                    if self
                        .messages
                        .get(&resp_id)
                        .is_some_and(TcpMessage::is_finished)
                    {
                        self.dispatch(resp_id, out);
                    }
                }
            } else {
                self.dispatch(id, out);
            }
        } else {
            let Some(&req_id) = self.assoc.get(&id) else {
                return;
            };
            if self
                .messages
                .get(&req_id)
                .is_some_and(TcpMessage::is_finished)
            {
                self.dispatch(req_id, out);
                self.dispatch(id, out);
            }
        }
    }

    /// Announce that the headers half at `id` expects its body at
    /// `body_seq`, and absorb a body half that arrived first.
    fn register_expect(&mut self, id: ConnectionId, body_seq: u32, parent_ack: u32) {
        self.seq_with_data.insert(body_seq, parent_ack);
        if let Some(m) = self.messages.get_mut(&id) {
            m.data_seq = body_seq;
        }

        let arrived: Vec<ConnectionId> = self
            .messages
            .iter()
            .filter(|(mid, m)| **mid != id && m.seq == body_seq)
            .map(|(mid, _)| *mid)
            .collect();
        for other_id in arrived {
            let Some(other) = self.remove_message(&other_id) else {
                continue;
            };
            if let Some(peer) = self.assoc.remove(&other_id) {
                self.link_assoc(id, peer);
            }
            self.ack_aliases.insert(other.ack, parent_ack);
            if let Some(m) = self.messages.get_mut(&id) {
                m.data_ack = other.ack;
                for mut p in other.into_packets() {
                    p.set_ack(parent_ack);
                    m.add(p);
                }
            }
        }
    }

    /// Emit a message and drop every index key derived from it.
    /// Idempotent: dispatching an id that is no longer live is a no-op.
    ///
    /// Incoming messages leaving the engine adopt any response that was
    /// waiting for them; outgoing messages that never found a request are
    /// dropped silently.
    fn dispatch(&mut self, id: ConnectionId, out: &mut Vec<TcpMessage>) {
        let Some(mut message) = self.messages.remove(&id) else {
            return;
        };
        self.ack_aliases.remove(&message.ack);
        if message.data_ack != 0 {
            self.ack_aliases.remove(&message.data_ack);
        }
        if message.data_seq != 0 {
            self.seq_with_data.remove(&message.data_seq);
        }
        self.resp_aliases.remove(&message.response_ack);

        let mut follow_up = None;

        if message.is_incoming {
            if self.track_response {
                // A response observed before the request completed.
                if let Some(&resp_id) = self.resp_without_req.get(&message.response_ack)
                    && self.messages.contains_key(&resp_id)
                {
                    self.link_assoc(id, resp_id);
                    if self
                        .messages
                        .get(&resp_id)
                        .is_some_and(TcpMessage::is_finished)
                    {
                        follow_up = Some(resp_id);
                    }
                }
                // A live response under the predicted key learns its request.
                let resp_id = message.response_id();
                if self.messages.contains_key(&resp_id) {
                    self.link_assoc(id, resp_id);
                }
            }
        } else {
            if !self.assoc.contains_key(&id)
                && let Some(&req_id) = self.resp_aliases.get(&message.ack)
            {
                self.link_assoc(id, req_id);
            }
            self.resp_aliases.remove(&message.ack);
            self.resp_without_req.remove(&message.ack);

            if !self.assoc.contains_key(&id) {
                trace!(id = %id, "dropping response with no associated request");
                return;
            }
        }

        message.assoc = self.assoc.remove(&id);
        out.push(message);

        if let Some(resp_id) = follow_up {
            self.dispatch(resp_id, out);
        }
    }

    /// Evict every message idle since `expire` ago, emitting what can be
    /// emitted. Incomplete requests go out as-is; responses that never
    /// found their request are dropped.
    pub fn sweep(&mut self, now: Instant) -> Vec<TcpMessage> {
        // Snapshot the ids: dispatch removes entries, including peers of
        // the message being dispatched. Requests go first so a paired
        // response never precedes its request within the batch.
        let mut expired: Vec<(ConnectionId, bool)> = self
            .messages
            .iter()
            .filter(|(_, m)| now.duration_since(m.end()) >= self.expire)
            .map(|(id, m)| (*id, m.is_incoming))
            .collect();
        expired.sort_by_key(|&(_, is_incoming)| !is_incoming);

        let mut out = Vec::new();
        for (id, _) in expired {
            self.dispatch(id, &mut out);
        }
        out
    }

    /// Drop a message and the index keys derived from it, without
    /// emitting. The pairing relation is left to the caller.
    fn remove_message(&mut self, id: &ConnectionId) -> Option<TcpMessage> {
        let message = self.messages.remove(id)?;
        self.ack_aliases.remove(&message.ack);
        if message.data_ack != 0 {
            self.ack_aliases.remove(&message.data_ack);
        }
        if message.data_seq != 0 {
            self.seq_with_data.remove(&message.data_seq);
        }
        self.resp_aliases.remove(&message.response_ack);
        Some(message)
    }

    fn link_assoc(&mut self, a: ConnectionId, b: ConnectionId) {
        self.assoc.insert(a, b);
        self.assoc.insert(b, a);
    }

    fn unlink_assoc(&mut self, id: &ConnectionId) {
        if let Some(peer) = self.assoc.remove(id)
            && self.assoc.get(&peer) == Some(id)
        {
            self.assoc.remove(&peer);
        }
    }

    /// Port whose traffic this engine reassembles.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of messages still being assembled.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when no message is live and every index is clean.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.ack_aliases.is_empty()
            && self.seq_with_data.is_empty()
            && self.resp_aliases.is_empty()
            && self.resp_without_req.is_empty()
            && self.assoc.is_empty()
    }

    /// Canonical ack an aliased ack currently rewrites to.
    pub fn ack_alias(&self, ack: u32) -> Option<u32> {
        self.ack_aliases.get(&ack).copied()
    }
}
