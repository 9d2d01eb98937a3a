//! Per-session reliability state, decoupled from I/O so it can be
//! exercised directly in tests. `Session` knows nothing about sockets,
//! timers, or retransmission cadence — it only answers "what changed"
//! questions for the driver in `protocol` to act on.

/// Tracks a session's receive and send byte streams as described by the
/// `recv_high_water` / `send_high_water` invariants: everything below
/// the high-water mark is durable, everything above is provisional.
#[derive(Debug, Default)]
pub struct Session {
    recv_buf: Vec<u8>,
    /// Fragments that arrived ahead of the high-water mark, keyed by
    /// their starting offset. Drained into `recv_buf` as soon as the
    /// gap in front of them closes.
    pending: std::collections::BTreeMap<u32, Vec<u8>>,
    send_buf: Vec<u8>,
    last_peer_ack: u32,
    write_closed: bool,
}

impl Session {
    #[must_use]
    pub fn recv_high_water(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        {
            self.recv_buf.len() as u32
        }
    }

    #[must_use]
    pub fn send_high_water(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        {
            self.send_buf.len() as u32
        }
    }

    #[must_use]
    pub fn last_peer_ack(&self) -> u32 {
        self.last_peer_ack
    }

    /// Applies an incoming `data/S/P/X`. Returns the ack position to send
    /// back and any bytes that just became newly contiguous — empty when
    /// `P` is beyond the high-water mark and doesn't close a pending gap.
    ///
    /// A fragment that lands ahead of the high-water mark is held in
    /// `pending` rather than dropped: once an earlier fragment fills the
    /// gap in front of it, it is spliced in too, possibly delivering
    /// bytes from several out-of-order fragments in one call.
    pub fn on_data(&mut self, pos: u32, payload: &[u8]) -> (u32, Vec<u8>) {
        let mut delivered = Vec::new();
        self.merge_at(pos, payload.to_vec(), &mut delivered);

        loop {
            let hw = self.recv_high_water();
            let next_start = self
                .pending
                .iter()
                .find(|(&start, bytes)| {
                    start <= hw && u64::from(start) + bytes.len() as u64 > u64::from(hw)
                })
                .map(|(&start, _)| start);

            let Some(start) = next_start else { break };
            let bytes = self.pending.remove(&start).expect("just located this key");
            self.merge_at(start, bytes, &mut delivered);
        }

        (self.recv_high_water(), delivered)
    }

    fn merge_at(&mut self, pos: u32, payload: Vec<u8>, delivered: &mut Vec<u8>) {
        let hw = self.recv_high_water();

        if pos > hw {
            self.pending.entry(pos).or_insert(payload);
            return;
        }

        let end = u64::from(pos) + payload.len() as u64;
        if end > u64::from(hw) {
            #[allow(clippy::cast_possible_truncation)]
            let skip = (u64::from(hw) - u64::from(pos)) as usize;
            let new_bytes = &payload[skip..];
            self.recv_buf.extend_from_slice(new_bytes);
            delivered.extend_from_slice(new_bytes);
        }
    }

    /// Records a peer ack. Callers must check `length <=
    /// send_high_water()` *before* calling this — that is a protocol
    /// violation the driver handles by closing the session outright.
    pub fn on_ack(&mut self, length: u32) {
        self.last_peer_ack = length;
    }

    /// Appends application bytes to the send buffer; the driver chunks
    /// and transmits `unacked()` afterwards.
    pub fn queue_outbound(&mut self, bytes: &[u8]) {
        self.send_buf.extend_from_slice(bytes);
    }

    /// Bytes sent but not yet acked by the peer.
    #[must_use]
    pub fn unacked(&self) -> &[u8] {
        &self.send_buf[self.last_peer_ack as usize..]
    }

    pub fn close_writes(&mut self) {
        self.write_closed = true;
    }

    #[must_use]
    pub fn write_closed(&self) -> bool {
        self.write_closed
    }
}
