//! Keepalive with PING/PONG and RTT measurement.
//!
//! Pings carry a correlation ID derived from monotonic time; the matching
//! pong echoes it back so the round-trip time can be measured.

use bytes::Bytes;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outstanding pings older than this are forgotten
const OUTSTANDING_TTL: Duration = Duration::from_secs(60);

/// Generate a correlation ID based on monotonic time
pub fn now_corr_id() -> u64 {
    static START: once_cell::sync::Lazy<Instant> = once_cell::sync::Lazy::new(Instant::now);
    let elapsed_ns = START.elapsed().as_nanos();
    (elapsed_ns & 0xFFFF_FFFF_FFFF_FFFF) as u64
}

/// Encode a correlation ID as a ping payload
pub fn ping_payload(corr_id: u64) -> Bytes {
    Bytes::copy_from_slice(&corr_id.to_be_bytes())
}

/// Decode a pong payload; foreign pongs (wrong size) yield `None`
pub fn parse_pong_payload(payload: &[u8]) -> Option<u64> {
    let raw: [u8; 8] = payload.try_into().ok()?;
    Some(u64::from_be_bytes(raw))
}

/// Keepalive state tracking for one connection
#[derive(Debug, Default)]
pub struct KeepaliveState {
    /// Outstanding PING correlation IDs and their send times
    outstanding: HashMap<u64, Instant>,
}

impl KeepaliveState {
    /// Record a PING being sent
    pub fn record_ping(&mut self, corr_id: u64) {
        let now = Instant::now();
        self.outstanding.insert(corr_id, now);
        self.outstanding
            .retain(|_, sent| now.duration_since(*sent) < OUTSTANDING_TTL);
    }

    /// Process a PONG payload and return RTT if its correlation ID was outstanding
    pub fn process_pong(&mut self, payload: &[u8]) -> Option<Duration> {
        let corr_id = parse_pong_payload(payload)?;
        self.outstanding.remove(&corr_id).map(|sent| sent.elapsed())
    }

    /// Number of pings awaiting a pong
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }
}
