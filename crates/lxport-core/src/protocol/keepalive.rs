//! Keepalive payload and thresholds.
//!
//! Every holder is probed with a WebSocket ping once per
//! [`KEEPALIVE_INTERVAL`].  The ping payload is the sender's current Unix time
//! in seconds, encoded as 8 little-endian bytes; the peer echoes it verbatim in
//! its pong.  A holder that has more than [`MAX_MISSED_PONGS`] pings
//! outstanding is considered dead.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// How often the watchdog probes every live holder.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// A holder with more than this many unanswered pings is closed.
pub const MAX_MISSED_PONGS: u32 = 3;

/// Longest a probe waits to write its ping before counting it as unanswered.
pub const PING_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Size of the timestamp payload carried by a ping.
pub const PING_PAYLOAD_LEN: usize = 8;

/// Encodes `unix_secs` as a ping payload.
pub fn timestamp_payload(unix_secs: u64) -> [u8; PING_PAYLOAD_LEN] {
    unix_secs.to_le_bytes()
}

/// Builds a ping payload for the current system time.
pub fn now_payload() -> [u8; PING_PAYLOAD_LEN] {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    timestamp_payload(secs)
}

/// Reads the timestamp back out of a pong payload.
///
/// Returns `None` if the payload is not exactly 8 bytes (for example a pong
/// the peer sent on its own initiative).
pub fn parse_timestamp(payload: &[u8]) -> Option<u64> {
    let bytes: [u8; PING_PAYLOAD_LEN] = payload.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_payload_is_little_endian() {
        let payload = timestamp_payload(0x0102_0304_0506_0708);
        assert_eq!(payload, [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_parse_timestamp_reads_back_payload() {
        let payload = timestamp_payload(1_700_000_000);
        assert_eq!(parse_timestamp(&payload), Some(1_700_000_000));
    }

    #[test]
    fn test_parse_timestamp_rejects_wrong_length() {
        assert_eq!(parse_timestamp(&[1, 2, 3]), None);
        assert_eq!(parse_timestamp(&[]), None);
    }

    #[test]
    fn test_now_payload_is_after_2020() {
        let secs = parse_timestamp(&now_payload()).unwrap();
        assert!(secs > 1_577_836_800, "clock reads {secs}");
    }
}
