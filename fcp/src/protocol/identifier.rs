//! Request identifier generation
// (c) 2026 Ross Younger

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Allocates an identifier for a request.
///
/// The result combines wall-clock microseconds, a process-wide sequence number and a random component.
/// The sequence number guarantees uniqueness within this process even when the clock does not advance;
/// the other two parts keep identifiers from separate processes (and reconnects) apart.
///
/// Identifiers always start with `id`, so they cannot be mistaken for filesystem paths.
#[must_use]
pub fn unique_id() -> String {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_micros());
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let salt: u32 = rand::random();
    format!("id{micros:x}-{seq:x}-{salt:08x}")
}
