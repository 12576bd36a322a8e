//! Monotonic millisecond clock used to stamp packets on arrival.

use once_cell::sync::Lazy;
use quanta::Instant;

static ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds elapsed since the first call into the clock in this process.
///
/// Monotonic; never goes backwards across threads.
pub fn now_ms() -> u64 {
    let elapsed = Instant::now().saturating_duration_since(*ANCHOR);
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_monotonic() {
        let a = now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = now_ms();
        assert!(b >= a + 5, "a={a} b={b}");
    }
}
