/// Injected time source (§2 Clock/ExecutorPool). Every component that needs
/// "now" or a timeout deadline takes a `Arc<dyn Clock>` rather than calling
/// `SystemTime::now()` directly, so restart-budget windows, vote windows,
/// and stabilization periods are deterministically testable.
///
/// The "ExecutorPool" half of that component has no separate abstraction
/// here: the cooperative task pool is simply the injected `tokio` runtime,
/// the same way the corpus this crate is grounded on treats `tokio::spawn`
/// as ambient rather than something to wrap.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock a test can advance explicitly, for deterministic restart-budget
/// and timeout assertions without real sleeps.
#[derive(Debug)]
pub struct TestClock {
    now: std::sync::atomic::AtomicI64,
}

impl TestClock {
    pub fn new(start_ms: i64) -> Self {
        TestClock {
            now: std::sync::atomic::AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> i64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_monotonically_on_request() {
        let clock = TestClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
    }
}
