use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Timestamp oracle: wall-clock microseconds, bumped so that every value
/// handed out is strictly greater than the previous one.
#[derive(Debug, Default)]
pub struct TsoClock {
    last: AtomicI64,
}

impl TsoClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_ts(&self) -> i64 {
        let wall = Utc::now().timestamp_micros();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::TsoClock;

    #[test]
    fn strictly_increasing_across_threads() {
        let clock = Arc::new(TsoClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || (0..1000).map(|_| clock.next_ts()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread"))
            .collect();
        for per_thread in all.chunks(1000) {
            assert!(per_thread.windows(2).all(|w| w[0] < w[1]));
        }
        let n = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), n);
    }
}
