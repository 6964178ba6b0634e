//! Records the durations of handled requests.
//!
//! An [Average](Average) is internally mutable without needing a mutable reference as it only
//! relies on atomic intrinsics. Therefore a single instance per route can be shared by all
//! workers which serve this route.
//!
//! # Example
//!
//! ```
//! # use tally::average::Average;
//! let avg = Average::new();
//! avg.add(10);
//! avg.add(20);
//! avg.add(30);
//!
//! assert_eq!(avg.avg(), 20);
//! assert_eq!(avg.max(), 30);
//! assert_eq!(avg.count(), 3);
//! ```
use crate::fmt::format_micros;
use std::fmt;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

/// Keeps the number of recorded values along with their sum and maximum.
///
/// Values are durations in microseconds. The sum saturates instead of wrapping around, which
/// takes far longer than any benchmark run.
#[derive(Default)]
pub struct Average {
    count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl Clone for Average {
    fn clone(&self) -> Self {
        Average {
            count: AtomicU64::new(self.count.load(Ordering::Relaxed)),
            sum: AtomicU64::new(self.sum.load(Ordering::Relaxed)),
            max: AtomicU64::new(self.max.load(Ordering::Relaxed)),
        }
    }
}

impl Average {
    /// Creates a new average.
    pub fn new() -> Average {
        Average::default()
    }

    /// Records another value.
    pub fn add(&self, value: i32) {
        let value = value.max(0) as u64;

        let _ = self.count.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .sum
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |sum| {
                Some(sum.saturating_add(value))
            });
        let _ = self.max.fetch_max(value, Ordering::Relaxed);
    }

    /// Returns the total number of recorded values.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Returns the largest value recorded so far.
    pub fn max(&self) -> i32 {
        self.max.load(Ordering::Relaxed).min(i32::MAX as u64) as i32
    }

    /// Computes the average of all recorded values.
    pub fn avg(&self) -> i32 {
        let count = self.count();
        if count == 0 {
            0
        } else {
            (self.sum.load(Ordering::Relaxed) / count).min(i32::MAX as u64) as i32
        }
    }
}

impl Display for Average {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_micros(self.avg(), f)?;
        write!(f, " ({})", self.count())
    }
}

#[cfg(test)]
mod test {
    use crate::average::Average;

    #[test]
    fn empty_average_is_properly_initialized() {
        let avg = Average::new();
        assert_eq!(avg.avg(), 0);
        assert_eq!(avg.max(), 0);
        assert_eq!(avg.count(), 0);
    }

    #[test]
    fn average_with_some_values_works() {
        let avg = Average::new();
        for i in 1..=10 {
            avg.add(i);
        }
        assert_eq!(avg.avg(), 5);
        assert_eq!(avg.max(), 10);
        assert_eq!(avg.count(), 10);
    }

    #[test]
    fn formatting_average_works() {
        let avg = Average::new();
        avg.add(10_123);
        assert_eq!(format!("{}", avg), "10.1 ms (1)");
    }

    #[test]
    fn negative_values_count_as_zero() {
        let avg = Average::new();
        avg.add(-5);
        avg.add(5);
        assert_eq!(avg.avg(), 2);
        assert_eq!(avg.count(), 2);
    }
}
