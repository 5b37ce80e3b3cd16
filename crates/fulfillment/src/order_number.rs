//! Human-readable order numbers.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Datelike, Utc};
use uuid::Uuid;

/// Produces candidate order numbers.
///
/// Uniqueness is enforced by the repository; a generator only has to make
/// collisions unlikely.
pub trait OrderNumberGenerator: Send + Sync {
    fn next_number(&self) -> String;
}

/// `ORD-<year>-<6 digits>` with random digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomOrderNumbers;

impl OrderNumberGenerator for RandomOrderNumbers {
    fn next_number(&self) -> String {
        let digits = Uuid::new_v4().as_u128() % 1_000_000;
        format!("ORD-{}-{:06}", Utc::now().year(), digits)
    }
}

/// Hands out a fixed list of numbers in order, then repeats the last one.
#[derive(Debug)]
pub struct SequenceOrderNumbers {
    numbers: Vec<String>,
    next: AtomicUsize,
}

impl SequenceOrderNumbers {
    pub fn new<I, S>(numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            numbers: numbers.into_iter().map(Into::into).collect(),
            next: AtomicUsize::new(0),
        }
    }
}

impl OrderNumberGenerator for SequenceOrderNumbers {
    fn next_number(&self) -> String {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        self.numbers
            .get(index)
            .or_else(|| self.numbers.last())
            .cloned()
            .unwrap_or_else(|| format!("ORD-{index:06}"))
    }
}
