//! Simple time helpers used by multiple services.

use std::time::Instant;

use chrono::{Local, NaiveDate};

/// Calendar date used to stamp `trained_at` on registry rows.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Milliseconds elapsed since `start`, for step duration fields in logs.
pub fn elapsed_ms(start: Instant) -> u128 {
    start.elapsed().as_millis()
}
