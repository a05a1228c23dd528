pub mod anchor;
pub mod cli;
pub mod demo;
pub mod error;
pub mod flatten;
pub mod matcher;
pub mod mem_store;
pub mod models;
pub mod regression;
pub mod run;
pub mod store;
pub mod telemetry;
pub mod web;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock epoch seconds. All timestamps in the data model use this.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_secs_is_reasonable() {
        // After 2023-11-01.
        assert!(now_secs() > 1_698_000_000);
    }

    #[test]
    fn test_now_secs_monotone_enough() {
        let a = now_secs();
        let b = now_secs();
        assert!(b >= a);
    }
}
