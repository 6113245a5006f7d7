use rusqlite::ErrorCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::warn;

use super::StoreError;

/// Bounded exponential backoff for lock contention on the store file
///
/// Only `SQLITE_BUSY` / `SQLITE_LOCKED` are retried. Everything else is
/// surfaced on the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2_000
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Run `op` until it succeeds, fails with a non-contention error, or
    /// the attempt budget is spent
    pub fn run<T, F>(&self, path: &Path, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Result<T, StoreError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(StoreError::Sqlite(e)) if is_contention(&e) => {
                    if attempt >= max_attempts {
                        return Err(StoreError::Unavailable {
                            path: path.to_path_buf(),
                            attempts: attempt,
                            source: e,
                        });
                    }

                    let delay = self.delay_after(attempt);
                    warn!(
                        store = %path.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "store locked, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(StoreError::Sqlite(e)) if is_corruption(&e) => {
                    return Err(StoreError::Corrupt {
                        path: path.to_path_buf(),
                        source: e,
                    });
                }
                Err(other) => return Err(other),
            }
        }
    }
}

fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn busy() -> StoreError {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        ))
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(8), Duration::from_millis(1_000));
    }

    #[test]
    fn test_retries_contention_then_succeeds() {
        let calls = Cell::new(0);
        let result = fast_policy(3).run(Path::new("margie.db"), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(busy())
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_gives_up_after_budget() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast_policy(2).run(Path::new("margie.db"), || {
            calls.set(calls.get() + 1);
            Err(busy())
        });

        assert!(matches!(
            result,
            Err(StoreError::Unavailable { attempts: 2, .. })
        ));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_other_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast_policy(5).run(Path::new("margie.db"), || {
            calls.set(calls.get() + 1);
            Err(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        });

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
