//! Retry with exponential back-off for transient backend failures.

use std::time::Duration;

use crate::error::StoreError;

/// 125 ms doubling, 7 attempts, then the error surfaces.
pub const RETRY_DELAYS: [Duration; 7] = [
    Duration::from_millis(125),
    Duration::from_millis(250),
    Duration::from_millis(500),
    Duration::from_millis(1_000),
    Duration::from_millis(2_000),
    Duration::from_millis(4_000),
    Duration::from_millis(8_000),
];

/// Runs `op`, retrying transient failures per [`RETRY_DELAYS`].
pub fn with_backoff<T>(
    operation: &str,
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    for delay in RETRY_DELAYS {
        match op() {
            Ok(value) => return Ok(value),
            Err(error) if is_transient(&error) => {
                tracing::warn!(
                    operation,
                    %error,
                    ?delay,
                    "transient store failure, retrying"
                );
                std::thread::sleep(delay);
            }
            Err(error) => return Err(error),
        }
    }
    op()
}

fn is_transient(error: &StoreError) -> bool {
    match error {
        StoreError::Io(io) => !matches!(io.kind(), std::io::ErrorKind::NotFound),
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(failure, _)) => matches!(
            failure.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_transient_errors_surface_immediately() {
        let mut attempts = 0;
        let result: Result<(), StoreError> = with_backoff("test", || {
            attempts += 1;
            Err(StoreError::not_found("k"))
        });
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn success_passes_through() {
        let result = with_backoff("test", || Ok(42));
        assert_eq!(result.unwrap(), 42);
    }
}
