//! sqlx error classification.

use album_store_core::inventory::StoreError;

/// SQLSTATE codes worth retrying: connection exceptions (class 08),
/// operator intervention (57P), serialization failure, deadlock, too many
/// connections.
fn is_transient_code(code: &str) -> bool {
    code.starts_with("08")
        || code.starts_with("57P")
        || matches!(code, "40001" | "40P01" | "53300")
}

/// Classify a sqlx error as [`StoreError::Unavailable`] (retry later) or
/// [`StoreError::Query`] (will fail the same way again).
#[must_use]
pub fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(error.to_string()),
        sqlx::Error::Database(db) if db.code().is_some_and(|code| is_transient_code(&code)) => {
            StoreError::Unavailable(error.to_string())
        }
        _ => StoreError::Query(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_transient() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_transient());
        assert!(map_sqlx_error(sqlx::Error::PoolClosed).is_transient());
    }

    #[test]
    fn missing_rows_are_not_transient() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
    }

    #[test]
    fn sqlstate_classes() {
        assert!(is_transient_code("08006"));
        assert!(is_transient_code("57P01"));
        assert!(is_transient_code("40001"));
        assert!(!is_transient_code("23514"));
        assert!(!is_transient_code("42P01"));
    }
}
