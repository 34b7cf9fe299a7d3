use scrape_types::CoreError;

/// Determines if a sqlx error represents a transient failure worth retrying,
/// preferring SQLSTATE class codes over string matching.
fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_error) => match db_error.code() {
            Some(code) => {
                let code = code.as_ref();
                // 08 connection exception, 53 insufficient resources, 57
                // operator intervention, 58 system error, 40001/40P01
                // serialization/deadlock.
                code.starts_with("08")
                    || code.starts_with("53")
                    || code.starts_with("57")
                    || code.starts_with("58")
                    || code == "40001"
                    || code == "40P01"
            }
            None => {
                let msg = db_error.message().to_lowercase();
                msg.contains("connection") || msg.contains("timeout") || msg.contains("deadlock")
            }
        },
        _ => false,
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db_error) if db_error.code().as_deref() == Some("23505")
    )
}

/// Maps a raw sqlx error onto the process-wide error model. Callers that
/// need the `NOT_FOUND` distinction (e.g. `get`) should special-case
/// `sqlx::Error::RowNotFound` themselves before falling back to this.
pub fn map_sqlx_error(error: sqlx::Error) -> CoreError {
    if is_unique_violation(&error) {
        return CoreError::DuplicateId(error.to_string());
    }
    if is_transient(&error) {
        return CoreError::StoreUnavailable(error.to_string());
    }
    CoreError::Other(anyhow::anyhow!(error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_maps_to_store_unavailable() {
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, CoreError::StoreUnavailable(_)));
    }

    #[test]
    fn unrecognized_error_falls_back_to_other() {
        let err = map_sqlx_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, CoreError::Other(_)));
    }
}
