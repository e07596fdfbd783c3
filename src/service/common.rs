use sqlx::{Pool, Postgres, Transaction, pool::PoolConnection};

use crate::model::apperror::{ApplicationError, ErrorType};

/**
 * Returns the pool or a database error when the service runs without one.
 */
pub fn require_pool(connection_pool: &Option<Pool<Postgres>>) -> Result<&Pool<Postgres>, ApplicationError> {
    connection_pool.as_ref().ok_or_else(|| ApplicationError::new(ErrorType::DatabaseError, "No database connection available".to_string()))
}

pub async fn acquire(connection_pool: &Pool<Postgres>) -> Result<PoolConnection<Postgres>, ApplicationError> {
    connection_pool.acquire().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to acquire connection: {err}")))
}

pub async fn begin(connection_pool: &Pool<Postgres>) -> Result<Transaction<'static, Postgres>, ApplicationError> {
    connection_pool.begin().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to begin transaction: {err}")))
}

/**
 * Commits the transaction when the result is ok and rolls it back otherwise.
 *
 * # Arguments
 * `transaction`: The open transaction.
 * `result`: The result of the work done in the transaction.
 *
 * # Returns
 * The result, or the commit or rollback error.
 */
pub async fn finish<T>(transaction: Transaction<'static, Postgres>, result: Result<T, ApplicationError>) -> Result<T, ApplicationError> {
    match result {
        Ok(value) => {
            transaction.commit().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to commit transaction: {err}")))?;
            Ok(value)
        }
        Err(err) => {
            transaction.rollback().await.map_err(|err| ApplicationError::new(ErrorType::DatabaseError, format!("Failed to rollback transaction: {err}")))?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_require_pool_without_pool() {
        let result = require_pool(&None);
        let err = result.unwrap_err();
        assert_eq!(err.error_type, ErrorType::DatabaseError);
        assert_eq!(err.message, "No database connection available");
    }
}
