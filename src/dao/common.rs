use std::borrow::Cow;

use sqlx::postgres::PgQueryResult;

use crate::model::apperror::{ApplicationError, ErrorType};

/**
 * Handles database errors and maps them to application errors.
 *
 * # Arguments
 * `error`: The sqlx error to handle.
 *
 * # Returns
 * An `ApplicationError` corresponding to the database error.
 */
pub fn handle_database_error(error: &sqlx::Error) -> ApplicationError {
    if let Some(db_error) = error.as_database_error() {
        tracing::debug!("Database error: {}", db_error);
        tracing::info!("Add/Update error: {:?}", db_error.code());
        if db_error.code() == Some(Cow::Borrowed("23505")) {
            // Unique violation
            return ApplicationError::new(ErrorType::ConstraintViolation, "Already exists".to_string());
        } else if db_error.code() == Some(Cow::Borrowed("23503")) {
            // Foreign key violation
            return ApplicationError::new(ErrorType::ConstraintViolation, "Missing or still referenced parent value".to_string());
        } else if db_error.code() == Some(Cow::Borrowed("22001")) {
            // Value too long
            return ApplicationError::new(ErrorType::Validation, "Value too long".to_string());
        }
        tracing::error!("Unhandled database error: {}", db_error);
        return ApplicationError::new(ErrorType::DatabaseError, "Unhandled database error".to_string());
    }
    tracing::error!("Failed to execute database operation: {}", error);
    ApplicationError::new(ErrorType::DatabaseError, "Failed to execute database operation".to_string())
}

/**
 * Verifies that an update or delete touched exactly one row.
 *
 * # Arguments
 * `result`: The result of the executed statement.
 * `entity`: Name of the entity, used in messages.
 * `operation`: Name of the operation, used in messages.
 *
 * # Returns
 * `NotFound` when no row was affected and `Application` when more than one was, so the caller rolls back.
 */
pub fn expect_single_row(result: &PgQueryResult, entity: &str, operation: &str) -> Result<(), ApplicationError> {
    if result.rows_affected() == 0 {
        tracing::debug!("{} not found for {}", entity, operation);
        return Err(ApplicationError::new(ErrorType::NotFound, format!("{entity} not found")));
    }
    if result.rows_affected() > 1 {
        tracing::warn!("Multiple {} rows attempted {}. Rolled back", entity, operation);
        return Err(ApplicationError::new(ErrorType::Application, format!("Multiple {entity} rows attempted {operation}. Rolled back")));
    }
    Ok(())
}

/**
 * Error returned when an entity does not exist.
 */
pub fn not_found(entity: &str) -> ApplicationError {
    ApplicationError::new(ErrorType::NotFound, format!("{entity} not found"))
}
