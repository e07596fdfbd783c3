use sqlx::PgConnection;
use tracing::{Instrument, instrument};

use crate::{
    dao::common::{expect_single_row, handle_database_error},
    model::{apperror::ApplicationError, models::UserType},
};

/**
 * Database response type for user queries.
 */
pub type QueryUserDbResp = (i64, String, String, Option<String>);

const QUERY_USER_BY_ID: &str = "SELECT id, username, hashed_password, avatar_url FROM users WHERE id = $1";

const QUERY_USER_BY_USERNAME: &str = "SELECT id, username, hashed_password, avatar_url FROM users WHERE username = $1";

const ADD_USER: &str = "INSERT INTO users (username, hashed_password) VALUES ($1, $2) RETURNING id, username, hashed_password, avatar_url";

const UPDATE_USER: &str = "UPDATE users SET username = $1, hashed_password = $2, avatar_url = $3 WHERE id = $4";

/**
 * DAO for users.
 */
pub struct UserDao {}

impl UserDao {
    pub fn new() -> Self {
        UserDao {}
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_user(&self, connection: &mut PgConnection, user_id: i64) -> Result<Option<UserType>, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<QueryUserDbResp> = sqlx::query_as(QUERY_USER_BY_ID)
            .bind(user_id)
            .fetch_optional(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(result.map(UserType::from))
    }

    #[instrument(skip(self, connection), fields(result))]
    pub async fn get_user_by_username(&self, connection: &mut PgConnection, username: &str) -> Result<Option<UserType>, ApplicationError> {
        let span = tracing::Span::current();
        let result: Option<QueryUserDbResp> = sqlx::query_as(QUERY_USER_BY_USERNAME)
            .bind(username)
            .fetch_optional(connection)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(result.map(UserType::from))
    }

    /**
     * Adds a user with an already hashed password.
     */
    #[instrument(skip(self, transaction, hashed_password), fields(result))]
    pub async fn add_user(&self, transaction: &mut PgConnection, username: &str, hashed_password: &str) -> Result<UserType, ApplicationError> {
        let span = tracing::Span::current();
        let result: QueryUserDbResp = sqlx::query_as(ADD_USER)
            .bind(username)
            .bind(hashed_password)
            .fetch_one(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        Ok(UserType::from(result))
    }

    #[instrument(skip(self, transaction, user), fields(user_id = user.id, result))]
    pub async fn update_user(&self, transaction: &mut PgConnection, user: &UserType) -> Result<(), ApplicationError> {
        let span = tracing::Span::current();
        let result = sqlx::query(UPDATE_USER)
            .bind(&user.username)
            .bind(&user.hashed_password)
            .bind(&user.avatar_url)
            .bind(user.id)
            .execute(transaction)
            .instrument(span)
            .await
            .map_err(|err| handle_database_error(&err))?;
        expect_single_row(&result, "User", "updated")
    }
}
