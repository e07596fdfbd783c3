use std::sync::Arc;

use sqlx::{Pool, Postgres};
use tracing::{debug, instrument};

use crate::{
    dao::user::UserDao,
    model::{
        apperror::{ApplicationError, ErrorType},
        models::{CredentialsInputType, UserType, UserUpdateInputType},
    },
    service::{
        common::{acquire, begin, finish, require_pool},
        storage::AvatarStorage,
    },
};

/**
 * Message used whenever the user behind a token cannot be resolved.
 */
pub const INVALID_CREDENTIALS: &str = "Could not validate credentials";

/**
 * Hashes a password with bcrypt on the blocking thread pool.
 */
pub async fn hash_password(password: String, cost: u32) -> Result<String, ApplicationError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|err| ApplicationError::new(ErrorType::Application, format!("Password hashing interrupted: {err}")))?
        .map_err(|err| ApplicationError::new(ErrorType::Application, format!("Failed to hash password: {err}")))
}

/**
 * Verifies a password against a stored bcrypt hash.
 *
 * # Returns
 * `JwtAuthorization` when the password does not match or the stored hash is malformed.
 */
pub async fn verify_password(password: String, hashed_password: String) -> Result<(), ApplicationError> {
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hashed_password))
        .await
        .map_err(|err| ApplicationError::new(ErrorType::Application, format!("Password verification interrupted: {err}")))?;
    match verified {
        Ok(true) => Ok(()),
        Ok(false) => Err(ApplicationError::new(ErrorType::JwtAuthorization, "Incorrect password".to_string())),
        Err(err) => {
            debug!("Stored password hash rejected: {}", err);
            Err(ApplicationError::new(ErrorType::JwtAuthorization, "Invalid password hash format in database".to_string()))
        }
    }
}

/**
 * Service for users, their credentials and profile.
 */
pub struct UserService {
    user_dao: UserDao,
    avatar_storage: Arc<dyn AvatarStorage>,
    max_avatar_bytes: usize,
    hash_cost: u32,
    /**
     * Optional for test purposes until we have a better way to mock the database.
     */
    connection_pool: Option<Pool<Postgres>>,
}

impl UserService {
    pub fn new(user_dao: UserDao, avatar_storage: Arc<dyn AvatarStorage>, max_avatar_bytes: usize, connection_pool: Option<Pool<Postgres>>) -> Self {
        UserService { user_dao, avatar_storage, max_avatar_bytes, hash_cost: bcrypt::DEFAULT_COST, connection_pool }
    }

    pub fn max_avatar_bytes(&self) -> usize {
        self.max_avatar_bytes
    }

    /**
     * Registers a new user.
     *
     * # Returns
     * The stored user, or a validation error when the username is taken.
     */
    #[instrument(skip(self, credentials), fields(username = %credentials.username, result))]
    pub async fn register(&self, credentials: CredentialsInputType) -> Result<UserType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let CredentialsInputType { username, password } = credentials;
        let hashed_password = hash_password(password, self.hash_cost).await?;
        let mut transaction = begin(connection_pool).await?;
        let result: Result<UserType, ApplicationError> = async {
            if self.user_dao.get_user_by_username(&mut transaction, &username).await?.is_some() {
                return Err(username_taken());
            }
            self.user_dao.add_user(&mut transaction, &username, &hashed_password).await.map_err(map_duplicate_username)
        }
        .await;
        finish(transaction, result).await
    }

    /**
     * Checks a username and password.
     *
     * # Returns
     * The user, or `JwtAuthorization` naming why the login failed.
     */
    #[instrument(skip(self, credentials), fields(username = %credentials.username, result))]
    pub async fn authenticate(&self, credentials: CredentialsInputType) -> Result<UserType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut connection = acquire(connection_pool).await?;
        let Some(user) = self.user_dao.get_user_by_username(&mut connection, &credentials.username).await? else {
            return Err(ApplicationError::new(ErrorType::JwtAuthorization, "Username does not exist".to_string()));
        };
        verify_password(credentials.password, user.hashed_password.clone()).await?;
        Ok(user)
    }

    /**
     * Resolves the user a token was issued to.
     */
    #[instrument(skip(self), fields(result))]
    pub async fn get_current_user(&self, user_id: i64) -> Result<UserType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut connection = acquire(connection_pool).await?;
        self.user_dao
            .get_user(&mut connection, user_id)
            .await?
            .ok_or_else(|| ApplicationError::new(ErrorType::JwtAuthorization, INVALID_CREDENTIALS.to_string()))
    }

    /**
     * Changes username and/or password of a user.
     */
    #[instrument(skip(self, user_update_input), fields(result))]
    pub async fn update_user(&self, user_id: i64, user_update_input: UserUpdateInputType) -> Result<UserType, ApplicationError> {
        let connection_pool = require_pool(&self.connection_pool)?;
        let UserUpdateInputType { username, password } = user_update_input;
        let hashed_password = match password {
            Some(password) => Some(hash_password(password, self.hash_cost).await?),
            None => None,
        };
        let mut transaction = begin(connection_pool).await?;
        let result: Result<UserType, ApplicationError> = async {
            let Some(mut user) = self.user_dao.get_user(&mut transaction, user_id).await? else {
                return Err(ApplicationError::new(ErrorType::JwtAuthorization, INVALID_CREDENTIALS.to_string()));
            };
            if let Some(username) = username {
                if username != user.username && self.user_dao.get_user_by_username(&mut transaction, &username).await?.is_some() {
                    return Err(username_taken());
                }
                user.username = username;
            }
            if let Some(hashed_password) = hashed_password {
                user.hashed_password = hashed_password;
            }
            self.user_dao.update_user(&mut transaction, &user).await.map_err(map_duplicate_username)?;
            Ok(user)
        }
        .await;
        finish(transaction, result).await
    }

    /**
     * Stores an uploaded avatar image and records its url on the user.
     *
     * # Arguments
     * `user_id`: Owner of the avatar.
     * `content_type`: Mime type of the upload.
     * `content`: The image bytes.
     */
    #[instrument(skip(self, content), fields(size = content.len(), result))]
    pub async fn update_avatar(&self, user_id: i64, content_type: &str, content: &[u8]) -> Result<UserType, ApplicationError> {
        if content.len() > self.max_avatar_bytes {
            return Err(ApplicationError::new(ErrorType::Validation, format!("File exceeds the maximum size of {} bytes", self.max_avatar_bytes)));
        }
        let connection_pool = require_pool(&self.connection_pool)?;
        let mut user = self.get_current_user(user_id).await?;
        user.avatar_url = Some(self.avatar_storage.store_avatar(user_id, content_type, content).await?);
        let mut transaction = begin(connection_pool).await?;
        let result = self.user_dao.update_user(&mut transaction, &user).await;
        finish(transaction, result).await?;
        Ok(user)
    }
}

fn username_taken() -> ApplicationError {
    ApplicationError::new(ErrorType::Validation, "Username already exists".to_string())
}

fn map_duplicate_username(err: ApplicationError) -> ApplicationError {
    if err.error_type == ErrorType::ConstraintViolation { username_taken() } else { err }
}
