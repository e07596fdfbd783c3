use actix_web::{FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{
    apperror::{ApplicationError, ErrorType},
    config::AppSecurity,
    models::TokenPairType,
};

const ACCESS_TOKEN_TYPE: &str = "access";
const REFRESH_TOKEN_TYPE: &str = "refresh";

#[derive(Debug, Serialize, Deserialize)]
struct Claim {
    sub: String,
    exp: i64,
    iat: i64,
    token_type: String,
}

/**
 * Signing and verification material for one kind of token.
 */
#[derive(Clone)]
struct TokenKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime: Duration,
    token_type: &'static str,
}

impl TokenKeys {
    fn new(secret: &str, lifetime: Duration, token_type: &'static str) -> Result<Self, ApplicationError> {
        if secret.is_empty() {
            return Err(ApplicationError::new(ErrorType::Initialization, format!("Missing {token_type} token secret")));
        }
        Ok(TokenKeys { encoding_key: EncodingKey::from_secret(secret.as_bytes()), decoding_key: DecodingKey::from_secret(secret.as_bytes()), lifetime, token_type })
    }

    fn issue(&self, user_id: i64) -> Result<String, ApplicationError> {
        let now = Utc::now();
        let claim = Claim { sub: user_id.to_string(), exp: (now + self.lifetime).timestamp(), iat: now.timestamp(), token_type: self.token_type.to_string() };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claim, &self.encoding_key).map_err(|err| ApplicationError::new(ErrorType::Application, format!("Failed to issue token: {err}")))
    }

    /**
     * Decodes a token and returns the user id in its subject.
     */
    fn verify(&self, token: &str, validation: &Validation) -> Option<i64> {
        let token_data = match jsonwebtoken::decode::<Claim>(token, &self.decoding_key, validation) {
            Ok(token_data) => token_data,
            Err(err) => {
                debug!("JWT validation error: {err}");
                return None;
            }
        };
        if token_data.claims.token_type != self.token_type {
            debug!("Expected {} token, got {}", self.token_type, token_data.claims.token_type);
            return None;
        }
        token_data.claims.sub.parse::<i64>().ok()
    }
}

/**
 * JWT Security Service issuing and validating access and refresh tokens.
 */
#[derive(Clone)]
pub struct JwtSecurityService {
    access_keys: TokenKeys,
    refresh_keys: TokenKeys,
    /**
     * The validation rules for JWT tokens.
     */
    validation: Validation,
}

impl JwtSecurityService {
    /**
     * Creates a new instance of JwtSecurityService.
     *
     * # Arguments
     * `security_config`: Secrets and lifetimes of the tokens.
     *
     * # Returns
     * A Result containing the JwtSecurityService or an ApplicationError if a secret is missing.
     */
    pub fn new(security_config: &AppSecurity) -> Result<Self, ApplicationError> {
        let access_keys = TokenKeys::new(&security_config.access_secret, Duration::minutes(security_config.access_token_minutes), ACCESS_TOKEN_TYPE)?;
        let refresh_keys = TokenKeys::new(&security_config.refresh_secret, Duration::days(security_config.refresh_token_days), REFRESH_TOKEN_TYPE)?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Ok(JwtSecurityService { access_keys, refresh_keys, validation })
    }

    pub fn issue_access_token(&self, user_id: i64) -> Result<String, ApplicationError> {
        self.access_keys.issue(user_id)
    }

    /**
     * Issues both an access and a refresh token for the user.
     */
    pub fn issue_token_pair(&self, user_id: i64) -> Result<TokenPairType, ApplicationError> {
        Ok(TokenPairType { access_token: self.access_keys.issue(user_id)?, refresh_token: Some(self.refresh_keys.issue(user_id)?) })
    }

    /**
     * Validates the bearer access token of the HTTP request.
     *
     * # Arguments
     * `http_request`: The HTTP request containing the JWT token in the Authorization header.
     *
     * # Returns
     * The id of the user the token was issued to, or an ApplicationError if validation fails.
     */
    pub fn validate(&self, http_request: &HttpRequest) -> Result<i64, ApplicationError> {
        let credentials = BearerAuth::from_request(http_request, &mut actix_web::dev::Payload::None).into_inner().ok();
        let Some(credentials) = credentials else {
            return Err(ApplicationError::new(ErrorType::JwtAuthorization, "Not authenticated".to_string()));
        };
        self.access_keys
            .verify(credentials.token(), &self.validation)
            .ok_or_else(|| ApplicationError::new(ErrorType::JwtAuthorization, "Could not validate credentials".to_string()))
    }

    /**
     * Validates a refresh token.
     *
     * # Returns
     * The id of the user the token was issued to.
     */
    pub fn validate_refresh_token(&self, refresh_token: &str) -> Result<i64, ApplicationError> {
        self.refresh_keys
            .verify(refresh_token, &self.validation)
            .ok_or_else(|| ApplicationError::new(ErrorType::JwtAuthorization, "Could not validate refresh token".to_string()))
    }
}

#[cfg(test)]
mod test {
    use actix_web::test::TestRequest;

    use super::*;

    fn security_config() -> AppSecurity {
        AppSecurity { access_secret: "access-secret".to_string(), refresh_secret: "refresh-secret".to_string(), access_token_minutes: 30, refresh_token_days: 30 }
    }

    fn bearer_request(token: &str) -> HttpRequest {
        TestRequest::with_uri("/users/me").insert_header(("Authorization", format!("Bearer {token}"))).to_http_request()
    }

    #[test]
    fn test_jwt_security_service_initialization_missing_secret() {
        let config = AppSecurity { refresh_secret: "".to_string(), ..security_config() };
        assert!(JwtSecurityService::new(&config).is_err());
    }

    #[test]
    fn test_jwt_security_service_validator_success() {
        let jwt_service = JwtSecurityService::new(&security_config()).unwrap();
        let token = jwt_service.issue_access_token(42).unwrap();
        assert_eq!(jwt_service.validate(&bearer_request(&token)).unwrap(), 42);
    }

    #[test]
    fn test_jwt_security_service_validator_missing_header() {
        let jwt_service = JwtSecurityService::new(&security_config()).unwrap();
        let req = TestRequest::with_uri("/users/me").to_http_request();
        let err = jwt_service.validate(&req).unwrap_err();
        assert_eq!(err.error_type, ErrorType::JwtAuthorization);
    }

    #[test]
    fn test_jwt_security_service_validator_expired() {
        let config = AppSecurity { access_token_minutes: -120, ..security_config() };
        let jwt_service = JwtSecurityService::new(&config).unwrap();
        let token = jwt_service.issue_access_token(42).unwrap();
        let err = jwt_service.validate(&bearer_request(&token)).unwrap_err();
        assert_eq!(err.message, "Could not validate credentials");
    }

    #[test]
    fn test_jwt_security_service_validator_wrong_secret() {
        let jwt_service = JwtSecurityService::new(&security_config()).unwrap();
        let other = JwtSecurityService::new(&AppSecurity { access_secret: "other".to_string(), ..security_config() }).unwrap();
        let token = other.issue_access_token(42).unwrap();
        assert!(jwt_service.validate(&bearer_request(&token)).is_err());
    }

    #[test]
    fn test_refresh_token_round_trip() {
        let jwt_service = JwtSecurityService::new(&security_config()).unwrap();
        let token_pair = jwt_service.issue_token_pair(7).unwrap();
        let refresh_token = token_pair.refresh_token.unwrap();
        assert_eq!(jwt_service.validate_refresh_token(&refresh_token).unwrap(), 7);
        assert!(jwt_service.validate(&bearer_request(&refresh_token)).is_err());
        let err = jwt_service.validate_refresh_token(&token_pair.access_token).unwrap_err();
        assert_eq!(err.message, "Could not validate refresh token");
    }

    #[test]
    fn test_token_types_checked_with_shared_secret() {
        let config = AppSecurity { refresh_secret: "access-secret".to_string(), ..security_config() };
        let jwt_service = JwtSecurityService::new(&config).unwrap();
        let token_pair = jwt_service.issue_token_pair(7).unwrap();
        assert!(jwt_service.validate_refresh_token(&token_pair.access_token).is_err());
        assert!(jwt_service.validate(&bearer_request(token_pair.refresh_token.as_deref().unwrap())).is_err());
    }
}
