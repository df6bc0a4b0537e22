//! Runtime-minted execution tokens.
//!
//! A capability launch hands the client a short-lived JWT binding
//! `(user, app, chat, capability, workflow)` for downstream calls. These
//! are signed with a dedicated symmetric key, never the user-auth secret.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::ExecutionTokenConfig;

use super::AuthError;

/// Claim marker distinguishing execution tokens from user tokens.
pub const EXECUTION_TOKEN_USE: &str = "execution";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionClaims {
    pub sub: String,
    pub app_id: String,
    pub chat_id: String,
    pub capability_id: String,
    pub workflow_id: String,
    pub mozaiks_token_use: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mints and verifies execution tokens.
pub struct ExecutionTokenService {
    config: ExecutionTokenConfig,
}

impl ExecutionTokenService {
    pub fn new(config: ExecutionTokenConfig) -> Self {
        Self { config }
    }

    /// TTL in seconds, surfaced as `expires_in` by the launch endpoint.
    pub fn expires_in_seconds(&self) -> u64 {
        self.config.expire_minutes * 60
    }

    pub fn mint(
        &self,
        user_id: &str,
        app_id: &str,
        chat_id: &str,
        capability_id: &str,
        workflow_id: &str,
    ) -> Result<String, AuthError> {
        if self.config.secret.is_empty() {
            return Err(AuthError::Config(
                "MOZAIKS_EXECUTION_TOKEN_SECRET not set".to_string(),
            ));
        }

        let now = Utc::now();
        let claims = ExecutionClaims {
            sub: user_id.to_string(),
            app_id: app_id.to_string(),
            chat_id: chat_id.to_string(),
            capability_id: capability_id.to_string(),
            workflow_id: workflow_id.to_string(),
            mozaiks_token_use: EXECUTION_TOKEN_USE.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(self.config.expire_minutes as i64)).timestamp(),
        };

        let header = Header::new(self.algorithm()?);
        encode(
            &header,
            &claims,
            &EncodingKey::from_secret(self.config.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Config(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<ExecutionClaims, AuthError> {
        let mut validation = Validation::new(self.algorithm()?);
        validation.validate_aud = false;

        let data = decode::<ExecutionClaims>(
            token,
            &DecodingKey::from_secret(self.config.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            _ => AuthError::Malformed(e.to_string()),
        })?;

        if data.claims.mozaiks_token_use != EXECUTION_TOKEN_USE {
            return Err(AuthError::Malformed(
                "not an execution token".to_string(),
            ));
        }

        Ok(data.claims)
    }

    fn algorithm(&self) -> Result<Algorithm, AuthError> {
        self.config
            .algorithm
            .parse()
            .map_err(|_| AuthError::Config(format!("bad algorithm: {}", self.config.algorithm)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ExecutionTokenService {
        ExecutionTokenService::new(ExecutionTokenConfig {
            secret: "exec-secret".to_string(),
            expire_minutes: 10,
            algorithm: "HS256".to_string(),
        })
    }

    #[test]
    fn test_mint_and_verify_round_trip() {
        let svc = service();
        let token = svc
            .mint("u_1", "a_1", "c1", "cap.workflow.notes", "notes")
            .unwrap();
        let claims = svc.verify(&token).unwrap();

        assert_eq!(claims.sub, "u_1");
        assert_eq!(claims.app_id, "a_1");
        assert_eq!(claims.chat_id, "c1");
        assert_eq!(claims.capability_id, "cap.workflow.notes");
        assert_eq!(claims.mozaiks_token_use, "execution");
        assert!(claims.exp - claims.iat == 600);
    }

    #[test]
    fn test_verify_rejects_user_token_shape() {
        let svc = service();
        // Signed with the right key but missing the token-use marker.
        let claims = serde_json::json!({
            "sub": "u_1",
            "exp": Utc::now().timestamp() + 60,
        });
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"exec-secret"),
        )
        .unwrap();
        assert!(svc.verify(&token).is_err());
    }

    #[test]
    fn test_missing_secret_is_config_error() {
        let svc = ExecutionTokenService::new(ExecutionTokenConfig::default());
        let err = svc.mint("u", "a", "c", "cap", "w").unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }
}
