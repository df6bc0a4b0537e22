//! Bearer token validation and claim extraction.

use std::collections::BTreeSet;
use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::Value;

use crate::config::{AuthConfig, AuthMode};

use super::{AuthError, Identity, JwksCache, SUPERADMIN_ROLE};

/// Validates bearer JWTs and produces [`Identity`] contexts.
pub struct TokenValidator {
    config: AuthConfig,
    /// Tenant this runtime instance serves, used when the token carries
    /// no `app_id` claim.
    default_app_id: String,
    jwks: Option<Arc<JwksCache>>,
}

impl TokenValidator {
    pub fn new(config: AuthConfig, default_app_id: impl Into<String>) -> Self {
        let jwks = match config.mode {
            AuthMode::External => Some(Arc::new(JwksCache::new(
                config.oidc_discovery_url.clone(),
                config.jwks_url.clone(),
                config.jwks_refresh_interval,
            ))),
            AuthMode::Local => None,
        };
        Self {
            config,
            default_app_id: default_app_id.into(),
            jwks,
        }
    }

    /// Validate a bearer token and derive the identity context.
    pub async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let claims = match self.config.mode {
            AuthMode::Local => self.decode_local(token)?,
            AuthMode::External => self.decode_external(token).await?,
        };

        self.identity_from_claims(token, &claims)
    }

    fn decode_local(&self, token: &str) -> Result<Value, AuthError> {
        let secret = self
            .config
            .jwt_secret
            .as_ref()
            .ok_or_else(|| AuthError::Config("JWT_SECRET not set for local auth".to_string()))?;

        let algorithm = parse_algorithm(&self.config.jwt_algorithm)?;
        let validation = self.validation(&[algorithm]);
        let key = DecodingKey::from_secret(secret.as_bytes());

        decode::<Value>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(map_jwt_error)
    }

    async fn decode_external(&self, token: &str) -> Result<Value, AuthError> {
        let header = decode_header(token).map_err(map_jwt_error)?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::Malformed("token has no kid".to_string()))?;

        let jwks = self
            .jwks
            .as_ref()
            .ok_or_else(|| AuthError::Config("JWKS cache not configured".to_string()))?;
        let key = jwks.key_for(&kid).await?;

        let validation = self.validation(&[Algorithm::RS256, Algorithm::ES256]);
        decode::<Value>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(map_jwt_error)
    }

    fn validation(&self, algorithms: &[Algorithm]) -> Validation {
        let mut validation = Validation::new(algorithms[0]);
        validation.algorithms = algorithms.to_vec();
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }

    fn identity_from_claims(&self, token: &str, claims: &Value) -> Result<Identity, AuthError> {
        let user_id = claims["sub"]
            .as_str()
            .ok_or_else(|| AuthError::Malformed("missing sub claim".to_string()))?
            .to_string();

        let app_id = claims["app_id"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| self.default_app_id.clone());

        let username = claims["preferred_username"]
            .as_str()
            .or_else(|| claims["username"].as_str())
            .map(str::to_string);

        let roles = extract_roles(claims, &self.config.roles_claim);
        let is_superadmin = roles.contains(SUPERADMIN_ROLE);

        Ok(Identity {
            app_id,
            user_id,
            username,
            roles,
            is_superadmin,
            raw_token: token.to_string(),
        })
    }
}

/// Extract roles from the configured claim path, falling back to the
/// common nested layouts (`realm_access.roles`, `resource_access.*.roles`).
fn extract_roles(claims: &Value, roles_claim: &str) -> BTreeSet<String> {
    let mut roles = BTreeSet::new();

    if let Some(direct) = claims[roles_claim].as_array() {
        collect_strings(direct, &mut roles);
    }

    if roles.is_empty() {
        if let Some(realm) = claims["realm_access"]["roles"].as_array() {
            collect_strings(realm, &mut roles);
        }
    }

    if roles.is_empty() {
        if let Some(resources) = claims["resource_access"].as_object() {
            for resource in resources.values() {
                if let Some(list) = resource["roles"].as_array() {
                    collect_strings(list, &mut roles);
                }
            }
        }
    }

    roles
}

fn collect_strings(values: &[Value], out: &mut BTreeSet<String>) {
    for value in values {
        if let Some(s) = value.as_str() {
            out.insert(s.to_string());
        }
    }
}

fn parse_algorithm(name: &str) -> Result<Algorithm, AuthError> {
    name.parse()
        .map_err(|_| AuthError::Config(format!("unsupported JWT algorithm: {}", name)))
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
        ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
        ErrorKind::ImmatureSignature => AuthError::Malformed("token not yet valid".to_string()),
        _ => AuthError::Malformed(err.to_string()),
    }
}
