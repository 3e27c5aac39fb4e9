//! HS256 JWT adapter for session validation.
//!
//! Tokens are issued elsewhere with a shared secret. This adapter checks
//! the signature and expiry, optionally the issuer and audience, and maps
//! the claims onto an `AuthenticatedUser`:
//!
//! - `sub` - user id
//! - `sid` - login session id
//! - `did` - device id
//! - `exp` - expiry, Unix seconds

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{AuthError, AuthenticatedUser, DeviceId, SessionId, UserId};
use crate::ports::SessionValidator;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,
}

impl JwtConfig {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            issuer: None,
            audience: None,
            leeway_secs: 30,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }
}

/// Claims carried by access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub sid: String,
    pub did: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl SessionClaims {
    fn into_user(self) -> Result<AuthenticatedUser, AuthError> {
        let invalid = |field: &str| {
            tracing::warn!(claim = field, "token carries an empty identity claim");
            AuthError::InvalidToken
        };
        let id = UserId::new(self.sub).map_err(|_| invalid("sub"))?;
        let session_id = SessionId::new(self.sid).map_err(|_| invalid("sid"))?;
        let device_id = DeviceId::new(self.did).map_err(|_| invalid("did"))?;
        Ok(AuthenticatedUser::new(id, session_id, device_id))
    }
}

/// Validates HS256 access tokens signed with a shared secret.
pub struct JwtSessionValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtSessionValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let key = DecodingKey::from_secret(config.secret.expose_secret().as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = config.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Self { key, validation }
    }
}

#[async_trait]
impl SessionValidator for JwtSessionValidator {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let data = decode::<SessionClaims>(token, &self.key, &self.validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => {
                    tracing::debug!("Token expired");
                    AuthError::TokenExpired
                }
                ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => {
                    tracing::warn!(error = %e, "token issued for someone else");
                    AuthError::InvalidToken
                }
                _ => {
                    tracing::debug!(error = %e, "token rejected");
                    AuthError::InvalidToken
                }
            }
        })?;

        data.claims.into_user()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-with-enough-entropy";

    fn config() -> JwtConfig {
        JwtConfig::new(SecretString::new(SECRET.to_string()))
    }

    fn claims(exp: i64) -> SessionClaims {
        SessionClaims {
            sub: "alice".into(),
            sid: "s1".into(),
            did: "phone".into(),
            exp,
            iss: None,
            aud: None,
        }
    }

    fn sign(claims: &SessionClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn in_an_hour() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[tokio::test]
    async fn valid_token_resolves_identity() {
        let validator = JwtSessionValidator::new(&config());
        let token = sign(&claims(in_an_hour()), SECRET);

        let user = validator.validate(&token).await.unwrap();

        assert_eq!(user.id.as_str(), "alice");
        assert_eq!(user.session_id.as_str(), "s1");
        assert_eq!(user.device_id.as_str(), "phone");
    }

    #[tokio::test]
    async fn expired_token_is_reported_as_expired() {
        let validator = JwtSessionValidator::new(&config());
        let token = sign(&claims(chrono::Utc::now().timestamp() - 3600), SECRET);

        let err = validator.validate(&token).await.unwrap_err();

        assert_eq!(err, AuthError::TokenExpired);
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid() {
        let validator = JwtSessionValidator::new(&config());
        let token = sign(&claims(in_an_hour()), "some-other-secret");

        assert_eq!(validator.validate(&token).await.unwrap_err(), AuthError::InvalidToken);
    }

    #[tokio::test]
    async fn garbage_is_invalid() {
        let validator = JwtSessionValidator::new(&config());
        assert_eq!(validator.validate("not.a.jwt").await.unwrap_err(), AuthError::InvalidToken);
    }

    #[tokio::test]
    async fn issuer_is_enforced_when_configured() {
        let validator = JwtSessionValidator::new(&config().with_issuer("https://auth.example.com"));
        let mut wrong = claims(in_an_hour());
        wrong.iss = Some("https://evil.example.com".into());
        let mut right = claims(in_an_hour());
        right.iss = Some("https://auth.example.com".into());

        assert!(validator.validate(&sign(&wrong, SECRET)).await.is_err());
        assert!(validator.validate(&sign(&right, SECRET)).await.is_ok());
    }

    #[tokio::test]
    async fn empty_device_claim_is_invalid() {
        let validator = JwtSessionValidator::new(&config());
        let mut bad = claims(in_an_hour());
        bad.did = String::new();

        assert_eq!(
            validator.validate(&sign(&bad, SECRET)).await.unwrap_err(),
            AuthError::InvalidToken
        );
    }
}
