//! Token issuing and password checks for the HTTP boundary.

use anyhow::Result;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What a signed token asserts about its bearer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub user_id: i64,
    pub tenant_id: i64,
    pub email: String,
    pub name: String,
    pub role: String,
    pub tenant_name: String,
    pub tenant_type: String,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenAuthority {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Sign a token for the given identity. `exp` on the input is ignored.
    pub fn issue(&self, mut claims: Claims) -> Result<String> {
        claims.exp = (Utc::now() + self.ttl).timestamp();
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        Ok(token)
    }

    /// Decode and verify a token. Expired, malformed or wrongly-signed
    /// tokens all come back as `None`.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        match decode::<Claims>(token, &self.decoding, &Validation::default()) {
            Ok(data) => Some(data.claims),
            Err(error) => {
                debug!(%error, "token rejected");
                None
            }
        }
    }
}

pub fn hash_password(plain: &str) -> Result<String> {
    Ok(bcrypt::hash(plain, bcrypt::DEFAULT_COST)?)
}

pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Claims {
        Claims {
            user_id: 2,
            tenant_id: 1,
            email: "luigi@pizza.test".into(),
            name: "Luigi".into(),
            role: "employee".into(),
            tenant_name: "Mario's Pizza".into(),
            tenant_type: "restaurant".into(),
            exp: 0,
        }
    }

    #[test]
    fn issue_then_verify_round_trips_identity() {
        let authority = TokenAuthority::new("secret", 24);
        let token = authority.issue(claims()).unwrap();
        let decoded = authority.verify(&token).unwrap();
        assert_eq!(decoded.user_id, 2);
        assert_eq!(decoded.tenant_id, 1);
        assert_eq!(decoded.tenant_name, "Mario's Pizza");
        assert!(decoded.exp > Utc::now().timestamp());
    }

    #[test]
    fn garbage_token_is_rejected() {
        let authority = TokenAuthority::new("secret", 24);
        assert!(authority.verify("not-a-token").is_none());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let signer = TokenAuthority::new("secret-a", 24);
        let token = signer.issue(claims()).unwrap();
        let other = TokenAuthority::new("secret-b", 24);
        assert!(other.verify(&token).is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let authority = TokenAuthority::new("secret", -1);
        let token = authority.issue(claims()).unwrap();
        assert!(authority.verify(&token).is_none());
    }

    #[test]
    fn password_hash_verifies_original_only() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong pony", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }
}
