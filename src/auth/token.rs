use hmac::{Hmac, Mac};
use jwt::{Claims, Header, RegisteredClaims, SignWithKey, Token, VerifyWithKey};
use sha2::Sha256;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::db::Identity;

/// Verifies the sign-in tokens the community app issues after its own auth flow.
///
/// A token is an HS256 JWT whose subject is the identity, signed with the secret both
/// sides share. It must name our issuer and carry an expiry that has not passed.
/// Without a configured secret nothing verifies and nobody can sign in.
#[derive(Clone)]
pub struct SignInKey {
    key: Option<Hmac<Sha256>>,
    issuer: String,
}

impl SignInKey {
    pub fn new(secret: Option<&str>, issuer: &str) -> Self {
        Self {
            key: secret.and_then(|secret| Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()),
            issuer: issuer.to_owned(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    /// Issues a token for `user_id` valid for `ttl`. Used by the issuing side and tests.
    pub fn sign(&self, user_id: Identity, ttl: time::Duration) -> Option<String> {
        let key = self.key.as_ref()?;
        let now = OffsetDateTime::now_utc();
        let claims = Claims::new(RegisteredClaims {
            issuer: Some(self.issuer.clone()),
            subject: Some(user_id.to_string()),
            issued_at: Some(now.unix_timestamp() as u64),
            expiration: Some((now + ttl).unix_timestamp().max(0) as u64),
            ..Default::default()
        });
        claims.sign_with_key(key).ok()
    }

    pub(crate) fn verify(&self, token: &str) -> Option<Identity> {
        let key = self.key.as_ref()?;
        let token: Token<Header, Claims, _> = token
            .verify_with_key(key)
            .map_err(|e| debug!("rejected sign-in token: {e}"))
            .ok()?;
        let claims = &token.claims().registered;

        if claims.issuer.as_deref() != Some(self.issuer.as_str()) {
            return None;
        }
        let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
        if claims.expiration? <= now {
            return None;
        }
        if claims.not_before.is_some_and(|nbf| nbf > now) {
            return None;
        }

        claims.subject.as_deref()?.parse::<Uuid>().ok()
    }
}
