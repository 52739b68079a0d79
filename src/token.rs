//! Session and CSRF token issuance and verification.
//!
//! Tokens are compact HS256 JWTs signed with the *account's own* secret, never a
//! server-wide key. Rotating an account secret therefore revokes every token
//! issued to that account. Because the key depends on the subject, verification
//! is two-phase: [`parse_unverified`] exposes the claimed subject so the caller
//! can load that account's secret, then [`verify_session_token`] checks the
//! signature and timestamps against it.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::{Account, AccountRole};

/// Default session lifetime: 6 hours.
pub const SESSION_LIFETIME: Duration = Duration::from_secs(6 * 60 * 60);

/// Extended session lifetime for device accounts and "keep me signed in": 10000 days.
pub const EXTENDED_SESSION_LIFETIME: Duration = Duration::from_secs(10_000 * 24 * 60 * 60);

/// Shortest signing key accepted for issuing tokens.
pub const MIN_SIGNING_KEY_LEN: usize = 16;

/// What an account must expose to have tokens issued for it.
pub trait AccountTokenProvider {
    fn signing_key(&self) -> &[u8];
    fn account_id(&self) -> &str;
    fn organisation_id(&self) -> Option<&str>;
    fn role(&self) -> AccountRole;
}

impl AccountTokenProvider for Account {
    fn signing_key(&self) -> &[u8] {
        &self.secret
    }

    fn account_id(&self) -> &str {
        &self.id
    }

    fn organisation_id(&self) -> Option<&str> {
        self.organisation_id.as_deref()
    }

    fn role(&self) -> AccountRole {
        self.role
    }
}

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (account ID)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    pub role: AccountRole,
    /// Empty when the account has no organisation
    #[serde(rename = "organisationId")]
    pub organisation_id: String,
}

impl SessionClaims {
    /// The lifetime the token was issued with.
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.exp.saturating_sub(self.iat))
    }
}

/// Claims carried by a CSRF token. Deliberately no subject.
///
/// Unknown fields are rejected so a session token, signed with the same key,
/// never passes as a CSRF token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CsrfClaims {
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// Subject read from a session token before its signature is checked.
/// Only good for choosing which key to verify with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnverifiedSession {
    pub account_id: String,
}

#[derive(Deserialize)]
struct SubjectOnly {
    sub: String,
}

/// Errors that can occur while issuing or verifying tokens.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// No token was supplied
    #[error("token missing")]
    Missing,
    /// Malformed token, bad signature, or unusable timestamps
    #[error("token invalid")]
    Invalid,
    /// Signature valid but the token is past its expiry
    #[error("token expired")]
    Expired,
    /// Signing key is too short to issue with
    #[error("signing key must be at least {MIN_SIGNING_KEY_LEN} bytes")]
    WeakKey,
    /// Issue time plus lifetime does not fit a timestamp
    #[error("token lifetime overflows the expiry timestamp")]
    LifetimeOverflow,
    /// Error encoding the token
    #[error("failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
}

fn encoding_key(key: &[u8]) -> Result<EncodingKey, TokenError> {
    if key.len() < MIN_SIGNING_KEY_LEN {
        return Err(TokenError::WeakKey);
    }
    Ok(EncodingKey::from_secret(key))
}

fn expiry(now: u64, lifetime: Duration) -> Result<u64, TokenError> {
    now.checked_add(lifetime.as_secs())
        .ok_or(TokenError::LifetimeOverflow)
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    // Expiry is checked against the injected clock, not the system time.
    validation.validate_exp = false;
    validation.set_required_spec_claims(&["exp"]);
    validation
}

/// Issue a session token for an account.
pub fn issue_session_token<A: AccountTokenProvider + ?Sized>(
    account: &A,
    now: u64,
    lifetime: Duration,
) -> Result<IssuedToken, TokenError> {
    let key = encoding_key(account.signing_key())?;
    let exp = expiry(now, lifetime)?;

    let claims = SessionClaims {
        sub: account.account_id().to_string(),
        iat: now,
        exp,
        role: account.role(),
        organisation_id: account.organisation_id().unwrap_or_default().to_string(),
    };

    let token =
        jsonwebtoken::encode(&Header::default(), &claims, &key).map_err(TokenError::Encoding)?;

    Ok(IssuedToken {
        token,
        issued_at: now,
        expires_at: exp,
    })
}

/// Issue a CSRF token signed with the same account secret as its session.
pub fn issue_csrf_token<A: AccountTokenProvider + ?Sized>(
    account: &A,
    now: u64,
    lifetime: Duration,
) -> Result<IssuedToken, TokenError> {
    let key = encoding_key(account.signing_key())?;
    let exp = expiry(now, lifetime)?;

    let token = jsonwebtoken::encode(&Header::default(), &CsrfClaims { exp }, &key)
        .map_err(TokenError::Encoding)?;

    Ok(IssuedToken {
        token,
        issued_at: now,
        expires_at: exp,
    })
}

/// A session token together with its paired CSRF token.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub session: IssuedToken,
    pub csrf: IssuedToken,
    pub lifetime: Duration,
}

/// Issue a session token and the CSRF token that goes with it. Both expire together.
pub fn issue_session_tokens<A: AccountTokenProvider + ?Sized>(
    account: &A,
    now: u64,
    lifetime: Duration,
) -> Result<SessionTokens, TokenError> {
    let session = issue_session_token(account, now, lifetime)?;
    let csrf = issue_csrf_token(account, now, lifetime)?;
    Ok(SessionTokens {
        session,
        csrf,
        lifetime,
    })
}

/// Read the subject of a session token without verifying anything.
pub fn parse_unverified(raw: &str) -> Result<UnverifiedSession, TokenError> {
    if raw.is_empty() {
        return Err(TokenError::Missing);
    }

    let mut segments = raw.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::Invalid);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::Invalid)?;
    let subject: SubjectOnly = serde_json::from_slice(&bytes).map_err(|_| TokenError::Invalid)?;

    if subject.sub.is_empty() {
        return Err(TokenError::Invalid);
    }

    Ok(UnverifiedSession {
        account_id: subject.sub,
    })
}

/// Verify a session token against the subject account's current secret.
pub fn verify_session_token(raw: &str, key: &[u8], now: u64) -> Result<SessionClaims, TokenError> {
    if raw.is_empty() {
        return Err(TokenError::Missing);
    }

    let data = jsonwebtoken::decode::<SessionClaims>(
        raw,
        &DecodingKey::from_secret(key),
        &validation(),
    )
    .map_err(|_| TokenError::Invalid)?;
    let claims = data.claims;

    if claims.iat > now || claims.exp < claims.iat {
        return Err(TokenError::Invalid);
    }
    if now > claims.exp {
        return Err(TokenError::Expired);
    }

    Ok(claims)
}

/// Verify a CSRF token against the secret resolved for the session.
pub fn verify_csrf_token(raw: &str, key: &[u8], now: u64) -> Result<CsrfClaims, TokenError> {
    if raw.is_empty() {
        return Err(TokenError::Missing);
    }

    let data =
        jsonwebtoken::decode::<CsrfClaims>(raw, &DecodingKey::from_secret(key), &validation())
            .map_err(|_| TokenError::Invalid)?;

    if now > data.claims.exp {
        return Err(TokenError::Expired);
    }

    Ok(data.claims)
}
