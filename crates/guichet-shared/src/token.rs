//! Signed bearer tokens.
//!
//! Both token kinds are Ed25519-signed by the server key, bincode-encoded
//! and wrapped in base64url so they survive query strings and email links.
//! The server is the only signer; anyone holding the public key can verify.

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::types::{OrgId, UserId, VerificationPurpose};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Invalid token format")]
    InvalidFormat,

    #[error("Token has expired")]
    Expired,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Base64 decode error")]
    Base64Decode,
}

// ---------------------------------------------------------------------------
// Session tokens
// ---------------------------------------------------------------------------

/// What a session token asserts.  Role is deliberately absent: permissions
/// are looked up per request so a demotion takes effect immediately.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub user_id: UserId,
    pub org_id: Option<OrgId>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub claims: SessionClaims,
    pub signature: Vec<u8>,
}

impl SessionToken {
    /// Issue a fresh session for `user_id`, valid for `ttl_secs`.
    pub fn issue(key: &SigningKey, user_id: UserId, org_id: Option<OrgId>, ttl_secs: i64) -> Self {
        let now = Utc::now();
        let claims = SessionClaims {
            user_id,
            org_id,
            issued_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        };

        let claim_bytes = bincode::serialize(&claims).expect("claims serialization");
        let signature = key.sign(&claim_bytes);

        Self {
            claims,
            signature: signature.to_bytes().to_vec(),
        }
    }

    /// Encode as a base64url bearer string.
    pub fn encode(&self) -> String {
        let bytes = bincode::serialize(self).expect("token serialization");
        base64_url_encode(&bytes)
    }

    pub fn decode(code: &str) -> Result<Self, TokenError> {
        let bytes = base64_url_decode(code)?;
        bincode::deserialize(&bytes).map_err(|_| TokenError::InvalidFormat)
    }

    /// Verify signature and expiry, returning the claims on success.
    pub fn verify(&self, server_key: &VerifyingKey) -> Result<&SessionClaims, TokenError> {
        if Utc::now() > self.claims.expires_at {
            return Err(TokenError::Expired);
        }

        let claim_bytes =
            bincode::serialize(&self.claims).map_err(|_| TokenError::InvalidFormat)?;
        verify_signature(server_key, &claim_bytes, &self.signature)?;
        Ok(&self.claims)
    }
}

// ---------------------------------------------------------------------------
// Email verification tokens
// ---------------------------------------------------------------------------

/// What an email-verification link asserts.  The purpose decides the
/// screen the link opens: confirm-signup or set-invitation-password.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationClaims {
    pub user_id: UserId,
    pub email: String,
    pub purpose: VerificationPurpose,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationToken {
    pub claims: VerificationClaims,
    pub signature: Vec<u8>,
}

impl VerificationToken {
    pub fn issue(
        key: &SigningKey,
        user_id: UserId,
        email: String,
        purpose: VerificationPurpose,
        ttl_secs: i64,
    ) -> Self {
        let now = Utc::now();
        let claims = VerificationClaims {
            user_id,
            email,
            purpose,
            issued_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        };

        let claim_bytes = bincode::serialize(&claims).expect("claims serialization");
        let signature = key.sign(&claim_bytes);

        Self {
            claims,
            signature: signature.to_bytes().to_vec(),
        }
    }

    pub fn encode(&self) -> String {
        let bytes = bincode::serialize(self).expect("token serialization");
        base64_url_encode(&bytes)
    }

    pub fn decode(code: &str) -> Result<Self, TokenError> {
        let bytes = base64_url_decode(code)?;
        bincode::deserialize(&bytes).map_err(|_| TokenError::InvalidFormat)
    }

    pub fn verify(&self, server_key: &VerifyingKey) -> Result<&VerificationClaims, TokenError> {
        if Utc::now() > self.claims.expires_at {
            return Err(TokenError::Expired);
        }

        let claim_bytes =
            bincode::serialize(&self.claims).map_err(|_| TokenError::InvalidFormat)?;
        verify_signature(server_key, &claim_bytes, &self.signature)?;
        Ok(&self.claims)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn verify_signature(
    key: &VerifyingKey,
    payload: &[u8],
    signature: &[u8],
) -> Result<(), TokenError> {
    let signature = Signature::from_slice(signature).map_err(|_| TokenError::InvalidSignature)?;
    key.verify(payload, &signature)
        .map_err(|_| TokenError::InvalidSignature)
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD.encode(data)
}

fn base64_url_decode(s: &str) -> Result<Vec<u8>, TokenError> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    URL_SAFE_NO_PAD
        .decode(s.trim())
        .map_err(|_| TokenError::Base64Decode)
}
