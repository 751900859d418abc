//! Signed join tokens
//!
//! HS256 JWTs carrying participant identity and a video grant. The issuer
//! claim names the API access key; the verifier looks up the matching
//! secret and validates signature and validity window.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Error, Result};

/// Capability grants carried in the `video` claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoGrant {
    /// Allow joining the room named in `room`.
    pub room_join: bool,
    /// Room this token is scoped to. Empty = any room.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub room: String,
    pub room_create: bool,
    pub room_list: bool,
    pub room_admin: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
    pub can_publish_data: bool,
    /// Participant is invisible to others (monitoring agents).
    pub hidden: bool,
    /// Participant is a recording agent.
    pub recorder: bool,
}

/// JWT claim set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Participant identity
    pub sub: String,
    /// API access key that issued this token
    pub iss: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Not valid before (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Application metadata, serialized JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoGrant>,
}

impl Claims {
    #[must_use]
    pub fn grant(&self) -> VideoGrant {
        self.video.clone().unwrap_or_default()
    }
}

/// Builder for signed join tokens.
pub struct AccessToken {
    api_key: String,
    api_secret: String,
    identity: String,
    name: Option<String>,
    email: Option<String>,
    metadata: Option<String>,
    grant: VideoGrant,
    ttl: ChronoDuration,
    not_before: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            identity: String::new(),
            name: None,
            email: None,
            metadata: None,
            grant: VideoGrant::default(),
            ttl: ChronoDuration::hours(6),
            not_before: None,
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    #[must_use]
    pub fn with_grant(mut self, grant: VideoGrant) -> Self {
        self.grant = grant;
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(6));
        self
    }

    #[must_use]
    pub fn with_not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }

    /// Sign the token.
    pub fn to_jwt(&self) -> Result<String> {
        if self.identity.is_empty() {
            return Err(Error::IdentityRequired);
        }
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(Error::InvalidArgument(
                "api key and secret are required".to_string(),
            ));
        }

        let now = Utc::now();
        let claims = Claims {
            sub: self.identity.clone(),
            iss: self.api_key.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            nbf: self.not_before.map(|at| at.timestamp()),
            name: self.name.clone(),
            email: self.email.clone(),
            metadata: self.metadata.clone(),
            video: Some(self.grant.clone()),
        };

        let header = Header::new(Algorithm::HS256);
        encode(
            &header,
            &claims,
            &EncodingKey::from_secret(self.api_secret.as_bytes()),
        )
        .map_err(|e| Error::InvalidToken(format!("signing failed: {e}")))
    }
}

/// Verifies join tokens against the configured API key pairs.
#[derive(Default, Clone)]
pub struct TokenVerifier {
    secrets: HashMap<String, String>,
}

impl TokenVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_key(mut self, api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(api_key.into(), secret.into());
        self
    }

    pub fn add_key(&mut self, api_key: impl Into<String>, secret: impl Into<String>) {
        self.secrets.insert(api_key.into(), secret.into());
    }

    /// Validate a token and return its claims.
    ///
    /// Signature comparison is constant time (handled by the MAC layer);
    /// the validity window is checked with no leeway so short-lived tokens
    /// behave deterministically.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let issuer = extract_issuer(token)?;
        let secret = self
            .secrets
            .get(&issuer)
            .ok_or_else(|| Error::InvalidToken(format!("unknown access key '{issuer}'")))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::TokenExpired,
            jsonwebtoken::errors::ErrorKind::ImmatureSignature => Error::TokenNotYetValid,
            other => Error::InvalidToken(format!("{other:?}")),
        })?;

        if data.claims.sub.is_empty() {
            return Err(Error::IdentityRequired);
        }

        Ok(data.claims)
    }
}

/// Read the issuer claim without verifying the signature; the result is
/// only used to pick the candidate secret.
fn extract_issuer(token: &str) -> Result<String> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_mac), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(Error::InvalidToken("expected three segments".to_string()));
    };

    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| Error::InvalidToken("payload is not base64url".to_string()))?;

    #[derive(Deserialize)]
    struct IssuerOnly {
        iss: Option<String>,
    }
    let issuer: IssuerOnly = serde_json::from_slice(&decoded)
        .map_err(|_| Error::InvalidToken("payload is not JSON".to_string()))?;
    issuer
        .iss
        .ok_or_else(|| Error::InvalidToken("missing issuer claim".to_string()))
}

/// API-key credentials from a `Bearer <access_key>:<secret_key>` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl ApiCredentials {
    pub fn from_authorization_header(header: &str) -> Result<Self> {
        let bearer = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::InvalidArgument("expected Bearer authorization".to_string()))?;
        let (access_key, secret_key) = bearer
            .split_once(':')
            .ok_or_else(|| Error::InvalidArgument("expected <key>:<secret> form".to_string()))?;
        if access_key.is_empty() || secret_key.is_empty() {
            return Err(Error::InvalidArgument(
                "access key and secret must be non-empty".to_string(),
            ));
        }
        Ok(Self {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn publisher_grant(room: &str) -> VideoGrant {
        VideoGrant {
            room_join: true,
            room: room.to_string(),
            can_publish: true,
            can_subscribe: true,
            ..Default::default()
        }
    }

    fn verifier() -> TokenVerifier {
        TokenVerifier::new().with_key("AK_demo", "secret_A")
    }

    #[test]
    fn test_sign_and_verify_round_trip() {
        let token = AccessToken::new("AK_demo", "secret_A")
            .with_identity("alice")
            .with_name("Alice")
            .with_grant(publisher_grant("R1"))
            .with_ttl(Duration::from_secs(3600))
            .to_jwt()
            .expect("sign");

        // Three URL-safe base64 segments.
        assert_eq!(token.split('.').count(), 3);

        let claims = verifier().verify(&token).expect("verify");
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.iss, "AK_demo");
        assert_eq!(claims.name.as_deref(), Some("Alice"));
        let grant = claims.grant();
        assert!(grant.room_join);
        assert!(grant.can_publish);
        assert_eq!(grant.room, "R1");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = AccessToken::new("AK_demo", "secret_A")
            .with_identity("alice")
            .with_grant(publisher_grant("R1"))
            .to_jwt()
            .expect("sign");

        let other = TokenVerifier::new().with_key("AK_demo", "secret_B");
        assert!(matches!(other.verify(&token), Err(Error::InvalidToken(_))));
    }

    #[test]
    fn test_unknown_access_key_rejected() {
        let token = AccessToken::new("AK_other", "whatever")
            .with_identity("alice")
            .to_jwt()
            .expect("sign");
        assert!(matches!(
            verifier().verify(&token),
            Err(Error::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token() {
        let token = AccessToken::new("AK_demo", "secret_A")
            .with_identity("alice")
            .with_ttl(Duration::from_secs(0))
            .to_jwt()
            .expect("sign");
        std::thread::sleep(Duration::from_millis(1100));
        assert!(matches!(verifier().verify(&token), Err(Error::TokenExpired)));
    }

    #[test]
    fn test_not_yet_valid_token() {
        let token = AccessToken::new("AK_demo", "secret_A")
            .with_identity("alice")
            .with_not_before(Utc::now() + chrono::Duration::hours(1))
            .to_jwt()
            .expect("sign");
        assert!(matches!(
            verifier().verify(&token),
            Err(Error::TokenNotYetValid)
        ));
    }

    #[test]
    fn test_missing_identity_rejected_at_signing() {
        let result = AccessToken::new("AK_demo", "secret_A").to_jwt();
        assert!(matches!(result, Err(Error::IdentityRequired)));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = AccessToken::new("AK_demo", "secret_A")
            .with_identity("alice")
            .to_jwt()
            .expect("sign");

        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let mut claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(&parts[1]).expect("decode"))
                .expect("json");
        claims["sub"] = serde_json::Value::String("mallory".to_string());
        parts[1] = URL_SAFE_NO_PAD.encode(claims.to_string());
        let tampered = parts.join(".");

        assert!(matches!(
            verifier().verify(&tampered),
            Err(Error::InvalidToken(_))
        ));
    }

    #[test]
    fn test_malformed_structure_rejected() {
        assert!(matches!(
            verifier().verify("not-a-token"),
            Err(Error::InvalidToken(_))
        ));
        assert!(matches!(
            verifier().verify("a.b"),
            Err(Error::InvalidToken(_))
        ));
    }

    #[test]
    fn test_metadata_round_trip() {
        let token = AccessToken::new("AK_demo", "secret_A")
            .with_identity("alice")
            .with_metadata(r#"{"avatar":"https://example.com/a.png"}"#)
            .to_jwt()
            .expect("sign");
        let claims = verifier().verify(&token).expect("verify");
        let metadata: serde_json::Value =
            serde_json::from_str(claims.metadata.as_deref().expect("metadata")).expect("json");
        assert_eq!(metadata["avatar"], "https://example.com/a.png");
    }

    #[test]
    fn test_bearer_credentials() {
        let creds =
            ApiCredentials::from_authorization_header("Bearer AK_demo:secret_A").expect("parse");
        assert_eq!(creds.access_key, "AK_demo");
        assert_eq!(creds.secret_key, "secret_A");

        assert!(ApiCredentials::from_authorization_header("Basic foo").is_err());
        assert!(ApiCredentials::from_authorization_header("Bearer nosep").is_err());
    }
}
