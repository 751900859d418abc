//! Signed CDN URLs
//!
//! A URL gains `expires=<unix_seconds>` and `signature=<hex>` query
//! parameters, where the signature is the first 16 hex characters of an
//! HMAC-SHA256 over the pre-signature URL. Verification strips the
//! signature parameter, recomputes the MAC, and compares in constant time.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Number of hex characters kept from the MAC.
const SIGNATURE_LEN: usize = 16;

#[derive(Clone)]
pub struct UrlSigner {
    secret: String,
}

impl UrlSigner {
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(Error::InvalidArgument(
                "signing secret must not be empty".to_string(),
            ));
        }
        Ok(Self { secret })
    }

    /// Append `expires` and `signature` parameters to `url`.
    pub fn sign(&self, url: &str, ttl: Duration) -> Result<String> {
        if url.is_empty() {
            return Err(Error::InvalidArgument("url must not be empty".to_string()));
        }
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let separator = if url.contains('?') { '&' } else { '?' };
        let pre_signature = format!("{url}{separator}expires={expires}");
        let signature = self.mac_hex(&pre_signature);
        Ok(format!("{pre_signature}&signature={signature}"))
    }

    /// Verify a signed URL: both parameters present, MAC matches, not expired.
    pub fn verify(&self, signed_url: &str) -> Result<()> {
        let (pre_signature, signature) = split_signature(signed_url)?;

        let expires = query_param(pre_signature, "expires")
            .ok_or_else(|| Error::InvalidArgument("missing expires parameter".to_string()))?
            .parse::<i64>()
            .map_err(|_| Error::InvalidArgument("malformed expires parameter".to_string()))?;

        let expected = self.mac_hex(pre_signature);
        if expected.as_bytes().ct_eq(signature.as_bytes()).unwrap_u8() != 1 {
            return Err(Error::InvalidSignature);
        }

        if Utc::now().timestamp() > expires {
            return Err(Error::Expired(format!("url expired at {expires}")));
        }

        Ok(())
    }

    fn mac_hex(&self, input: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(input.as_bytes());
        let digest = mac.finalize().into_bytes();
        let mut hex = hex::encode(digest);
        hex.truncate(SIGNATURE_LEN);
        hex
    }
}

/// Split off the trailing `signature` parameter, returning the URL that was
/// signed and the signature value.
fn split_signature(signed_url: &str) -> Result<(&str, &str)> {
    for marker in ["&signature=", "?signature="] {
        if let Some(at) = signed_url.rfind(marker) {
            let signature = &signed_url[at + marker.len()..];
            if signature.len() != SIGNATURE_LEN || signature.contains('&') {
                return Err(Error::InvalidArgument(
                    "malformed signature parameter".to_string(),
                ));
            }
            return Ok((&signed_url[..at], signature));
        }
    }
    Err(Error::InvalidArgument(
        "missing signature parameter".to_string(),
    ))
}

fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
    let query = url.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}
