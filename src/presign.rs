//! HMAC-signed, time-limited blob URLs for the in-process object stores.
//!
//! A URL has the form
//! `{base}/blobs/{key}?expires={unix-secs}&signature={hex}` where the
//! signature is HMAC-SHA256 over `"{key}\n{expires}"`.  Anyone holding the
//! URL may fetch the object until `expires`; nothing is tracked server-side.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Route prefix the blob handler is mounted under.
pub const BLOB_ROUTE_PREFIX: &str = "/blobs/";

/// Path characters left unescaped in the key (`/` keeps the key's shape).
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Link expired")]
    Expired,
    #[error("Invalid signature")]
    Invalid,
}

pub struct UrlSigner {
    secret: Vec<u8>,
    base_url: String,
}

impl UrlSigner {
    pub fn new(secret: impl Into<Vec<u8>>, base_url: &str) -> Self {
        Self {
            secret: secret.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Build a signer from the configured secret, or a random one if empty.
    pub fn from_secret_or_random(secret: &str, base_url: &str) -> Self {
        if secret.is_empty() {
            let bytes: [u8; 32] = rand::random();
            Self::new(bytes.to_vec(), base_url)
        } else {
            Self::new(secret.as_bytes().to_vec(), base_url)
        }
    }

    /// Signed URL for `key`, valid for `ttl` from now.
    pub fn sign_url(&self, key: &str, ttl: Duration) -> String {
        self.sign_url_at(key, unix_now() + ttl.as_secs())
    }

    fn sign_url_at(&self, key: &str, expires: u64) -> String {
        format!(
            "{}{}{}?expires={}&signature={}",
            self.base_url,
            BLOB_ROUTE_PREFIX,
            utf8_percent_encode(key, KEY_ENCODE_SET),
            expires,
            self.signature(key, expires)
        )
    }

    fn signature(&self, key: &str, expires: u64) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check a presented `(key, expires, signature)` triple against the clock.
    pub fn verify(&self, key: &str, expires: u64, signature: &str) -> Result<(), SignatureError> {
        self.verify_at(key, expires, signature, unix_now())
    }

    fn verify_at(
        &self,
        key: &str,
        expires: u64,
        signature: &str,
        now: u64,
    ) -> Result<(), SignatureError> {
        let expected = self.signature(key, expires);
        if expected.len() != signature.len()
            || !bool::from(expected.as_bytes().ct_eq(signature.as_bytes()))
        {
            return Err(SignatureError::Invalid);
        }
        if now > expires {
            return Err(SignatureError::Expired);
        }
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
