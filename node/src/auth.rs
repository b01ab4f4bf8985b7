//! # Request Authentication
//!
//! Every state-changing API call except `/admin/health-check` is signed with
//! Ed25519. The signer's address is [`Address::from_public_key`] of the key
//! in the headers, and it must be the actor the body names (`depositor` or
//! `caller`). The vault then applies its own role checks to that address.
//!
//! ## Headers
//!
//! | Header              | Value                                         |
//! |---------------------|-----------------------------------------------|
//! | `x-aion-public-key` | hex Ed25519 public key (32 bytes)             |
//! | `x-aion-timestamp`  | unix seconds at signing time                  |
//! | `x-aion-signature`  | hex signature (64 bytes) over the message     |
//!
//! The signed message is `METHOD \n PATH \n TIMESTAMP \n BODY`. Requests whose
//! timestamp is more than [`MAX_CLOCK_SKEW_SECS`] away from the node clock
//! are refused.

use anyhow::{anyhow, Context, Result};
use axum::http::HeaderMap;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::path::Path;
use thiserror::Error;

use aion_vault::Address;

pub const PUBLIC_KEY_HEADER: &str = "x-aion-public-key";
pub const TIMESTAMP_HEADER: &str = "x-aion-timestamp";
pub const SIGNATURE_HEADER: &str = "x-aion-signature";

/// Largest accepted distance between a request timestamp and the node clock.
pub const MAX_CLOCK_SKEW_SECS: u64 = 300;

/// Why a request failed authentication.
///
/// Verification failures are deliberately not broken down further.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A required header is absent or not valid UTF-8.
    #[error("missing or unreadable header {0}")]
    MissingHeader(&'static str),

    /// The public key header is not a valid Ed25519 key.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// The signature header is not 64 hex-encoded bytes.
    #[error("malformed signature")]
    MalformedSignature,

    /// The timestamp header is not an integer.
    #[error("malformed timestamp")]
    MalformedTimestamp,

    /// The timestamp is outside the accepted window.
    #[error("request timestamp {timestamp} is outside the accepted window")]
    Stale { timestamp: i64 },

    /// The signature does not verify against the key and message.
    #[error("signature verification failed")]
    VerificationFailed,

    /// The body acts for an address other than the signer's.
    #[error("request signed by {signer} cannot act for {actor}")]
    ActorMismatch { signer: Address, actor: Address },
}

/// Bytes covered by the signature.
pub fn signing_message(method: &str, path: &str, timestamp: i64, body: &[u8]) -> Vec<u8> {
    let mut message = format!("{method}\n{path}\n{timestamp}\n").into_bytes();
    message.extend_from_slice(body);
    message
}

/// Vault address controlled by `key`.
pub fn address_of(key: &VerifyingKey) -> Address {
    Address::from_public_key(key.as_bytes())
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, AuthError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingHeader(name))
}

fn decode_fixed<const N: usize>(raw: &str) -> Option<[u8; N]> {
    hex::decode(raw).ok()?.try_into().ok()
}

/// Checks the signature headers of a request and returns the signer.
///
/// `now` is the node clock in unix seconds.
pub fn verify_request(
    headers: &HeaderMap,
    method: &str,
    path: &str,
    body: &[u8],
    now: i64,
) -> Result<Address, AuthError> {
    let key_bytes: [u8; 32] =
        decode_fixed(header(headers, PUBLIC_KEY_HEADER)?).ok_or(AuthError::InvalidPublicKey)?;
    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| AuthError::InvalidPublicKey)?;

    let timestamp: i64 = header(headers, TIMESTAMP_HEADER)?
        .parse()
        .map_err(|_| AuthError::MalformedTimestamp)?;
    if now.abs_diff(timestamp) > MAX_CLOCK_SKEW_SECS {
        return Err(AuthError::Stale { timestamp });
    }

    let signature_bytes: [u8; 64] =
        decode_fixed(header(headers, SIGNATURE_HEADER)?).ok_or(AuthError::MalformedSignature)?;
    let signature = Signature::from_bytes(&signature_bytes);

    key.verify_strict(&signing_message(method, path, timestamp, body), &signature)
        .map_err(|_| AuthError::VerificationFailed)?;
    Ok(address_of(&key))
}

/// Header name/value pairs that authenticate a request signed by `key`.
pub fn sign_request(
    key: &SigningKey,
    method: &str,
    path: &str,
    timestamp: i64,
    body: &[u8],
) -> [(&'static str, String); 3] {
    let signature = key.sign(&signing_message(method, path, timestamp, body));
    [
        (PUBLIC_KEY_HEADER, hex::encode(key.verifying_key().as_bytes())),
        (TIMESTAMP_HEADER, timestamp.to_string()),
        (SIGNATURE_HEADER, hex::encode(signature.to_bytes())),
    ]
}

// ---------------------------------------------------------------------------
// Key Files
// ---------------------------------------------------------------------------

/// A fresh signing key from the OS RNG.
pub fn generate_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Writes the hex-encoded secret key. Owner-readable only on Unix.
pub fn write_key_file(path: &Path, key: &SigningKey) -> Result<()> {
    std::fs::write(path, hex::encode(key.to_bytes()))
        .with_context(|| format!("failed to write key file {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict permissions on {}", path.display()))?;
    }
    Ok(())
}

/// Reads a key written by [`write_key_file`].
pub fn read_key_file(path: &Path) -> Result<SigningKey> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key file {}", path.display()))?;
    let bytes: [u8; 32] = decode_fixed(raw.trim())
        .ok_or_else(|| anyhow!("{} does not hold a 32-byte hex key", path.display()))?;
    Ok(SigningKey::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const NOW: i64 = 1_700_000_000;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn signed_headers(key: &SigningKey, path: &str, timestamp: i64, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in sign_request(key, "POST", path, timestamp, body) {
            headers.insert(name, HeaderValue::from_str(&value).unwrap());
        }
        headers
    }

    #[test]
    fn valid_signature_yields_the_signer_address() {
        let alice = key(1);
        let headers = signed_headers(&alice, "/deposit", NOW, b"{}");
        let signer = verify_request(&headers, "POST", "/deposit", b"{}", NOW + 10).unwrap();
        assert_eq!(signer, address_of(&alice.verifying_key()));
    }

    #[test]
    fn altered_body_or_path_fails() {
        let headers = signed_headers(&key(1), "/deposit", NOW, br#"{"amount":1}"#);
        assert!(matches!(
            verify_request(&headers, "POST", "/deposit", br#"{"amount":9}"#, NOW),
            Err(AuthError::VerificationFailed)
        ));
        assert!(matches!(
            verify_request(&headers, "POST", "/withdraw", br#"{"amount":1}"#, NOW),
            Err(AuthError::VerificationFailed)
        ));
    }

    #[test]
    fn old_timestamps_are_refused() {
        let headers = signed_headers(&key(1), "/claim", NOW, b"");
        let late = NOW + MAX_CLOCK_SKEW_SECS as i64 + 1;
        assert!(matches!(
            verify_request(&headers, "POST", "/claim", b"", late),
            Err(AuthError::Stale { timestamp: NOW })
        ));
    }

    #[test]
    fn missing_headers_are_named() {
        let mut headers = signed_headers(&key(1), "/claim", NOW, b"");
        headers.remove(SIGNATURE_HEADER);
        assert!(matches!(
            verify_request(&headers, "POST", "/claim", b"", NOW),
            Err(AuthError::MissingHeader(SIGNATURE_HEADER))
        ));
        assert!(matches!(
            verify_request(&HeaderMap::new(), "POST", "/claim", b"", NOW),
            Err(AuthError::MissingHeader(PUBLIC_KEY_HEADER))
        ));
    }

    #[test]
    fn key_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("owner.key");
        let original = generate_key();
        write_key_file(&path, &original).unwrap();

        let loaded = read_key_file(&path).unwrap();
        assert_eq!(loaded.verifying_key(), original.verifying_key());

        std::fs::write(&path, "not-a-key").unwrap();
        assert!(read_key_file(&path).is_err());
    }
}
