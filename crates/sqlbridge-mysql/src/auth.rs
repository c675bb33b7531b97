//! Authentication plugins.
//!
//! - `mysql_native_password`: `SHA1(pw) XOR SHA1(nonce + SHA1(SHA1(pw)))`
//! - `caching_sha2_password`: `SHA256(pw) XOR SHA256(SHA256(SHA256(pw)) + nonce)`
//!   on the fast path. When the server has no cached entry it asks for full
//!   authentication, which sends the password RSA-encrypted (TCP) or in clear
//!   (Unix socket).
//! - `sha256_password`: always full authentication.
//! - `mysql_clear_password`: the password, NUL-terminated.

use rand::rngs::OsRng;
use rsa::RsaPublicKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use sqlbridge_core::error::{ConnectionError, ConnectionErrorKind, Error};

pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const SHA256_PASSWORD: &str = "sha256_password";
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// Status bytes in a `caching_sha2_password` more-data packet.
pub mod caching_sha2 {
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// The 20-byte scramble the hashes use. Servers append a NUL to it.
fn nonce(auth_data: &[u8]) -> &[u8] {
    match auth_data {
        [head @ .., 0] if head.len() == 20 => head,
        data if data.len() > 20 => &data[..20],
        data => data,
    }
}

fn xor<const N: usize>(a: [u8; N], b: [u8; N]) -> Vec<u8> {
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

pub fn mysql_native_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1: [u8; 20] = Sha1::digest(password.as_bytes()).into();
    let stage2: [u8; 20] = Sha1::digest(stage1).into();
    let scramble: [u8; 20] = Sha1::new()
        .chain_update(nonce(auth_data))
        .chain_update(stage2)
        .finalize()
        .into();
    xor(stage1, scramble)
}

pub fn caching_sha2_password(password: &str, auth_data: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let digest1: [u8; 32] = Sha256::digest(password.as_bytes()).into();
    let digest2: [u8; 32] = Sha256::digest(digest1).into();
    let scramble: [u8; 32] = Sha256::new()
        .chain_update(digest2)
        .chain_update(nonce(auth_data))
        .finalize()
        .into();
    xor(digest1, scramble)
}

/// Password followed by NUL, for cleartext exchanges.
pub fn cleartext(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() + 1);
    out.extend_from_slice(password.as_bytes());
    out.push(0);
    out
}

/// NUL-terminated password XORed with the rotating nonce.
pub fn xor_with_nonce(password: &str, auth_data: &[u8]) -> Vec<u8> {
    let seed = nonce(auth_data);
    let mut out = cleartext(password);
    if !seed.is_empty() {
        for (i, byte) in out.iter_mut().enumerate() {
            *byte ^= seed[i % seed.len()];
        }
    }
    out
}

/// Encrypt the scrambled password with the server's RSA public key (PEM,
/// SPKI or PKCS#1), using OAEP padding.
pub fn encrypt_password(password: &str, auth_data: &[u8], public_key_pem: &[u8]) -> Result<Vec<u8>, Error> {
    if nonce(auth_data).is_empty() {
        return Err(auth_failure("server sent an empty authentication nonce"));
    }
    let pem = std::str::from_utf8(public_key_pem)
        .map_err(|e| auth_failure(format!("server public key is not PEM text: {}", e)))?;
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| auth_failure(format!("could not parse server public key: {}", e)))?;
    key.encrypt(&mut OsRng, rsa::Oaep::new::<Sha1>(), &xor_with_nonce(password, auth_data))
        .map_err(|e| auth_failure(format!("RSA encryption failed: {}", e)))
}

/// First response for `plugin`, sent in the handshake or after a switch.
pub fn initial_response(plugin: &str, password: &str, auth_data: &[u8], secure: bool) -> Vec<u8> {
    match plugin {
        plugins::CACHING_SHA2_PASSWORD => caching_sha2_password(password, auth_data),
        plugins::MYSQL_CLEAR_PASSWORD => cleartext(password),
        // An empty password needs no exchange at all.
        plugins::SHA256_PASSWORD if password.is_empty() => vec![0],
        plugins::SHA256_PASSWORD if secure => cleartext(password),
        // Ask for the public key; the server answers with the PEM.
        plugins::SHA256_PASSWORD => vec![1],
        _ => mysql_native_password(password, auth_data),
    }
}

pub(crate) fn auth_failure(message: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: message.into(),
        source: None,
    })
}
