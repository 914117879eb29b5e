//! Curve25519 key material.
//!
//! Three long-term keys live on disk under the key directory:
//!
//! - `client-long-term.pub` — the client's long-term public key
//! - `client-long-term` — the client's long-term secret key
//! - `server-long-term.pub` — the server's long-term public key
//!
//! Short-term key pairs are generated per session and destroyed on
//! disconnect (`StaticSecret` zeroizes itself on drop).

use std::fs;
use std::path::{Path, PathBuf};

use chacha20poly1305::aead::OsRng;
use x25519_dalek::StaticSecret;

use crate::error::CryptoError;

/// All splonebox keys are raw 32-byte Curve25519 keys
pub const KEY_SIZE: usize = 32;

/// File name of the client's long-term public key
pub const CLIENT_PUBLIC_FILE: &str = "client-long-term.pub";
/// File name of the client's long-term secret key
pub const CLIENT_SECRET_FILE: &str = "client-long-term";
/// File name of the server's long-term public key
pub const SERVER_PUBLIC_FILE: &str = "server-long-term.pub";

/// Curve25519 public key (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn to_x25519(self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(self.0)
    }
}

impl From<[u8; KEY_SIZE]> for PublicKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Curve25519 secret key (32 bytes)
#[derive(Clone)]
pub struct SecretKey(StaticSecret);

impl SecretKey {
    /// Generate a new random secret key
    #[must_use]
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Derive the matching public key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(*x25519_dalek::PublicKey::from(&self.0).as_bytes())
    }

    /// Compute the raw shared secret via ECDH
    #[must_use]
    pub fn diffie_hellman(&self, peer: &PublicKey) -> [u8; KEY_SIZE] {
        *self.0.diffie_hellman(&peer.to_x25519()).as_bytes()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// A public/secret key pair
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl KeyPair {
    /// Generate a fresh random key pair (used for short-term session keys)
    #[must_use]
    pub fn generate() -> Self {
        let secret = SecretKey::generate();
        let public = secret.public_key();
        Self { public, secret }
    }

    #[must_use]
    pub const fn from_keys(public: PublicKey, secret: SecretKey) -> Self {
        Self { public, secret }
    }
}

/// The long-term key material the client needs for a session
#[derive(Debug, Clone)]
pub struct Keyring {
    pub client_public: PublicKey,
    pub client_secret: SecretKey,
    pub server_public: PublicKey,
}

impl Keyring {
    pub const fn new(
        client_public: PublicKey,
        client_secret: SecretKey,
        server_public: PublicKey,
    ) -> Self {
        Self {
            client_public,
            client_secret,
            server_public,
        }
    }

    /// Load the three long-term keys from the key directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let dir = dir.as_ref();
        let client_public = PublicKey::from_bytes(load_key(&dir.join(CLIENT_PUBLIC_FILE))?);
        let client_secret = SecretKey::from_bytes(load_key(&dir.join(CLIENT_SECRET_FILE))?);
        let server_public = PublicKey::from_bytes(load_key(&dir.join(SERVER_PUBLIC_FILE))?);
        Ok(Self {
            client_public,
            client_secret,
            server_public,
        })
    }
}

/// Read a raw 32-byte key file.
fn load_key(path: &PathBuf) -> Result<[u8; KEY_SIZE], CryptoError> {
    let data = fs::read(path).map_err(|e| CryptoError::Key {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let bytes: [u8; KEY_SIZE] = data.as_slice().try_into().map_err(|_| CryptoError::Key {
        path: path.display().to_string(),
        reason: format!("expected {KEY_SIZE} bytes, found {}", data.len()),
    })?;

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_generation() {
        let pair = KeyPair::generate();
        assert_eq!(pair.public.as_bytes().len(), KEY_SIZE);
        assert_eq!(pair.secret.public_key(), pair.public);
    }

    #[test]
    fn diffie_hellman_agrees() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let ab = alice.secret.diffie_hellman(&bob.public);
        let ba = bob.secret.diffie_hellman(&alice.public);
        assert_eq!(ab, ba);
    }

    #[test]
    fn keyring_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let client = KeyPair::generate();
        let server = KeyPair::generate();

        std::fs::write(dir.path().join(CLIENT_PUBLIC_FILE), client.public.as_bytes()).unwrap();
        std::fs::write(dir.path().join(CLIENT_SECRET_FILE), [7u8; KEY_SIZE]).unwrap();
        std::fs::write(dir.path().join(SERVER_PUBLIC_FILE), server.public.as_bytes()).unwrap();

        let ring = Keyring::from_dir(dir.path()).unwrap();
        assert_eq!(ring.client_public, client.public);
        assert_eq!(ring.server_public, server.public);
        assert_eq!(
            ring.client_secret.public_key(),
            SecretKey::from_bytes([7u8; KEY_SIZE]).public_key()
        );
    }

    #[test]
    fn short_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CLIENT_PUBLIC_FILE), [0u8; 16]).unwrap();
        std::fs::write(dir.path().join(CLIENT_SECRET_FILE), [0u8; KEY_SIZE]).unwrap();
        std::fs::write(dir.path().join(SERVER_PUBLIC_FILE), [0u8; KEY_SIZE]).unwrap();

        assert!(matches!(
            Keyring::from_dir(dir.path()),
            Err(CryptoError::Key { .. })
        ));
    }
}
