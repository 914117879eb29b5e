//! Authenticated public-key boxes.
//!
//! A "box" is what the splonebox protocol builds every packet from: X25519
//! ECDH between one party's secret key and the other's public key, the raw
//! shared secret keying XChaCha20-Poly1305, and a 24-byte nonce that is
//! never reused under the same key pair. The ciphertext carries a 16-byte
//! Poly1305 tag, so a box is always `plaintext + 16` bytes.
//!
//! The protocol uses two nonce shapes:
//!
//! - counter nonces: a 16-byte ASCII label followed by a little-endian
//!   64-bit counter (session packets; labels longer than 16 bytes occupy
//!   the slot truncated, matching the wire format)
//! - tagged nonces: an 8-byte ASCII label followed by 16 opaque bytes
//!   (cookie and vouch boxes)

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};

use crate::error::CryptoError;
use crate::keys::{PublicKey, SecretKey, KEY_SIZE};

/// Nonce length of an XChaCha20-Poly1305 box
pub const NONCE_SIZE: usize = 24;
/// Poly1305 tag length; every box is this much longer than its plaintext
pub const BOX_OVERHEAD: usize = 16;

/// An authenticated encryption box keyed by an X25519 shared secret
pub struct SealedBox {
    cipher: XChaCha20Poly1305,
}

impl SealedBox {
    /// Key a box from our secret key and the peer's public key.
    #[must_use]
    pub fn new(secret: &SecretKey, peer: &PublicKey) -> Self {
        Self::from_shared(&secret.diffie_hellman(peer))
    }

    /// Key a box from a precomputed shared secret.
    #[must_use]
    pub fn from_shared(shared: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(shared.into()),
        }
    }

    /// Encrypt and authenticate `plaintext` under `nonce`.
    pub fn seal(&self, plaintext: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::EncryptFailed)
    }

    /// Open a box, verifying its authentication tag.
    pub fn open(&self, ciphertext: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>, CryptoError> {
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::InvalidPacket("box authentication failed"))
    }
}

/// Build a counter nonce: `label` (padded or truncated to 16 bytes) followed
/// by the counter in little-endian form.
#[must_use]
pub fn counter_nonce(label: &[u8], counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    let n = label.len().min(16);
    nonce[..n].copy_from_slice(&label[..n]);
    nonce[16..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Build a tagged nonce: an 8-byte label followed by 16 opaque nonce bytes.
#[must_use]
pub fn tagged_nonce(label: &[u8; 8], tail: &[u8; 16]) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..8].copy_from_slice(label);
    nonce[8..].copy_from_slice(tail);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;

    #[test]
    fn box_roundtrip() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let sealer = SealedBox::new(&alice.secret, &bob.public);
        let opener = SealedBox::new(&bob.secret, &alice.public);

        let nonce = counter_nonce(b"splonebox-client", 17);
        let sealed = sealer.seal(b"attack at dawn", &nonce).unwrap();
        assert_eq!(sealed.len(), 14 + BOX_OVERHEAD);

        let opened = opener.open(&sealed, &nonce).unwrap();
        assert_eq!(opened, b"attack at dawn");
    }

    #[test]
    fn wrong_nonce_fails_authentication() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let sealer = SealedBox::new(&alice.secret, &bob.public);

        let sealed = sealer
            .seal(b"payload", &counter_nonce(b"splonebox-client", 3))
            .unwrap();
        let err = sealer
            .open(&sealed, &counter_nonce(b"splonebox-client", 5))
            .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPacket(_)));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let eve = KeyPair::generate();

        let nonce = counter_nonce(b"splonebox-client", 1);
        let sealed = SealedBox::new(&alice.secret, &bob.public)
            .seal(b"secret", &nonce)
            .unwrap();

        assert!(SealedBox::new(&eve.secret, &alice.public)
            .open(&sealed, &nonce)
            .is_err());
    }

    #[test]
    fn counter_nonce_layout() {
        let nonce = counter_nonce(b"splonebox-client", 0x0102_0304);
        assert_eq!(&nonce[..16], b"splonebox-client");
        assert_eq!(&nonce[16..], &0x0102_0304u64.to_le_bytes());
    }

    #[test]
    fn oversized_label_fills_its_slot() {
        // 18 ASCII bytes squeeze into the 16-byte slot, as on the wire
        let nonce = counter_nonce(b"splonebox-client-H", 1);
        assert_eq!(&nonce[..16], b"splonebox-client");
    }

    #[test]
    fn tagged_nonce_layout() {
        let tail = [0xAB; 16];
        let nonce = tagged_nonce(b"splonePV", &tail);
        assert_eq!(&nonce[..8], b"splonePV");
        assert_eq!(&nonce[8..], &tail);
    }
}
