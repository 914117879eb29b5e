//! Persistent vouch-nonce store.
//!
//! Boxes sealed under the *long-term* keys (the vouch box inside the
//! Initiate packet) need nonces that stay unique across process restarts —
//! a crashed client must never replay one. The store keeps a monotonic
//! counter on disk next to the key material:
//!
//! - `noncekey` — 32-byte secret that keys the nonce transform
//! - `noncecounter` — little-endian u64, the next unreserved counter value
//! - `lock` — advisory exclusive lock guarding the read-modify-write, so
//!   two clients sharing one key directory cannot draw the same value
//!
//! Counters are reserved in batches: read `noncecounter`, persist
//! `counter + 1` (fsynced) *before* the old value is used. Every drawn
//! 16-byte nonce is the XChaCha20 encryption of `counter ‖ 8 random bytes`
//! under `noncekey` with a random, discarded IV, so the on-wire nonce never
//! exposes the counter itself.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::XChaCha20;
use fs2::FileExt;
use parking_lot::Mutex;
use rand::RngCore;
use tracing::error;

use crate::error::CryptoError;

/// File name of the nonce transform key (32 bytes, secret)
pub const NONCE_KEY_FILE: &str = "noncekey";
/// File name of the persistent counter (little-endian u64)
pub const NONCE_COUNTER_FILE: &str = "noncecounter";
/// File name of the advisory lock guarding the counter
pub const NONCE_LOCK_FILE: &str = "lock";

/// Length of a drawn vouch nonce
pub const VOUCH_NONCE_SIZE: usize = 16;

struct StoreState {
    key: Option<[u8; 32]>,
    counter_low: u64,
    counter_high: u64,
}

/// Disk-backed monotonic nonce source for long-term-key boxes
pub struct NonceStore {
    dir: PathBuf,
    state: Mutex<StoreState>,
}

impl NonceStore {
    /// Create a store over the given key directory. No I/O happens until
    /// the first draw.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            state: Mutex::new(StoreState {
                key: None,
                counter_low: 0,
                counter_high: 0,
            }),
        }
    }

    /// Draw a fresh 16-byte vouch nonce.
    ///
    /// Values are unique across process restarts even if the process
    /// crashes between draws: the counter on disk is always ahead of every
    /// value ever handed out.
    pub fn vouch_nonce(&self) -> Result<[u8; VOUCH_NONCE_SIZE], CryptoError> {
        let lock_file = self.open_lock().map_err(CryptoError::NonceStore)?;
        lock_file.lock_exclusive().map_err(CryptoError::NonceStore)?;

        // The lock is released when lock_file drops at the end of scope.
        let result = self.draw_locked();

        if let Err(ref e) = result {
            error!("failed to generate safe nonce: {}", e);
        }
        result
    }

    fn open_lock(&self) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(self.dir.join(NONCE_LOCK_FILE))
    }

    fn draw_locked(&self) -> Result<[u8; VOUCH_NONCE_SIZE], CryptoError> {
        let mut state = self.state.lock();

        let key = match state.key {
            Some(key) => key,
            None => {
                let key = self.load_nonce_key()?;
                state.key = Some(key);
                key
            }
        };

        if state.counter_low >= state.counter_high {
            let current = self.read_counter().map_err(CryptoError::NonceStore)?;
            state.counter_low = current;
            state.counter_high = current + 1;
            self.write_counter(state.counter_high)
                .map_err(CryptoError::NonceStore)?;
        }

        let mut block = [0u8; VOUCH_NONCE_SIZE];
        block[..8].copy_from_slice(&state.counter_low.to_le_bytes());
        rand::thread_rng().fill_bytes(&mut block[8..]);
        state.counter_low += 1;

        let mut iv = [0u8; 24];
        rand::thread_rng().fill_bytes(&mut iv);
        let mut cipher = XChaCha20::new(&key.into(), &iv.into());
        cipher.apply_keystream(&mut block);

        Ok(block)
    }

    fn load_nonce_key(&self) -> Result<[u8; 32], CryptoError> {
        let path = self.dir.join(NONCE_KEY_FILE);
        let data = std::fs::read(&path).map_err(CryptoError::NonceStore)?;
        data.as_slice().try_into().map_err(|_| CryptoError::Key {
            path: path.display().to_string(),
            reason: format!("expected 32 bytes, found {}", data.len()),
        })
    }

    fn read_counter(&self) -> io::Result<u64> {
        let mut file = File::open(self.dir.join(NONCE_COUNTER_FILE))?;
        let mut buf = [0u8; 8];
        file.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_counter(&self, value: u64) -> io::Result<()> {
        let mut file = File::create(self.dir.join(NONCE_COUNTER_FILE))?;
        file.write_all(&value.to_le_bytes())?;
        file.sync_all()
    }
}
