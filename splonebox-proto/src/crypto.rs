//! Client side of the splone crypto protocol.
//!
//! The handshake is CurveCP-shaped and runs over three packets:
//!
//! ```text
//! Client                                Server
//!   |                                      |
//!   |--- HELLO (short-term key C') ------->|
//!   |                                      |
//!   |<-- COOKIE (short-term key S',  ------|
//!   |          opaque 96-byte cookie)      |
//!   |                                      |
//!   |--- INITIATE (cookie echoed,  ------->|
//!   |       long-term key C vouching       |
//!   |       for C' and S')                 |
//!   |                                      |
//!   |<====== message packets ============>|
//! ```
//!
//! After Initiate is emitted the session is *established* and message
//! packets flow in both directions, each carrying an encrypted length
//! prefix and a payload box under the short-term keys.
//!
//! Nonce discipline: the client's session counter starts at a random
//! 48-bit odd value and steps by two for every box, so client nonces are
//! odd and strictly increasing; server nonces must be even and strictly
//! increasing. The last received nonce is only advanced after a packet
//! decrypts in full, which gives at-most-once reception.

use bytes::{Bytes, BytesMut};
use rand::Rng;
use tracing::debug;

use crate::boxes::{counter_nonce, tagged_nonce, SealedBox, BOX_OVERHEAD};
use crate::error::CryptoError;
use crate::keys::{KeyPair, Keyring, PublicKey, KEY_SIZE};
use crate::nonce::{NonceStore, VOUCH_NONCE_SIZE};

/// Client hello packet identifier
pub const CLIENT_HELLO_ID: &[u8; 8] = b"oqQN2kaH";
/// Server cookie packet identifier
pub const SERVER_COOKIE_ID: &[u8; 8] = b"rZQTd2nC";
/// Client initiate packet identifier
pub const CLIENT_INITIATE_ID: &[u8; 8] = b"oqQN2kaI";
/// Client message packet identifier
pub const CLIENT_MESSAGE_ID: &[u8; 8] = b"oqQN2kaM";
/// Server message packet identifier
pub const SERVER_MESSAGE_ID: &[u8; 8] = b"rZQTd2nM";

/// Nonce label of the hello box (fills the 16-byte label slot on the wire)
pub const HELLO_NONCE_LABEL: &[u8] = b"splonebox-client-H";
/// Nonce label of client-emitted session boxes
pub const CLIENT_NONCE_LABEL: &[u8] = b"splonebox-client";
/// Nonce label of server-emitted session boxes
pub const SERVER_NONCE_LABEL: &[u8] = b"splonebox-server";
/// Nonce label of the cookie box
pub const COOKIE_NONCE_LABEL: &[u8; 8] = b"splonePK";
/// Nonce label of the vouch box
pub const VOUCH_NONCE_LABEL: &[u8; 8] = b"splonePV";

/// Hello: identifier ‖ C' ‖ 64 zero bytes ‖ nonce ‖ box of 64 zero bytes
pub const HELLO_PACKET_SIZE: usize = 8 + KEY_SIZE + 64 + 8 + (64 + BOX_OVERHEAD);
/// Cookie: identifier ‖ 16-byte nonce ‖ box of (S' ‖ cookie)
pub const COOKIE_PACKET_SIZE: usize = 8 + 16 + (KEY_SIZE + COOKIE_SIZE + BOX_OVERHEAD);
/// Initiate: identifier ‖ cookie ‖ nonce ‖ box of (C ‖ vouch nonce ‖ vouch box)
pub const INITIATE_PACKET_SIZE: usize = 8 + COOKIE_SIZE + 8 + (INITIATE_PAYLOAD_SIZE + BOX_OVERHEAD);

/// The opaque server cookie echoed in Initiate
pub const COOKIE_SIZE: usize = 96;

const INITIATE_PAYLOAD_SIZE: usize =
    KEY_SIZE + VOUCH_NONCE_SIZE + (2 * KEY_SIZE + BOX_OVERHEAD);

/// Identifier + compressed nonce + length box
const MESSAGE_HEADER_SIZE: usize = 8 + 8 + (8 + BOX_OVERHEAD);
/// Fixed overhead of a message packet: header plus the payload box tag
const MESSAGE_OVERHEAD: usize = MESSAGE_HEADER_SIZE + BOX_OVERHEAD;

/// Crypto state of one client session.
///
/// Owns the long-term keyring, the persistent vouch-nonce store and, once
/// the handshake has run, the short-term session keys. Short-term secrets
/// are zeroized when the session drops.
pub struct CryptoSession {
    keyring: Keyring,
    nonce_store: NonceStore,

    client_short: Option<KeyPair>,
    server_short_public: Option<PublicKey>,
    /// Box under (client short, server short); keys every message packet
    session_box: Option<SealedBox>,

    nonce: u64,
    last_received_nonce: u64,
    established: bool,
}

impl CryptoSession {
    /// Create a session from explicit key material.
    #[must_use]
    pub fn new(keyring: Keyring, nonce_store: NonceStore) -> Self {
        // Random 48-bit start, forced odd: client nonces stay odd forever.
        let mut nonce = rand::thread_rng().gen_range(0..1u64 << 48);
        if nonce % 2 == 0 {
            nonce += 1;
        }

        Self {
            keyring,
            nonce_store,
            client_short: None,
            server_short_public: None,
            session_box: None,
            nonce,
            last_received_nonce: 0,
            established: false,
        }
    }

    /// Create a session from a key directory holding the three long-term
    /// key files and the nonce store.
    pub fn from_dir(dir: impl AsRef<std::path::Path>) -> Result<Self, CryptoError> {
        let keyring = Keyring::from_dir(&dir)?;
        Ok(Self::new(keyring, NonceStore::new(dir)))
    }

    /// True once Initiate has been emitted and message packets may flow.
    #[must_use]
    pub const fn is_established(&self) -> bool {
        self.established
    }

    /// The server's short-term key, known once the cookie packet opened.
    #[must_use]
    pub const fn server_short_public(&self) -> Option<&PublicKey> {
        self.server_short_public.as_ref()
    }

    #[inline]
    fn step_nonce(&mut self) {
        self.nonce = self.nonce.wrapping_add(2);
    }

    /// Build the hello packet, generating the short-term key pair.
    ///
    /// Layout: identifier (8) ‖ C' (32) ‖ zeros (64) ‖ nonce (8, LE) ‖
    /// box of 64 zero bytes under (server long-term, client short-term).
    pub fn hello(&mut self) -> Result<Bytes, CryptoError> {
        let short = KeyPair::generate();

        self.step_nonce();
        let hello_box = SealedBox::new(&short.secret, &self.keyring.server_public).seal(
            &[0u8; 64],
            &counter_nonce(HELLO_NONCE_LABEL, self.nonce),
        )?;

        let mut packet = BytesMut::with_capacity(HELLO_PACKET_SIZE);
        packet.extend_from_slice(CLIENT_HELLO_ID);
        packet.extend_from_slice(short.public.as_bytes());
        packet.extend_from_slice(&[0u8; 64]);
        packet.extend_from_slice(&self.nonce.to_le_bytes());
        packet.extend_from_slice(&hello_box);

        self.client_short = Some(short);
        debug!("built hello packet ({} bytes)", packet.len());
        Ok(packet.freeze())
    }

    /// Open the cookie packet: yields the server short-term key and cookie.
    fn verify_cookie(&self, packet: &[u8]) -> Result<(PublicKey, [u8; COOKIE_SIZE]), CryptoError> {
        if packet.len() != COOKIE_PACKET_SIZE {
            return Err(CryptoError::InvalidPacket("cookie packet has invalid length"));
        }
        if &packet[..8] != SERVER_COOKIE_ID {
            return Err(CryptoError::InvalidPacket("received identifier is bad"));
        }

        let short = self
            .client_short
            .as_ref()
            .ok_or(CryptoError::InvalidPacket("cookie received before hello"))?;

        let mut server_nonce = [0u8; 16];
        server_nonce.copy_from_slice(&packet[8..24]);

        let payload = SealedBox::new(&short.secret, &self.keyring.server_public).open(
            &packet[24..],
            &tagged_nonce(COOKIE_NONCE_LABEL, &server_nonce),
        )?;

        let mut server_short = [0u8; KEY_SIZE];
        server_short.copy_from_slice(&payload[..KEY_SIZE]);
        let mut cookie = [0u8; COOKIE_SIZE];
        cookie.copy_from_slice(&payload[KEY_SIZE..KEY_SIZE + COOKIE_SIZE]);

        Ok((PublicKey::from_bytes(server_short), cookie))
    }

    /// Validate the cookie packet and build the corresponding initiate
    /// packet.
    ///
    /// The payload vouches for the short-term keys: it carries the client
    /// long-term key, a vouch nonce drawn from the persistent store, and an
    /// inner box of (C' ‖ S') sealed under the *long-term* keys. After this
    /// packet is built the session latches established.
    pub fn initiate(&mut self, cookie_packet: &[u8]) -> Result<Bytes, CryptoError> {
        let (server_short_public, cookie) = self.verify_cookie(cookie_packet)?;

        let short = self
            .client_short
            .clone()
            .ok_or(CryptoError::InvalidPacket("initiate before hello"))?;

        let mut vouch_payload = [0u8; 2 * KEY_SIZE];
        vouch_payload[..KEY_SIZE].copy_from_slice(short.public.as_bytes());
        vouch_payload[KEY_SIZE..].copy_from_slice(server_short_public.as_bytes());

        let vouch_nonce = self.nonce_store.vouch_nonce()?;
        let vouch_box = SealedBox::new(&self.keyring.client_secret, &self.keyring.server_public)
            .seal(&vouch_payload, &tagged_nonce(VOUCH_NONCE_LABEL, &vouch_nonce))?;

        let mut payload = BytesMut::with_capacity(INITIATE_PAYLOAD_SIZE);
        payload.extend_from_slice(self.keyring.client_public.as_bytes());
        payload.extend_from_slice(&vouch_nonce);
        payload.extend_from_slice(&vouch_box);

        let session_box = SealedBox::new(&short.secret, &server_short_public);

        self.step_nonce();
        let payload_box =
            session_box.seal(&payload, &counter_nonce(CLIENT_NONCE_LABEL, self.nonce))?;

        let mut packet = BytesMut::with_capacity(INITIATE_PACKET_SIZE);
        packet.extend_from_slice(CLIENT_INITIATE_ID);
        packet.extend_from_slice(&cookie);
        packet.extend_from_slice(&self.nonce.to_le_bytes());
        packet.extend_from_slice(&payload_box);

        self.server_short_public = Some(server_short_public);
        self.session_box = Some(session_box);
        self.established = true;
        debug!("built initiate packet, session established");
        Ok(packet.freeze())
    }

    /// Build a client message packet.
    ///
    /// Layout: identifier (8) ‖ nonce N (8, LE) ‖ box of the total packet
    /// length under nonce N (24) ‖ box of `data` under nonce N+2. The
    /// session counter ends at N+2 so the next packet starts at N+4.
    pub fn write(&mut self, data: &[u8]) -> Result<Bytes, CryptoError> {
        if self.session_box.is_none() {
            return Err(CryptoError::NotEstablished);
        }
        self.step_nonce();
        let message_nonce = self.nonce;
        self.step_nonce();
        let payload_nonce = self.nonce;

        let session_box = self.session_box.as_ref().ok_or(CryptoError::NotEstablished)?;
        let total_len = (MESSAGE_OVERHEAD + data.len()) as u64;
        let length_box = session_box.seal(
            &total_len.to_le_bytes(),
            &counter_nonce(CLIENT_NONCE_LABEL, message_nonce),
        )?;
        let payload_box =
            session_box.seal(data, &counter_nonce(CLIENT_NONCE_LABEL, payload_nonce))?;

        let mut packet = BytesMut::with_capacity(MESSAGE_OVERHEAD + data.len());
        packet.extend_from_slice(CLIENT_MESSAGE_ID);
        packet.extend_from_slice(&message_nonce.to_le_bytes());
        packet.extend_from_slice(&length_box);
        packet.extend_from_slice(&payload_box);

        Ok(packet.freeze())
    }

    /// Extract and verify the length prefix of a server message packet.
    ///
    /// Returns the total packet length. Fewer than 40 buffered bytes is
    /// `PacketTooShort` ("wait for more"), everything else that fails is
    /// `InvalidPacket`.
    pub fn verify_length(&self, data: &[u8]) -> Result<usize, CryptoError> {
        if data.len() < MESSAGE_HEADER_SIZE {
            return Err(CryptoError::PacketTooShort);
        }

        let session_box = self.session_box.as_ref().ok_or(CryptoError::NotEstablished)?;

        if &data[..8] != SERVER_MESSAGE_ID {
            return Err(CryptoError::InvalidPacket("received identifier is bad"));
        }

        let nonce = u64::from_le_bytes(data[8..16].try_into().unwrap_or_default());
        let plain = session_box
            .open(
                &data[16..MESSAGE_HEADER_SIZE],
                &counter_nonce(SERVER_NONCE_LABEL, nonce),
            )
            .map_err(|_| CryptoError::InvalidPacket("failed to verify length of message packet"))?;

        let length = u64::from_le_bytes(plain.as_slice().try_into().unwrap_or_default());
        if length < MESSAGE_OVERHEAD as u64 {
            return Err(CryptoError::InvalidPacket("length prefix below packet overhead"));
        }

        Ok(length as usize)
    }

    /// Open a full server message packet and return its plaintext.
    ///
    /// Enforces nonce discipline: the packet nonce must be even and
    /// strictly greater than the last accepted one. The last-received
    /// nonce is only advanced after the payload box opens, so a packet
    /// that fails authentication cannot burn a nonce.
    pub fn read(&mut self, data: &[u8]) -> Result<Bytes, CryptoError> {
        let length = self.verify_length(data)?;
        if data.len() < length {
            return Err(CryptoError::InvalidPacket("packet shorter than its length prefix"));
        }

        let nonce = u64::from_le_bytes(data[8..16].try_into().unwrap_or_default());
        self.verify_nonce(nonce)?;

        let session_box = self.session_box.as_ref().ok_or(CryptoError::NotEstablished)?;
        let plain = session_box
            .open(
                &data[MESSAGE_HEADER_SIZE..length],
                &counter_nonce(SERVER_NONCE_LABEL, nonce.wrapping_add(2)),
            )
            .map_err(|_| CryptoError::InvalidPacket("failed to unbox message"))?;

        self.last_received_nonce = nonce;
        Ok(Bytes::from(plain))
    }

    fn verify_nonce(&self, nonce: u64) -> Result<(), CryptoError> {
        if nonce <= self.last_received_nonce || nonce % 2 == 1 {
            return Err(CryptoError::InvalidPacket("invalid nonce"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonce::{NONCE_COUNTER_FILE, NONCE_KEY_FILE};
    use rand::RngCore;
    use tempfile::TempDir;

    /// The server half of the protocol, driven manually by the tests.
    struct TestServer {
        long: KeyPair,
        short: KeyPair,
        client_short_public: Option<PublicKey>,
        cookie: [u8; COOKIE_SIZE],
        nonce: u64,
    }

    impl TestServer {
        fn new(long: KeyPair) -> Self {
            let mut cookie = [0u8; COOKIE_SIZE];
            rand::thread_rng().fill_bytes(&mut cookie);
            Self {
                long,
                short: KeyPair::generate(),
                client_short_public: None,
                cookie,
                nonce: 2,
            }
        }

        fn accept_hello(&mut self, hello: &[u8]) {
            assert_eq!(hello.len(), HELLO_PACKET_SIZE);
            assert_eq!(&hello[..8], CLIENT_HELLO_ID);

            let mut short = [0u8; KEY_SIZE];
            short.copy_from_slice(&hello[8..40]);
            let client_short = PublicKey::from_bytes(short);

            assert_eq!(&hello[40..104], &[0u8; 64][..]);

            let nonce = u64::from_le_bytes(hello[104..112].try_into().unwrap());
            assert_eq!(nonce % 2, 1, "client nonces must be odd");

            let zeros = SealedBox::new(&self.long.secret, &client_short)
                .open(&hello[112..], &counter_nonce(HELLO_NONCE_LABEL, nonce))
                .expect("hello box must open under the long-term server key");
            assert_eq!(zeros, vec![0u8; 64]);

            self.client_short_public = Some(client_short);
        }

        fn cookie_packet(&self) -> Vec<u8> {
            let client_short = self.client_short_public.unwrap();
            let mut server_nonce = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut server_nonce);

            let mut payload = Vec::with_capacity(KEY_SIZE + COOKIE_SIZE);
            payload.extend_from_slice(self.short.public.as_bytes());
            payload.extend_from_slice(&self.cookie);

            let boxed = SealedBox::new(&self.long.secret, &client_short)
                .seal(&payload, &tagged_nonce(COOKIE_NONCE_LABEL, &server_nonce))
                .unwrap();

            let mut packet = Vec::with_capacity(COOKIE_PACKET_SIZE);
            packet.extend_from_slice(SERVER_COOKIE_ID);
            packet.extend_from_slice(&server_nonce);
            packet.extend_from_slice(&boxed);
            packet
        }

        fn accept_initiate(&self, initiate: &[u8], client_long_public: &PublicKey) {
            assert_eq!(initiate.len(), INITIATE_PACKET_SIZE);
            assert_eq!(&initiate[..8], CLIENT_INITIATE_ID);
            assert_eq!(&initiate[8..104], &self.cookie[..], "cookie must be echoed verbatim");

            let client_short = self.client_short_public.unwrap();
            let nonce = u64::from_le_bytes(initiate[104..112].try_into().unwrap());

            let payload = SealedBox::new(&self.short.secret, &client_short)
                .open(&initiate[112..], &counter_nonce(CLIENT_NONCE_LABEL, nonce))
                .expect("initiate payload must open under the short-term keys");

            assert_eq!(&payload[..KEY_SIZE], client_long_public.as_bytes());

            let mut vouch_nonce = [0u8; VOUCH_NONCE_SIZE];
            vouch_nonce.copy_from_slice(&payload[KEY_SIZE..KEY_SIZE + VOUCH_NONCE_SIZE]);

            let vouch = SealedBox::new(&self.long.secret, client_long_public)
                .open(
                    &payload[KEY_SIZE + VOUCH_NONCE_SIZE..],
                    &tagged_nonce(VOUCH_NONCE_LABEL, &vouch_nonce),
                )
                .expect("vouch box must open under the long-term keys");

            assert_eq!(&vouch[..KEY_SIZE], client_short.as_bytes());
            assert_eq!(&vouch[KEY_SIZE..], self.short.public.as_bytes());
        }

        fn session_box(&self) -> SealedBox {
            SealedBox::new(&self.short.secret, &self.client_short_public.unwrap())
        }

        fn write(&mut self, data: &[u8]) -> Vec<u8> {
            self.nonce += 4;
            let nonce = self.nonce;
            self.write_with_nonce(data, nonce)
        }

        fn write_with_nonce(&self, data: &[u8], nonce: u64) -> Vec<u8> {
            let session_box = self.session_box();
            let total = (MESSAGE_OVERHEAD + data.len()) as u64;

            let length_box = session_box
                .seal(&total.to_le_bytes(), &counter_nonce(SERVER_NONCE_LABEL, nonce))
                .unwrap();
            let payload_box = session_box
                .seal(data, &counter_nonce(SERVER_NONCE_LABEL, nonce + 2))
                .unwrap();

            let mut packet = Vec::new();
            packet.extend_from_slice(SERVER_MESSAGE_ID);
            packet.extend_from_slice(&nonce.to_le_bytes());
            packet.extend_from_slice(&length_box);
            packet.extend_from_slice(&payload_box);
            packet
        }

        fn read(&self, packet: &[u8]) -> Vec<u8> {
            assert_eq!(&packet[..8], CLIENT_MESSAGE_ID);
            let nonce = u64::from_le_bytes(packet[8..16].try_into().unwrap());
            assert_eq!(nonce % 2, 1, "client nonces must be odd");

            let session_box = self.session_box();
            let length = session_box
                .open(&packet[16..40], &counter_nonce(CLIENT_NONCE_LABEL, nonce))
                .unwrap();
            let length = u64::from_le_bytes(length.as_slice().try_into().unwrap()) as usize;
            assert_eq!(length, packet.len());

            session_box
                .open(&packet[40..length], &counter_nonce(CLIENT_NONCE_LABEL, nonce + 2))
                .unwrap()
        }
    }

    fn seeded_session(server_public: PublicKey) -> (CryptoSession, PublicKey, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let client = KeyPair::generate();

        let mut nonce_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce_key);
        std::fs::write(dir.path().join(NONCE_KEY_FILE), nonce_key).unwrap();
        std::fs::write(dir.path().join(NONCE_COUNTER_FILE), 0u64.to_le_bytes()).unwrap();

        let keyring = Keyring::new(client.public, client.secret, server_public);
        let session = CryptoSession::new(keyring, NonceStore::new(dir.path()));
        (session, client.public, dir)
    }

    fn established_pair() -> (CryptoSession, TestServer, TempDir) {
        let server_long = KeyPair::generate();
        let (mut session, client_public, dir) = seeded_session(server_long.public);
        let mut server = TestServer::new(server_long);

        server.accept_hello(&session.hello().unwrap());
        let initiate = session.initiate(&server.cookie_packet()).unwrap();
        server.accept_initiate(&initiate, &client_public);

        assert!(session.is_established());
        (session, server, dir)
    }

    #[test]
    fn handshake_roundtrip() {
        established_pair();
    }

    #[test]
    fn cookie_with_bad_identifier_is_rejected() {
        let server_long = KeyPair::generate();
        let (mut session, _, _dir) = seeded_session(server_long.public);
        let mut server = TestServer::new(server_long);

        server.accept_hello(&session.hello().unwrap());
        let mut cookie = server.cookie_packet();
        cookie[..8].copy_from_slice(b"badbadba");

        assert!(matches!(
            session.initiate(&cookie),
            Err(CryptoError::InvalidPacket(_))
        ));
        assert!(!session.is_established());
    }

    #[test]
    fn cookie_under_wrong_server_key_is_rejected() {
        let server_long = KeyPair::generate();
        let (mut session, _, _dir) = seeded_session(server_long.public);

        // A server that does not hold the expected long-term key
        let mut impostor = TestServer::new(KeyPair::generate());
        impostor.accept_hello(&session.hello().unwrap());

        assert!(session.initiate(&impostor.cookie_packet()).is_err());
    }

    #[test]
    fn write_before_establishment_fails() {
        let (mut session, _, _dir) = seeded_session(KeyPair::generate().public);
        assert!(matches!(
            session.write(b"too early"),
            Err(CryptoError::NotEstablished)
        ));
    }

    #[test]
    fn message_roundtrip_both_directions() {
        let (mut session, mut server, _dir) = established_pair();

        let outbound = session.write(b"ping from client").unwrap();
        assert_eq!(server.read(&outbound), b"ping from client");

        let inbound = server.write(b"pong from server");
        assert_eq!(session.verify_length(&inbound).unwrap(), inbound.len());
        assert_eq!(session.read(&inbound).unwrap(), &b"pong from server"[..]);
    }

    #[test]
    fn client_nonces_are_odd_and_increasing() {
        let (mut session, _server, _dir) = established_pair();

        let mut last = 0u64;
        for i in 0..5 {
            let packet = session.write(format!("packet {i}").as_bytes()).unwrap();
            let nonce = u64::from_le_bytes(packet[8..16].try_into().unwrap());
            assert_eq!(nonce % 2, 1);
            if last != 0 {
                // one step for the length box, one for the payload box
                assert_eq!(nonce - last, 4);
            }
            last = nonce;
        }
    }

    #[test]
    fn replayed_nonce_is_rejected() {
        let (mut session, server, _dir) = established_pair();

        let packet = server.write_with_nonce(b"first", 100);
        session.read(&packet).unwrap();

        let replay = server.write_with_nonce(b"again", 100);
        assert!(matches!(
            session.read(&replay),
            Err(CryptoError::InvalidPacket(_))
        ));
    }

    #[test]
    fn odd_server_nonce_is_rejected() {
        let (mut session, server, _dir) = established_pair();
        let packet = server.write_with_nonce(b"odd", 101);
        assert!(session.read(&packet).is_err());
    }

    #[test]
    fn stale_nonce_is_rejected() {
        let (mut session, server, _dir) = established_pair();
        session.read(&server.write_with_nonce(b"new", 200)).unwrap();
        assert!(session.read(&server.write_with_nonce(b"old", 150)).is_err());
    }

    #[test]
    fn tampered_packet_does_not_burn_its_nonce() {
        let (mut session, server, _dir) = established_pair();

        let mut packet = server.write_with_nonce(b"payload", 42);
        let last = packet.len() - 1;
        packet[last] ^= 0xFF;
        assert!(session.read(&packet).is_err());

        // The same nonce is still acceptable on an authentic packet.
        let packet = server.write_with_nonce(b"payload", 42);
        assert_eq!(session.read(&packet).unwrap(), &b"payload"[..]);
    }

    #[test]
    fn short_buffer_asks_for_more_bytes() {
        let (session, _server, _dir) = established_pair();
        assert!(matches!(
            session.verify_length(&[0u8; 39]),
            Err(CryptoError::PacketTooShort)
        ));
    }

    #[test]
    fn bad_identifier_is_invalid_not_short() {
        let (session, mut server, _dir) = established_pair();
        let mut packet = server.write(b"data");
        packet[..8].copy_from_slice(b"notSplne");
        assert!(matches!(
            session.verify_length(&packet),
            Err(CryptoError::InvalidPacket(_))
        ));
    }

    #[test]
    fn vouch_nonces_change_between_sessions() {
        let server_long = KeyPair::generate();
        let server_pub = server_long.public;

        let (mut a, _, _dir_a) = seeded_session(server_pub);
        let (mut b, _, _dir_b) = seeded_session(server_pub);
        let mut server = TestServer::new(server_long);

        server.accept_hello(&a.hello().unwrap());
        let ia = a.initiate(&server.cookie_packet()).unwrap();

        server.accept_hello(&b.hello().unwrap());
        let ib = b.initiate(&server.cookie_packet()).unwrap();

        // Same slot in both packets, different vouch nonces (and payloads).
        assert_ne!(&ia[112..], &ib[112..]);
    }
}
