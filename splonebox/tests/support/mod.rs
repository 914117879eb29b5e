//! Test double for the splonebox core: accepts one client, performs the
//! server half of the handshake, and exchanges message packets.

#![allow(dead_code)]

use std::path::PathBuf;

use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use compio::net::{TcpListener, TcpStream};
use rand::RngCore;

use splonebox_proto::boxes::{counter_nonce, tagged_nonce, SealedBox};
use splonebox_proto::crypto::{
    CLIENT_HELLO_ID, CLIENT_INITIATE_ID, CLIENT_MESSAGE_ID, CLIENT_NONCE_LABEL, COOKIE_NONCE_LABEL,
    COOKIE_PACKET_SIZE, COOKIE_SIZE, HELLO_NONCE_LABEL, HELLO_PACKET_SIZE, INITIATE_PACKET_SIZE,
    SERVER_COOKIE_ID, SERVER_MESSAGE_ID, SERVER_NONCE_LABEL, VOUCH_NONCE_LABEL,
};
use splonebox_proto::keys::{
    KeyPair, PublicKey, SecretKey, CLIENT_PUBLIC_FILE, CLIENT_SECRET_FILE, KEY_SIZE,
    SERVER_PUBLIC_FILE,
};
use splonebox_proto::message::{Message, MessageDecoder, Request};
use splonebox_proto::nonce::{NONCE_COUNTER_FILE, NONCE_KEY_FILE};
use tempfile::TempDir;

/// Identifier + nonce + length box of a message packet
const MESSAGE_HEADER_SIZE: usize = 40;
/// Header plus the payload box tag
const MESSAGE_OVERHEAD: usize = 56;

/// Write a fresh client key directory (long-term keys + nonce store) that
/// trusts the given server key. Returns the directory and the client's
/// long-term public key.
pub fn client_key_dir(server_public: &PublicKey) -> (TempDir, PublicKey) {
    let dir = tempfile::tempdir().unwrap();

    let mut secret_bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut secret_bytes);
    let secret = SecretKey::from_bytes(secret_bytes);
    let public = secret.public_key();

    std::fs::write(dir.path().join(CLIENT_PUBLIC_FILE), public.as_bytes()).unwrap();
    std::fs::write(dir.path().join(CLIENT_SECRET_FILE), secret_bytes).unwrap();
    std::fs::write(dir.path().join(SERVER_PUBLIC_FILE), server_public.as_bytes()).unwrap();

    let mut nonce_key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce_key);
    std::fs::write(dir.path().join(NONCE_KEY_FILE), nonce_key).unwrap();
    std::fs::write(dir.path().join(NONCE_COUNTER_FILE), 0u64.to_le_bytes()).unwrap();

    (dir, public)
}

/// A listening mock core
pub struct MockCore {
    listener: TcpListener,
    pub server_long: KeyPair,
    pub port: u16,
}

impl MockCore {
    pub async fn bind() -> Self {
        // RUST_LOG turns client-side protocol tracing on for a failing test
        splonebox::dev_tracing::init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self {
            listener,
            server_long: KeyPair::generate(),
            port,
        }
    }

    pub fn server_public(&self) -> PublicKey {
        self.server_long.public
    }

    /// Accept one client and run the server half of the handshake.
    pub async fn accept(&self) -> MockSession {
        let (stream, _addr) = self.listener.accept().await.unwrap();

        // Hello
        let hello = vec![0u8; HELLO_PACKET_SIZE];
        let BufResult(res, hello) = (&stream).read_exact(hello).await;
        res.unwrap();
        assert_eq!(&hello[..8], CLIENT_HELLO_ID);

        let mut client_short = [0u8; KEY_SIZE];
        client_short.copy_from_slice(&hello[8..40]);
        let client_short = PublicKey::from_bytes(client_short);

        let hello_nonce = u64::from_le_bytes(hello[104..112].try_into().unwrap());
        assert_eq!(hello_nonce % 2, 1, "client nonces must be odd");
        let zeros = SealedBox::new(&self.server_long.secret, &client_short)
            .open(&hello[112..], &counter_nonce(HELLO_NONCE_LABEL, hello_nonce))
            .expect("hello box must open");
        assert_eq!(zeros, vec![0u8; 64]);

        // Cookie
        let server_short = KeyPair::generate();
        let mut cookie = [0u8; COOKIE_SIZE];
        rand::thread_rng().fill_bytes(&mut cookie);
        let mut cookie_nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut cookie_nonce);

        let mut payload = Vec::with_capacity(KEY_SIZE + COOKIE_SIZE);
        payload.extend_from_slice(server_short.public.as_bytes());
        payload.extend_from_slice(&cookie);
        let boxed = SealedBox::new(&self.server_long.secret, &client_short)
            .seal(&payload, &tagged_nonce(COOKIE_NONCE_LABEL, &cookie_nonce))
            .unwrap();

        let mut packet = Vec::with_capacity(COOKIE_PACKET_SIZE);
        packet.extend_from_slice(SERVER_COOKIE_ID);
        packet.extend_from_slice(&cookie_nonce);
        packet.extend_from_slice(&boxed);
        let BufResult(res, _) = (&stream).write_all(packet).await;
        res.unwrap();

        // Initiate
        let initiate = vec![0u8; INITIATE_PACKET_SIZE];
        let BufResult(res, initiate) = (&stream).read_exact(initiate).await;
        res.unwrap();
        assert_eq!(&initiate[..8], CLIENT_INITIATE_ID);
        assert_eq!(&initiate[8..104], &cookie[..], "cookie must be echoed verbatim");

        let initiate_nonce = u64::from_le_bytes(initiate[104..112].try_into().unwrap());
        let payload = SealedBox::new(&server_short.secret, &client_short)
            .open(
                &initiate[112..],
                &counter_nonce(CLIENT_NONCE_LABEL, initiate_nonce),
            )
            .expect("initiate payload must open");

        let mut client_long = [0u8; KEY_SIZE];
        client_long.copy_from_slice(&payload[..KEY_SIZE]);
        let client_long = PublicKey::from_bytes(client_long);

        let mut vouch_nonce = [0u8; 16];
        vouch_nonce.copy_from_slice(&payload[KEY_SIZE..KEY_SIZE + 16]);
        let vouch = SealedBox::new(&self.server_long.secret, &client_long)
            .open(
                &payload[KEY_SIZE + 16..],
                &tagged_nonce(VOUCH_NONCE_LABEL, &vouch_nonce),
            )
            .expect("vouch box must open");
        assert_eq!(&vouch[..KEY_SIZE], client_short.as_bytes());
        assert_eq!(&vouch[KEY_SIZE..], server_short.public.as_bytes());

        MockSession {
            stream,
            session_box: SealedBox::new(&server_short.secret, &client_short),
            nonce: 2,
            buf: Vec::new(),
            decoder: MessageDecoder::new(),
        }
    }
}

/// One established session, server side
pub struct MockSession {
    stream: TcpStream,
    session_box: SealedBox,
    nonce: u64,
    buf: Vec<u8>,
    decoder: MessageDecoder,
}

impl MockSession {
    /// Build a server message packet around `plain` with an explicit nonce.
    pub fn build_packet(&self, plain: &[u8], nonce: u64) -> Vec<u8> {
        let total = (MESSAGE_OVERHEAD + plain.len()) as u64;
        let length_box = self
            .session_box
            .seal(&total.to_le_bytes(), &counter_nonce(SERVER_NONCE_LABEL, nonce))
            .unwrap();
        let payload_box = self
            .session_box
            .seal(plain, &counter_nonce(SERVER_NONCE_LABEL, nonce + 2))
            .unwrap();

        let mut packet = Vec::with_capacity(MESSAGE_OVERHEAD + plain.len());
        packet.extend_from_slice(SERVER_MESSAGE_ID);
        packet.extend_from_slice(&nonce.to_le_bytes());
        packet.extend_from_slice(&length_box);
        packet.extend_from_slice(&payload_box);
        packet
    }

    pub fn next_nonce(&mut self) -> u64 {
        self.nonce += 4;
        self.nonce
    }

    pub async fn send_raw(&mut self, bytes: Vec<u8>) {
        let BufResult(res, _) = (&self.stream).write_all(bytes).await;
        res.unwrap();
    }

    pub async fn send_message(&mut self, msg: &Message) {
        let plain = msg.pack().unwrap();
        let nonce = self.next_nonce();
        let packet = self.build_packet(&plain, nonce);
        self.send_raw(packet).await;
    }

    /// Read and decrypt one client packet.
    pub async fn recv_packet(&mut self) -> Vec<u8> {
        loop {
            if self.buf.len() >= MESSAGE_HEADER_SIZE {
                assert_eq!(&self.buf[..8], CLIENT_MESSAGE_ID);
                let nonce = u64::from_le_bytes(self.buf[8..16].try_into().unwrap());
                assert_eq!(nonce % 2, 1, "client nonces must be odd");

                let length = self
                    .session_box
                    .open(
                        &self.buf[16..MESSAGE_HEADER_SIZE],
                        &counter_nonce(CLIENT_NONCE_LABEL, nonce),
                    )
                    .expect("length box must open");
                let length = u64::from_le_bytes(length.as_slice().try_into().unwrap()) as usize;

                if self.buf.len() >= length {
                    let plain = self
                        .session_box
                        .open(
                            &self.buf[MESSAGE_HEADER_SIZE..length],
                            &counter_nonce(CLIENT_NONCE_LABEL, nonce + 2),
                        )
                        .expect("payload box must open");
                    self.buf.drain(..length);
                    return plain;
                }
            }

            let chunk = Vec::with_capacity(64 * 1024);
            let BufResult(res, chunk) = (&self.stream).read(chunk).await;
            let n = res.unwrap();
            assert!(n > 0, "client closed the connection mid-read");
            self.buf.extend_from_slice(&chunk);
        }
    }

    /// Read the next complete RPC message from the client.
    pub async fn recv_message(&mut self) -> Message {
        loop {
            if let Some(msg) = self.decoder.next().unwrap() {
                return msg;
            }
            let plain = self.recv_packet().await;
            self.decoder.feed(&plain);
        }
    }

    /// Read the next message, asserting it is a request.
    pub async fn recv_request(&mut self) -> Request {
        match self.recv_message().await {
            Message::Request(req) => req,
            other => panic!("expected a request, got {other:?}"),
        }
    }

    /// Close the connection (server-initiated teardown).
    pub fn close(self) {
        drop(self.stream);
    }
}

pub fn key_dir_path(dir: &TempDir) -> PathBuf {
    dir.path().to_path_buf()
}
