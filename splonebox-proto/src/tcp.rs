//! Raw socket plumbing the async runtime does not expose.
//!
//! Two operations need the platform socket object for a single syscall:
//! disabling Nagle's algorithm after connect, and shutting the socket down
//! so the receive worker's pending read completes during disconnect.
//!
//! # Safety
//!
//! The descriptor is borrowed into a `socket2::Socket` for the call and
//! leaked back with `mem::forget` so it is not closed twice. All unsafe
//! lives in `with_borrowed_socket`.

#![allow(unsafe_code)]

use std::io;

use compio::net::TcpStream;

#[cfg(unix)]
fn with_borrowed_socket<T>(
    stream: &TcpStream,
    op: impl FnOnce(&socket2::Socket) -> io::Result<T>,
) -> io::Result<T> {
    use std::os::unix::io::{AsRawFd, FromRawFd};

    let sock = unsafe { socket2::Socket::from_raw_fd(stream.as_raw_fd()) };
    let result = op(&sock);
    std::mem::forget(sock); // borrowed, not owned: the descriptor stays open
    result
}

#[cfg(windows)]
fn with_borrowed_socket<T>(
    stream: &TcpStream,
    op: impl FnOnce(&socket2::Socket) -> io::Result<T>,
) -> io::Result<T> {
    use std::os::windows::io::{AsRawSocket, FromRawSocket};

    let sock = unsafe { socket2::Socket::from_raw_socket(stream.as_raw_socket()) };
    let result = op(&sock);
    std::mem::forget(sock); // borrowed, not owned: the descriptor stays open
    result
}

/// Disable Nagle's algorithm on the session socket.
///
/// The session carries small RPC frames where batching only delays
/// acknowledgements, so the connection sets this right after connect.
///
/// # Errors
///
/// Returns an error if the socket option cannot be set.
#[inline]
pub fn set_nodelay(stream: &TcpStream) -> io::Result<()> {
    #[cfg(any(unix, windows))]
    {
        with_borrowed_socket(stream, |sock| sock.set_nodelay(true))
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = stream;
        Ok(())
    }
}

/// Shut down both directions of the session socket.
///
/// A pending `recv` on a shut-down socket completes with EOF, which lets
/// the receive worker observe the disconnect flag and exit instead of
/// blocking forever.
///
/// # Errors
///
/// Returns an error if the shutdown syscall fails (e.g. the peer already
/// closed the socket).
#[inline]
pub fn shutdown_both(stream: &TcpStream) -> io::Result<()> {
    #[cfg(any(unix, windows))]
    {
        with_borrowed_socket(stream, |sock| sock.shutdown(std::net::Shutdown::Both))
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = stream;
        Ok(())
    }
}
