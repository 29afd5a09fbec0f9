//! A thin wrapper around `epoll`, grounded on `mio`'s unix selector
//! (`src/sys/unix/selector/epoll.rs` and `src/poll.rs` in the teacher repo).
//!
//! Unlike `mio::Poll`, which abstracts over epoll/kqueue/IOCP and always
//! forces edge-triggered mode, this reactor exists only to drive one
//! server on Linux, so it drops the cross-platform `Selector` trait
//! indirection and exposes the raw `epoll_event.events` bitmask the
//! original C++ `Epoller` class also exposed — the server core decides
//! per-connection whether to set `EPOLLET`, `EPOLLONESHOT`, `EPOLLRDHUP`.

mod interest;
mod token;

pub use interest::Interest;
pub use token::Token;

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Mutex;

/// Helper macro mirroring mio's `syscall!` (src/sys/unix/mod.rs): run a
/// libc call, turn a `-1` return into `io::Error::last_os_error()`.
macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* )) => {{
        let res = unsafe { libc::$fn($($arg),*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

pub mod flags {
    /// Disarm the descriptor after a single notification until re-armed
    /// with `Reactor::modify`.
    pub const ONESHOT: u32 = libc::EPOLLONESHOT as u32;
    /// Report peer half-close without a read returning 0.
    pub const RDHUP: u32 = libc::EPOLLRDHUP as u32;
    /// Edge-triggered: readiness is reported only on state transitions.
    pub const EDGE_TRIGGERED: u32 = libc::EPOLLET as u32;
    pub const HUP: u32 = libc::EPOLLHUP as u32;
    pub const ERR: u32 = libc::EPOLLERR as u32;
}

/// Registers, deregisters and waits for readiness on a set of descriptors.
///
/// `add`/`modify`/`remove` correspond to `EPOLL_CTL_ADD`/`MOD`/`DEL`.
/// `wait` is the only suspension point on the I/O thread's main loop.
///
/// `epoll_ctl`/`epoll_wait` are safe to call concurrently from multiple
/// threads on the same epoll fd; the only piece of Rust-side state that
/// needs guarding is the reused readiness buffer `wait` fills in, so that
/// alone sits behind a mutex. This lets a `Server` share one `Reactor`
/// across the I/O thread and worker threads (workers call `modify` to
/// re-arm a connection) without wrapping the whole type in a lock.
pub struct Reactor {
    epoll_fd: RawFd,
    events: Mutex<Vec<libc::epoll_event>>,
}

impl Reactor {
    pub fn new(max_events: usize) -> io::Result<Reactor> {
        let epoll_fd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        Ok(Reactor {
            epoll_fd,
            events: Mutex::new(vec![unsafe { std::mem::zeroed() }; max_events.max(1)]),
        })
    }

    /// Registers `fd` for `interest` plus whatever reactor-level flags
    /// (`EPOLLONESHOT`, `EPOLLRDHUP`, `EPOLLET`) the caller ORs into `mask`;
    /// `token` becomes the key `wait` hands back for this descriptor's
    /// readiness, stashed in `epoll_event.u64` the way mio's selector
    /// stashes its own `Token`.
    pub fn add(&self, token: Token, mask: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: mask,
            u64: token.0 as u64,
        };
        syscall!(epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, token.as_fd(), &mut event)).map(|_| ())
    }

    pub fn modify(&self, token: Token, mask: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: mask,
            u64: token.0 as u64,
        };
        syscall!(epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_MOD, token.as_fd(), &mut event)).map(|_| ())
    }

    pub fn remove(&self, token: Token) -> io::Result<()> {
        syscall!(epoll_ctl(
            self.epoll_fd,
            libc::EPOLL_CTL_DEL,
            token.as_fd(),
            std::ptr::null_mut()
        ))
        .map(|_| ())
    }

    /// Blocks until at least one descriptor is ready or `timeout_ms`
    /// elapses (`-1` blocks indefinitely, matching `epoll_wait`'s own
    /// convention and `HeapTimer::next_tick_ms`'s sentinel for "empty").
    /// Returns the ready `(token, event_mask)` pairs.
    pub fn wait(&self, timeout_ms: i32) -> io::Result<Vec<(Token, u32)>> {
        let mut events = self.events.lock().unwrap();
        let n = syscall!(epoll_wait(
            self.epoll_fd,
            events.as_mut_ptr(),
            events.len() as i32,
            timeout_ms,
        ))?;
        Ok(events[..n as usize]
            .iter()
            .map(|e| (Token(e.u64 as usize), e.events))
            .collect())
    }
}

impl AsRawFd for Reactor {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll_fd
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        unsafe { libc::close(self.epoll_fd) };
    }
}
