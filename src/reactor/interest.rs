//! Readiness interest flags.
//!
//! Grounded on `mio`'s `Interests` type (src/interests.rs in the teacher
//! repo), trimmed to the two interest classes this engine ever registers:
//! readable and writable. AIO/LIO and the BSD read/write-closed bits mio
//! carries for portability across kqueue platforms have no counterpart
//! here since the engine only ever targets epoll.

use std::num::NonZeroU8;
use std::ops;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Interest(NonZeroU8);

const READABLE: u8 = 0b01;
const WRITABLE: u8 = 0b10;

impl Interest {
    pub const READABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(READABLE) });
    pub const WRITABLE: Interest = Interest(unsafe { NonZeroU8::new_unchecked(WRITABLE) });

    pub const fn add(self, other: Interest) -> Interest {
        Interest(unsafe { NonZeroU8::new_unchecked(self.0.get() | other.0.get()) })
    }

    pub const fn is_readable(self) -> bool {
        self.0.get() & READABLE != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0.get() & WRITABLE != 0
    }

    /// Lowers to the raw `epoll_event.events` bits for this interest alone.
    /// Callers compose this with the reactor-level flags (`EPOLLONESHOT`,
    /// `EPOLLRDHUP`, `EPOLLET`) that belong to the connection's trigger
    /// mode rather than to the interest itself.
    pub fn to_raw(self) -> u32 {
        let mut bits = 0i32;
        if self.is_readable() {
            bits |= libc::EPOLLIN;
        }
        if self.is_writable() {
            bits |= libc::EPOLLOUT;
        }
        bits as u32
    }
}

impl ops::BitOr for Interest {
    type Output = Self;

    fn bitor(self, other: Self) -> Self {
        self.add(other)
    }
}

impl ops::BitOrAssign for Interest {
    fn bitor_assign(&mut self, other: Self) {
        *self = *self | other;
    }
}

impl std::fmt::Debug for Interest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if self.is_readable() {
            parts.push("READABLE");
        }
        if self.is_writable() {
            parts.push("WRITABLE");
        }
        write!(f, "{}", parts.join(" | "))
    }
}
