//! Associates a readiness event with the descriptor that produced it.
//!
//! Mirrors `mio::Token`: a transparent `usize` newtype threaded through
//! `epoll_event.u64` so `Selector::select` can report which descriptor woke
//! up without the caller having to re-derive it from the raw event. This
//! engine's tokens are always raw file descriptors, since the fd is already
//! a stable, dense-ish key and the `fd -> Connection` map is keyed on it.

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Token(pub usize);

impl From<i32> for Token {
    fn from(fd: i32) -> Token {
        Token(fd as usize)
    }
}

impl Token {
    pub fn as_fd(self) -> i32 {
        self.0 as i32
    }
}
