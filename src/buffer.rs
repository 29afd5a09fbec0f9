//! A growable byte buffer with independent read/write cursors and a
//! scatter-read fallback, grounded on `buffer.h`/`buffer.cpp` in
//! `original_source`.

use std::os::unix::io::RawFd;

/// Scratch segment size for the second `readv` vector; large enough that a
/// single syscall drains a full socket buffer's worth of bytes regardless
/// of how much room `Buffer` currently has free.
const SCRATCH_LEN: usize = 65_535;

pub struct Buffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Buffer {
        Buffer {
            data: vec![0u8; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    pub fn writable_bytes(&self) -> usize {
        self.data.len() - self.write_pos
    }

    pub fn readable_bytes(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn prependable_bytes(&self) -> usize {
        self.read_pos
    }

    /// The current readable window, `[read_pos, write_pos)`.
    pub fn peek(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable_bytes() < len {
            self.make_space(len);
        }
        debug_assert!(self.writable_bytes() >= len);
    }

    pub fn has_written(&mut self, len: usize) {
        self.write_pos += len;
    }

    pub fn retrieve(&mut self, len: usize) {
        assert!(len <= self.readable_bytes());
        self.read_pos += len;
    }

    /// Retrieves up to (but not including) `offset` bytes into the
    /// readable window, mirroring `Buffer::RetrieveUntil(const char* end)`
    /// which took a pointer; here callers pass the byte offset from
    /// `peek()`'s start instead of a raw pointer.
    pub fn retrieve_until(&mut self, offset: usize) {
        self.retrieve(offset);
    }

    pub fn retrieve_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    pub fn retrieve_all_to_string(&mut self) -> String {
        let s = String::from_utf8_lossy(self.peek()).into_owned();
        self.retrieve_all();
        s
    }

    fn begin_write_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.write_pos..]
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        let start = self.write_pos;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.has_written(bytes.len());
    }

    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Two-segment scatter read: segment 0 is the current writable window,
    /// segment 1 is a 64 KiB on-stack scratch buffer. If the kernel fills
    /// more than the writable window, the overflow is appended (forcing
    /// growth); otherwise only the write cursor advances. One `readv` call
    /// thus reads up to ~64 KiB regardless of how much free space `Buffer`
    /// currently has, amortizing the grow decision (§4.1, S4/property 7).
    pub fn read_from_fd(&mut self, fd: RawFd) -> std::io::Result<isize> {
        let mut scratch = [0u8; SCRATCH_LEN];
        let writable = self.writable_bytes();

        let mut iov = [
            libc::iovec {
                iov_base: self.begin_write_mut().as_mut_ptr() as *mut libc::c_void,
                iov_len: writable,
            },
            libc::iovec {
                iov_base: scratch.as_mut_ptr() as *mut libc::c_void,
                iov_len: scratch.len(),
            },
        ];

        let n = unsafe { libc::readv(fd, iov.as_mut_ptr(), 2) };
        if n < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let n = n as usize;
        if n <= writable {
            self.has_written(n);
        } else {
            self.write_pos = self.data.len();
            self.append(&scratch[..n - writable]);
        }
        Ok(n as isize)
    }

    /// Single direct `write(2)` from the readable window; advances the
    /// read cursor by however much actually went out. Unlike `Connection`'s
    /// `writev` path over two iovecs, this is used only to flush `Buffer`
    /// contents in isolation (e.g. tests, or a response with no mapped
    /// file body).
    pub fn write_to_fd(&mut self, fd: RawFd) -> std::io::Result<isize> {
        let readable = self.peek();
        let n = unsafe {
            libc::write(
                fd,
                readable.as_ptr() as *const libc::c_void,
                readable.len(),
            )
        };
        if n < 0 {
            return Err(std::io::Error::last_os_error());
        }
        self.retrieve(n as usize);
        Ok(n as isize)
    }

    fn make_space(&mut self, len: usize) {
        if self.writable_bytes() + self.prependable_bytes() < len {
            self.data.resize(self.write_pos + len + 1, 0);
        } else {
            let readable = self.readable_bytes();
            self.data.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }
}

impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_retrieve_round_trip() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(b"hello");
        assert_eq!(buf.readable_bytes(), 5);
        assert_eq!(buf.peek(), b"hello");
        buf.retrieve(5);
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn growth_slides_before_reallocating() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(b"1234");
        buf.retrieve(4);
        // 4 bytes prependable, 8 writable: appending 6 should slide, not grow.
        buf.append(b"abcdef");
        assert_eq!(buf.peek(), b"abcdef");
    }

    #[test]
    fn growth_reallocates_when_sliding_is_not_enough() {
        let mut buf = Buffer::with_capacity(4);
        buf.append(b"ab");
        buf.append(b"cdefgh");
        assert_eq!(buf.peek(), b"abcdefgh");
    }

    #[test]
    fn retrieve_all_resets_cursors() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(b"xyz");
        buf.retrieve_all();
        assert_eq!(buf.readable_bytes(), 0);
        assert_eq!(buf.prependable_bytes(), 0);
    }

    #[test]
    fn retrieve_all_to_string_drains_and_converts() {
        let mut buf = Buffer::with_capacity(8);
        buf.append(b"payload");
        let s = buf.retrieve_all_to_string();
        assert_eq!(s, "payload");
        assert_eq!(buf.readable_bytes(), 0);
    }

    #[test]
    fn scatter_read_past_writable_window_grows_buffer() {
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let payload = vec![b'a'; 65_537];
        let mut offset = 0;
        while offset < payload.len() {
            let n = unsafe {
                libc::write(
                    write_fd,
                    payload[offset..].as_ptr() as *const libc::c_void,
                    payload.len() - offset,
                )
            };
            assert!(n > 0);
            offset += n as usize;
        }

        let mut buf = Buffer::with_capacity(1024);
        let before_cap = buf.data.len();
        let n = buf.read_from_fd(read_fd).unwrap();
        assert_eq!(n as usize, payload.len());
        assert_eq!(buf.readable_bytes(), payload.len());
        assert!(buf.data.len() > before_cap);

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test]
    fn invariant_cursors_stay_ordered() {
        let mut buf = Buffer::with_capacity(16);
        buf.append(b"abcdefgh");
        buf.retrieve(3);
        buf.append(b"ijklmnop");
        assert!(buf.read_pos <= buf.write_pos);
        assert!(buf.write_pos <= buf.data.len());
    }
}
