//! Per-peer connection state: buffers, parser, response, and the
//! two-segment `writev` vector, grounded on `http/httpconn.h`/`.cpp` in
//! `original_source`.

use std::net::SocketAddr;
use std::os::unix::io::RawFd;

use log::debug;

use crate::buffer::Buffer;
use crate::pool::SqlPool;

use super::{HttpRequest, HttpResponse};

/// Bytes remaining below which a level-triggered write loop stops
/// retrying rather than spinning (mirrors `ToWriteBytes() > 10240`).
const LT_WRITE_DRAIN_THRESHOLD: usize = 10_240;

pub struct Connection {
    fd: RawFd,
    peer: SocketAddr,
    closed: bool,
    edge_triggered: bool,

    read_buf: Buffer,
    write_buf: Buffer,
    request: HttpRequest,
    response: HttpResponse,

    iov: [libc::iovec; 2],
    iov_count: usize,
}

// SAFETY: `iov` holds raw pointers into `write_buf`'s own allocation and
// `response`'s mmap, both owned by this Connection; access is always
// through a `Mutex<Connection>` so only one thread touches them at a
// time, and no pointer is dereferenced outside that connection's own
// read/write/process calls.
unsafe impl Send for Connection {}

impl Connection {
    pub fn new(fd: RawFd, peer: SocketAddr, edge_triggered: bool) -> Connection {
        debug!("client[{fd}] ({peer}) connected");
        Connection {
            fd,
            peer,
            closed: false,
            edge_triggered,
            read_buf: Buffer::new(),
            write_buf: Buffer::new(),
            request: HttpRequest::new(),
            response: HttpResponse::new(),
            iov: [libc::iovec { iov_base: std::ptr::null_mut(), iov_len: 0 }; 2],
            iov_count: 0,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_keep_alive(&self) -> bool {
        self.request.is_keep_alive()
    }

    /// Reads from the socket into `read_buf`, looping under edge-triggered
    /// mode until the kernel reports `EAGAIN`; a single call otherwise.
    pub fn read(&mut self) -> std::io::Result<isize> {
        let mut total = 0isize;
        loop {
            match self.read_buf.read_from_fd(self.fd) {
                Ok(n) => {
                    total += n;
                    if n <= 0 || !self.edge_triggered {
                        return Ok(total);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return if total > 0 { Ok(total) } else { Err(e) };
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Issues `writev` until both iovec segments are drained, an error
    /// occurs, or (level-triggered only) the remaining bytes are small
    /// enough to finish on the next readiness notification instead.
    pub fn write(&mut self) -> std::io::Result<isize> {
        let mut total = 0isize;
        loop {
            let n = unsafe { libc::writev(self.fd, self.iov.as_ptr(), self.iov_count as i32) };
            if n <= 0 {
                if n < 0 {
                    let err = std::io::Error::last_os_error();
                    if err.kind() == std::io::ErrorKind::WouldBlock {
                        return if total > 0 { Ok(total) } else { Err(err) };
                    }
                    return Err(err);
                }
                break;
            }
            total += n;
            let n = n as usize;

            if self.to_write_bytes() == 0 {
                break;
            } else if n > self.iov[0].iov_len {
                let remainder = n - self.iov[0].iov_len;
                self.iov[1].iov_base = unsafe { (self.iov[1].iov_base as *mut u8).add(remainder) } as *mut _;
                self.iov[1].iov_len -= remainder;
                if self.iov[0].iov_len > 0 {
                    self.write_buf.retrieve_all();
                    self.iov[0].iov_len = 0;
                }
            } else {
                self.iov[0].iov_base = unsafe { (self.iov[0].iov_base as *mut u8).add(n) } as *mut _;
                self.iov[0].iov_len -= n;
                self.write_buf.retrieve(n);
            }

            if !(self.edge_triggered || self.to_write_bytes() > LT_WRITE_DRAIN_THRESHOLD) {
                break;
            }
        }
        Ok(total)
    }

    pub fn to_write_bytes(&self) -> usize {
        self.iov[0].iov_len + self.iov[1].iov_len
    }

    /// Parses the read buffer and assembles a response in the write
    /// buffer, wiring up `iov`. Returns `true` iff there was data to
    /// process at all.
    pub fn process(&mut self, src_dir: &str, sql_pool: &SqlPool) -> bool {
        self.request.init();
        if self.read_buf.readable_bytes() == 0 {
            return false;
        }

        if self.request.parse(&mut self.read_buf, sql_pool) {
            self.response
                .init(src_dir, self.request.path(), self.request.is_keep_alive(), 200);
        } else {
            self.response.init(src_dir, self.request.path(), false, 400);
        }
        self.response.make_response(&mut self.write_buf);

        self.iov[0] = libc::iovec {
            iov_base: self.write_buf.peek().as_ptr() as *mut libc::c_void,
            iov_len: self.write_buf.readable_bytes(),
        };
        self.iov_count = 1;

        if self.response.file_len() > 0 {
            self.iov[1] = libc::iovec {
                iov_base: self.response.file().as_ptr() as *mut libc::c_void,
                iov_len: self.response.file_len(),
            };
            self.iov_count = 2;
        }

        debug!(
            "response[{}]: code={} file_len={} iov_count={}",
            self.fd,
            self.response.code(),
            self.response.file_len(),
            self.iov_count
        );
        true
    }

    pub fn close(&mut self) {
        self.response.unmap();
        if !self.closed {
            self.closed = true;
            unsafe { libc::close(self.fd) };
            debug!("client[{}] ({}) closed", self.fd, self.peer);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_peer() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn fresh_connection_reports_no_write_bytes() {
        let conn = Connection::new(-1, loopback_peer(), true);
        assert_eq!(conn.to_write_bytes(), 0);
    }

    #[test]
    fn process_with_empty_read_buffer_returns_false() {
        use crate::pool::{SqlPool, SqlPoolConfig};
        let pool = SqlPool::new(&SqlPoolConfig {
            host: "127.0.0.1".into(),
            port: 1,
            user: "root".into(),
            password: String::new(),
            db_name: "webserver".into(),
            pool_size: 1,
        });
        let mut conn = Connection::new(-1, loopback_peer(), true);
        assert!(!conn.process("/tmp/", &pool));
    }
}
