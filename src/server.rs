//! Owns the reactor, timer, thread pool, and the fd→connection map;
//! implements accept, dispatch, keep-alive recycling. Grounded on
//! `server/webserver.h`/`.cpp` in `original_source`.
//!
//! **Ownership of connections** (open question in §9): this picks shared
//! ownership — the map and any in-flight worker task hold an `Arc` to the
//! same `Connection`, mirroring the source's `std::shared_ptr<HttpConn>`
//! — over exclusive map ownership with fd-only timer callbacks, since it
//! keeps `Connection::close` callable from whichever of {I/O thread via
//! timer, worker thread via read/write error} gets there first without a
//! second lookup path.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ServerError;
use crate::http::Connection;
use crate::pool::{SqlPool, SqlPoolConfig, ThreadPool};
use crate::reactor::{self, Interest, Reactor, Token};
use crate::timer::TimerHeap;

/// Process-wide descriptor cap past which new connections are rejected
/// with a literal busy response (§3 Connection, §4.9 Accept admission).
const MAX_FD: usize = 65536;

type ConnHandle = Arc<Mutex<Connection>>;

struct Inner {
    reactor: Reactor,
    timer: Mutex<TimerHeap>,
    thread_pool: ThreadPool,
    sql_pool: SqlPool,
    connections: Mutex<HashMap<RawFd, ConnHandle>>,
    listen_fd: RawFd,
    src_dir: String,
    conn_mask_base: u32,
    conn_edge_triggered: bool,
    listen_edge_triggered: bool,
    timeout_ms: u64,
    live_count: AtomicUsize,
    shutdown: AtomicBool,
}

/// Single-node epoll HTTP/1.1 serving engine.
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    pub fn new(config: &Config) -> Result<Server, ServerError> {
        if !(1024..=65535).contains(&config.port) {
            return Err(ServerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("port {} out of range 1024-65535", config.port),
            )));
        }

        let listen_fd = create_listen_socket(config.port, config.open_linger)?;

        let listen_edge_triggered = config.trigger_mode.listen_edge_triggered();
        let conn_edge_triggered = config.trigger_mode.conn_edge_triggered();

        let mut listen_mask = reactor::flags::RDHUP | Interest::READABLE.to_raw();
        if listen_edge_triggered {
            listen_mask |= reactor::flags::EDGE_TRIGGERED;
        }
        let mut conn_mask_base = reactor::flags::ONESHOT | reactor::flags::RDHUP;
        if conn_edge_triggered {
            conn_mask_base |= reactor::flags::EDGE_TRIGGERED;
        }

        let reactor = Reactor::new(config.max_events)?;
        reactor.add(Token::from(listen_fd), listen_mask)?;

        let sql_pool = SqlPool::new(&SqlPoolConfig {
            host: config.sql_host.clone(),
            port: config.sql_port,
            user: config.sql_user.clone(),
            password: config.sql_password.clone(),
            db_name: config.db_name.clone(),
            pool_size: config.sql_pool_size,
        });

        let thread_pool = ThreadPool::new(config.thread_pool_size);

        let src_dir = if config.src_dir.ends_with('/') {
            config.src_dir.clone()
        } else {
            format!("{}/", config.src_dir)
        };

        info!(
            "server init: port={} trigger_mode={:?} open_linger={} src_dir={} sql_pool={} thread_pool={}",
            config.port, config.trigger_mode, config.open_linger, src_dir, config.sql_pool_size, config.thread_pool_size
        );

        Ok(Server {
            inner: Arc::new(Inner {
                reactor,
                timer: Mutex::new(TimerHeap::new()),
                thread_pool,
                sql_pool,
                connections: Mutex::new(HashMap::new()),
                listen_fd,
                src_dir,
                conn_mask_base,
                conn_edge_triggered,
                listen_edge_triggered,
                timeout_ms: config.timeout_ms,
                live_count: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    pub fn live_connections(&self) -> usize {
        self.inner.live_count.load(Ordering::SeqCst)
    }

    /// Signals the reactor loop to stop after its current iteration.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
    }

    /// Runs the reactor loop on the calling thread until `shutdown` is
    /// called. The timer's next deadline becomes the `epoll_wait` timeout
    /// so the loop wakes exactly when the next eviction is due (§4.9 main
    /// loop steps 1-2).
    pub fn run(&self) {
        info!("server start");
        while !self.inner.shutdown.load(Ordering::SeqCst) {
            let timeout = self.inner.timer.lock().unwrap().next_tick_ms();
            let ready = match self.inner.reactor.wait(timeout) {
                Ok(ready) => ready,
                Err(e) => {
                    error!("epoll_wait failed: {e}");
                    continue;
                }
            };
            for (token, mask) in ready {
                self.dispatch_event(token.as_fd(), mask);
            }
        }
        info!("server stopped");
    }

    fn dispatch_event(&self, fd: RawFd, mask: u32) {
        if fd == self.inner.listen_fd {
            self.inner.accept_loop();
        } else if mask & (reactor::flags::RDHUP | reactor::flags::HUP | reactor::flags::ERR) != 0 {
            self.inner.close_connection(fd);
        } else if mask & libc::EPOLLIN as u32 != 0 {
            self.inner.extend_deadline(fd);
            self.inner.dispatch_read(fd);
        } else if mask & libc::EPOLLOUT as u32 != 0 {
            self.inner.extend_deadline(fd);
            self.inner.dispatch_write(fd);
        } else {
            warn!("fd {fd}: unexpected event mask {mask:#x}");
        }
    }
}

impl Inner {
    fn accept_loop(self: &Arc<Self>) {
        loop {
            let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            let fd = unsafe {
                libc::accept(self.listen_fd, &mut addr as *mut _ as *mut libc::sockaddr, &mut len)
            };
            if fd < 0 {
                break;
            }
            if self.live_count.load(Ordering::SeqCst) >= MAX_FD {
                warn!("accept: connection cap ({MAX_FD}) reached, rejecting fd {fd}");
                unsafe {
                    libc::send(fd, b"Server busy!".as_ptr() as *const libc::c_void, 12, 0);
                    libc::close(fd);
                }
            } else {
                self.add_client(fd, addr);
            }
            if !self.listen_edge_triggered {
                break;
            }
        }
    }

    fn add_client(self: &Arc<Self>, fd: RawFd, addr: libc::sockaddr_in) {
        let peer = sockaddr_to_socketaddr(addr);
        if let Err(e) = set_nonblocking(fd) {
            warn!("client[{fd}]: failed to set non-blocking: {e}");
        }

        let conn = Arc::new(Mutex::new(Connection::new(fd, peer, self.conn_edge_triggered)));
        self.live_count.fetch_add(1, Ordering::SeqCst);

        if self.timeout_ms > 0 {
            let weak = Arc::clone(self);
            self.timer.lock().unwrap().add(
                fd as u64,
                Duration::from_millis(self.timeout_ms),
                Box::new(move || weak.close_connection(fd)),
            );
        }

        if let Err(e) = self.reactor.add(Token::from(fd), self.conn_mask_base | Interest::READABLE.to_raw()) {
            warn!("client[{fd}]: failed to register with reactor: {e}");
        }
        self.connections.lock().unwrap().insert(fd, conn);
        debug!("client[{fd}] ({peer}) accepted, live={}", self.live_count.load(Ordering::SeqCst));
    }

    /// Removes the connection from both the map and the reactor before
    /// closing its descriptor (§8 property 3); safe to call twice (from a
    /// racing timer callback and a worker's read/write error path) since
    /// the map lookup only succeeds once.
    fn close_connection(&self, fd: RawFd) {
        let removed = self.connections.lock().unwrap().remove(&fd);
        let Some(conn) = removed else {
            return;
        };
        let _ = self.reactor.remove(Token::from(fd));
        self.timer.lock().unwrap().cancel(fd as u64);
        conn.lock().unwrap().close();
        self.live_count.fetch_sub(1, Ordering::SeqCst);
    }

    fn extend_deadline(&self, fd: RawFd) {
        if self.timeout_ms > 0 {
            self.timer
                .lock()
                .unwrap()
                .adjust(fd as u64, Duration::from_millis(self.timeout_ms));
        }
    }

    fn dispatch_read(self: &Arc<Self>, fd: RawFd) {
        let inner = Arc::clone(self);
        self.thread_pool.enqueue(move || inner.on_read(fd));
    }

    fn dispatch_write(self: &Arc<Self>, fd: RawFd) {
        let inner = Arc::clone(self);
        self.thread_pool.enqueue(move || inner.on_write(fd));
    }

    fn connection(&self, fd: RawFd) -> Option<ConnHandle> {
        self.connections.lock().unwrap().get(&fd).cloned()
    }

    fn on_read(&self, fd: RawFd) {
        let Some(conn) = self.connection(fd) else { return };
        let result = conn.lock().unwrap().read();
        let should_close = match &result {
            Ok(n) => *n <= 0,
            Err(e) => e.kind() != std::io::ErrorKind::WouldBlock,
        };
        if should_close {
            self.close_connection(fd);
            return;
        }
        self.on_process(fd, &conn);
    }

    fn on_process(&self, fd: RawFd, conn: &ConnHandle) {
        let has_data = conn.lock().unwrap().process(&self.src_dir, &self.sql_pool);
        let interest = if has_data { Interest::WRITABLE } else { Interest::READABLE };
        let mask = self.conn_mask_base | interest.to_raw();
        if let Err(e) = self.reactor.modify(Token::from(fd), mask) {
            warn!("client[{fd}]: failed to re-arm: {e}");
        }
    }

    fn on_write(&self, fd: RawFd) {
        let Some(conn) = self.connection(fd) else { return };
        let result = conn.lock().unwrap().write();
        let remaining = conn.lock().unwrap().to_write_bytes();

        if remaining == 0 {
            if conn.lock().unwrap().is_keep_alive() {
                self.on_process(fd, &conn);
            } else {
                self.close_connection(fd);
            }
            return;
        }

        match result {
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if let Err(e) = self.reactor.modify(Token::from(fd), self.conn_mask_base | Interest::WRITABLE.to_raw()) {
                    warn!("client[{fd}]: failed to re-arm for write: {e}");
                }
            }
            _ => self.close_connection(fd),
        }
    }
}

fn sockaddr_to_socketaddr(addr: libc::sockaddr_in) -> SocketAddr {
    let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
    let port = u16::from_be(addr.sin_port);
    SocketAddr::V4(SocketAddrV4::new(ip, port))
}

fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Builds the IPv4 listening socket: `SO_LINGER`, `SO_REUSEADDR`, bind,
/// `listen(backlog=6)`, then non-blocking (§6 Listening socket).
fn create_listen_socket(port: u16, open_linger: bool) -> std::io::Result<RawFd> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let linger = libc::linger {
            l_onoff: if open_linger { 1 } else { 0 },
            l_linger: 1,
        };
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &linger as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::linger>() as u32,
        ) < 0
        {
            libc::close(fd);
            return Err(std::io::Error::last_os_error());
        }

        let reuse: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &reuse as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as u32,
        ) < 0
        {
            libc::close(fd);
            return Err(std::io::Error::last_os_error());
        }

        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: libc::in_addr { s_addr: libc::INADDR_ANY.to_be() },
            sin_zero: [0; 8],
        };
        if libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as u32,
        ) < 0
        {
            libc::close(fd);
            return Err(std::io::Error::last_os_error());
        }

        if libc::listen(fd, 6) < 0 {
            libc::close(fd);
            return Err(std::io::Error::last_os_error());
        }

        set_nonblocking(fd)?;
        Ok(fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ports_outside_the_registered_range() {
        let mut config = Config::default();
        config.port = 80;
        assert!(Server::new(&config).is_err());
    }

    #[test]
    fn binds_an_ephemeral_port_in_range() {
        let mut config = Config::default();
        config.port = 18080;
        config.sql_pool_size = 1;
        config.thread_pool_size = 1;
        let server = Server::new(&config).expect("server should bind");
        assert_eq!(server.live_connections(), 0);
    }
}
