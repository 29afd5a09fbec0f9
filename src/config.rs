//! Server construction parameters, grounded on `WebServer`'s constructor
//! in `original_source/src/server/webserver.h` and `main.cpp`'s call site
//! for the defaults. Exposed both as a plain struct (for tests and
//! embedding) and via a `clap`-derived CLI in the binary.

use clap::Parser;

/// epoll trigger-mode selection mirroring `WebServer`'s `trigMode`
/// constructor argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TriggerMode {
    /// Level-triggered listen and connection sockets.
    LevelBoth,
    /// Edge-triggered connection sockets only.
    EdgeConn,
    /// Edge-triggered listen socket only.
    EdgeListen,
    /// Edge-triggered listen and connection sockets.
    EdgeBoth,
}

impl TriggerMode {
    pub fn listen_edge_triggered(self) -> bool {
        matches!(self, TriggerMode::EdgeListen | TriggerMode::EdgeBoth)
    }

    pub fn conn_edge_triggered(self) -> bool {
        matches!(self, TriggerMode::EdgeConn | TriggerMode::EdgeBoth)
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "reactor-httpd", about = "epoll-based HTTP/1.1 serving engine")]
pub struct Config {
    #[arg(long, default_value_t = 8888)]
    pub port: u16,

    #[arg(long, value_enum, default_value_t = TriggerMode::EdgeBoth)]
    pub trigger_mode: TriggerMode,

    #[arg(long, default_value_t = 60_000)]
    pub timeout_ms: u64,

    /// Sets `SO_LINGER{l_onoff=1, l_linger=1}` on the listening socket so
    /// a close drains pending writes instead of RSTing the peer.
    #[arg(long, default_value_t = false)]
    pub open_linger: bool,

    #[arg(long, default_value = "localhost")]
    pub sql_host: String,

    #[arg(long, default_value_t = 3306)]
    pub sql_port: u16,

    #[arg(long, default_value = "root")]
    pub sql_user: String,

    #[arg(long, default_value = "")]
    pub sql_password: String,

    #[arg(long, default_value = "webserver")]
    pub db_name: String,

    #[arg(long, default_value_t = 12)]
    pub sql_pool_size: usize,

    #[arg(long, default_value_t = 6)]
    pub thread_pool_size: usize,

    #[arg(long, default_value_t = 1024)]
    pub max_events: usize,

    /// Root directory resources are served from; joined with the request
    /// path without normalization (§6).
    #[arg(long, default_value = "resources")]
    pub src_dir: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 8888,
            trigger_mode: TriggerMode::EdgeBoth,
            timeout_ms: 60_000,
            open_linger: false,
            sql_host: "localhost".to_string(),
            sql_port: 3306,
            sql_user: "root".to_string(),
            sql_password: String::new(),
            db_name: "webserver".to_string(),
            sql_pool_size: 12,
            thread_pool_size: 6,
            max_events: 1024,
            src_dir: "resources".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_mode_edge_flags_match_original_trigmode_table() {
        assert!(!TriggerMode::LevelBoth.listen_edge_triggered());
        assert!(!TriggerMode::LevelBoth.conn_edge_triggered());
        assert!(TriggerMode::EdgeConn.conn_edge_triggered());
        assert!(!TriggerMode::EdgeConn.listen_edge_triggered());
        assert!(TriggerMode::EdgeListen.listen_edge_triggered());
        assert!(!TriggerMode::EdgeListen.conn_edge_triggered());
        assert!(TriggerMode::EdgeBoth.listen_edge_triggered());
        assert!(TriggerMode::EdgeBoth.conn_edge_triggered());
    }

    #[test]
    fn defaults_match_original_main_invocation() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 8888);
        assert_eq!(cfg.sql_pool_size, 12);
        assert_eq!(cfg.thread_pool_size, 6);
    }
}
