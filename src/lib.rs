//! Single-node epoll HTTP/1.1 serving engine. See `Server` for the entry
//! point; the reactor, timer, buffer, and pool modules are the reusable
//! pieces it's built from.

pub mod auth;
pub mod buffer;
pub mod config;
pub mod error;
pub mod http;
pub mod pool;
pub mod reactor;
pub mod server;
pub mod timer;

pub use config::Config;
pub use error::ServerError;
pub use server::Server;
