//! HTTP/1.1 parsing, response building, and per-connection state, grounded
//! on `http/httprequest.*`, `http/httpresponse.*`, and `http/httpconn.*` in
//! `original_source`.

mod connection;
mod request;
mod response;

pub use connection::Connection;
pub use request::HttpRequest;
pub use response::HttpResponse;
