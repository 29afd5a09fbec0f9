//! Incremental line-oriented HTTP/1.1 request parser, grounded on
//! `http/httprequest.h`/`.cpp` in `original_source`.

use std::collections::HashMap;

use log::debug;

use crate::auth;
use crate::pool::SqlPool;

const DEFAULT_HTML: &[&str] = &["/index", "/register", "/login", "/welcome", "/video", "/picture"];

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum ParseState {
    RequestLine,
    Headers,
    Body,
    Finish,
}

pub struct HttpRequest {
    state: ParseState,
    method: String,
    path: String,
    version: String,
    body: String,
    headers: HashMap<String, String>,
    post: HashMap<String, String>,
}

impl HttpRequest {
    pub fn new() -> HttpRequest {
        HttpRequest {
            state: ParseState::RequestLine,
            method: String::new(),
            path: String::new(),
            version: String::new(),
            body: String::new(),
            headers: HashMap::new(),
            post: HashMap::new(),
        }
    }

    pub fn init(&mut self) {
        self.state = ParseState::RequestLine;
        self.method.clear();
        self.path.clear();
        self.version.clear();
        self.body.clear();
        self.headers.clear();
        self.post.clear();
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn get_post(&self, key: &str) -> Option<&str> {
        self.post.get(key).map(String::as_str)
    }

    pub fn is_keep_alive(&self) -> bool {
        self.headers
            .get("Connection")
            .is_some_and(|v| v == "keep-alive" && self.version == "1.1")
    }

    /// Consumes complete CRLF-terminated lines out of `buf`'s readable
    /// window, advancing `state` until `Finish` or the buffer runs dry.
    /// Returns `false` only when the request line fails to match; an
    /// incomplete request (more lines expected) returns `true` with
    /// `state` short of `Finish`, to be resumed on the next `read`.
    pub fn parse(&mut self, buf: &mut crate::buffer::Buffer, sql_pool: &SqlPool) -> bool {
        if buf.readable_bytes() == 0 {
            return false;
        }

        while buf.readable_bytes() > 0 && self.state != ParseState::Finish {
            let peek = buf.peek();
            let crlf_at = peek.windows(2).position(|w| w == b"\r\n");
            let line_end = crlf_at.unwrap_or(peek.len());
            let line = String::from_utf8_lossy(&peek[..line_end]).into_owned();
            let found_crlf = crlf_at.is_some();

            match self.state {
                ParseState::RequestLine => {
                    if !self.parse_request_line(&line) {
                        return false;
                    }
                    self.parse_path();
                }
                ParseState::Headers => {
                    self.parse_header(&line);
                    if buf.readable_bytes() <= 2 {
                        self.state = ParseState::Finish;
                    }
                }
                ParseState::Body => {
                    self.parse_body(&line, sql_pool);
                }
                ParseState::Finish => {}
            }

            if !found_crlf {
                // No terminator in what's buffered; this line is incomplete.
                // Drop it rather than risk reparsing a partial line next pass.
                buf.retrieve_all();
                break;
            }
            buf.retrieve_until(line_end + 2);
        }
        debug!("request: {} {} HTTP/{}", self.method, self.path, self.version);
        true
    }

    fn parse_request_line(&mut self, line: &str) -> bool {
        let parts: Vec<&str> = line.split(' ').collect();
        if parts.len() != 3 {
            return false;
        }
        let version = match parts[2].strip_prefix("HTTP/") {
            Some(v) => v,
            None => return false,
        };
        self.method = parts[0].to_string();
        self.path = parts[1].to_string();
        self.version = version.to_string();
        self.state = ParseState::Headers;
        true
    }

    fn parse_path(&mut self) {
        if self.path == "/" {
            self.path = "/index2.html".to_string();
        } else if DEFAULT_HTML.contains(&self.path.as_str()) {
            self.path.push_str(".html");
        }
    }

    fn parse_header(&mut self, line: &str) {
        match line.find(':') {
            Some(idx) => {
                let name = line[..idx].to_string();
                let value = line[idx + 1..].strip_prefix(' ').unwrap_or(&line[idx + 1..]);
                self.headers.insert(name, value.to_string());
            }
            None => self.state = ParseState::Body,
        }
    }

    fn parse_body(&mut self, line: &str, sql_pool: &SqlPool) {
        self.body = line.to_string();
        self.parse_post(sql_pool);
        self.state = ParseState::Finish;
    }

    fn parse_post(&mut self, sql_pool: &SqlPool) {
        let is_form = self.method == "POST"
            && self
                .headers
                .get("Content-Type")
                .is_some_and(|ct| ct == "application/x-www-form-urlencoded");
        if !is_form {
            return;
        }
        self.parse_from_urlencoded();
        let is_login = match self.path.as_str() {
            "/login.html" => Some(true),
            "/register.html" => Some(false),
            _ => None,
        };
        if let Some(is_login) = is_login {
            let name = self.post.get("username").cloned().unwrap_or_default();
            let pwd = self.post.get("password").cloned().unwrap_or_default();
            if auth::verify_user(sql_pool, &name, &pwd, is_login) {
                self.path = "/welcome.html".to_string();
            } else {
                self.path = "/error.html".to_string();
            }
        }
    }

    /// Decodes `application/x-www-form-urlencoded` bytes. Unlike the
    /// source's in-place `%HH` rewrite (which leaves the two hex digit
    /// positions overwritten with decimal digits instead of collapsing
    /// them), this emits the single correctly decoded byte per the fix
    /// recommended for the urlencoded decode quirk.
    fn parse_from_urlencoded(&mut self) {
        if self.body.is_empty() {
            return;
        }
        let bytes = self.body.as_bytes();
        let mut key: Option<Vec<u8>> = None;
        let mut current: Vec<u8> = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'=' => {
                    key = Some(std::mem::take(&mut current));
                    i += 1;
                }
                b'+' => {
                    current.push(b' ');
                    i += 1;
                }
                b'%' if i + 2 < bytes.len() => {
                    let byte = (hex_val(bytes[i + 1]) * 16 + hex_val(bytes[i + 2])) as u8;
                    current.push(byte);
                    i += 3;
                }
                b'&' => {
                    if let Some(k) = key.take() {
                        self.post.insert(bytes_to_string(&k), bytes_to_string(&current));
                    }
                    current.clear();
                    i += 1;
                }
                b => {
                    current.push(b);
                    i += 1;
                }
            }
        }
        if let Some(k) = key {
            if !current.is_empty() {
                self.post.insert(bytes_to_string(&k), bytes_to_string(&current));
            }
        }
    }
}

fn bytes_to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn hex_val(ch: u8) -> u32 {
    match ch {
        b'A'..=b'F' => (ch - b'A' + 10) as u32,
        b'a'..=b'f' => (ch - b'a' + 10) as u32,
        _ => ch.wrapping_sub(b'0') as u32,
    }
}

impl Default for HttpRequest {
    fn default() -> HttpRequest {
        HttpRequest::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::pool::SqlPoolConfig;

    fn unreachable_pool() -> SqlPool {
        SqlPool::new(&SqlPoolConfig {
            host: "127.0.0.1".into(),
            port: 1,
            user: "root".into(),
            password: String::new(),
            db_name: "webserver".into(),
            pool_size: 1,
        })
    }

    #[test]
    fn parses_get_root_and_rewrites_path() {
        let mut buf = Buffer::new();
        buf.append(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n");
        let pool = unreachable_pool();
        let mut req = HttpRequest::new();
        assert!(req.parse(&mut buf, &pool));
        assert_eq!(req.path(), "/index2.html");
        assert_eq!(req.method(), "GET");
        assert_eq!(req.version(), "1.1");
        assert!(req.is_keep_alive());
    }

    #[test]
    fn bad_request_line_with_four_tokens_fails() {
        let mut buf = Buffer::new();
        buf.append(b"GET / HTTP/1.1 extra\r\n\r\n");
        let pool = unreachable_pool();
        let mut req = HttpRequest::new();
        assert!(!req.parse(&mut buf, &pool));
    }

    #[test]
    fn urlencoded_body_decodes_plus_and_percent() {
        let mut buf = Buffer::new();
        buf.append(
            b"POST /other HTTP/1.1\r\nConnection: close\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\nfirstName=Mickey%26&lastName=Mouse+",
        );
        let pool = unreachable_pool();
        let mut req = HttpRequest::new();
        assert!(req.parse(&mut buf, &pool));
        assert_eq!(req.get_post("firstName"), Some("Mickey&"));
        assert_eq!(req.get_post("lastName"), Some("Mouse "));
    }

    #[test]
    fn login_post_with_unreachable_db_falls_back_to_error_page() {
        let mut buf = Buffer::new();
        buf.append(
            b"POST /login HTTP/1.1\r\nConnection: close\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\nusername=a&password=b",
        );
        let pool = unreachable_pool();
        let mut req = HttpRequest::new();
        assert!(req.parse(&mut buf, &pool));
        assert_eq!(req.path(), "/error.html");
    }

    #[test]
    fn default_html_path_gains_html_suffix() {
        let mut buf = Buffer::new();
        buf.append(b"GET /welcome HTTP/1.1\r\n\r\n");
        let pool = unreachable_pool();
        let mut req = HttpRequest::new();
        assert!(req.parse(&mut buf, &pool));
        assert_eq!(req.path(), "/welcome.html");
    }
}
