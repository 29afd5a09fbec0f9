//! Status line, header, and memory-mapped body assembly, grounded on
//! `http/httpresponse.h`/`.cpp` in `original_source`.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::os::unix::fs::PermissionsExt;

use log::{debug, warn};

use crate::buffer::Buffer;

fn status_lookup(code: i32) -> Option<&'static str> {
    match code {
        200 => Some("OK"),
        400 => Some("Bad Request"),
        403 => Some("Forbidden"),
        404 => Some("Not Found"),
        _ => None,
    }
}

fn error_path(code: i32) -> Option<&'static str> {
    match code {
        400 => Some("/400.html"),
        403 => Some("/403.html"),
        404 => Some("/404.html"),
        _ => None,
    }
}

fn mime_type(path: &str) -> &'static str {
    let suffix = match path.rfind('.') {
        Some(idx) => &path[idx..],
        None => return "text/plain",
    };
    match suffix {
        ".html" => "text/html",
        ".xml" => "text/xml",
        ".xhtml" => "application/xhtml+xml",
        ".txt" => "text/plain",
        ".rtf" => "application/rtf",
        ".pdf" => "application/pdf",
        ".word" => "application/nsword",
        ".png" => "image/png",
        ".gif" => "image/gif",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".au" => "audio/basic",
        ".mpeg" | ".mpg" => "video/mpeg",
        ".avi" => "video/x-msvideo",
        ".gz" => "application/x-gzip",
        ".tar" => "application/x-tar",
        ".css" => "text/css",
        ".js" => "text/javascript",
        _ => "text/plain",
    }
}

/// An mmap'd read-only file mapping; unmaps itself on drop so `unmap`/
/// re-`init` is just replacing this field with `None`.
struct Mapping {
    ptr: *mut u8,
    len: usize,
}

impl Mapping {
    fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
        }
    }
}

// SAFETY: the mapping is read-only and only ever touched from the worker
// thread holding the owning Connection; no interior mutability crosses it.
unsafe impl Send for Mapping {}

impl Drop for Mapping {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.len);
            }
        }
    }
}

pub struct HttpResponse {
    code: i32,
    keep_alive: bool,
    path: String,
    src_dir: String,
    mapping: Option<Mapping>,
}

impl HttpResponse {
    pub fn new() -> HttpResponse {
        HttpResponse {
            code: -1,
            keep_alive: false,
            path: String::new(),
            src_dir: String::new(),
            mapping: None,
        }
    }

    /// Resets response state, unmapping any prior mapping first (`unmap`
    /// must precede every re-`init`, per the §4.7 invariant).
    pub fn init(&mut self, src_dir: &str, path: &str, keep_alive: bool, code: i32) {
        self.unmap();
        self.code = code;
        self.keep_alive = keep_alive;
        self.path = path.to_string();
        self.src_dir = src_dir.to_string();
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn file(&self) -> &[u8] {
        self.mapping.as_ref().map(Mapping::as_slice).unwrap_or(&[])
    }

    pub fn file_len(&self) -> usize {
        self.mapping.as_ref().map(|m| m.len).unwrap_or(0)
    }

    pub fn unmap(&mut self) {
        self.mapping = None;
    }

    /// A request whose line never parsed carries no path at all; stat'ing
    /// `src_dir` itself (a directory) would otherwise stomp the caller's
    /// 400 with a 404, so an empty path skips straight to the error page
    /// rather than through the stat ladder.
    pub fn make_response(&mut self, buf: &mut Buffer) {
        if !self.path.is_empty() {
            let full_path = format!("{}{}", self.src_dir, self.path);
            match std::fs::metadata(&full_path) {
                Err(_) => self.code = 404,
                Ok(meta) if meta.is_dir() => self.code = 404,
                Ok(meta) => {
                    if meta.permissions().mode() & 0o004 == 0 {
                        self.code = 403;
                    } else if self.code == -1 {
                        self.code = 200;
                    }
                }
            }
        }

        if let Some(rewritten) = error_path(self.code) {
            self.path = rewritten.to_string();
        }

        self.add_state_line(buf);
        self.add_header(buf);
        self.add_content(buf);
    }

    fn add_state_line(&mut self, buf: &mut Buffer) {
        let status = match status_lookup(self.code) {
            Some(status) => status,
            None => {
                self.code = 400;
                status_lookup(400).unwrap()
            }
        };
        buf.append_str(&format!("HTTP/1.1 {} {}\r\n", self.code, status));
    }

    fn add_header(&self, buf: &mut Buffer) {
        buf.append_str("Connection: ");
        if self.keep_alive {
            buf.append_str("keep-alive\r\n");
            buf.append_str("keep-alive: max=6, timeout=60\r\n");
        } else {
            buf.append_str("close\r\n");
        }
        buf.append_str(&format!("Content-type: {}\r\n", mime_type(&self.path)));
    }

    fn add_content(&mut self, buf: &mut Buffer) {
        let full_path = format!("{}{}", self.src_dir, self.path);
        let file = match File::open(&full_path) {
            Ok(f) => f,
            Err(_) => {
                self.error_content(buf, "File NotFound!");
                return;
            }
        };
        let len = match file.metadata() {
            Ok(meta) => meta.len() as usize,
            Err(_) => {
                self.error_content(buf, "File NotFound!");
                return;
            }
        };

        debug!("response: mapping {full_path} ({len} bytes)");
        if len == 0 {
            self.mapping = Some(Mapping { ptr: std::ptr::null_mut(), len: 0 });
        } else {
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ,
                    libc::MAP_PRIVATE,
                    file.as_raw_fd(),
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                warn!("response: mmap failed for {full_path}: {}", std::io::Error::last_os_error());
                self.error_content(buf, "File NotFound!");
                return;
            }
            self.mapping = Some(Mapping { ptr: ptr as *mut u8, len });
        }
        buf.append_str(&format!("Content-length: {len}\r\n\r\n"));
    }

    pub fn error_content(&self, buf: &mut Buffer, message: &str) {
        let status = status_lookup(self.code).unwrap_or("Bad Request");
        let body = format!(
            "<html><title>Error</title><body bgcolor=\"ffffff\">{} : {}\n<p>{}</p><hr><em>reactor-httpd</em></body></html>",
            self.code, status, message
        );
        buf.append_str(&format!("Content-length: {}\r\n\r\n", body.len()));
        buf.append_str(&body);
    }
}

impl Default for HttpResponse {
    fn default() -> HttpResponse {
        HttpResponse::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn scratch_dir() -> String {
        let dir = std::env::temp_dir().join(format!("reactor-httpd-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.to_string_lossy().into_owned()
    }

    #[test]
    fn missing_file_yields_404_with_inline_body() {
        let src_dir = scratch_dir();
        let mut resp = HttpResponse::new();
        resp.init(&src_dir, "/does-not-exist.html", true, -1);
        let mut buf = Buffer::new();
        resp.make_response(&mut buf);
        assert_eq!(resp.code(), 404);
        let text = String::from_utf8_lossy(buf.peek()).into_owned();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn existing_world_readable_file_maps_and_reports_length() {
        let src_dir = scratch_dir();
        let file_path = format!("{src_dir}/hello.html");
        let mut f = std::fs::File::create(&file_path).unwrap();
        f.write_all(b"<html>hi</html>").unwrap();
        drop(f);
        std::fs::set_permissions(&file_path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let mut resp = HttpResponse::new();
        resp.init(&src_dir, "/hello.html", true, -1);
        let mut buf = Buffer::new();
        resp.make_response(&mut buf);
        assert_eq!(resp.code(), 200);
        assert_eq!(resp.file_len(), 15);
        assert_eq!(resp.file(), b"<html>hi</html>");
        let text = String::from_utf8_lossy(buf.peek()).into_owned();
        assert!(text.contains("Content-type: text/html"));
        assert!(text.contains("Content-length: 15"));
    }

    #[test]
    fn unmap_is_idempotent() {
        let mut resp = HttpResponse::new();
        resp.mapping = Some(Mapping { ptr: std::ptr::null_mut(), len: 0 });
        resp.unmap();
        resp.unmap();
        assert_eq!(resp.file_len(), 0);
    }

    #[test]
    fn unknown_code_is_coerced_to_400() {
        let src_dir = scratch_dir();
        let mut resp = HttpResponse::new();
        resp.init(&src_dir, "/missing.html", false, 999);
        let mut buf = Buffer::new();
        resp.add_state_line(&mut buf);
        assert_eq!(resp.code(), 400);
    }

    #[test]
    fn empty_path_keeps_caller_supplied_400_instead_of_stomping_to_404() {
        let src_dir = scratch_dir();
        let mut resp = HttpResponse::new();
        resp.init(&src_dir, "", false, 400);
        let mut buf = Buffer::new();
        resp.make_response(&mut buf);
        assert_eq!(resp.code(), 400);
    }
}
