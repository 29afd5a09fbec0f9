//! Domain errors that sit above the syscall boundary.
//!
//! Everything that corresponds to an OS errno keeps propagating as
//! `std::io::Error` the way the reactor layer does; this enum only covers
//! failures that are specific to the engine's own protocol and resource
//! handling. Parse failures, missing/forbidden files, mmap failures, and
//! SQL errors are all recovered locally into an HTTP status code or a
//! `bool` right where they happen (`HttpResponse::make_response`,
//! `auth::verify_user`) rather than surfaced through this type, so it only
//! carries what actually gets constructed: fatal setup failures in
//! `Server::new`.

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
