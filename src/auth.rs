//! User verification against the `user(username, password)` table,
//! grounded on `HttpRequest::UserVerify` in
//! `original_source/src/http/httprequest.cpp`.
//!
//! The source concatenates `name`/`pwd` directly into SQL strings
//! (`"SELECT ... WHERE username= '" + name + "'"`), which is a SQL
//! injection vector. This fixes that with parameterized queries per the
//! documented recommendation rather than carrying the vulnerability
//! forward faithfully.

use log::{debug, warn};
use mysql::prelude::Queryable;
use mysql::params;

use crate::pool::{SqlGuard, SqlPool};

/// Verifies a login, or registers a new row, depending on `is_login`.
/// Returns `false` on empty credentials, a missing/unreachable database
/// handle, or any query error — auth failures never panic the caller.
pub fn verify_user(pool: &SqlPool, name: &str, pwd: &str, is_login: bool) -> bool {
    if name.is_empty() || pwd.is_empty() {
        return false;
    }

    let mut guard = SqlGuard::acquire(pool);
    let conn = match guard.conn_mut() {
        Some(conn) => conn,
        None => {
            warn!("auth: no database handle available");
            return false;
        }
    };

    let existing: Result<Option<String>, mysql::Error> = conn.exec_first(
        "SELECT password FROM user WHERE username = :name",
        params! { "name" => name },
    );

    match existing {
        Ok(Some(stored_password)) => {
            if is_login {
                stored_password == pwd
            } else {
                debug!("auth: username {name} already registered");
                false
            }
        }
        Ok(None) => {
            if is_login {
                debug!("auth: no such user {name}");
                false
            } else {
                let inserted = conn.exec_drop(
                    "INSERT INTO user(username, password) VALUES (:name, :pwd)",
                    params! { "name" => name, "pwd" => pwd },
                );
                if let Err(e) = inserted {
                    warn!("auth: registration insert failed: {e}");
                }
                true
            }
        }
        Err(e) => {
            warn!("auth: query failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn empty_credentials_are_rejected_without_touching_the_pool() {
        let pool = unreachable_pool();
        assert!(!verify_user(&pool, "", "pwd", true));
        assert!(!verify_user(&pool, "user", "", true));
    }

    #[test]
    fn missing_handle_fails_closed() {
        let pool = unreachable_pool();
        assert!(!verify_user(&pool, "user", "pwd", true));
    }
}
