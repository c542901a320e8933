//! Login credentials for schools created by an upload.

use crate::db::now_rfc3339;
use crate::reconcile::normalize::name_key;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const USERNAME_MAX: usize = 32;

/// Plaintext credentials, handed back exactly once.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchoolLogin {
    pub school_id: String,
    pub school_name: String,
    pub username: String,
    pub password: String,
}

pub trait CredentialProvisioner {
    fn provision(
        &self,
        conn: &Connection,
        school_id: &str,
        school_name: &str,
    ) -> anyhow::Result<SchoolLogin>;
}

/// Username from the school name, random password, salted SHA-256 at rest.
pub struct HashedLoginProvisioner;

pub fn username_base(school_name: &str) -> String {
    let mut out = String::new();
    let mut pending_sep = false;
    for c in name_key(school_name).chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('.');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
        if out.len() >= USERNAME_MAX {
            break;
        }
    }
    if out.is_empty() {
        "school".to_string()
    } else {
        out
    }
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("sha256${}${:x}", salt, hasher.finalize())
}

pub fn verify_password(stored: &str, password: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("sha256"), Some(salt), Some(_)) => hash_password(salt, password) == stored,
        _ => false,
    }
}

/// School id for a username/password pair that matches a stored login.
pub fn check_login(
    conn: &Connection,
    username: &str,
    password: &str,
) -> rusqlite::Result<Option<String>> {
    let stored: Option<(String, String)> = conn
        .query_row(
            "SELECT school_id, password_hash FROM school_logins WHERE username = ?",
            [username.trim()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    Ok(stored
        .filter(|(_, hash)| verify_password(hash, password))
        .map(|(school_id, _)| school_id))
}

fn random_password() -> String {
    Uuid::new_v4().simple().to_string()
}

fn username_taken(conn: &Connection, username: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM school_logins WHERE username = ?",
            [username],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

impl CredentialProvisioner for HashedLoginProvisioner {
    fn provision(
        &self,
        conn: &Connection,
        school_id: &str,
        school_name: &str,
    ) -> anyhow::Result<SchoolLogin> {
        let base = username_base(school_name);
        let mut username = base.clone();
        let mut n = 1;
        while username_taken(conn, &username)? {
            n += 1;
            username = format!("{}{}", base, n);
        }

        let password = random_password();
        let salt = Uuid::new_v4().simple().to_string();
        conn.execute(
            "INSERT INTO school_logins(school_id, username, password_hash, created_at) VALUES(?, ?, ?, ?)",
            (school_id, &username, hash_password(&salt, &password), now_rfc3339()),
        )?;

        Ok(SchoolLogin {
            school_id: school_id.to_string(),
            school_name: school_name.to_string(),
            username,
            password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_ascii_slugs() {
        assert_eq!(username_base("Al Noor Primary"), "al.noor.primary");
        assert_eq!(username_base("  École  St-Marc "), "ecole.st.marc");
        assert_eq!(username_base("مدرسة النور"), "school");
        assert!(username_base(&"x".repeat(80)).len() <= USERNAME_MAX);
    }

    #[test]
    fn hashes_are_salted_and_verifiable() {
        let a = hash_password("salt1", "secret");
        let b = hash_password("salt2", "secret");
        assert_ne!(a, b);
        assert!(a.starts_with("sha256$salt1$"));
        assert!(verify_password(&a, "secret"));
        assert!(!verify_password(&a, "Secret"));
        assert!(!verify_password("plain", "plain"));
    }

    #[test]
    fn provisioning_avoids_username_collisions() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE school_logins(
               school_id TEXT PRIMARY KEY,
               username TEXT NOT NULL UNIQUE,
               password_hash TEXT NOT NULL,
               created_at TEXT NOT NULL
             );",
        )
        .expect("schema");
        let p = HashedLoginProvisioner;
        let a = p.provision(&conn, "s1", "Hope Academy").expect("first");
        let b = p.provision(&conn, "s2", "hope academy").expect("second");
        assert_eq!(a.username, "hope.academy");
        assert_eq!(b.username, "hope.academy2");
        assert_eq!(a.password.len(), 32);
        assert!(a.password.chars().all(|c| c.is_ascii_hexdigit()));

        let stored: String = conn
            .query_row(
                "SELECT password_hash FROM school_logins WHERE school_id = 's1'",
                [],
                |r| r.get(0),
            )
            .expect("row");
        assert!(verify_password(&stored, &a.password));
        assert!(!stored.contains(&a.password));
    }
}
