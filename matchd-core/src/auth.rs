//! Password authentication (spec.md §4.3, §9 open question: "user
//! database").
//!
//! `auth(nick, password, port)` never puts a password on the wire in the
//! clear to anyone but the server it's authenticating to: the server
//! holds a per-user salt and a stored digest, and verifies by recomputing
//! `HMAC-SHA512(key="GGPO-NG", msg=password||salt)` and comparing hex
//! strings. Exactly where the salt/digest pairs live is left to an
//! [`Authenticator`] implementation — [`FileAuthenticator`] is the one
//! shipped here, backed by a TOML user file, since no database crate is
//! part of this stack.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha512;

use crate::error::AuthError;

type HmacSha512 = Hmac<Sha512>;

const HMAC_KEY: &[u8] = b"GGPO-NG";

/// Hex-encode `HMAC-SHA512(HMAC_KEY, password || salt)`.
pub fn digest(password: &str, salt: &str) -> String {
    let mut mac = HmacSha512::new_from_slice(HMAC_KEY).expect("HMAC accepts keys of any length");
    mac.update(password.as_bytes());
    mac.update(salt.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub trait Authenticator: Send + Sync {
    /// Check a claimed nickname's plaintext password against whatever
    /// digest the store has on file for it.
    fn verify(&self, nick: &str, password: &str) -> Result<(), AuthError>;
}

#[derive(Debug, Clone, Deserialize)]
struct UserRecord {
    salt: String,
    digest: String,
}

#[derive(Debug, Deserialize)]
struct UserFile {
    #[serde(default)]
    users: HashMap<String, UserRecord>,
}

/// Looks nicknames up in a `[users.<nick>]` TOML table with `salt` and
/// `digest` fields.
pub struct FileAuthenticator {
    users: HashMap<String, UserRecord>,
}

impl FileAuthenticator {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading user file {}: {e}", path.display()))?;
        let parsed: UserFile = toml::from_str(&raw)?;
        Ok(Self { users: parsed.users })
    }

    pub fn empty() -> Self {
        Self { users: HashMap::new() }
    }

    pub fn path_default(config_dir: &Path) -> PathBuf {
        config_dir.join("users.toml")
    }
}

impl Authenticator for FileAuthenticator {
    fn verify(&self, nick: &str, password: &str) -> Result<(), AuthError> {
        let record = self.users.get(nick).ok_or(AuthError::UnknownUser)?;
        let expected = digest(password, &record.salt);
        if expected.eq_ignore_ascii_case(&record.digest) {
            Ok(())
        } else {
            Err(AuthError::WrongPassword)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_and_hex() {
        let a = digest("hunter2", "s1");
        let b = digest("hunter2", "s1");
        assert_eq!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.len(), 128);
    }

    #[test]
    fn different_salts_digest_differently() {
        assert_ne!(digest("hunter2", "s1"), digest("hunter2", "s2"));
    }

    #[test]
    fn file_authenticator_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.toml");
        let pass_digest = digest("pw", "s1");
        std::fs::write(
            &path,
            format!("[users.alice]\nsalt = \"s1\"\ndigest = \"{pass_digest}\"\n"),
        )
        .unwrap();

        let auth = FileAuthenticator::load(&path).unwrap();
        assert!(auth.verify("alice", "pw").is_ok());
        assert!(matches!(auth.verify("alice", "wrong"), Err(AuthError::WrongPassword)));
        assert!(matches!(auth.verify("bob", "pw"), Err(AuthError::UnknownUser)));
    }
}
