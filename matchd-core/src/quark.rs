//! Quarks: the token and the live match object it names (spec.md §3, §4.6).
//!
//! A quark token has the shape `challenge-DDDD-UUUUUUUUUU.DD` — a random
//! four-digit salt, a ten-or-eleven-digit Unix-epoch timestamp, and a
//! two-digit sequence counter guarding against two accepts completing
//! within the same second. The token is minted once, at `accept` time,
//! and is otherwise an opaque key into `State`'s quark map.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use regex::Regex;

use crate::error::QuarkError;
use crate::session::{Session, Side};

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^challenge-[0-9]{4}-[0-9]{10,11}\.[0-9]{2}$").unwrap());

/// Guards the per-second sequence counter used to keep tokens unique when
/// two quarks are minted in the same wall-clock second.
static SEQUENCE: Mutex<(u64, u8)> = Mutex::new((0, 0));

pub fn is_well_formed(token: &str) -> bool {
    TOKEN_PATTERN.is_match(token)
}

/// Mint a fresh, guaranteed-unique quark token.
pub fn generate() -> String {
    let salt: u32 = rand::rng().random_range(0..10_000);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_secs();

    let seq = {
        let mut guard = SEQUENCE.lock().unwrap();
        if guard.0 == now {
            guard.1 = guard.1.wrapping_add(1) % 100;
        } else {
            *guard = (now, 0);
        }
        guard.1
    };

    format!("challenge-{salt:04}-{now}.{seq:02}")
}

pub fn validate(token: &str) -> Result<(), QuarkError> {
    if is_well_formed(token) {
        Ok(())
    } else {
        Err(QuarkError::MalformedToken(token.to_string()))
    }
}

/// A live match: the two lobby clients who accepted the challenge, the two
/// emulator connections that join later via `getpeer`, and whoever is
/// spectating it.
pub struct Quark {
    pub token: String,
    pub channel: String,
    pub p1_nick: String,
    pub p2_nick: String,
    /// Set when the challenger and target resolve to the same nickname —
    /// a supported edge case per the design notes, not a bug to reject.
    pub self_challenge: bool,
    pub p1_client: Option<Session>,
    pub p2_client: Option<Session>,
    pub p1_emulator: Option<Session>,
    pub p2_emulator: Option<Session>,
    pub spectators: HashSet<Session>,
    pub recorded: bool,
}

impl Quark {
    pub fn new(token: String, channel: String, p1_nick: String, p2_nick: String) -> Self {
        let self_challenge = p1_nick == p2_nick;
        Self {
            token,
            channel,
            p1_nick,
            p2_nick,
            self_challenge,
            p1_client: None,
            p2_client: None,
            p1_emulator: None,
            p2_emulator: None,
            spectators: HashSet::new(),
            recorded: false,
        }
    }

    pub fn side_for_nick(&self, nick: &str) -> Option<Side> {
        if nick == self.p1_nick {
            Some(Side::P1)
        } else if nick == self.p2_nick {
            Some(Side::P2)
        } else {
            None
        }
    }

    pub fn opponent_of<'a>(&'a self, nick: &str) -> Option<&'a str> {
        if nick == self.p1_nick {
            Some(&self.p2_nick)
        } else if nick == self.p2_nick {
            Some(&self.p1_nick)
        } else {
            None
        }
    }

    pub fn both_emulators_known(&self) -> bool {
        self.p1_emulator.is_some() && self.p2_emulator.is_some()
    }

    pub fn spectator_count(&self) -> u32 {
        self.spectators.len() as u32
    }

    /// Every session that should hear an in-match broadcast: both
    /// emulators and every spectator.
    pub fn participants(&self) -> Vec<Session> {
        let mut out: Vec<Session> = self.p1_emulator.iter().chain(self.p2_emulator.iter()).cloned().collect();
        out.extend(self.spectators.iter().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_well_formed() {
        let token = generate();
        assert!(is_well_formed(&token), "{token} should match the quark pattern");
    }

    #[test]
    fn consecutive_tokens_differ() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(validate("not-a-quark").is_err());
        assert!(validate("challenge-12-123.00").is_err());
        assert!(validate("challenge-1234-1234567890.00").is_ok());
    }

    #[test]
    fn side_and_opponent_lookup() {
        let q = Quark::new("challenge-0000-0000000000.00".into(), "#lobby".into(), "alice".into(), "bob".into());
        assert_eq!(q.side_for_nick("alice"), Some(Side::P1));
        assert_eq!(q.side_for_nick("bob"), Some(Side::P2));
        assert_eq!(q.side_for_nick("carol"), None);
        assert_eq!(q.opponent_of("alice"), Some("bob"));
        assert!(!q.self_challenge);
    }

    #[test]
    fn self_challenge_is_flagged() {
        let q = Quark::new("challenge-0000-0000000000.00".into(), "#lobby".into(), "alice".into(), "alice".into());
        assert!(q.self_challenge);
    }
}
