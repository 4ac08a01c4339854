//! Global, shared, in-memory server state (spec.md §3–§5).
//!
//! Every map here is a short-lived `std::sync::Mutex` around plain
//! collections. Handlers take the lock, read or mutate, and drop it before
//! doing any `.await` — the one invariant that keeps this safe without a
//! dedicated actor per map.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use crate::channel::ChannelCatalog;
use crate::error::QuarkError;
use crate::quark::Quark;
use crate::session::Session;

/// Everything shared across connections. One instance lives for the life
/// of the process, held in an `Arc` by every connection task.
pub struct State {
    pub channels: ChannelCatalog,
    clients_by_nick: Mutex<HashMap<String, Session>>,
    /// Every socket that has completed the `connect` handshake, keyed by
    /// remote address — lobby clients *and* emulator/spectator sockets,
    /// since the latter never authenticate by nickname and are only ever
    /// addressable by where they connected from.
    connections_by_addr: Mutex<HashMap<SocketAddr, Session>>,
    quarks: Mutex<HashMap<String, Quark>>,
    motd_lines: Mutex<Vec<String>>,
}

impl State {
    pub fn new(motd_lines: Vec<String>) -> Self {
        Self {
            channels: ChannelCatalog::new(),
            clients_by_nick: Mutex::new(HashMap::new()),
            connections_by_addr: Mutex::new(HashMap::new()),
            quarks: Mutex::new(HashMap::new()),
            motd_lines: Mutex::new(motd_lines),
        }
    }

    // -- connections ------------------------------------------------------

    pub fn register_connection(&self, session: Session) {
        self.connections_by_addr
            .lock()
            .unwrap()
            .insert(session.remote_addr(), session);
    }

    pub fn remove_connection(&self, addr: SocketAddr) {
        self.connections_by_addr.lock().unwrap().remove(&addr);
    }

    pub fn connection_by_addr(&self, addr: SocketAddr) -> Option<Session> {
        self.connections_by_addr.lock().unwrap().get(&addr).cloned()
    }

    // -- authenticated clients, by nickname -------------------------------

    /// Claims `nick` for `session`, also popping it from the raw
    /// connections map since it is now addressable by name. Fails if the
    /// nickname is already taken by a different, still-live session.
    pub fn register_nick(&self, nick: &str, session: Session) -> Result<(), Session> {
        let mut clients = self.clients_by_nick.lock().unwrap();
        if let Some(existing) = clients.get(nick) {
            if existing.id() != session.id() {
                return Err(existing.clone());
            }
        }
        clients.insert(nick.to_string(), session.clone());
        drop(clients);
        self.connections_by_addr.lock().unwrap().remove(&session.remote_addr());
        Ok(())
    }

    pub fn unregister_nick(&self, nick: &str) {
        self.clients_by_nick.lock().unwrap().remove(nick);
    }

    pub fn client_by_nick(&self, nick: &str) -> Option<Session> {
        self.clients_by_nick.lock().unwrap().get(nick).cloned()
    }

    pub fn nick_taken(&self, nick: &str) -> bool {
        self.clients_by_nick.lock().unwrap().contains_key(nick)
    }

    pub fn all_nicks(&self) -> Vec<String> {
        self.clients_by_nick.lock().unwrap().keys().cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients_by_nick.lock().unwrap().len()
    }

    // -- quarks ------------------------------------------------------------

    pub fn create_quark(&self, channel: String, p1_nick: String, p2_nick: String) -> String {
        let token = crate::quark::generate();
        let quark = Quark::new(token.clone(), channel, p1_nick, p2_nick);
        self.quarks.lock().unwrap().insert(token.clone(), quark);
        token
    }

    pub fn with_quark<R>(&self, token: &str, f: impl FnOnce(&mut Quark) -> R) -> Result<R, QuarkError> {
        let mut quarks = self.quarks.lock().unwrap();
        let quark = quarks.get_mut(token).ok_or_else(|| QuarkError::NotFound(token.to_string()))?;
        Ok(f(quark))
    }

    pub fn destroy_quark(&self, token: &str) -> Option<Quark> {
        self.quarks.lock().unwrap().remove(token)
    }

    pub fn quark_count(&self) -> usize {
        self.quarks.lock().unwrap().len()
    }

    // -- message of the day -------------------------------------------------

    /// Composes the full motd body for `channel_name`: that channel's own
    /// welcome text, any operator-configured extra lines, and a live
    /// suffix (server version, connected client count, ongoing match
    /// count) — mirrors the original server's per-channel `dynamic_motd`.
    /// Returns `None` if the channel doesn't exist.
    pub fn dynamic_motd(&self, channel_name: &str) -> Option<String> {
        let channel = self.channels.get(channel_name)?;
        let mut motd = channel.welcome.to_string();

        for line in self.motd_lines.lock().unwrap().iter() {
            motd.push_str(line);
            motd.push('\n');
        }

        motd.push_str(&format!("-!- matchd server version {}\n", env!("CARGO_PKG_VERSION")));

        let clients = self.client_count();
        if clients <= 1 {
            motd.push_str("-!- You are the only client connected to the server.\n");
        } else {
            motd.push_str(&format!("-!- There are {clients} clients connected to the server.\n"));
        }

        match self.quark_count() {
            0 => motd.push_str("-!- At the moment no one is playing.\n"),
            1 => motd.push_str("-!- There is only one ongoing game.\n"),
            n => motd.push_str(&format!("-!- There are {n} ongoing games.\n")),
        }

        Some(motd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn registering_a_nick_removes_the_raw_connection_entry() {
        let state = State::new(vec!["welcome".to_string()]);
        let (s, _rx) = Session::new(addr(1));
        state.register_connection(s.clone());
        assert!(state.connection_by_addr(addr(1)).is_some());

        state.register_nick("alice", s).unwrap();
        assert!(state.connection_by_addr(addr(1)).is_none());
        assert!(state.client_by_nick("alice").is_some());
    }

    #[test]
    fn duplicate_nick_is_rejected() {
        let state = State::new(vec![]);
        let (s1, _rx1) = Session::new(addr(1));
        let (s2, _rx2) = Session::new(addr(2));
        state.register_nick("alice", s1).unwrap();
        assert!(state.register_nick("alice", s2).is_err());
    }

    #[test]
    fn quark_lifecycle() {
        let state = State::new(vec![]);
        let token = state.create_quark("#lobby".into(), "alice".into(), "bob".into());
        assert_eq!(state.quark_count(), 1);
        state.with_quark(&token, |q| q.recorded = true).unwrap();
        assert!(state.destroy_quark(&token).unwrap().recorded);
        assert_eq!(state.quark_count(), 0);
    }

    #[test]
    fn dynamic_motd_includes_channel_welcome_and_live_counters() {
        let state = State::new(vec!["hello".to_string()]);
        let motd = state.dynamic_motd("#lobby").unwrap();
        assert!(motd.contains("Welcome to the unofficial GGPO-NG server"));
        assert!(motd.contains("hello"));
        assert!(motd.contains("only client connected"));
        assert!(motd.contains("no one is playing"));
    }

    #[test]
    fn dynamic_motd_on_unknown_channel_is_none() {
        let state = State::new(vec![]);
        assert!(state.dynamic_motd("#nope").is_none());
    }
}
