//! Per-connection session state: the role tag, identity, and outbound FIFO
//! described in spec.md §3 and the design notes in §9.
//!
//! A [`Session`] is shared: the connection's own reader/writer tasks hold
//! one handle, and other sessions' handlers hold clones so they can mutate
//! fields (e.g. `accept` sets `opponent`/`status` on both sides) or enqueue
//! a push. All mutable state lives behind a short-lived `std::sync::Mutex`
//! lock — never held across an `.await` — per the "no I/O while the lock
//! is held" rule.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;

/// The three roles a connection can settle into (plus `Unauth` before it
/// sends its first recognized opcode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unauth,
    Client,
    Player,
    Spectator,
}

/// Lobby presence status. `Playing` is only set while paired in a quark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Available = 0,
    Away = 1,
    Playing = 2,
}

impl Status {
    pub fn from_wire(v: u32) -> Option<Self> {
        match v {
            0 => Some(Status::Available),
            1 => Some(Status::Away),
            2 => Some(Status::Playing),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }
}

/// A session's role within a quark. `SpecPre`/`SpecPost` track whether a
/// spectator has received the recorded opening gamebuffer frame yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    SpecPre = 0,
    P1 = 1,
    P2 = 2,
    SpecPost = 3,
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Mutable session fields, always accessed through `Session::lock`.
pub struct SessionState {
    pub nickname: Option<String>,
    pub role: Role,
    pub status: Status,
    pub previous_status: Option<Status>,
    pub opponent: Option<String>,
    pub current_channel: Option<String>,
    pub current_quark: Option<String>,
    pub emulator_port: u32,
    pub side: Side,
    pub city: String,
    pub country: String,
    pub country_code: String,
    pub last_chat: Option<Instant>,
    /// Challenged-host → challenged nick, for challenges this session has
    /// issued and not yet had accepted/declined/cancelled.
    pub challenging: HashMap<SocketAddr, String>,
    pub closed: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            nickname: None,
            role: Role::Unauth,
            status: Status::Available,
            previous_status: None,
            opponent: None,
            current_channel: None,
            current_quark: None,
            emulator_port: 0,
            side: Side::SpecPre,
            city: String::new(),
            country: String::new(),
            country_code: String::new(),
            last_chat: None,
            challenging: HashMap::new(),
            closed: false,
        }
    }
}

struct SessionInner {
    id: u64,
    remote_addr: SocketAddr,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    state: Mutex<SessionState>,
}

/// A cheaply-cloneable handle to a connection's shared state. Equality and
/// hashing are by connection identity, not by field contents, so a
/// `Session` can live in `HashSet`s (channel membership) and map values.
#[derive(Clone)]
pub struct Session(Arc<SessionInner>);

impl Session {
    pub fn new(remote_addr: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session(Arc::new(SessionInner {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            remote_addr,
            outbound_tx: tx,
            state: Mutex::new(SessionState::default()),
        }));
        (session, rx)
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.0.remote_addr
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.0.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue already-framed bytes on this session's outbound FIFO. The
    /// only way any handler — including one acting on behalf of another
    /// session — ever gets bytes to a socket.
    pub fn send(&self, frame: Vec<u8>) {
        let _ = self.0.outbound_tx.send(frame);
    }

    pub fn nickname(&self) -> Option<String> {
        self.lock().nickname.clone()
    }

    /// A short identifier for log lines, mirroring the teacher's
    /// `tracing::debug!(port = ..)` style structured fields.
    pub fn ident(&self) -> String {
        let nick = self.nickname().unwrap_or_else(|| "*".to_string());
        format!("{}@{}", nick, self.remote_addr())
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl Eq for Session {}

impl Hash for Session {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.0.id).field("addr", &self.0.remote_addr).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_are_distinct_even_with_identical_state() {
        let (a, _rx_a) = Session::new("127.0.0.1:1".parse().unwrap());
        let (b, _rx_b) = Session::new("127.0.0.1:1".parse().unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn send_reaches_the_receiver() {
        let (s, mut rx) = Session::new("127.0.0.1:1".parse().unwrap());
        s.send(vec![1, 2, 3]);
        assert_eq!(rx.try_recv().unwrap(), vec![1, 2, 3]);
    }
}
