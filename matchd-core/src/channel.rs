//! The fixed channel catalog (spec.md §4). Channels are not created or
//! destroyed at runtime; they exist for the life of the process and hold
//! whichever authenticated sessions have `join`ed them.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::session::Session;

/// One named room. Membership is the only mutable state; `rom_id`,
/// `topic`, and `welcome` are fixed at startup along with `name`.
pub struct Channel {
    pub name: &'static str,
    pub rom_id: &'static str,
    pub topic: &'static str,
    pub welcome: &'static str,
    members: Mutex<HashSet<Session>>,
}

impl Channel {
    fn new(name: &'static str, rom_id: &'static str, topic: &'static str, welcome: &'static str) -> Self {
        Self {
            name,
            rom_id,
            topic,
            welcome,
            members: Mutex::new(HashSet::new()),
        }
    }

    pub fn join(&self, session: &Session) {
        self.members.lock().unwrap().insert(session.clone());
    }

    pub fn part(&self, session: &Session) {
        self.members.lock().unwrap().remove(session);
    }

    pub fn members(&self) -> Vec<Session> {
        self.members.lock().unwrap().iter().cloned().collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().unwrap().len()
    }
}

/// The server's fixed set of rooms, one per supported game plus a general
/// lobby. Matches the channel list the original service advertised to
/// `list`; the roster itself is static, not read from configuration.
/// `(name, rom_id, topic)` — `rom_id` is the arcade ROM name the channel
/// is dedicated to netplay for (empty for the general lobby).
pub const CHANNEL_NAMES: &[(&str, &str, &str)] = &[
    ("#lobby", "", "general discussion and matchmaking"),
    ("#sf2ce", "sf2ce", "Street Fighter II: Champion Edition"),
    ("#ssf2t", "ssf2t", "Super Street Fighter II Turbo"),
    ("#xmvsf", "xmvsf", "X-Men vs. Street Fighter"),
    ("#mshvsf", "mshvsf", "Marvel Super Heroes vs. Street Fighter"),
    ("#mvc", "mvsc", "Marvel vs. Capcom"),
    ("#kof98", "kof98", "The King of Fighters '98"),
    ("#kof2002", "kof2002", "The King of Fighters 2002"),
    ("#garou", "garou", "Garou: Mark of the Wolves"),
    ("#3s", "sfiii3nr1", "Street Fighter III: 3rd Strike"),
];

/// The static welcome text every channel starts with, carried over
/// verbatim from the original service's default.
pub const DEFAULT_WELCOME: &str =
    "Welcome to the unofficial GGPO-NG server.\nThis is still very beta, some things might not work as expected.\n";

pub struct ChannelCatalog {
    channels: Vec<Channel>,
}

impl ChannelCatalog {
    pub fn new() -> Self {
        Self {
            channels: CHANNEL_NAMES
                .iter()
                .map(|(name, rom_id, topic)| Channel::new(name, rom_id, topic, DEFAULT_WELCOME))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn all(&self) -> &[Channel] {
        &self.channels
    }
}

impl Default for ChannelCatalog {
    fn default() -> Self {
        Self::new()
    }
}
