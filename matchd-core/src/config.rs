//! Server configuration (`~/.config/matchd/matchd.toml`).
//!
//! Loaded once at startup and handed around as a plain `Arc<ServerConfig>`;
//! nothing here changes at runtime. CLI flags (in the `matchd` binary)
//! override whatever a config file sets.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Platform-specific configuration directory, following the same
/// `directories::ProjectDirs` convention the rest of this stack uses.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("net", "nethercore", "matchd")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("net", "nethercore", "matchd")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_tcp_bind")]
    pub tcp_bind: String,
    #[serde(default = "default_udp_bind")]
    pub udp_bind: String,
    #[serde(default = "default_motd")]
    pub motd: Vec<String>,
    /// Directory recordings (savestate/gamebuffer archives, nickname logs)
    /// are written under; defaults to the platform data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// TOML user file consumed by `FileAuthenticator`; defaults to
    /// `users.toml` inside the config directory.
    #[serde(default)]
    pub user_file: Option<PathBuf>,
    #[serde(default = "default_get_peer_timeout_secs")]
    pub get_peer_timeout_secs: u64,
    #[serde(default = "default_get_nicks_timeout_secs")]
    pub get_nicks_timeout_secs: u64,
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    /// When set, `getpeer` tells emulators to route through a local UDP
    /// proxy coordinating with the rendezvous service (loopback + a
    /// well-known port) instead of connecting to the peer directly.
    #[serde(default)]
    pub udp_holepunch: bool,
}

fn default_tcp_bind() -> String {
    "0.0.0.0:6000".to_string()
}
fn default_udp_bind() -> String {
    "0.0.0.0:6001".to_string()
}
fn default_motd() -> Vec<String> {
    vec!["Welcome to matchd.".to_string()]
}
fn default_get_peer_timeout_secs() -> u64 {
    50
}
fn default_get_nicks_timeout_secs() -> u64 {
    30
}
fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/matchd.pid")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_bind: default_tcp_bind(),
            udp_bind: default_udp_bind(),
            motd: default_motd(),
            data_dir: None,
            user_file: None,
            get_peer_timeout_secs: default_get_peer_timeout_secs(),
            get_nicks_timeout_secs: default_get_nicks_timeout_secs(),
            pid_file: default_pid_file(),
            udp_holepunch: false,
        }
    }
}

impl ServerConfig {
    pub fn get_peer_timeout(&self) -> Duration {
        Duration::from_secs(self.get_peer_timeout_secs)
    }

    pub fn get_nicks_timeout(&self) -> Duration {
        Duration::from_secs(self.get_nicks_timeout_secs)
    }

    pub fn udp_holepunch_enabled(&self) -> bool {
        self.udp_holepunch
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().or_else(data_dir).unwrap_or_else(|| PathBuf::from("./matchd-data"))
    }

    pub fn resolved_user_file(&self) -> PathBuf {
        self.user_file
            .clone()
            .or_else(|| config_dir().map(|d| d.join("users.toml")))
            .unwrap_or_else(|| PathBuf::from("./users.toml"))
    }

    /// Loads `path`, falling back to defaults if it doesn't exist yet —
    /// a fresh install shouldn't have to hand-author a config file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(anyhow::anyhow!("reading config {}: {e}", path.display())),
        }
    }

    pub fn default_config_path() -> PathBuf {
        config_dir()
            .map(|d| d.join("matchd.toml"))
            .unwrap_or_else(|| PathBuf::from("./matchd.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.tcp_bind, "0.0.0.0:6000");
        assert_eq!(cfg.get_peer_timeout(), Duration::from_secs(50));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = ServerConfig::load(std::path::Path::new("/nonexistent/matchd.toml")).unwrap();
        assert_eq!(cfg.tcp_bind, default_tcp_bind());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matchd.toml");
        std::fs::write(&path, "tcp_bind = \"127.0.0.1:7000\"\n").unwrap();
        let cfg = ServerConfig::load(&path).unwrap();
        assert_eq!(cfg.tcp_bind, "127.0.0.1:7000");
        assert_eq!(cfg.udp_bind, default_udp_bind());
    }
}
