//! On-disk match archives (spec.md §4.7, §6 "on-disk artifacts").
//!
//! Three files per quark, named after its token: `-gamebuffer.fs` (the
//! single opening frame, written once), `-savestate.fs` (every savestate
//! push frame appended in arrival order), and `-nicknames.txt` (the two
//! players' nicks, one per line). All three hold exactly the bytes that
//! were pushed to spectators — no extra framing of our own — so replaying
//! them later is just "read the file and write its bytes back out",
//! chunked at a fixed size with no regard for frame boundaries, matching
//! how the original service paced a replay.
//!
//! File I/O here is plain synchronous `std::fs`, called directly from
//! handlers rather than off-loaded to a blocking-pool thread: these
//! writes are small (one frame, one line) and local-disk, and the
//! opcode handlers that trigger them are themselves synchronous
//! functions, not futures with a runtime thread to protect.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::RecorderError;

/// Savestate replay chunks are this many bytes, regardless of frame
/// boundaries inside the archive.
pub const REPLAY_CHUNK_SIZE: usize = 376;

pub struct Recorder {
    data_dir: PathBuf,
}

impl Recorder {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn quarks_dir(&self) -> PathBuf {
        self.data_dir.join("quarks")
    }

    fn gamebuffer_path(&self, token: &str) -> PathBuf {
        self.quarks_dir().join(format!("quark-{token}-gamebuffer.fs"))
    }

    fn savestate_path(&self, token: &str) -> PathBuf {
        self.quarks_dir().join(format!("quark-{token}-savestate.fs"))
    }

    fn nicknames_path(&self, token: &str) -> PathBuf {
        self.quarks_dir().join(format!("quark-{token}-nicknames.txt"))
    }

    pub fn gamebuffer_exists(&self, token: &str) -> bool {
        self.gamebuffer_path(token).is_file()
    }

    pub fn nicknames_exist(&self, token: &str) -> bool {
        self.nicknames_path(token).is_file()
    }

    /// Writes the opening gamebuffer frame once; later calls for the same
    /// token are no-ops (callers gate on `Quark::recorded` to avoid even
    /// reaching here twice, this is just a second line of defense).
    pub fn write_gamebuffer(&self, token: &str, frame: &[u8]) -> Result<(), RecorderError> {
        let path = self.gamebuffer_path(token);
        if path.is_file() {
            return Ok(());
        }
        std::fs::create_dir_all(self.quarks_dir())?;
        std::fs::write(path, frame)?;
        Ok(())
    }

    pub fn write_nicknames(&self, token: &str, p1_nick: &str, p2_nick: &str) -> Result<(), RecorderError> {
        std::fs::create_dir_all(self.quarks_dir())?;
        let mut file = std::fs::File::create(self.nicknames_path(token))?;
        writeln!(file, "{p1_nick}")?;
        writeln!(file, "{p2_nick}")?;
        Ok(())
    }

    pub fn append_savestate(&self, token: &str, frame: &[u8]) -> Result<(), RecorderError> {
        std::fs::create_dir_all(self.quarks_dir())?;
        let mut file = OpenOptions::new().create(true).append(true).open(self.savestate_path(token))?;
        file.write_all(frame)?;
        Ok(())
    }

    pub fn read_gamebuffer(&self, token: &str) -> Result<Vec<u8>, RecorderError> {
        Ok(std::fs::read(self.gamebuffer_path(token))?)
    }

    pub fn read_savestate(&self, token: &str) -> Result<Vec<u8>, RecorderError> {
        match std::fs::read(self.savestate_path(token)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the two recorded nicknames back, in `(p1, p2)` order.
    pub fn read_nicknames(&self, token: &str) -> Result<(String, String), RecorderError> {
        let raw = std::fs::read_to_string(self.nicknames_path(token))?;
        let mut lines = raw.lines();
        let p1 = lines.next().unwrap_or_default().to_string();
        let p2 = lines.next().unwrap_or_default().to_string();
        Ok((p1, p2))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Pacing delays the replay driver sleeps between stages: a synthetic
/// getnicks reply, then the gamebuffer frame, then each savestate chunk.
pub mod replay_delay {
    use std::time::Duration;

    pub const BEFORE_GETNICKS_REPLY: Duration = Duration::from_secs(2);
    pub const BEFORE_GAMEBUFFER: Duration = Duration::from_secs(1);
    pub const BETWEEN_SAVESTATE_CHUNKS: Duration = Duration::from_millis(900);
}
