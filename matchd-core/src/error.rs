//! Typed errors for the core library's subsystems.
//!
//! `main` deals in `anyhow::Result`; everything below that boundary uses
//! these so callers can match on the specific failure where it matters
//! (e.g. deciding whether to NACK-and-continue vs. close the socket).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame too short to contain a sequence number")]
    FrameTooShort,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u32),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown user")]
    UnknownUser,
    #[error("incorrect password")]
    WrongPassword,
    #[error("user store unavailable: {0}")]
    Store(String),
}

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("target is not available for a challenge")]
    TargetUnavailable,
    #[error("no matching outstanding challenge")]
    NoSuchChallenge,
}

#[derive(Debug, Error)]
pub enum QuarkError {
    #[error("quark {0:?} is already full")]
    Full(String),
    #[error("quark {0:?} does not exist")]
    NotFound(String),
    #[error("quark token {0:?} is not well-formed")]
    MalformedToken(String),
}

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("archive for quark {0:?} is incomplete")]
    IncompleteArchive(String),
}
