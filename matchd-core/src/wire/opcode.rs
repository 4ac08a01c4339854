//! Client request opcodes, server push codes, and NACK codes (spec.md §6).

use std::convert::TryFrom;

use crate::error::WireError;

/// Client → server request opcode, decoded from a request payload's first
/// four bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Connect = 0x00,
    Auth = 0x01,
    Motd = 0x02,
    List = 0x03,
    Users = 0x04,
    Join = 0x05,
    Status = 0x06,
    Privmsg = 0x07,
    Challenge = 0x08,
    Accept = 0x09,
    Decline = 0x0A,
    GetPeer = 0x0B,
    GetNicks = 0x0C,
    FbaPrivmsg = 0x0F,
    Watch = 0x10,
    SaveState = 0x11,
    GameBuffer = 0x12,
    Spectator = 0x14,
    Cancel = 0x1C,
}

impl Opcode {
    /// `connect`/`auth` and the emulator-side opcodes are legal before a
    /// connection ever authenticates (spec.md §9 open question): emulators
    /// connect on their own socket and are identified by quark + source IP,
    /// never by nickname.
    pub fn requires_auth(self) -> bool {
        !matches!(
            self,
            Opcode::Connect
                | Opcode::Auth
                | Opcode::GetPeer
                | Opcode::GetNicks
                | Opcode::SaveState
                | Opcode::GameBuffer
                | Opcode::Spectator
                | Opcode::FbaPrivmsg
        )
    }
}

impl TryFrom<u32> for Opcode {
    type Error = WireError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        Ok(match v {
            0x00 => Opcode::Connect,
            0x01 => Opcode::Auth,
            0x02 => Opcode::Motd,
            0x03 => Opcode::List,
            0x04 => Opcode::Users,
            0x05 => Opcode::Join,
            0x06 => Opcode::Status,
            0x07 => Opcode::Privmsg,
            0x08 => Opcode::Challenge,
            0x09 => Opcode::Accept,
            0x0A => Opcode::Decline,
            0x0B => Opcode::GetPeer,
            0x0C => Opcode::GetNicks,
            0x0F => Opcode::FbaPrivmsg,
            0x10 => Opcode::Watch,
            0x11 => Opcode::SaveState,
            0x12 => Opcode::GameBuffer,
            0x14 => Opcode::Spectator,
            0x1C => Opcode::Cancel,
            _ => return Err(WireError::UnknownOpcode(v)),
        })
    }
}

/// Server push sequence numbers, all `>= 0x8000_0000`.
pub mod push {
    pub const ESTABLISHED: u32 = 0xFFFF_FFFF;
    pub const CHAT: u32 = 0xFFFF_FFFE;
    pub const PRESENCE: u32 = 0xFFFF_FFFD;
    pub const CHALLENGE_NOTICE: u32 = 0xFFFF_FFFC;
    pub const DECLINE_NOTICE: u32 = 0xFFFF_FFFB;
    pub const QUARK_URI: u32 = 0xFFFF_FFFA;
    pub const PEER_ADDR: u32 = 0xFFFF_FFF9;
    pub const EMU_CHAT: u32 = 0xFFFF_FFF8;
    pub const SPECTATOR_COUNT: u32 = 0xFFFF_FFF6;
    pub const AUTO_SPECTATE: u32 = 0xFFFF_FFF5;
    pub const GAMEBUFFER: u32 = 0xFFFF_FFF4;
    pub const SAVESTATE: u32 = 0xFFFF_FFF3;
    pub const CANCEL_NOTICE: u32 = 0xFFFF_FFEF;
}

/// NACK error codes.
pub mod nack {
    pub const AUTH_FAILED: u32 = 0x06;
    pub const UNKNOWN_OP: u32 = 0x08;
    pub const CHALLENGE_REFUSED: u32 = 0x0A;
    pub const WATCH_REFUSED: u32 = 0x0B;
    pub const ACCEPT_REFUSED: u32 = 0x0C;
    pub const DECLINE_REFUSED: u32 = 0x0D;
    pub const CANCEL_REFUSED: u32 = 0x0E;
}
