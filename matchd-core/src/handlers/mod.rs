//! Opcode handlers (spec.md §4.2–§4.9), one module per component slice.
//!
//! Every handler takes a shared [`Context`], the requesting [`Session`],
//! the request sequence number, and the payload with its opcode field
//! already stripped (see `dispatch`), and writes its own replies straight
//! onto a session's outbound FIFO via `Session::send` — its own ACK/NACK
//! as well as any push it owes another session. Nothing is returned to
//! the caller, since the long-poll emulator opcodes (`getpeer`,
//! `getnicks`) need to send an immediate ack and a separate, much later
//! push; a single return value can't carry both.

pub mod auth;
pub mod challenge;
pub mod presence;
pub mod quarkflow;
pub mod spectator;

use std::sync::Arc;

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::geo::GeoLocator;
use crate::recorder::Recorder;
use crate::state::State;

/// Everything a handler needs, bundled once per server and cloned (cheap:
/// all fields are `Arc`s) into every connection task.
#[derive(Clone)]
pub struct Context {
    pub state: Arc<State>,
    pub config: Arc<ServerConfig>,
    pub authenticator: Arc<dyn Authenticator>,
    pub geo: Arc<dyn GeoLocator>,
    pub recorder: Arc<Recorder>,
}
