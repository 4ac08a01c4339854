//! Central request router (spec.md §4.2).
//!
//! A request frame's payload starts with a 4-byte big-endian opcode; the
//! rest is the opcode's own fields. This module is the only place that
//! peels that opcode field off — every handler downstream sees a payload
//! that starts at its own first field.

use crate::handlers::{auth, challenge, presence, quarkflow, spectator, Context};
use crate::session::{Role, Session};
use crate::wire::opcode::{nack, Opcode};
use crate::wire::{nack as nack_frame, PayloadReader, RawFrame};

/// Whether the connection's reader loop should keep going after this
/// frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Close,
}

pub async fn dispatch(ctx: &Context, session: &Session, frame: RawFrame) -> Outcome {
    let seq = frame.seq;
    let mut r = PayloadReader::new(&frame.payload);
    let Ok(opcode_raw) = r.read_u32() else {
        return Outcome::Continue;
    };
    let payload = r.read_remaining();

    let Ok(opcode) = Opcode::try_from(opcode_raw) else {
        let authed = session.lock().role != Role::Unauth;
        if !authed {
            // Unauthenticated sessions only ever speak connect/auth;
            // anything else nonsensical is dropped rather than closing
            // a socket that hasn't even identified itself yet.
            return Outcome::Continue;
        }
        session.send(nack_frame(seq, nack::UNKNOWN_OP));
        return Outcome::Close;
    };

    // A recognized opcode that needs a nickname, arriving before one is
    // set, is silently dropped rather than NACKed — only a genuinely
    // *unknown* opcode from an already-authenticated client gets the
    // NACK-and-close treatment above.
    if opcode.requires_auth() && session.lock().role == Role::Unauth {
        return Outcome::Continue;
    }

    match opcode {
        Opcode::Connect => auth::handle_connect(ctx, session, seq, &payload),
        Opcode::Auth => auth::handle_auth(ctx, session, seq, &payload),
        Opcode::Motd => presence::handle_motd(ctx, session, seq, &payload),
        Opcode::List => presence::handle_list(ctx, session, seq, &payload),
        Opcode::Users => presence::handle_users(ctx, session, seq, &payload),
        Opcode::Join => presence::handle_join(ctx, session, seq, &payload),
        Opcode::Status => presence::handle_status(ctx, session, seq, &payload),
        Opcode::Privmsg => presence::handle_privmsg(ctx, session, seq, &payload),
        Opcode::Challenge => challenge::handle_challenge(ctx, session, seq, &payload),
        Opcode::Accept => challenge::handle_accept(ctx, session, seq, &payload),
        Opcode::Decline => challenge::handle_decline(ctx, session, seq, &payload),
        Opcode::Cancel => challenge::handle_cancel(ctx, session, seq, &payload),
        Opcode::Watch => challenge::handle_watch(ctx, session, seq, &payload),
        Opcode::GetPeer => quarkflow::handle_getpeer(ctx, session, seq, &payload).await,
        Opcode::GetNicks => {
            if let Some(quark) = quarkflow::handle_getnicks(ctx, session, seq, &payload).await {
                spectator::run_replay(ctx, session, seq, &quark).await;
            }
        }
        Opcode::FbaPrivmsg => quarkflow::handle_fba_privmsg(ctx, session, seq, &payload),
        Opcode::Spectator => {
            if let Some(quark) = spectator::handle_spectator(ctx, session, seq, &payload) {
                spectator::run_replay(ctx, session, seq, &quark).await;
            }
        }
        Opcode::GameBuffer => spectator::handle_gamebuffer(ctx, session, seq, &payload),
        Opcode::SaveState => spectator::handle_savestate(ctx, session, seq, &payload),
    }

    Outcome::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::FileAuthenticator;
    use crate::config::ServerConfig;
    use crate::geo::NullGeoLocator;
    use crate::recorder::Recorder;
    use crate::state::State;
    use crate::wire::FrameWriter;
    use std::sync::Arc;

    fn ctx() -> Context {
        Context {
            state: Arc::new(State::new(vec![])),
            config: Arc::new(ServerConfig::default()),
            authenticator: Arc::new(FileAuthenticator::empty()),
            geo: Arc::new(NullGeoLocator),
            recorder: Arc::new(Recorder::new(std::env::temp_dir())),
        }
    }

    fn addr(port: u16) -> std::net::SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn request(opcode: u32, fields: impl FnOnce(&mut FrameWriter)) -> RawFrame {
        let mut w = FrameWriter::new();
        w.write_u32(opcode);
        fields(&mut w);
        let bytes = w.finish(1);
        RawFrame { seq: 1, payload: bytes[8..].to_vec() }
    }

    #[tokio::test]
    async fn unauthenticated_session_can_connect() {
        let ctx = ctx();
        let (s, mut rx) = Session::new(addr(1));
        let frame = request(0x00, |_| {});
        let outcome = dispatch(&ctx, &s, frame).await;
        assert_eq!(outcome, Outcome::Continue);
        let ack = rx.try_recv().unwrap();
        assert_eq!(&ack[4..8], &1u32.to_be_bytes());
    }

    #[tokio::test]
    async fn opcode_requiring_auth_before_auth_is_silently_dropped() {
        let ctx = ctx();
        let (s, mut rx) = Session::new(addr(2));
        let frame = request(0x02, |_| {}); // motd requires auth
        let outcome = dispatch(&ctx, &s, frame).await;
        assert_eq!(outcome, Outcome::Continue);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_opcode_from_an_authenticated_client_nacks_and_closes() {
        let ctx = ctx();
        let (s, mut rx) = Session::new(addr(3));
        s.lock().role = Role::Client;
        let frame = request(0xEE, |_| {});
        let outcome = dispatch(&ctx, &s, frame).await;
        assert_eq!(outcome, Outcome::Close);
        let reply = rx.try_recv().unwrap();
        assert_eq!(&reply[8..], &nack::UNKNOWN_OP.to_be_bytes());
    }
}
