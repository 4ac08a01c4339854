//! Emulator-side spectating: `spectator`, `gamebuffer`, `savestate`, and
//! the archived-replay path `getnicks` falls back to when a quark no
//! longer exists live (spec.md §4.6, §4.7).
//!
//! `gamebuffer` and `savestate` carry opaque emulator bytes the server
//! never interprets — it only relays them to whoever is watching and, the
//! first time, archives them to disk so a later spectator can replay the
//! match after it has ended.

use tokio::time::sleep;

use crate::quark::is_well_formed;
use crate::recorder::{replay_delay, REPLAY_CHUNK_SIZE};
use crate::session::{Role, Session, Side};
use crate::wire::opcode::push;
use crate::wire::{ack, FrameWriter, PayloadReader};

use super::Context;

/// `spectator(quark)`. Joins a live match's fan-out list if the quark is
/// still open. If it isn't but the token is well-formed and archived, the
/// caller (`dispatch`) is told to drive an archived replay instead, the
/// same fallback `getnicks` takes for an absent-but-well-formed quark.
pub fn handle_spectator(ctx: &Context, session: &Session, seq: u32, payload: &[u8]) -> Option<String> {
    let mut r = PayloadReader::new(payload);
    let Ok(quark) = r.read_string() else {
        session.send(ack(seq));
        return None;
    };

    session.send(ack(seq));

    {
        let mut st = session.lock();
        st.role = Role::Spectator;
        st.current_quark = Some(quark.clone());
        st.side = Side::SpecPre;
    }

    let joined = ctx.state.with_quark(&quark, |q| {
        q.spectators.insert(session.clone());
    });
    if joined.is_err() {
        return is_well_formed(&quark).then_some(quark);
    }

    broadcast_spectator_count(ctx, &quark);
    None
}

/// Removes a spectator on disconnect and rebroadcasts the new count —
/// called from the connection teardown path, not from a wire opcode.
pub fn spectator_left(ctx: &Context, session: &Session, quark: &str) {
    let removed = ctx.state.with_quark(quark, |q| q.spectators.remove(session)).unwrap_or(false);
    if removed {
        broadcast_spectator_count(ctx, quark);
    }
}

fn broadcast_spectator_count(ctx: &Context, quark: &str) {
    let _ = ctx.state.with_quark(quark, |q| {
        let count = q.spectator_count() + 1;
        for target in q.participants() {
            let auto = FrameWriter::new();
            target.send(auto.finish(push::AUTO_SPECTATE));
            let mut w = FrameWriter::new();
            w.write_u32(count);
            target.send(w.finish(push::SPECTATOR_COUNT));
        }
    });
}

/// `gamebuffer(quark, buf)`. Relayed verbatim to every spectator still
/// waiting on the opening frame (`Side::SpecPre`), who are then promoted
/// to `Side::SpecPost` so later `savestate` frames reach them instead.
/// The first call for a quark also archives the frame and the two
/// players' nicknames to disk.
pub fn handle_gamebuffer(ctx: &Context, _session: &Session, _seq: u32, payload: &[u8]) {
    let mut r = PayloadReader::new(payload);
    let Ok(quark) = r.read_string() else {
        return;
    };
    let buf = r.read_remaining();

    let mut w = FrameWriter::new();
    w.write_bytes(&buf);
    let frame = w.finish(push::GAMEBUFFER);

    let result = ctx.state.with_quark(&quark, |q| {
        for spectator in q.spectators.iter() {
            if spectator.lock().side == Side::SpecPre {
                spectator.send(frame.clone());
            }
        }
        for spectator in q.spectators.iter() {
            spectator.lock().side = Side::SpecPost;
        }
        let was_recorded = q.recorded;
        q.recorded = true;
        (was_recorded, q.p1_nick.clone(), q.p2_nick.clone())
    });

    if let Ok((false, p1_nick, p2_nick)) = result {
        if let Err(e) = ctx.recorder.write_gamebuffer(&quark, &frame) {
            tracing::warn!(%quark, error = %e, "failed to archive gamebuffer");
        }
        if let Err(e) = ctx.recorder.write_nicknames(&quark, &p1_nick, &p2_nick) {
            tracing::warn!(%quark, error = %e, "failed to archive nicknames");
        }
    }
}

/// `savestate(quark, block1, block2, buf)`. Acks the sending emulator
/// first, then relays `block2 || block1 || buf` to spectators who already
/// have the opening gamebuffer frame, and appends the same bytes to the
/// quark's savestate archive.
pub fn handle_savestate(ctx: &Context, session: &Session, seq: u32, payload: &[u8]) {
    let mut r = PayloadReader::new(payload);
    let (Ok(quark), Ok(block1), Ok(block2)) = (r.read_string(), r.read_u32(), r.read_u32()) else {
        return;
    };
    let buf = r.read_remaining();

    session.send(ack(seq));

    let mut w = FrameWriter::new();
    w.write_u32(block2);
    w.write_u32(block1);
    w.write_bytes(&buf);
    let frame = w.finish(push::SAVESTATE);

    let _ = ctx.state.with_quark(&quark, |q| {
        for spectator in q.spectators.iter() {
            if spectator.lock().side == Side::SpecPost {
                spectator.send(frame.clone());
            }
        }
    });

    if let Err(e) = ctx.recorder.append_savestate(&quark, &frame) {
        tracing::warn!(%quark, error = %e, "failed to append savestate frame");
    }
}

/// Drives an archived replay for a quark that `getnicks` found absent but
/// well-formed: a synthetic getnicks reply, the recorded gamebuffer frame,
/// then the savestate archive chunked at a fixed size with no regard for
/// the frame boundaries inside it, matching how the original service paced
/// a replay stream.
pub async fn run_replay(ctx: &Context, session: &Session, seq: u32, quark: &str) {
    let Ok((p1_nick, p2_nick)) = ctx.recorder.read_nicknames(quark) else {
        tracing::debug!(%quark, "replay requested but no archive exists");
        return;
    };
    let Ok(gamebuffer) = ctx.recorder.read_gamebuffer(quark) else {
        return;
    };
    let savestate = ctx.recorder.read_savestate(quark).unwrap_or_default();

    {
        let mut st = session.lock();
        st.role = Role::Spectator;
        st.current_quark = Some(quark.to_string());
        st.side = Side::SpecPre;
    }

    sleep(replay_delay::BEFORE_GETNICKS_REPLY).await;
    if session.lock().closed {
        return;
    }

    let mut w = FrameWriter::new();
    w.write_u32(0);
    w.write_str(&p1_nick);
    w.write_str(&p2_nick);
    w.write_u32(0);
    w.write_u32(0);
    session.send(w.finish(seq));

    sleep(replay_delay::BEFORE_GAMEBUFFER).await;
    if session.lock().closed {
        return;
    }
    session.send(gamebuffer);
    session.lock().side = Side::SpecPost;

    for chunk in savestate.chunks(REPLAY_CHUNK_SIZE) {
        if session.lock().closed {
            break;
        }
        session.send(chunk.to_vec());
        sleep(replay_delay::BETWEEN_SAVESTATE_CHUNKS).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::FileAuthenticator;
    use crate::config::ServerConfig;
    use crate::geo::NullGeoLocator;
    use crate::recorder::Recorder;
    use crate::state::State;
    use std::sync::Arc;

    fn ctx(data_dir: std::path::PathBuf) -> Context {
        Context {
            state: Arc::new(State::new(vec![])),
            config: Arc::new(ServerConfig::default()),
            authenticator: Arc::new(FileAuthenticator::empty()),
            geo: Arc::new(NullGeoLocator),
            recorder: Arc::new(Recorder::new(data_dir)),
        }
    }

    fn addr(port: u16) -> std::net::SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn spectator_joins_a_live_quark_and_gets_counted() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let token = ctx.state.create_quark("#lobby".into(), "alice".into(), "bob".into());
        let (p1, mut p1_rx) = Session::new(addr(1));
        ctx.state.with_quark(&token, |q| q.p1_emulator = Some(p1.clone())).unwrap();

        let (spec, mut spec_rx) = Session::new(addr(2));
        let mut w = FrameWriter::new();
        w.write_str(&token);
        let frame = w.finish(0);
        handle_spectator(&ctx, &spec, 1, &frame[8..]);

        let ack_frame = spec_rx.try_recv().unwrap();
        assert_eq!(&ack_frame[8..], &[0, 0, 0, 0]);
        assert_eq!(spec.lock().role, Role::Spectator);

        let auto = p1_rx.try_recv().unwrap();
        assert_eq!(&auto[4..8], &push::AUTO_SPECTATE.to_be_bytes());
        let count = p1_rx.try_recv().unwrap();
        assert_eq!(&count[4..8], &push::SPECTATOR_COUNT.to_be_bytes());
        assert_eq!(&count[8..], &1u32.to_be_bytes());
    }

    #[test]
    fn spectator_on_a_missing_well_formed_quark_signals_replay() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let (spec, mut spec_rx) = Session::new(addr(9));
        let token = "challenge-1234-1234567890.00";
        let mut w = FrameWriter::new();
        w.write_str(token);
        let frame = w.finish(0);

        let replay = handle_spectator(&ctx, &spec, 1, &frame[8..]);
        assert_eq!(replay.as_deref(), Some(token));
        let ack_frame = spec_rx.try_recv().unwrap();
        assert_eq!(&ack_frame[8..], &[0, 0, 0, 0]);
        assert!(spec_rx.try_recv().is_err());
    }

    #[test]
    fn first_gamebuffer_call_archives_and_promotes_pending_spectators() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let token = ctx.state.create_quark("#lobby".into(), "alice".into(), "bob".into());
        let (spec, mut spec_rx) = Session::new(addr(3));
        spec.lock().side = Side::SpecPre;
        ctx.state.with_quark(&token, |q| { q.spectators.insert(spec.clone()); }).unwrap();

        let mut w = FrameWriter::new();
        w.write_str(&token);
        w.write_bytes(b"opening-frame-bytes");
        let frame = w.finish(0);
        handle_gamebuffer(&ctx, &spec, 0, &frame[8..]);

        let relayed = spec_rx.try_recv().unwrap();
        assert_eq!(&relayed[4..8], &push::GAMEBUFFER.to_be_bytes());
        assert_eq!(&relayed[8..], b"opening-frame-bytes");
        assert_eq!(spec.lock().side, Side::SpecPost);
        assert!(ctx.recorder.gamebuffer_exists(&token));
        assert!(ctx.recorder.nicknames_exist(&token));
    }

    #[test]
    fn savestate_acks_then_relays_to_post_gamebuffer_spectators() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        let token = ctx.state.create_quark("#lobby".into(), "alice".into(), "bob".into());
        let (player, mut player_rx) = Session::new(addr(4));
        let (spec, mut spec_rx) = Session::new(addr(5));
        spec.lock().side = Side::SpecPost;
        ctx.state.with_quark(&token, |q| { q.spectators.insert(spec.clone()); }).unwrap();

        let mut w = FrameWriter::new();
        w.write_str(&token);
        w.write_u32(11);
        w.write_u32(22);
        w.write_bytes(b"state-bytes");
        let frame = w.finish(7);
        handle_savestate(&ctx, &player, 7, &frame[8..]);

        let ack_frame = player_rx.try_recv().unwrap();
        assert_eq!(&ack_frame[8..], &[0, 0, 0, 0]);

        let relayed = spec_rx.try_recv().unwrap();
        assert_eq!(&relayed[4..8], &push::SAVESTATE.to_be_bytes());
        assert_eq!(&relayed[8..12], &22u32.to_be_bytes());
        assert_eq!(&relayed[12..16], &11u32.to_be_bytes());
        assert_eq!(&relayed[16..], b"state-bytes");

        assert_eq!(ctx.recorder.read_savestate(&token).unwrap(), relayed);
    }

    #[tokio::test(start_paused = true)]
    async fn replay_streams_an_archived_match() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().to_path_buf());
        ctx.recorder.write_nicknames("quark-1", "alice", "bob").unwrap();
        ctx.recorder.write_gamebuffer("quark-1", b"gamebuffer-bytes").unwrap();
        ctx.recorder.append_savestate("quark-1", &vec![9u8; REPLAY_CHUNK_SIZE + 10]).unwrap();

        let (spec, mut rx) = Session::new(addr(6));
        run_replay(&ctx, &spec, 42, "quark-1").await;

        let nicks_reply = rx.try_recv().unwrap();
        assert_eq!(&nicks_reply[4..8], &42u32.to_be_bytes());
        let gamebuffer = rx.try_recv().unwrap();
        assert_eq!(gamebuffer, b"gamebuffer-bytes");
        assert_eq!(spec.lock().side, Side::SpecPost);

        let chunk1 = rx.try_recv().unwrap();
        assert_eq!(chunk1.len(), REPLAY_CHUNK_SIZE);
        let chunk2 = rx.try_recv().unwrap();
        assert_eq!(chunk2.len(), 10);
    }
}
