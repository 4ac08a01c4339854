//! Emulator-side quark operations: `getpeer`, `getnicks`, `fba_privmsg`
//! (spec.md §4.6). These opcodes run on a second, unauthenticated TCP
//! connection the emulator opens on its own — identified by quark token
//! plus source address, never by nickname — and they block their own
//! connection task for as long as the spec's polling windows allow.

use std::time::Duration;

use tokio::time::sleep;

use crate::quark::is_well_formed;
use crate::session::{Role, Session, Side};
use crate::wire::opcode::push;
use crate::wire::{ack, FrameWriter, PayloadReader};

use super::Context;

const GETPEER_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
const GETNICKS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// `getpeer(quark, fba_port)`. Registers this connection as one side of a
/// match's emulator pair and waits for its sibling to call in too.
pub async fn handle_getpeer(ctx: &Context, session: &Session, seq: u32, payload: &[u8]) {
    let mut r = PayloadReader::new(payload);
    let (Ok(quark), Ok(fba_port)) = (r.read_string(), r.read_u32()) else {
        session.send(ack(seq));
        return;
    };

    session.send(ack(seq));

    {
        let mut st = session.lock();
        st.role = Role::Player;
        st.current_quark = Some(quark.clone());
        st.emulator_port = fba_port;
    }

    let full = ctx
        .state
        .with_quark(&quark, |q| q.both_emulators_known())
        .unwrap_or(false);
    if full {
        tracing::info!(%quark, "getpeer into a full quark, closing");
        session.lock().closed = true;
        session.send(Vec::new());
        return;
    }

    // Resolve which side this emulator plays by matching it against the
    // quark's lobby clients by source IP, mirroring how the accept step
    // recorded p1_client/p2_client.
    let nick_and_side = ctx.state.with_quark(&quark, |q| {
        let ip = session.remote_addr().ip();
        if let Some(p1) = &q.p1_client {
            if p1.remote_addr().ip() == ip {
                return Some((q.p1_nick.clone(), Side::P1));
            }
        }
        if let Some(p2) = &q.p2_client {
            if p2.remote_addr().ip() == ip {
                return Some((q.p2_nick.clone(), Side::P2));
            }
        }
        None
    });

    let Ok(Some((nick, side))) = nick_and_side else {
        tracing::debug!(%quark, "getpeer: no matching lobby client for this emulator's address");
        session.lock().closed = true;
        session.send(Vec::new());
        return;
    };

    {
        let mut st = session.lock();
        st.nickname = Some(nick);
        st.side = side;
    }

    let self_challenge = ctx.state.with_quark(&quark, |q| q.self_challenge).unwrap_or(false);
    let _ = ctx.state.with_quark(&quark, |q| match side {
        Side::P1 if q.p1_emulator.is_none() => q.p1_emulator = Some(session.clone()),
        Side::P2 if q.p2_emulator.is_none() => q.p2_emulator = Some(session.clone()),
        _ => {
            if q.p1_emulator.is_none() {
                q.p1_emulator = Some(session.clone());
            }
            if q.p2_emulator.is_none() {
                q.p2_emulator = Some(session.clone());
            }
        }
    });

    let deadline = tokio::time::Instant::now() + ctx.config.get_peer_timeout();
    let mut peer: Option<Session> = None;
    while tokio::time::Instant::now() < deadline {
        let found = ctx
            .state
            .with_quark(&quark, |q| match side {
                Side::P1 => q.p2_emulator.clone(),
                _ => q.p1_emulator.clone(),
            })
            .ok()
            .flatten();
        if found.is_some() {
            peer = found;
            break;
        }
        sleep(GETPEER_POLL_INTERVAL).await;
    }

    let mut w = FrameWriter::new();
    if ctx.config.udp_holepunch_enabled() {
        w.write_str("127.0.0.1");
        w.write_u32(if self_challenge { 7002 } else { 7001 });
    } else if let Some(peer) = &peer {
        w.write_str(&peer.remote_addr().ip().to_string());
        w.write_u32(peer.lock().emulator_port);
    } else {
        w.write_str(&session.remote_addr().ip().to_string());
        w.write_u32(fba_port);
    }
    w.write_u32(if side == Side::P1 { 1 } else { 0 });
    session.send(w.finish(push::PEER_ADDR));
}

/// `getnicks(quark)`. Waits up to the configured deadline for both slots
/// to fill, then replies with both nicknames and the spectator count; if
/// the quark never existed (absent, not merely unfilled) the caller should
/// fall back to the archived-replay path instead (see `spectator.rs`).
pub async fn handle_getnicks(ctx: &Context, session: &Session, seq: u32, payload: &[u8]) -> Option<String> {
    let mut r = PayloadReader::new(payload);
    let Ok(quark) = r.read_string() else {
        return None;
    };

    if ctx.state.with_quark(&quark, |_| ()).is_err() {
        if is_well_formed(&quark) {
            return Some(quark);
        }
        return None;
    }

    let deadline = tokio::time::Instant::now() + ctx.config.get_nicks_timeout();
    let mut nicks = None;
    while tokio::time::Instant::now() < deadline {
        let found = ctx
            .state
            .with_quark(&quark, |q| {
                if q.both_emulators_known() {
                    Some((q.p1_nick.clone(), q.p2_nick.clone()))
                } else {
                    None
                }
            })
            .ok()
            .flatten();
        if found.is_some() {
            nicks = found;
            break;
        }
        sleep(GETNICKS_POLL_INTERVAL).await;
    }

    let spectator_count = ctx.state.with_quark(&quark, |q| q.spectator_count()).unwrap_or(0);

    let mut w = FrameWriter::new();
    w.write_u32(0);
    match &nicks {
        Some((p1, p2)) => {
            w.write_str(p1);
            w.write_str(p2);
        }
        None => {
            w.write_str("");
            w.write_str("");
        }
    }
    w.write_u32(0);
    w.write_u32(spectator_count);
    session.send(w.finish(seq));

    if nicks.is_some() {
        let established = FrameWriter::new();
        session.send(established.finish(push::AUTO_SPECTATE));
        let mut count = FrameWriter::new();
        count.write_u32(1);
        session.send(count.finish(push::SPECTATOR_COUNT));

        // Rebroadcast the players' playing status to the lobby channel.
        if let Ok(Some((p1, p2))) = ctx.state.with_quark(&quark, |q| {
            Some((q.p1_client.clone(), q.p2_client.clone()))
        }) {
            for client in [p1, p2].into_iter().flatten() {
                super::presence::broadcast_presence(ctx, &client);
            }
        }
    }

    None
}

/// `fba_privmsg(quark, msg)`: mirrors a chat line between the two paired
/// emulators (and echoes it back to the sender).
pub fn handle_fba_privmsg(ctx: &Context, session: &Session, _seq: u32, payload: &[u8]) {
    let mut r = PayloadReader::new(payload);
    let (Ok(quark), Ok(msg)) = (r.read_string(), r.read_string()) else {
        return;
    };
    let nick = session.nickname().unwrap_or_default();

    let peer = ctx
        .state
        .with_quark(&quark, |q| {
            let ip = session.remote_addr().ip();
            match (&q.p1_emulator, &q.p2_emulator) {
                (Some(p1), _) if p1.remote_addr().ip() != ip => Some(p1.clone()),
                (_, Some(p2)) if p2.remote_addr().ip() != ip => Some(p2.clone()),
                _ => None,
            }
        })
        .ok()
        .flatten();

    let mut w = FrameWriter::new();
    w.write_str(&quark);
    w.write_str(&nick);
    w.write_str(&msg);
    let frame = w.finish(push::EMU_CHAT);

    if let Some(peer) = peer {
        peer.send(frame.clone());
    }
    session.send(frame);
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

    #[tokio::test(start_paused = true)]
    async fn getpeer_pairs_two_emulators_sharing_a_quark() {
        let ctx = ctx();
        let token = ctx.state.create_quark("#lobby".into(), "alice".into(), "bob".into());
        let (alice_client, _rx1) = Session::new(addr(1));
        let (bob_client, _rx2) = Session::new(addr(2));
        ctx.state
            .with_quark(&token, |q| {
                q.p1_client = Some(alice_client.clone());
                q.p2_client = Some(bob_client.clone());
            })
            .unwrap();

        let (alice_emu, mut alice_rx) = Session::new(addr(1));
        let (bob_emu, mut bob_rx) = Session::new(addr(2));

        let mut w1 = FrameWriter::new();
        w1.write_str(&token);
        w1.write_u32(6009);
        let frame1 = w1.finish(0);
        let mut w2 = FrameWriter::new();
        w2.write_str(&token);
        w2.write_u32(6010);
        let frame2 = w2.finish(0);

        tokio::join!(
            handle_getpeer(&ctx, &alice_emu, 1, &frame1[8..]),
            handle_getpeer(&ctx, &bob_emu, 2, &frame2[8..]),
        );

        let _ack1 = alice_rx.try_recv().unwrap();
        let peer1 = alice_rx.try_recv().unwrap();
        assert_eq!(&peer1[4..8], &push::PEER_ADDR.to_be_bytes());
        assert_eq!(&peer1[peer1.len() - 4..], &1u32.to_be_bytes()); // alice is P1

        let _ack2 = bob_rx.try_recv().unwrap();
        let peer2 = bob_rx.try_recv().unwrap();
        assert_eq!(&peer2[peer2.len() - 4..], &0u32.to_be_bytes()); // bob is P2

        assert!(ctx.state.with_quark(&token, |q| q.both_emulators_known()).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn getnicks_on_a_missing_well_formed_quark_signals_replay() {
        let ctx = ctx();
        let (session, mut rx) = Session::new(addr(5));
        let token = "challenge-1234-1234567890.00";
        let mut w = FrameWriter::new();
        w.write_str(token);
        let frame = w.finish(0);

        let replay = handle_getnicks(&ctx, &session, 9, &frame[8..]).await;
        assert_eq!(replay.as_deref(), Some(token));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fba_privmsg_echoes_to_sender_and_mirrors_to_peer() {
        let ctx = ctx();
        let token = ctx.state.create_quark("#lobby".into(), "alice".into(), "bob".into());
        let (alice_emu, mut alice_rx) = Session::new(addr(1));
        let (bob_emu, mut bob_rx) = Session::new(addr(2));
        alice_emu.lock().nickname = Some("alice".to_string());
        ctx.state
            .with_quark(&token, |q| {
                q.p1_emulator = Some(alice_emu.clone());
                q.p2_emulator = Some(bob_emu.clone());
            })
            .unwrap();

        let mut w = FrameWriter::new();
        w.write_str(&token);
        w.write_str("gg");
        let frame = w.finish(0);
        handle_fba_privmsg(&ctx, &alice_emu, 0, &frame[8..]);

        let to_bob = bob_rx.try_recv().unwrap();
        assert_eq!(&to_bob[4..8], &push::EMU_CHAT.to_be_bytes());
        let echo = alice_rx.try_recv().unwrap();
        assert_eq!(echo, to_bob);
    }
}
