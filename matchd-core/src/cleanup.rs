//! Connection teardown (spec.md §4.8). Called exactly once per connection
//! however it ends — socket error, clean EOF, or a forced close from
//! elsewhere (nickname collision, unknown opcode, getpeer into a full
//! quark). Callers mark `session.lock().closed = true` before invoking
//! this so a handler racing against the same session's demise sees a
//! consistent picture.

use crate::handlers::{presence, spectator, Context};
use crate::session::{Role, Session, Side, Status};
use crate::wire::opcode::push;
use crate::wire::FrameWriter;

pub fn run(ctx: &Context, session: &Session) {
    let (nick, role, channel, quark_token, addr) = {
        let st = session.lock();
        (
            st.nickname.clone(),
            st.role,
            st.current_channel.clone(),
            st.current_quark.clone(),
            session.remote_addr(),
        )
    };

    ctx.state.remove_connection(addr);
    if let Some(nick) = &nick {
        ctx.state.unregister_nick(nick);
    }
    if let Some(channel_name) = &channel {
        if let Some(channel) = ctx.state.channels.get(channel_name) {
            channel.part(session);
        }
        if let Some(nick) = &nick {
            presence::broadcast_part(ctx, channel_name, nick);
        }
    }

    match role {
        Role::Player => {
            if let Some(token) = &quark_token {
                cleanup_player(ctx, session, token);
            }
        }
        Role::Spectator => {
            if let Some(token) = &quark_token {
                spectator::spectator_left(ctx, session, token);
            }
        }
        Role::Unauth | Role::Client => {}
    }
}

/// A player-role disconnect (an emulator socket going away) tears down
/// the whole match: restores both lobby clients to their pre-match
/// status, notifies them of the quark that just ended, closes the
/// surviving peer's emulator socket, and drops the quark.
fn cleanup_player(ctx: &Context, session: &Session, token: &str) {
    let Ok((p1_client, p2_client, p1_emulator, p2_emulator)) = ctx.state.with_quark(token, |q| {
        (q.p1_client.clone(), q.p2_client.clone(), q.p1_emulator.clone(), q.p2_emulator.clone())
    }) else {
        return;
    };

    for client in [&p1_client, &p2_client].into_iter().flatten() {
        {
            let mut st = client.lock();
            // A client who was already mid-match when this one started
            // (self-challenge, or status tracking lagging a prior match's
            // own teardown) never had its previous_status updated away
            // from Playing — restoring that raw value would leave it
            // shown as in-progress forever, so it falls back to Available.
            st.status = match st.previous_status.take() {
                Some(Status::Playing) | None => Status::Available,
                Some(other) => other,
            };
            st.opponent = None;
            st.current_quark = None;
            st.side = Side::SpecPre;
        }
        presence::broadcast_presence(ctx, client);

        let mut w = FrameWriter::new();
        w.write_str("System");
        w.write_str(&format!("Quark id: {token}"));
        client.send(w.finish(push::CHAT));
    }

    for emulator in [&p1_emulator, &p2_emulator].into_iter().flatten() {
        if emulator.id() != session.id() {
            emulator.lock().closed = true;
            emulator.send(Vec::new());
        }
    }

    ctx.state.destroy_quark(token);
}
