//! Channels, roster queries, chat, and status (spec.md §4.4).
//!
//! Every handler in this module writes its reply (ack, nack, or push)
//! straight onto the requesting session's outbound FIFO rather than
//! returning it — the same path used to reach any other session, so a
//! handler that also needs to notify the rest of a channel has exactly
//! one mechanism to reach for.

use std::time::Instant;

use crate::session::{Session, SessionState, Status};
use crate::wire::opcode::{nack, push};
use crate::wire::{ack, nack as nack_frame, FrameWriter, PayloadReader};

use super::Context;

const CHAT_RATE_LIMIT: std::time::Duration = std::time::Duration::from_secs(2);

/// Appends one presence record — the fields a roster listing or a
/// presence push both carry — to an in-progress frame.
fn write_presence_record(w: &mut FrameWriter, nick: &str, st: &SessionState) {
    w.write_str(nick);
    w.write_u32(st.status.to_wire());
    w.write_str(st.opponent.as_deref().unwrap_or(""));
    w.write_str(st.current_channel.as_deref().unwrap_or(""));
    w.write_str(&st.city);
    w.write_str(&st.country);
    w.write_str(&st.country_code);
    w.write_u32(st.emulator_port);
}

/// The legacy double-record push sent right after a successful `auth`.
pub fn established_push(nick: &str, st: &SessionState) -> Vec<u8> {
    let mut w = FrameWriter::new();
    write_presence_record(&mut w, nick, st);
    write_presence_record(&mut w, nick, st);
    w.finish(push::PRESENCE)
}

fn presence_push_for(nick: &str, st: &SessionState) -> Vec<u8> {
    let mut w = FrameWriter::new();
    write_presence_record(&mut w, nick, st);
    w.finish(push::PRESENCE)
}

/// Broadcasts `session`'s current presence record to every member of its
/// current channel, itself included.
pub fn broadcast_presence(ctx: &Context, session: &Session) {
    let (nick, channel_name) = {
        let st = session.lock();
        (st.nickname.clone(), st.current_channel.clone())
    };
    let Some(nick) = nick else { return };
    let Some(channel_name) = channel_name else { return };
    let Some(channel) = ctx.state.channels.get(&channel_name) else { return };

    let frame = presence_push_for(&nick, &session.lock());
    for member in channel.members() {
        member.send(frame.clone());
    }
}

/// A part/disappear push (spec.md §4.8): same push code, payload is just
/// the departing nick.
pub fn broadcast_part(ctx: &Context, channel_name: &str, nick: &str) {
    let Some(channel) = ctx.state.channels.get(channel_name) else { return };
    let mut w = FrameWriter::new();
    w.write_u32(1); // unk1
    w.write_u32(0); // unk2
    w.write_str(nick);
    let frame = w.finish(push::PRESENCE);
    for member in channel.members() {
        member.send(frame.clone());
    }
}

/// `motd()`: replies with the name, topic, and dynamically composed
/// welcome text of whatever channel the session currently occupies,
/// falling back to `#lobby` for a session that hasn't joined one yet
/// (mirroring the original server's default channel-of-record).
pub fn handle_motd(ctx: &Context, session: &Session, seq: u32, _payload: &[u8]) {
    let channel_name = session.lock().current_channel.clone().unwrap_or_else(|| "#lobby".to_string());
    let Some(channel) = ctx.state.channels.get(&channel_name) else {
        session.send(ack(seq));
        return;
    };
    let motd = ctx.state.dynamic_motd(&channel_name).unwrap_or_default();

    let mut w = FrameWriter::new();
    w.write_u32(0);
    w.write_str(channel.name);
    w.write_str(channel.topic);
    w.write_str(&motd);
    session.send(w.finish(seq));
}

pub fn handle_list(ctx: &Context, session: &Session, seq: u32, _payload: &[u8]) {
    let mut w = FrameWriter::new();
    let channels = ctx.state.channels.all();
    w.write_u32(channels.len() as u32);
    for channel in channels {
        w.write_str(channel.name);
        w.write_str(channel.topic);
        w.write_u32(channel.member_count() as u32);
    }
    session.send(w.finish(seq));
}

pub fn handle_users(ctx: &Context, session: &Session, seq: u32, _payload: &[u8]) {
    let channel_name = session.lock().current_channel.clone();
    let mut w = FrameWriter::new();
    let Some(channel_name) = channel_name else {
        w.write_u32(0);
        session.send(w.finish(seq));
        return;
    };
    let Some(channel) = ctx.state.channels.get(&channel_name) else {
        w.write_u32(0);
        session.send(w.finish(seq));
        return;
    };

    let members = channel.members();
    w.write_u32(members.len() as u32);
    for member in &members {
        let st = member.lock();
        let nick = st.nickname.clone().unwrap_or_default();
        write_presence_record(&mut w, &nick, &st);
    }
    session.send(w.finish(seq));
}

pub fn handle_join(ctx: &Context, session: &Session, seq: u32, payload: &[u8]) {
    let mut r = PayloadReader::new(payload);
    let Ok(target_name) = r.read_string() else {
        session.send(nack_frame(seq, nack::UNKNOWN_OP));
        return;
    };
    let Some(target) = ctx.state.channels.get(&target_name) else {
        session.send(nack_frame(seq, nack::UNKNOWN_OP));
        return;
    };

    let previous_channel = {
        let mut st = session.lock();
        let prev = st.current_channel.take();
        st.current_channel = Some(target_name.clone());
        prev
    };
    if let Some(prev_name) = &previous_channel {
        if let Some(prev) = ctx.state.channels.get(prev_name) {
            prev.part(session);
        }
        let nick = session.nickname().unwrap_or_default();
        broadcast_part(ctx, prev_name, &nick);
    }

    target.join(session);
    session.send(ack(seq));
    session.send(crate::wire::assemble(push::ESTABLISHED, &[]));
    broadcast_presence(ctx, session);
}

pub fn handle_status(ctx: &Context, session: &Session, seq: u32, payload: &[u8]) {
    let mut r = PayloadReader::new(payload);
    let requested = r.read_u32().ok().and_then(Status::from_wire);
    {
        let mut st = session.lock();
        if st.status == Status::Playing {
            // Stash for restoration on match end rather than applying now.
            if let Some(requested) = requested {
                st.previous_status = Some(requested);
            }
            session.send(ack(seq));
            return;
        }
        if let Some(requested) = requested {
            st.status = requested;
        }
    }
    session.send(ack(seq));
    broadcast_presence(ctx, session);
}

pub fn handle_privmsg(ctx: &Context, session: &Session, seq: u32, payload: &[u8]) {
    let mut r = PayloadReader::new(payload);
    let Ok(text) = r.read_string() else {
        session.send(nack_frame(seq, nack::UNKNOWN_OP));
        return;
    };

    let (nick, channel_name, rate_limited) = {
        let mut st = session.lock();
        let now = Instant::now();
        let limited = st.last_chat.map(|t| now.duration_since(t) < CHAT_RATE_LIMIT).unwrap_or(false);
        if !limited {
            st.last_chat = Some(now);
        }
        (st.nickname.clone().unwrap_or_default(), st.current_channel.clone(), limited)
    };

    session.send(ack(seq));

    let Some(channel_name) = channel_name else { return };
    let Some(channel) = ctx.state.channels.get(&channel_name) else { return };

    if rate_limited {
        let mut w = FrameWriter::new();
        w.write_str("System");
        w.write_str("Please do not spam");
        session.send(w.finish(push::CHAT));
        return;
    }

    let mut w = FrameWriter::new();
    w.write_str(&nick);
    w.write_str(&text);
    let frame = w.finish(push::CHAT);
    for member in channel.members() {
        member.send(frame.clone());
    }
}
