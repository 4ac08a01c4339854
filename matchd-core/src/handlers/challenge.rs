//! Challenge broker: challenge/accept/decline/cancel/watch (spec.md §4.5).

use std::net::SocketAddr;

use crate::error::ChallengeError;
use crate::session::{Session, Side, Status};
use crate::wire::opcode::{nack, push};
use crate::wire::{ack, nack as nack_frame, FrameWriter, PayloadReader};

use super::Context;

/// A challenge is only open to a target sitting `Available` in the same
/// channel the challenger names.
fn check_target_available(target: &Session, channel: &str) -> Result<(), ChallengeError> {
    let tst = target.lock();
    if tst.status == Status::Available && tst.current_channel.as_deref() == Some(channel) {
        Ok(())
    } else {
        Err(ChallengeError::TargetUnavailable)
    }
}

/// Pops an outstanding challenge `holder` recorded against `from_addr` for
/// `from_nick`, if one is still there — shared by accept/decline/cancel,
/// which all need to confirm the challenge they're resolving is real.
fn pop_challenge(holder: &Session, from_addr: SocketAddr, from_nick: &str) -> Result<(), ChallengeError> {
    let mut st = holder.lock();
    match st.challenging.get(&from_addr) {
        Some(n) if n == from_nick => {
            st.challenging.remove(&from_addr);
            Ok(())
        }
        _ => Err(ChallengeError::NoSuchChallenge),
    }
}

pub fn handle_challenge(ctx: &Context, session: &Session, seq: u32, payload: &[u8]) {
    let mut r = PayloadReader::new(payload);
    let (Ok(target_nick), Ok(channel)) = (r.read_string(), r.read_string()) else {
        session.send(nack_frame(seq, nack::CHALLENGE_REFUSED));
        return;
    };

    let Some(target) = ctx.state.client_by_nick(&target_nick) else {
        session.send(nack_frame(seq, nack::CHALLENGE_REFUSED));
        return;
    };

    let (self_nick, self_channel, self_status) = {
        let st = session.lock();
        (st.nickname.clone().unwrap_or_default(), st.current_channel.clone(), st.status)
    };

    if check_target_available(&target, &channel).is_err()
        || self_channel.as_deref() != Some(channel.as_str())
        || self_status == Status::Playing
    {
        session.send(nack_frame(seq, nack::CHALLENGE_REFUSED));
        return;
    }

    {
        let mut st = session.lock();
        st.side = Side::P1;
        st.challenging.insert(target.remote_addr(), target_nick.clone());
    }

    let mut w = FrameWriter::new();
    w.write_str(&self_nick);
    w.write_str(&channel);
    target.send(w.finish(push::CHALLENGE_NOTICE));

    session.send(ack(seq));
}

pub fn handle_accept(ctx: &Context, session: &Session, seq: u32, payload: &[u8]) {
    let mut r = PayloadReader::new(payload);
    let Ok(challenger_nick) = r.read_string() else {
        session.send(nack_frame(seq, nack::ACCEPT_REFUSED));
        return;
    };
    let _channel_field = r.read_string();

    let Some(challenger) = ctx.state.client_by_nick(&challenger_nick) else {
        session.send(nack_frame(seq, nack::ACCEPT_REFUSED));
        return;
    };

    let self_nick = session.nickname().unwrap_or_default();
    let self_addr = session.remote_addr();

    if pop_challenge(&challenger, self_addr, &self_nick).is_err() {
        session.send(nack_frame(seq, nack::ACCEPT_REFUSED));
        return;
    }

    let channel = session.lock().current_channel.clone().unwrap_or_default();

    {
        let mut st1 = challenger.lock();
        let mut st2 = session.lock();
        st1.previous_status = Some(st1.status);
        st2.previous_status = Some(st2.status);
        st1.status = Status::Playing;
        st2.status = Status::Playing;
        st1.opponent = Some(self_nick.clone());
        st2.opponent = Some(challenger_nick.clone());
        st2.side = Side::P2;
    }

    let token = ctx.state.create_quark(channel.clone(), challenger_nick.clone(), self_nick.clone());
    let _ = ctx.state.with_quark(&token, |q| {
        q.p1_client = Some(challenger.clone());
        q.p2_client = Some(session.clone());
    });
    challenger.lock().current_quark = Some(token.clone());
    session.lock().current_quark = Some(token.clone());

    let uri = format!("quark:served,{channel},{token},7000");
    let mut w1 = FrameWriter::new();
    w1.write_str(&challenger_nick);
    w1.write_str(&self_nick);
    w1.write_str(&uri);
    session.send(w1.finish(push::QUARK_URI));

    let mut w2 = FrameWriter::new();
    w2.write_str(&self_nick);
    w2.write_str(&challenger_nick);
    w2.write_str(&uri);
    challenger.send(w2.finish(push::QUARK_URI));

    session.send(ack(seq));
}

pub fn handle_decline(ctx: &Context, session: &Session, seq: u32, payload: &[u8]) {
    let mut r = PayloadReader::new(payload);
    let Ok(challenger_nick) = r.read_string() else {
        session.send(nack_frame(seq, nack::DECLINE_REFUSED));
        return;
    };

    let Some(challenger) = ctx.state.client_by_nick(&challenger_nick) else {
        session.send(nack_frame(seq, nack::DECLINE_REFUSED));
        return;
    };

    let self_nick = session.nickname().unwrap_or_default();
    let self_addr = session.remote_addr();
    if pop_challenge(&challenger, self_addr, &self_nick).is_err() {
        session.send(nack_frame(seq, nack::DECLINE_REFUSED));
        return;
    }

    let mut w = FrameWriter::new();
    w.write_str(&self_nick);
    challenger.send(w.finish(push::DECLINE_NOTICE));

    session.send(ack(seq));
}

pub fn handle_cancel(ctx: &Context, session: &Session, seq: u32, payload: &[u8]) {
    let mut r = PayloadReader::new(payload);
    let Ok(target_nick) = r.read_string() else {
        session.send(nack_frame(seq, nack::CANCEL_REFUSED));
        return;
    };
    let Some(target) = ctx.state.client_by_nick(&target_nick) else {
        session.send(nack_frame(seq, nack::CANCEL_REFUSED));
        return;
    };

    if pop_challenge(session, target.remote_addr(), &target_nick).is_err() {
        session.send(nack_frame(seq, nack::CANCEL_REFUSED));
        return;
    }

    let self_nick = session.nickname().unwrap_or_default();
    let mut w = FrameWriter::new();
    w.write_str(&self_nick);
    target.send(w.finish(push::CANCEL_NOTICE));

    session.send(ack(seq));
}

/// `watch(nick)`: spectate a client's running match from the lobby side,
/// distinct from the emulator-side `spectator` opcode. Grounded on the
/// original source's handling, not present in the distilled wire table.
pub fn handle_watch(ctx: &Context, session: &Session, seq: u32, payload: &[u8]) {
    let mut r = PayloadReader::new(payload);
    let Ok(target_nick) = r.read_string() else {
        session.send(nack_frame(seq, nack::WATCH_REFUSED));
        return;
    };
    let Some(target) = ctx.state.client_by_nick(&target_nick) else {
        session.send(nack_frame(seq, nack::WATCH_REFUSED));
        return;
    };

    let self_channel = session.lock().current_channel.clone();
    let (status, channel, opponent, quark) = {
        let tst = target.lock();
        (tst.status, tst.current_channel.clone(), tst.opponent.clone(), tst.current_quark.clone())
    };

    if status != Status::Playing || channel != self_channel {
        session.send(nack_frame(seq, nack::WATCH_REFUSED));
        return;
    }
    let (Some(channel), Some(quark)) = (channel, quark) else {
        session.send(nack_frame(seq, nack::WATCH_REFUSED));
        return;
    };

    let uri = format!("quark:stream,{channel},{quark},7000");
    let mut w = FrameWriter::new();
    w.write_str(&target_nick);
    w.write_str(opponent.as_deref().unwrap_or(""));
    w.write_str(&uri);
    session.send(w.finish(push::QUARK_URI));

    session.send(ack(seq));
}
