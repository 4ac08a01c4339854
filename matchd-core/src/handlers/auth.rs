//! `connect` and `auth` (spec.md §4.2, §4.3) — the only opcodes legal
//! before a nickname is established.

use crate::session::{Role, Session, Status};
use crate::wire::opcode::nack;
use crate::wire::{ack, nack as nack_frame, PayloadReader};

use super::presence::established_push;
use super::Context;

pub fn handle_connect(ctx: &Context, session: &Session, seq: u32, _payload: &[u8]) {
    ctx.state.register_connection(session.clone());
    session.send(ack(seq));
}

pub fn handle_auth(ctx: &Context, session: &Session, seq: u32, payload: &[u8]) {
    let mut r = PayloadReader::new(payload);
    let (Ok(nick), Ok(password), Ok(port)) = (r.read_string(), r.read_string(), r.read_u32()) else {
        session.send(nack_frame(seq, nack::AUTH_FAILED));
        return;
    };

    if let Err(err) = ctx.authenticator.verify(&nick, &password) {
        tracing::debug!(%nick, error = %err, "auth failed");
        session.send(nack_frame(seq, nack::AUTH_FAILED));
        return;
    }

    // A reconnecting user bumps whatever session already holds the nick;
    // an empty frame is the sentinel a writer task treats as "close me".
    if let Some(previous) = ctx.state.client_by_nick(&nick) {
        if previous.id() != session.id() {
            previous.lock().closed = true;
            previous.send(Vec::new());
        }
    }

    let geo = ctx.geo.locate(session.remote_addr().ip());
    {
        let mut st = session.lock();
        st.nickname = Some(nick.clone());
        st.role = Role::Client;
        st.status = Status::Available;
        st.emulator_port = port;
        st.city = geo.city;
        st.country = geo.country;
        st.country_code = geo.country_code;
    }

    if let Err(existing) = ctx.state.register_nick(&nick, session.clone()) {
        // Lost a race against another connection claiming the same nick.
        if existing.id() != session.id() {
            session.send(nack_frame(seq, nack::AUTH_FAILED));
            return;
        }
    }

    let push = {
        let st = session.lock();
        established_push(&nick, &st)
    };
    session.send(ack(seq));
    session.send(push);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{digest, FileAuthenticator};
    use crate::config::ServerConfig;
    use crate::geo::NullGeoLocator;
    use crate::recorder::Recorder;
    use crate::state::State;
    use crate::wire::FrameWriter;
    use std::sync::Arc;

    fn ctx_with_user(nick: &str, password: &str, salt: &str) -> Context {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.toml");
        let d = digest(password, salt);
        std::fs::write(&path, format!("[users.{nick}]\nsalt = \"{salt}\"\ndigest = \"{d}\"\n")).unwrap();
        let authenticator = FileAuthenticator::load(&path).unwrap();
        drop(dir);
        Context {
            state: Arc::new(State::new(vec![])),
            config: Arc::new(ServerConfig::default()),
            authenticator: Arc::new(authenticator),
            geo: Arc::new(NullGeoLocator),
            recorder: Arc::new(Recorder::new(std::env::temp_dir())),
        }
    }

    fn addr(port: u16) -> std::net::SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn successful_auth_registers_the_nick() {
        let ctx = ctx_with_user("alice", "pw", "s1");
        let (s, mut rx) = Session::new(addr(1));

        let mut w = FrameWriter::new();
        w.write_str("alice");
        w.write_str("pw");
        w.write_u32(6009);
        let frame = w.finish(0);

        handle_auth(&ctx, &s, 1, &frame[8..]);

        let reply = rx.try_recv().unwrap();
        assert_eq!(&reply[4..8], &1u32.to_be_bytes());
        assert_eq!(&reply[8..], &[0, 0, 0, 0]);
        assert!(ctx.state.client_by_nick("alice").is_some());
        assert_eq!(s.lock().role, Role::Client);

        let push = rx.try_recv().unwrap();
        assert_eq!(&push[4..8], &0xFFFF_FFFDu32.to_be_bytes());
    }

    #[test]
    fn failed_auth_nacks() {
        let ctx = ctx_with_user("alice", "pw", "s1");
        let (s, mut rx) = Session::new(addr(2));

        let mut w = FrameWriter::new();
        w.write_str("alice");
        w.write_str("wrong");
        w.write_u32(6009);
        let frame = w.finish(0);

        handle_auth(&ctx, &s, 1, &frame[8..]);
        let reply = rx.try_recv().unwrap();
        assert_eq!(&reply[8..], &nack::AUTH_FAILED.to_be_bytes());
    }
}
