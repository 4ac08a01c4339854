//! Library surface for the `matchd` binary: the TCP accept loop and the
//! per-connection frame pump, factored out of `main.rs` so integration
//! tests can drive a real socket without going through the CLI parsing,
//! daemonizing, or UDP rendezvous setup that `main.rs` layers on top.

use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use matchd_core::cleanup;
use matchd_core::dispatch::{dispatch, Outcome};
use matchd_core::handlers::Context;
use matchd_core::session::Session;
use matchd_core::wire::{read_frame, write_frame};

/// Accepts connections off `listener` until the socket errors, spawning
/// one task per connection.
pub async fn accept_loop(ctx: Context, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, remote_addr) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(ctx, stream, remote_addr).await {
                tracing::debug!(%remote_addr, error = %e, "connection ended with an error");
            }
        });
    }
}

/// Pumps frames for one accepted connection until the client disconnects
/// or the dispatcher signals the socket should close.
pub async fn handle_connection(ctx: Context, stream: TcpStream, remote_addr: SocketAddr) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (session, mut outbound_rx) = Session::new(remote_addr);

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if frame.is_empty() {
                break;
            }
            if write_frame(&mut write_half, &frame).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(%remote_addr, error = %e, "read error");
                break;
            }
        };

        match dispatch(&ctx, &session, frame).await {
            Outcome::Continue => {}
            Outcome::Close => break,
        }

        if session.lock().closed {
            break;
        }
    }

    session.lock().closed = true;
    cleanup::run(&ctx, &session);
    session.send(Vec::new());
    let _ = writer_task.await;
    Ok(())
}
