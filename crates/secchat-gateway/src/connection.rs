use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::GatewayContext;
use crate::hub::{ConnId, Frame, OUTBOUND_CAPACITY};
use crate::session::{Flow, Session};

/// Server sends a Ping this often.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Any inbound frame, Pongs included, must arrive within this window.
pub const READ_DEADLINE: Duration = Duration::from_secs(60);

pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Largest inbound message accepted on the socket.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Liveness timings for one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimings {
    pub keepalive: Duration,
    pub read_deadline: Duration,
    pub write_deadline: Duration,
}

impl Default for ConnectionTimings {
    fn default() -> Self {
        Self {
            keepalive: KEEPALIVE_INTERVAL,
            read_deadline: READ_DEADLINE,
            write_deadline: WRITE_DEADLINE,
        }
    }
}

/// Drive one accepted socket until it closes. Always unregisters from the hub
/// on the way out.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext, timings: ConnectionTimings) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel::<Frame>(OUTBOUND_CAPACITY);
    let closed = CancellationToken::new();

    let conn = ctx.hub.register(tx.clone(), closed.clone());
    info!(%conn, "WebSocket connected");

    let mut writer = tokio::spawn(write_loop(sink, rx, closed.clone(), conn, timings));

    let hub = ctx.hub.clone();
    let mut session = Session::new(conn, tx, ctx);

    tokio::select! {
        _ = read_loop(&mut stream, &mut session, conn, timings.read_deadline) => {}
        _ = closed.cancelled() => debug!(%conn, "connection closed by server"),
    }

    hub.unregister(conn);
    // Last sender besides the hub's; the writer drains once both are gone.
    drop(session);

    if timeout(timings.write_deadline, &mut writer).await.is_err() {
        warn!(%conn, "writer did not finish in time, aborting");
        writer.abort();
    }
    info!(%conn, "WebSocket disconnected");
}

async fn read_loop(
    stream: &mut SplitStream<WebSocket>,
    session: &mut Session,
    conn: ConnId,
    deadline: Duration,
) {
    loop {
        let next = match timeout(deadline, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                info!(%conn, "read deadline expired");
                return;
            }
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                trace!(%conn, len = text.as_str().len(), "frame in");
                if session.handle_text(text.as_str()).await == Flow::Close {
                    return;
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(Message::Binary(_))) => debug!(%conn, "ignoring binary frame"),
            // Ping/Pong only refresh the deadline.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(%conn, "read error: {}", e);
                return;
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    closed: CancellationToken,
    conn: ConnId,
    timings: ConnectionTimings,
) {
    let deadline = timings.write_deadline;
    let mut keepalive = tokio::time::interval(timings.keepalive);
    keepalive.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = closed.cancelled() => break,

            frame = outbound.recv() => {
                // None: every sender is gone and the queue is drained.
                let Some(frame) = frame else { break };
                if !write(&mut sink, Message::Text(frame), conn, deadline).await {
                    break;
                }
            }

            _ = keepalive.tick() => {
                if !write(&mut sink, Message::Ping(Vec::new().into()), conn, deadline).await {
                    break;
                }
            }
        }
    }

    let _ = timeout(deadline, sink.send(Message::Close(None))).await;
    // Stop the read side too if the writer gave up first.
    closed.cancel();
}

async fn write(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: Message,
    conn: ConnId,
    deadline: Duration,
) -> bool {
    match timeout(deadline, sink.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(%conn, "write error: {}", e);
            false
        }
        Err(_) => {
            warn!(%conn, "write deadline expired");
            false
        }
    }
}
