use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use secchat_types::events::{AuthPayload, ClientFrame, ServerEvent};
use secchat_types::models::{Message, MessageType, User};
use secchat_types::now_millis;

use crate::GatewayContext;
use crate::hub::{ConnId, Frame, encode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(User),
    Closed,
}

/// What the read loop should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Protocol state of one socket. Owns the sending half of the connection's
/// outbound queue for direct replies; everything else goes through the hub.
pub struct Session {
    conn: ConnId,
    outbound: mpsc::Sender<Frame>,
    ctx: GatewayContext,
    state: SessionState,
}

impl Session {
    pub fn new(conn: ConnId, outbound: mpsc::Sender<Frame>, ctx: GatewayContext) -> Self {
        Self {
            conn,
            outbound,
            ctx,
            state: SessionState::Unauthenticated,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub async fn handle_text(&mut self, text: &str) -> Flow {
        if self.state == SessionState::Closed {
            return Flow::Close;
        }

        let frame: ClientFrame = match serde_json::from_str(text) {
            Ok(f) => f,
            Err(e) => {
                warn!(conn = %self.conn, "Invalid frame: {}", e);
                return Flow::Continue;
            }
        };

        match frame.kind.as_str() {
            "auth" => return self.handle_auth(frame).await,
            "ping" => {
                let version = self.ctx.version.clone();
                self.send(&ServerEvent::Pong { version });
            }
            "text" | "image" | "typing" | "recall" | "read" => {
                let SessionState::Authenticated(user) = &self.state else {
                    self.send(&ServerEvent::error("Not authenticated"));
                    return Flow::Continue;
                };
                let user = user.clone();
                match frame.kind.as_str() {
                    "typing" => self.ctx.hub.broadcast_event(&ServerEvent::Typing {
                        user_id: user.id,
                        user_name: user.name,
                    }),
                    "recall" => self.handle_recall(&user, frame).await,
                    "read" => self.handle_read(&user, frame),
                    _ => self.handle_chat(&user, frame).await,
                }
            }
            other => debug!(conn = %self.conn, "Ignoring frame type {:?}", other),
        }

        Flow::Continue
    }

    async fn handle_auth(&mut self, frame: ClientFrame) -> Flow {
        let payload = frame
            .payload
            .and_then(|p| serde_json::from_value::<AuthPayload>(p).ok());
        let Some(auth) = payload else {
            self.send(&ServerEvent::error("Invalid auth payload"));
            return Flow::Continue;
        };

        if !self.ctx.auth.verify(&auth.password_hash) {
            warn!(conn = %self.conn, user_id = %auth.user_id, "Rejected auth: invalid password");
            self.send(&ServerEvent::error("Invalid password"));
            self.state = SessionState::Closed;
            return Flow::Close;
        }

        let avatar = match auth.avatar.filter(|a| !a.is_empty()) {
            Some(avatar) => avatar,
            None => self.stored_avatar(&auth.user_id).await,
        };
        let user = User::new(auth.user_id, auth.user_name).with_avatar(avatar);

        let ack = encode(&ServerEvent::AuthSuccess {
            user_id: user.id.clone(),
            message: "Authentication successful".into(),
        });
        let admission = match self.ctx.hub.authenticate(self.conn, user.clone(), ack).await {
            Ok(a) => a,
            Err(e) => {
                warn!(conn = %self.conn, "Hub refused authentication: {}", e);
                self.state = SessionState::Closed;
                return Flow::Close;
            }
        };
        info!(conn = %self.conn, user_id = %user.id, name = %user.name, "authenticated");

        if let Err(e) = self.ctx.store.save_user(user.clone()).await {
            warn!("Failed to save user {}: {}", user.id, e);
        }

        if admission.first_connection {
            let joined = Message::joined(&user.name);
            if let Err(e) = self.ctx.store.save_message(joined.clone()).await {
                warn!("Failed to persist join notice for {}: {}", user.id, e);
            }
            self.ctx.hub.broadcast_event(&joined);
        }
        self.ctx.hub.broadcast_presence();

        self.state = SessionState::Authenticated(user);
        Flow::Continue
    }

    async fn stored_avatar(&self, user_id: &str) -> String {
        match self.ctx.store.get_user(user_id.to_string()).await {
            Ok(Some(user)) => user.avatar,
            Ok(None) => String::new(),
            Err(e) => {
                warn!("Failed to load stored avatar for {}: {}", user_id, e);
                String::new()
            }
        }
    }

    async fn handle_chat(&self, user: &User, frame: ClientFrame) {
        let kind = match frame.kind.parse::<MessageType>() {
            Ok(k) => k,
            Err(e) => {
                debug!("{}", e);
                return;
            }
        };

        let mut msg = Message::new(kind, &user.id, &user.name, frame.content);
        // Clients match the echo against the id they generated.
        if let Some(id) = frame.id.filter(|id| !id.is_empty()) {
            msg.id = id;
        }
        msg.reply_to = frame.reply_to;
        msg.mentions = frame.mentions;

        if let Err(e) = self.ctx.store.save_message(msg.clone()).await {
            warn!(conn = %self.conn, "Failed to save message {}: {}", msg.id, e);
            self.send(&ServerEvent::error("Failed to save message"));
        }
        self.ctx.hub.broadcast_event(&msg);
    }

    async fn handle_recall(&self, user: &User, frame: ClientFrame) {
        let Some(id) = frame.id.filter(|id| !id.is_empty()) else {
            self.send(&ServerEvent::error("Missing message id"));
            return;
        };

        if let Err(e) = self.ctx.store.recall_message(id.clone()).await {
            warn!("Failed to recall message {}: {}", id, e);
            self.send(&ServerEvent::error("Failed to recall message"));
            return;
        }

        self.ctx.hub.broadcast_event(&ServerEvent::Recall {
            id,
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            timestamp: now_millis(),
        });
    }

    fn handle_read(&self, user: &User, frame: ClientFrame) {
        let Some(message_id) = frame.id.filter(|id| !id.is_empty()) else {
            self.send(&ServerEvent::error("Missing message id"));
            return;
        };

        self.ctx.hub.broadcast_event(&ServerEvent::Read {
            message_id,
            user_id: user.id.clone(),
            timestamp: now_millis(),
        });
    }

    /// Direct reply to this connection only. Dropped if the queue is full.
    fn send<T: Serialize>(&self, value: &T) {
        let Some(frame) = encode(value) else { return };
        if self.outbound.try_send(frame).is_err() {
            warn!(conn = %self.conn, "Outbound queue unavailable, reply dropped");
        }
    }
}
