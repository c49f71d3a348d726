use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Utf8Bytes;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use secchat_db::StoreHandle;
use secchat_types::events::ServerEvent;
use secchat_types::models::{Message, User};

use crate::error::HubError;
use crate::presence;

/// An encoded text frame, cheap to clone across every recipient.
pub type Frame = Utf8Bytes;

/// Per-connection outbound queue depth. A connection that lets this fill up
/// is evicted instead of stalling the broadcaster.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Process-unique identity of one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outcome of attaching a user to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// No other live connection carried this user id beforehand.
    pub first_connection: bool,
}

/// Serialize a value into a frame. Failures are logged and yield `None`.
pub fn encode<T: Serialize>(value: &T) -> Option<Frame> {
    match serde_json::to_string(value) {
        Ok(json) => Some(Frame::from(json)),
        Err(e) => {
            warn!("Failed to encode frame: {}", e);
            None
        }
    }
}

enum HubCommand {
    Register {
        conn: ConnId,
        outbound: mpsc::Sender<Frame>,
        closed: CancellationToken,
    },
    Authenticate {
        conn: ConnId,
        user: User,
        ack: Option<Frame>,
        reply: oneshot::Sender<Result<Admission, HubError>>,
    },
    Unregister(ConnId),
    Broadcast(Frame),
    BroadcastPresence,
    Presence(oneshot::Sender<Vec<User>>),
    OnlineIds(oneshot::Sender<HashSet<String>>),
    UpdateAvatar { user_id: String, avatar: String },
}

/// Handle to the hub actor. All membership changes and fan-out happen on the
/// actor task in submission order; snapshots are request/response messages
/// into the same queue.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::UnboundedSender<HubCommand>,
    next_conn_id: Arc<AtomicU64>,
    store: StoreHandle,
}

impl Hub {
    /// Start the actor on the current runtime.
    pub fn spawn(store: StoreHandle) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(HubActor::new(store.clone()).run(rx));
        Self {
            commands,
            next_conn_id: Arc::new(AtomicU64::new(1)),
            store,
        }
    }

    fn send(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.commands.send(cmd).map_err(|_| HubError::Closed)
    }

    fn submit(&self, cmd: HubCommand) {
        if self.send(cmd).is_err() {
            warn!("Hub actor is gone, command dropped");
        }
    }

    /// Add a connection to the live set, unverified. `closed` is cancelled if
    /// the hub evicts it.
    pub fn register(&self, outbound: mpsc::Sender<Frame>, closed: CancellationToken) -> ConnId {
        let conn = ConnId(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
        self.submit(HubCommand::Register {
            conn,
            outbound,
            closed,
        });
        conn
    }

    /// Mark a connection verified for `user`. `ack` is queued on that
    /// connection before it starts receiving broadcasts.
    pub async fn authenticate(
        &self,
        conn: ConnId,
        user: User,
        ack: Option<Frame>,
    ) -> Result<Admission, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Authenticate {
            conn,
            user,
            ack,
            reply,
        })?;
        rx.await.map_err(|_| HubError::Closed)?
    }

    /// Remove a connection. Unknown ids are ignored.
    pub fn unregister(&self, conn: ConnId) {
        self.submit(HubCommand::Unregister(conn));
    }

    /// Deliver a frame to every verified connection.
    pub fn broadcast(&self, frame: Frame) {
        self.submit(HubCommand::Broadcast(frame));
    }

    pub fn broadcast_event<T: Serialize>(&self, value: &T) {
        if let Some(frame) = encode(value) {
            self.broadcast(frame);
        }
    }

    /// Broadcast the presence list as it stands when the actor gets to it.
    pub fn broadcast_presence(&self) {
        self.submit(HubCommand::BroadcastPresence);
    }

    /// Distinct online users with persisted avatars merged in.
    pub async fn presence(&self) -> Result<Vec<User>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Presence(reply))?;
        let online = rx.await.map_err(|_| HubError::Closed)?;
        Ok(presence::with_stored_avatars(online, &self.store).await)
    }

    pub async fn online_ids(&self) -> Result<HashSet<String>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::OnlineIds(reply))?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Push a new avatar into every live cached copy of the user. Does not
    /// broadcast.
    pub fn update_avatar(&self, user_id: impl Into<String>, avatar: impl Into<String>) {
        self.submit(HubCommand::UpdateAvatar {
            user_id: user_id.into(),
            avatar: avatar.into(),
        });
    }
}

struct Registered {
    outbound: mpsc::Sender<Frame>,
    closed: CancellationToken,
    /// Set once verified.
    user: Option<User>,
}

struct HubActor {
    store: StoreHandle,
    connections: HashMap<ConnId, Registered>,
    /// user id -> live verified connections
    users: BTreeMap<String, BTreeSet<ConnId>>,
}

impl HubActor {
    fn new(store: StoreHandle) -> Self {
        Self {
            store,
            connections: HashMap::new(),
            users: BTreeMap::new(),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(cmd) = commands.recv().await {
            self.handle(cmd).await;
        }
        debug!("Hub command channel closed, actor exiting");
    }

    async fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register {
                conn,
                outbound,
                closed,
            } => {
                self.connections.insert(
                    conn,
                    Registered {
                        outbound,
                        closed,
                        user: None,
                    },
                );
                debug!(%conn, live = self.connections.len(), "registered");
            }

            HubCommand::Authenticate {
                conn,
                user,
                ack,
                reply,
            } => {
                let (result, displaced) = self.authenticate(conn, user, ack);
                let _ = reply.send(result);
                if let Some(previous) = displaced {
                    let frame = self.leave_notice(&previous).await;
                    self.fan_out(frame.into_iter().collect()).await;
                }
            }

            HubCommand::Unregister(conn) => {
                let follow_up = self.detach(conn, false).await;
                self.fan_out(follow_up).await;
            }

            HubCommand::Broadcast(frame) => self.fan_out(vec![frame]).await,

            HubCommand::BroadcastPresence => {
                let frame = self.presence_frame().await;
                self.fan_out(frame.into_iter().collect()).await;
            }

            HubCommand::Presence(reply) => {
                let _ = reply.send(self.online_users());
            }

            HubCommand::OnlineIds(reply) => {
                let _ = reply.send(self.users.keys().cloned().collect());
            }

            HubCommand::UpdateAvatar { user_id, avatar } => {
                for entry in self.connections.values_mut() {
                    if let Some(user) = entry.user.as_mut().filter(|u| u.id == user_id) {
                        user.avatar = avatar.clone();
                    }
                }
            }
        }
    }

    /// Attach `user` to `conn`. The second value is the previous user of a
    /// re-authenticated socket when this was that user's last connection.
    fn authenticate(
        &mut self,
        conn: ConnId,
        mut user: User,
        ack: Option<Frame>,
    ) -> (Result<Admission, HubError>, Option<User>) {
        let Some(entry) = self.connections.get_mut(&conn) else {
            return (Err(HubError::NotRegistered(conn)), None);
        };

        // Re-auth on the same socket: drop the previous index entry first.
        let mut reauth_same_user = false;
        let mut displaced = None;
        if let Some(previous) = entry.user.take() {
            reauth_same_user = previous.id == user.id;
            let remaining = unindex(&mut self.users, &previous.id, conn);
            if !reauth_same_user && remaining == 0 {
                displaced = Some(previous);
            }
        }

        let first_connection = !reauth_same_user
            && self.users.get(&user.id).is_none_or(|conns| conns.is_empty());

        if let Some(ack) = ack {
            if entry.outbound.try_send(ack).is_err() {
                warn!(%conn, "could not queue auth acknowledgement");
            }
        }

        user.online = true;
        self.users.entry(user.id.clone()).or_default().insert(conn);
        info!(%conn, user_id = %user.id, first_connection, "connection verified");
        entry.user = Some(user);

        (Ok(Admission { first_connection }), displaced)
    }

    /// Persist and encode "<name> left the chat".
    async fn leave_notice(&self, user: &User) -> Option<Frame> {
        info!(user_id = %user.id, "last connection closed");
        let left = Message::left(&user.name);
        if let Err(e) = self.store.save_message(left.clone()).await {
            warn!("Failed to persist leave notice for {}: {}", user.id, e);
        }
        encode(&left)
    }

    /// Drop a connection and return the frames its departure produces.
    /// `evict` also fires its close signal.
    async fn detach(&mut self, conn: ConnId, evict: bool) -> Vec<Frame> {
        let Some(entry) = self.connections.remove(&conn) else {
            return Vec::new();
        };
        if evict {
            entry.closed.cancel();
        }
        debug!(%conn, evict, live = self.connections.len(), "unregistered");

        let Some(user) = entry.user else {
            return Vec::new();
        };

        let mut frames = Vec::new();
        if unindex(&mut self.users, &user.id, conn) == 0 {
            frames.extend(self.leave_notice(&user).await);
        }
        frames.extend(self.presence_frame().await);
        frames
    }

    /// Deliver frames to every verified connection without blocking. Full or
    /// closed queues are evicted and whatever their departure produces is
    /// delivered after the current frames.
    async fn fan_out(&mut self, frames: Vec<Frame>) {
        let mut pending: VecDeque<Frame> = frames.into();

        while let Some(frame) = pending.pop_front() {
            let mut evicted = Vec::new();
            for (conn, entry) in &self.connections {
                if entry.user.is_none() {
                    continue;
                }
                match entry.outbound.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(%conn, "outbound queue full, dropping slow connection");
                        evicted.push(*conn);
                    }
                    Err(TrySendError::Closed(_)) => evicted.push(*conn),
                }
            }

            for conn in evicted {
                let follow_up = self.detach(conn, true).await;
                pending.extend(follow_up);
            }
        }
    }

    /// One entry per user id, taken from that user's newest connection.
    fn online_users(&self) -> Vec<User> {
        self.users
            .values()
            .filter_map(|conns| conns.last())
            .filter_map(|conn| self.connections.get(conn))
            .filter_map(|entry| entry.user.clone())
            .collect()
    }

    async fn presence_frame(&self) -> Option<Frame> {
        let users = presence::with_stored_avatars(self.online_users(), &self.store).await;
        encode(&ServerEvent::Users { users })
    }
}

/// Remove `conn` from the user's index entry, dropping the entry when it
/// empties. Returns how many connections remain for the user.
fn unindex(users: &mut BTreeMap<String, BTreeSet<ConnId>>, user_id: &str, conn: ConnId) -> usize {
    let Some(conns) = users.get_mut(user_id) else {
        return 0;
    };
    conns.remove(&conn);
    let remaining = conns.len();
    if remaining == 0 {
        users.remove(user_id);
    }
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;
    use secchat_db::Database;
    use serde_json::Value;
    use std::time::Duration;

    struct Peer {
        conn: ConnId,
        rx: mpsc::Receiver<Frame>,
        closed: CancellationToken,
    }

    fn hub_with_store() -> (Hub, StoreHandle) {
        let store = StoreHandle::new(Database::open_in_memory().unwrap());
        (Hub::spawn(store.clone()), store)
    }

    fn connect(hub: &Hub, capacity: usize) -> Peer {
        let (tx, rx) = mpsc::channel(capacity);
        let closed = CancellationToken::new();
        let conn = hub.register(tx, closed.clone());
        Peer { conn, rx, closed }
    }

    async fn verify(hub: &Hub, peer: &Peer, id: &str, name: &str) -> Admission {
        hub.authenticate(peer.conn, User::new(id, name), None).await.unwrap()
    }

    /// Round-trip through the actor so everything queued before is applied.
    async fn settle(hub: &Hub) {
        hub.online_ids().await.unwrap();
    }

    fn drain(peer: &mut Peer) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = peer.rx.try_recv() {
            frames.push(serde_json::from_str(frame.as_str()).unwrap());
        }
        frames
    }

    fn system_contents(frames: &[Value]) -> Vec<String> {
        frames
            .iter()
            .filter(|f| f["type"] == "system")
            .map(|f| f["content"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn only_first_connection_of_a_user_is_first() {
        let (hub, _) = hub_with_store();
        let a = connect(&hub, 8);
        let b = connect(&hub, 8);
        let c = connect(&hub, 8);

        assert!(verify(&hub, &a, "u1", "Alice").await.first_connection);
        assert!(!verify(&hub, &b, "u1", "Alice").await.first_connection);
        assert!(verify(&hub, &c, "u2", "Bob").await.first_connection);
    }

    #[tokio::test]
    async fn authenticate_unknown_connection_fails() {
        let (hub, _) = hub_with_store();
        let a = connect(&hub, 8);
        hub.unregister(a.conn);

        let err = hub.authenticate(a.conn, User::new("u1", "Alice"), None).await;
        assert!(matches!(err, Err(HubError::NotRegistered(_))));
    }

    #[tokio::test]
    async fn broadcast_skips_unverified_connections() {
        let (hub, _) = hub_with_store();
        let mut verified = connect(&hub, 8);
        let mut anonymous = connect(&hub, 8);
        verify(&hub, &verified, "u1", "Alice").await;

        hub.broadcast_event(&ServerEvent::error("hello"));
        settle(&hub).await;

        assert_eq!(drain(&mut verified).len(), 1);
        assert!(drain(&mut anonymous).is_empty());
    }

    #[tokio::test]
    async fn broadcasts_arrive_in_submission_order() {
        let (hub, _) = hub_with_store();
        let mut a = connect(&hub, 64);
        verify(&hub, &a, "u1", "Alice").await;

        for i in 0..20 {
            hub.broadcast_event(&ServerEvent::error(format!("{}", i)));
        }
        settle(&hub).await;

        let got: Vec<String> = drain(&mut a)
            .iter()
            .map(|f| f["message"].as_str().unwrap().to_string())
            .collect();
        let want: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn presence_is_deduplicated_per_user() {
        let (hub, _) = hub_with_store();
        let a = connect(&hub, 8);
        let b = connect(&hub, 8);
        let c = connect(&hub, 8);
        verify(&hub, &a, "u1", "Alice").await;
        verify(&hub, &b, "u1", "Alice").await;
        verify(&hub, &c, "u2", "Bob").await;
        let _unverified = connect(&hub, 8);

        let users = hub.presence().await.unwrap();
        let ids: Vec<&str> = users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
        assert!(users.iter().all(|u| u.online));
    }

    #[tokio::test]
    async fn closing_one_of_two_devices_keeps_user_online_without_left_notice() {
        let (hub, store) = hub_with_store();
        let a = connect(&hub, 8);
        let b = connect(&hub, 8);
        let mut observer = connect(&hub, 8);
        verify(&hub, &a, "u1", "Alice").await;
        verify(&hub, &b, "u1", "Alice").await;
        verify(&hub, &observer, "u2", "Bob").await;
        settle(&hub).await;
        drain(&mut observer);

        hub.unregister(a.conn);
        settle(&hub).await;

        let frames = drain(&mut observer);
        assert!(system_contents(&frames).is_empty());
        let users_frames: Vec<&Value> = frames.iter().filter(|f| f["type"] == "users").collect();
        assert_eq!(users_frames.len(), 1);
        assert!(hub.online_ids().await.unwrap().contains("u1"));

        hub.unregister(b.conn);
        settle(&hub).await;

        let frames = drain(&mut observer);
        assert_eq!(system_contents(&frames), vec!["Alice left the chat"]);
        let last_users = frames.iter().rev().find(|f| f["type"] == "users").unwrap();
        assert_eq!(last_users["users"].as_array().unwrap().len(), 1);
        assert!(!hub.online_ids().await.unwrap().contains("u1"));

        let history = store.get_messages(i64::MAX, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Alice left the chat");
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let (hub, _) = hub_with_store();
        let a = connect(&hub, 8);
        let mut observer = connect(&hub, 8);
        verify(&hub, &a, "u1", "Alice").await;
        verify(&hub, &observer, "u2", "Bob").await;
        settle(&hub).await;
        drain(&mut observer);

        hub.unregister(a.conn);
        hub.unregister(a.conn);
        settle(&hub).await;

        let frames = drain(&mut observer);
        assert_eq!(system_contents(&frames).len(), 1);
        assert_eq!(frames.iter().filter(|f| f["type"] == "users").count(), 1);
    }

    #[tokio::test]
    async fn unverified_departure_is_silent() {
        let (hub, _) = hub_with_store();
        let anonymous = connect(&hub, 8);
        let mut observer = connect(&hub, 8);
        verify(&hub, &observer, "u2", "Bob").await;
        settle(&hub).await;
        drain(&mut observer);

        hub.unregister(anonymous.conn);
        settle(&hub).await;
        assert!(drain(&mut observer).is_empty());
    }

    #[tokio::test]
    async fn slow_connection_is_evicted_without_stalling_others() {
        let (hub, _) = hub_with_store();
        let slow = connect(&hub, 1);
        let mut fast = connect(&hub, 64);
        verify(&hub, &slow, "u1", "Alice").await;
        verify(&hub, &fast, "u2", "Bob").await;

        hub.broadcast_event(&ServerEvent::error("one"));
        hub.broadcast_event(&ServerEvent::error("two"));
        settle(&hub).await;

        assert!(slow.closed.is_cancelled());
        assert!(!fast.closed.is_cancelled());
        let ids = hub.online_ids().await.unwrap();
        assert!(!ids.contains("u1"));
        assert!(ids.contains("u2"));

        let frames = drain(&mut fast);
        let errors: Vec<&str> = frames
            .iter()
            .filter(|f| f["type"] == "error")
            .map(|f| f["message"].as_str().unwrap())
            .collect();
        assert_eq!(errors, vec!["one", "two"]);
        assert_eq!(system_contents(&frames), vec!["Alice left the chat"]);
    }

    #[tokio::test]
    async fn ack_precedes_broadcasts_on_the_new_connection() {
        let (hub, _) = hub_with_store();
        let mut a = connect(&hub, 8);
        let ack = encode(&ServerEvent::AuthSuccess {
            user_id: "u1".into(),
            message: "ok".into(),
        });
        hub.authenticate(a.conn, User::new("u1", "Alice"), ack).await.unwrap();
        hub.broadcast_presence();
        settle(&hub).await;

        let frames = drain(&mut a);
        assert_eq!(frames[0]["type"], "auth_success");
        assert_eq!(frames[1]["type"], "users");
    }

    #[tokio::test]
    async fn avatar_update_reaches_cached_users() {
        let (hub, _) = hub_with_store();
        let a = connect(&hub, 8);
        let b = connect(&hub, 8);
        verify(&hub, &a, "u1", "Alice").await;
        verify(&hub, &b, "u1", "Alice").await;

        hub.update_avatar("u1", "/uploads/new.png");
        let users = hub.presence().await.unwrap();
        assert_eq!(users[0].avatar, "/uploads/new.png");
    }

    #[tokio::test]
    async fn presence_prefers_stored_avatar() {
        let (hub, store) = hub_with_store();
        store
            .save_user(User::new("u1", "Alice").with_avatar("/stored.png"))
            .await
            .unwrap();
        let a = connect(&hub, 8);
        hub.authenticate(a.conn, User::new("u1", "Alice").with_avatar("/cached.png"), None)
            .await
            .unwrap();

        let users = hub.presence().await.unwrap();
        assert_eq!(users[0].avatar, "/stored.png");
    }

    #[tokio::test]
    async fn concurrent_logins_yield_exactly_one_first_connection() {
        let (hub, _) = hub_with_store();
        let peers: Vec<Peer> = (0..16).map(|_| connect(&hub, 8)).collect();

        let mut tasks = Vec::new();
        for peer in &peers {
            let hub = hub.clone();
            let conn = peer.conn;
            tasks.push(tokio::spawn(async move {
                hub.authenticate(conn, User::new("u1", "Alice"), None).await.unwrap()
            }));
        }

        let mut firsts = 0;
        for task in tasks {
            if tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .unwrap()
                .unwrap()
                .first_connection
            {
                firsts += 1;
            }
        }
        assert_eq!(firsts, 1);
    }

    #[tokio::test]
    async fn reauth_as_another_user_announces_previous_departure() {
        let (hub, store) = hub_with_store();
        let a = connect(&hub, 8);
        let mut observer = connect(&hub, 8);
        verify(&hub, &a, "u1", "Alice").await;
        verify(&hub, &observer, "u2", "Bob").await;
        settle(&hub).await;
        drain(&mut observer);

        let admission = verify(&hub, &a, "u3", "Carol").await;
        assert!(admission.first_connection);
        settle(&hub).await;

        assert_eq!(system_contents(&drain(&mut observer)), vec!["Alice left the chat"]);
        let ids = hub.online_ids().await.unwrap();
        assert!(!ids.contains("u1"));
        assert!(ids.contains("u3"));
        let history = store.get_messages(i64::MAX, 10).await.unwrap();
        assert_eq!(history[0].content, "Alice left the chat");
    }

    #[tokio::test]
    async fn reauth_away_from_a_shared_user_is_silent() {
        let (hub, _) = hub_with_store();
        let a = connect(&hub, 8);
        let b = connect(&hub, 8);
        let mut observer = connect(&hub, 8);
        verify(&hub, &a, "u1", "Alice").await;
        verify(&hub, &b, "u1", "Alice").await;
        verify(&hub, &observer, "u2", "Bob").await;
        settle(&hub).await;
        drain(&mut observer);

        verify(&hub, &a, "u3", "Carol").await;
        settle(&hub).await;

        assert!(system_contents(&drain(&mut observer)).is_empty());
        assert!(hub.online_ids().await.unwrap().contains("u1"));
    }

    #[test]
    fn unindex_drops_empty_entries() {
        let mut users = BTreeMap::new();
        users.entry("u1".to_string()).or_insert_with(BTreeSet::new).insert(ConnId(1));
        users.get_mut("u1").unwrap().insert(ConnId(2));

        assert_eq!(unindex(&mut users, "u1", ConnId(1)), 1);
        assert_eq!(unindex(&mut users, "u1", ConnId(2)), 0);
        assert!(users.is_empty());
        assert_eq!(unindex(&mut users, "u1", ConnId(3)), 0);
    }
}
