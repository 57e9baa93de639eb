//! Session orchestration: the authentication gate between raw connections and
//! the world.
//!
//! A connection starts unauthenticated. Only `register` and `login` are
//! honored until the [`AuthProvider`] accepts one of them; from then on the
//! connection owns a player in the [`World`] (keyed by the connection id),
//! its movement frames steer that player, and it receives every broadcast.

use dashmap::DashMap;
use log::{debug, error, info};
use shared::{encode_frame, ClientMessage, PlayerId, ServerMessage, NO_PLAYER_ID};
use std::sync::Arc;

use crate::auth::{AuthGrant, AuthProvider, ProfileId};
use crate::config::{ReauthPolicy, SessionConfig};
use crate::connection::{CloseReason, Connection, Frame, FrameHandler, SendOutcome};
use crate::simulation::TickHandler;
use crate::world::World;

/// Reply sent to an authenticated connection under [`ReauthPolicy::Reject`].
pub const ALREADY_AUTHENTICATED: &str = "Already authenticated";

/// An authenticated connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection: Connection,
    pub username: String,
    pub profile_id: ProfileId,
}

pub struct SessionManager<A> {
    world: Arc<World>,
    auth: Arc<A>,
    sessions: DashMap<PlayerId, Session>,
    config: SessionConfig,
}

impl<A: AuthProvider> SessionManager<A> {
    pub fn new(world: Arc<World>, auth: Arc<A>, config: SessionConfig) -> Self {
        Self {
            world,
            auth,
            sessions: DashMap::new(),
            config,
        }
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_authenticated(&self, id: PlayerId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn username(&self, id: PlayerId) -> Option<String> {
        self.sessions.get(&id).map(|session| session.username.clone())
    }

    async fn authenticate(&self, connection: &Connection, message: ClientMessage) {
        let id = connection.id();
        let (username, result) = match message {
            ClientMessage::Register {
                username,
                email,
                password,
            } => {
                let result = self.auth.register(&username, &email, &password).await;
                (username, result)
            }
            ClientMessage::Login { username, password } => {
                let result = self.auth.login(&username, &password).await;
                (username, result)
            }
            ClientMessage::Move(_) => return,
        };

        match result {
            Ok(grant) => self.admit(connection, grant).await,
            Err(e) => {
                info!("Authentication failed for connection {} ({}): {}", id, username, e);
                reply(connection, auth_failure(e.to_string(), username));
            }
        }
    }

    async fn admit(&self, connection: &Connection, grant: AuthGrant) {
        let id = connection.id();

        if !self.sessions.contains_key(&id) {
            self.world.add_player(id).await;
            self.sessions.insert(
                id,
                Session {
                    connection: connection.clone(),
                    username: grant.username.clone(),
                    profile_id: grant.profile_id,
                },
            );
            info!(
                "Connection {} authenticated as {} (profile {})",
                id, grant.username, grant.profile_id
            );
        }

        reply(
            connection,
            ServerMessage::AuthResponse {
                success: true,
                message: grant.message,
                player_id: i64::from(id),
                username: grant.username,
            },
        );
    }

    /// Sends the current world snapshot to every authenticated connection.
    /// Returns the number of connections the frame was queued for.
    pub async fn broadcast_world(&self) -> usize {
        if self.sessions.is_empty() {
            return 0;
        }

        let players = self.world.snapshot().await;
        let frame: Frame = match encode_frame(&ServerMessage::WorldState { players }) {
            Ok(frame) => frame.into(),
            Err(e) => {
                error!("Failed to encode world state: {}", e);
                return 0;
            }
        };

        let mut sent = 0;
        for session in self.sessions.iter() {
            match session.connection.send(Arc::clone(&frame)) {
                SendOutcome::Sent => sent += 1,
                SendOutcome::Dropped => {
                    debug!("World state to connection {} dropped", session.key())
                }
            }
        }
        sent
    }
}

impl<A: AuthProvider> FrameHandler for SessionManager<A> {
    fn on_connect(&self, connection: &Connection) {
        debug!(
            "Connection {} from {} awaiting authentication",
            connection.id(),
            connection.peer_addr()
        );
    }

    async fn on_frame(&self, connection: &Connection, message: ClientMessage) {
        let id = connection.id();
        let authenticated = self.sessions.contains_key(&id);

        match message {
            ClientMessage::Move(input) => {
                if !authenticated {
                    debug!("Dropping movement from unauthenticated connection {}", id);
                    return;
                }
                self.world.set_input(id, input).await;
            }
            auth => {
                if authenticated {
                    match self.config.reauth_policy {
                        ReauthPolicy::Reprocess => {}
                        ReauthPolicy::Ignore => {
                            debug!("Ignoring {} from authenticated connection {}", auth.kind(), id);
                            return;
                        }
                        ReauthPolicy::Reject => {
                            let username = self.username(id).unwrap_or_default();
                            reply(
                                connection,
                                auth_failure(ALREADY_AUTHENTICATED.to_string(), username),
                            );
                            return;
                        }
                    }
                }
                self.authenticate(connection, auth).await;
            }
        }
    }

    async fn on_disconnect(&self, connection: &Connection, reason: &CloseReason) {
        let id = connection.id();
        if let Some((_, session)) = self.sessions.remove(&id) {
            info!("{} left ({})", session.username, reason);
        }
        self.world.remove_player(id).await;
    }
}

impl<A: AuthProvider> TickHandler for SessionManager<A> {
    async fn on_tick(&self, _tick: u64) {
        self.broadcast_world().await;
    }
}

fn auth_failure(message: String, username: String) -> ServerMessage {
    ServerMessage::AuthResponse {
        success: false,
        message,
        player_id: NO_PLAYER_ID,
        username,
    }
}

fn reply(connection: &Connection, message: ServerMessage) {
    match encode_frame(&message) {
        Ok(frame) => {
            if connection.send(frame.into()) == SendOutcome::Dropped {
                debug!("Reply to connection {} dropped", connection.id());
            }
        }
        Err(e) => error!("Failed to encode reply: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryAuthProvider;
    use crate::config::ConnectionConfig;
    use crate::connection::ConnectionId;
    use shared::PlayerInput;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader, Lines};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::{sleep, timeout};

    type Manager = Arc<SessionManager<InMemoryAuthProvider>>;

    fn manager(policy: ReauthPolicy) -> Manager {
        let config = SessionConfig {
            reauth_policy: policy,
            ..SessionConfig::default()
        };
        Arc::new(SessionManager::new(
            Arc::new(World::new()),
            Arc::new(InMemoryAuthProvider::new()),
            config,
        ))
    }

    /// Opens a loopback connection whose frames are handled by `manager`.
    async fn attach(
        manager: &Manager,
        id: ConnectionId,
    ) -> (Connection, Lines<BufReader<TcpStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server_side, _) = listener.accept().await.unwrap();

        let (connection, io) =
            Connection::open(server_side, id, ConnectionConfig::default()).unwrap();
        manager.on_connect(&connection);
        io.spawn(connection.clone(), Arc::clone(manager));

        (connection, BufReader::new(client).lines())
    }

    async fn next_message(lines: &mut Lines<BufReader<TcpStream>>) -> ServerMessage {
        let line = timeout(Duration::from_secs(2), lines.next_line())
            .await
            .expect("no frame received")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }

    async fn expect_silence(lines: &mut Lines<BufReader<TcpStream>>) {
        let read = timeout(Duration::from_millis(200), lines.next_line()).await;
        assert!(read.is_err(), "unexpected frame: {:?}", read);
    }

    fn register(username: &str) -> ClientMessage {
        ClientMessage::Register {
            username: username.to_string(),
            email: format!("{}@test.com", username.to_lowercase()),
            password: "Passw0rd".to_string(),
        }
    }

    fn auth_response(message: ServerMessage) -> (bool, String, i64) {
        match message {
            ServerMessage::AuthResponse {
                success,
                message,
                player_id,
                ..
            } => (success, message, player_id),
            other => panic!("expected authResponse, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_admits_player() {
        let manager = manager(ReauthPolicy::Reprocess);
        let (connection, mut lines) = attach(&manager, 7).await;

        manager.on_frame(&connection, register("Alice")).await;

        let (success, message, player_id) = auth_response(next_message(&mut lines).await);
        assert!(success);
        assert_eq!(message, "Registration successful");
        assert_eq!(player_id, 7);
        assert!(manager.is_authenticated(7));
        assert!(manager.world().contains(7).await);
        assert_eq!(manager.username(7).as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_failed_auth_keeps_connection_unauthenticated() {
        let manager = manager(ReauthPolicy::Reprocess);
        let (connection, mut lines) = attach(&manager, 1).await;

        manager.on_frame(&connection, register("Al")).await;

        let (success, message, player_id) = auth_response(next_message(&mut lines).await);
        assert!(!success);
        assert_eq!(message, "Username must be at least 3 characters");
        assert_eq!(player_id, NO_PLAYER_ID);
        assert!(!manager.is_authenticated(1));
        assert!(manager.world().is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_username_is_rejected() {
        let manager = manager(ReauthPolicy::Reprocess);
        let (first, mut first_lines) = attach(&manager, 1).await;
        let (second, mut second_lines) = attach(&manager, 2).await;

        manager.on_frame(&first, register("Alice")).await;
        assert!(auth_response(next_message(&mut first_lines).await).0);

        manager.on_frame(&second, register("Alice")).await;
        let (success, message, player_id) = auth_response(next_message(&mut second_lines).await);
        assert!(!success);
        assert!(message.contains("already taken"));
        assert_eq!(player_id, -1);
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test]
    async fn test_movement_requires_authentication() {
        let manager = manager(ReauthPolicy::Reprocess);
        let (connection, mut lines) = attach(&manager, 3).await;
        let input = PlayerInput::new(1.0, 0.0, -1.0);

        manager
            .on_frame(&connection, ClientMessage::Move(input))
            .await;
        assert!(manager.world().is_empty().await);
        expect_silence(&mut lines).await;

        manager.on_frame(&connection, register("Carol")).await;
        next_message(&mut lines).await;
        manager
            .on_frame(&connection, ClientMessage::Move(input))
            .await;

        let player = manager.world().player(3).await.unwrap();
        assert_eq!(player.input, input);
        expect_silence(&mut lines).await;
    }

    #[tokio::test]
    async fn test_reauth_reprocess_replies_and_keeps_session() {
        let manager = manager(ReauthPolicy::Reprocess);
        let (connection, mut lines) = attach(&manager, 1).await;
        manager.on_frame(&connection, register("Alice")).await;
        next_message(&mut lines).await;

        let login = ClientMessage::Login {
            username: "Alice".to_string(),
            password: "Passw0rd".to_string(),
        };
        manager.on_frame(&connection, login).await;

        let (success, message, player_id) = auth_response(next_message(&mut lines).await);
        assert!(success);
        assert_eq!(message, "Login successful");
        assert_eq!(player_id, 1);
        assert_eq!(manager.session_count(), 1);
        assert_eq!(manager.world().len().await, 1);
    }

    #[tokio::test]
    async fn test_reauth_ignore_drops_request() {
        let manager = manager(ReauthPolicy::Ignore);
        let (connection, mut lines) = attach(&manager, 1).await;
        manager.on_frame(&connection, register("Alice")).await;
        next_message(&mut lines).await;

        manager.on_frame(&connection, register("Bob")).await;

        expect_silence(&mut lines).await;
        assert_eq!(manager.username(1).as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_reauth_reject_replies_failure() {
        let manager = manager(ReauthPolicy::Reject);
        let (connection, mut lines) = attach(&manager, 1).await;
        manager.on_frame(&connection, register("Alice")).await;
        next_message(&mut lines).await;

        manager.on_frame(&connection, register("Bob")).await;

        let (success, message, _) = auth_response(next_message(&mut lines).await);
        assert!(!success);
        assert_eq!(message, ALREADY_AUTHENTICATED);
        assert_eq!(manager.username(1).as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_disconnect_removes_player() {
        let manager = manager(ReauthPolicy::Reprocess);
        let (connection, mut lines) = attach(&manager, 1).await;
        manager.on_frame(&connection, register("Alice")).await;
        next_message(&mut lines).await;

        drop(lines);

        timeout(Duration::from_secs(2), async {
            while manager.session_count() > 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session was not removed");
        assert!(manager.world().is_empty().await);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_authenticated() {
        let manager = manager(ReauthPolicy::Reprocess);
        let (alice, mut alice_lines) = attach(&manager, 1).await;
        let (bob, mut bob_lines) = attach(&manager, 2).await;
        let (_lurker, mut lurker_lines) = attach(&manager, 3).await;

        manager.on_frame(&alice, register("Alice")).await;
        manager.on_frame(&bob, register("Bob")).await;
        next_message(&mut alice_lines).await;
        next_message(&mut bob_lines).await;

        manager.on_tick(1).await;

        for lines in [&mut alice_lines, &mut bob_lines] {
            match next_message(lines).await {
                ServerMessage::WorldState { players } => {
                    let ids: Vec<PlayerId> = players.iter().map(|p| p.player_id).collect();
                    assert_eq!(ids, vec![1, 2]);
                }
                other => panic!("expected worldState, got {:?}", other),
            }
        }
        expect_silence(&mut lurker_lines).await;
    }

    #[tokio::test]
    async fn test_broadcast_without_sessions_sends_nothing() {
        let manager = manager(ReauthPolicy::Reprocess);
        let (_connection, mut lines) = attach(&manager, 1).await;

        assert_eq!(manager.broadcast_world().await, 0);
        expect_silence(&mut lines).await;
    }
}
