//! Chess Session Server
//!
//! TCP accept loop. Each connection opens with a `Hello`, after which it is
//! handed to the play, view or replay handler for the rest of its life.
//! Matchmaking runs as one background task next to the accept loop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::game::rules::StandardRules;
use crate::network::browser::run_browser;
use crate::network::codec::{read_frame, write_frame};
use crate::network::context::ServerContext;
use crate::network::error::{ConnectionError, ProtocolError};
use crate::network::matchmaking::run_matchmaking_loop;
use crate::network::protocol::{ErrorCode, Hello, Role, ServerError, PROTOCOL_VERSION};
use crate::network::relay::run_player;
use crate::network::viewer::run_viewer;
use crate::ratings::InMemoryRatings;

/// Listen address.
pub const ENV_BIND_ADDR: &str = "CHESS_BIND_ADDR";
/// Connection cap.
pub const ENV_MAX_CONNECTIONS: &str = "CHESS_MAX_CONNECTIONS";
/// Replay directory.
pub const ENV_REPLAY_DIR: &str = "CHESS_REPLAY_DIR";
/// Whole-game clock, seconds.
pub const ENV_GAME_CLOCK_SECS: &str = "CHESS_GAME_CLOCK_SECS";
/// Per-side clock, seconds.
pub const ENV_PLAYER_CLOCK_SECS: &str = "CHESS_PLAYER_CLOCK_SECS";
/// Viewer cap per session.
pub const ENV_MAX_VIEWERS: &str = "CHESS_MAX_VIEWERS";
/// Per-player outbound queue depth.
pub const ENV_OUTBOUND_BUFFER: &str = "CHESS_OUTBOUND_BUFFER";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Where finished sessions are stored.
    pub replay_dir: PathBuf,
    /// Whole-game clock per session, seconds.
    pub game_clock_secs: u32,
    /// Clock per side, seconds.
    pub player_clock_secs: u32,
    /// Maximum viewers per session.
    pub max_viewers: u32,
    /// Messages buffered per player before senders wait.
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5555)),
            max_connections: 1000,
            replay_dir: PathBuf::from("replay"),
            game_clock_secs: 3600,
            player_clock_secs: 600,
            max_viewers: 64,
            outbound_buffer: 64,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `CHESS_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or(ENV_BIND_ADDR, defaults.bind_addr),
            max_connections: env_or(ENV_MAX_CONNECTIONS, defaults.max_connections),
            replay_dir: env_or(ENV_REPLAY_DIR, defaults.replay_dir),
            game_clock_secs: env_or(ENV_GAME_CLOCK_SECS, defaults.game_clock_secs),
            player_clock_secs: env_or(ENV_PLAYER_CLOCK_SECS, defaults.player_clock_secs),
            max_viewers: env_or(ENV_MAX_VIEWERS, defaults.max_viewers),
            // A zero-capacity channel cannot be built.
            outbound_buffer: env_or(ENV_OUTBOUND_BUFFER, defaults.outbound_buffer).max(1),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    parse_or(name, std::env::var(name).ok().as_deref(), default)
}

fn parse_or<T: FromStr>(name: &str, raw: Option<&str>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(var = name, value = raw, "Invalid configuration value, using default");
            default
        }),
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Live connection count, released when the connection task ends.
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The session server.
pub struct GameServer {
    /// Shared state.
    ctx: Arc<ServerContext>,
    /// Open connections.
    connections: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server with standard chess rules and in-memory ratings.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_context(ServerContext::new(
            config,
            Arc::new(StandardRules),
            Arc::new(InMemoryRatings::new()),
        ))
    }

    /// Create a server around an existing context.
    pub fn with_context(ctx: ServerContext) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            ctx: Arc::new(ctx),
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Shared state.
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.ctx.config.bind_addr).await?;
        info!("Chess session server listening on {}", self.ctx.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve an already-bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let matchmaking_handle = tokio::spawn(run_matchmaking_loop(
            self.ctx.clone(),
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::Relaxed) >= self.ctx.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(refuse(stream));
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        matchmaking_handle.abort();
        Ok(())
    }

    /// Spawn the task that owns one connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        self.connections.fetch_add(1, Ordering::Relaxed);
        let slot = ConnectionSlot(self.connections.clone());
        let ctx = self.ctx.clone();

        tokio::spawn(async move {
            let _slot = slot;
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
            }
            let (mut reader, mut writer) = stream.into_split();

            let result = match handshake(&mut reader, &mut writer).await {
                Ok(Role::Play) => run_player(reader, writer, ctx).await,
                Ok(Role::View) => run_viewer(reader, writer, &ctx).await,
                Ok(Role::Replay) => run_browser(reader, writer, &ctx.replays).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => debug!("Client {} finished", addr),
                Err(e) if e.is_closed() => debug!("Client {} disconnected", addr),
                Err(e) => warn!("Connection {} ended: {}", addr, e),
            }
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get open connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Get session count.
    pub async fn session_count(&self) -> usize {
        self.ctx.registry.session_count().await
    }

    /// Get matchmaking queue size.
    pub async fn queue_size(&self) -> usize {
        self.ctx.queue.len().await
    }
}

/// Read the opening `Hello`; refuse clients on another protocol version.
async fn handshake<R, W>(reader: &mut R, writer: &mut W) -> Result<Role, ConnectionError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let hello: Hello = read_frame(reader).await?;
    if hello.version != PROTOCOL_VERSION {
        let refusal = ServerError {
            code: ErrorCode::VersionMismatch,
            message: format!("server speaks protocol {}", PROTOCOL_VERSION),
        };
        write_frame(writer, &refusal).await?;
        return Err(ProtocolError::VersionMismatch(hello.version).into());
    }
    Ok(hello.role)
}

/// Tell an over-limit client why it is being dropped.
async fn refuse(mut stream: TcpStream) {
    let refusal = ServerError {
        code: ErrorCode::ServerOverloaded,
        message: "connection limit reached".to_string(),
    };
    if let Err(e) = write_frame(&mut stream, &refusal).await {
        debug!("Failed to send refusal: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rules::Color;
    use crate::game::session::{MoveRecord, PlayerId, SessionSnapshot, SessionState};
    use crate::network::codec::TransportError;
    use crate::network::protocol::{
        BoardUpdate, PlayClientMessage, PlayServerMessage, ReplayClientMessage,
        ReplayServerMessage, ViewClientMessage, ViewServerMessage,
    };
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    async fn start() -> (TempDir, Arc<GameServer>, SocketAddr) {
        let dir = tempdir().unwrap();
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            replay_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let server = Arc::new(GameServer::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await });
        }
        (dir, server, addr)
    }

    async fn connect(addr: SocketAddr, role: Role) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, &Hello::new(role)).await.unwrap();
        stream
    }

    async fn join(addr: SocketAddr) -> (PlayerId, TcpStream) {
        let mut stream = connect(addr, Role::Play).await;
        match read_frame(&mut stream).await.unwrap() {
            PlayServerMessage::Welcome { player_id, state } => {
                assert_eq!(state, SessionState::InQueue);
                (player_id, stream)
            }
            other => panic!("expected welcome, got {:?}", other),
        }
    }

    async fn recv_session(stream: &mut TcpStream) -> SessionSnapshot {
        match read_frame(stream).await.unwrap() {
            PlayServerMessage::Session(record) => record,
            other => panic!("expected session record, got {:?}", other),
        }
    }

    async fn wait_for_queue(server: &GameServer, len: usize) {
        for _ in 0..200 {
            if server.queue_size().await == len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue never reached {}", len);
    }

    /// Two players in arrival order, paired and with the start records read.
    async fn start_game(server: &GameServer, addr: SocketAddr) -> (TcpStream, TcpStream, SessionSnapshot) {
        let (white_id, mut white) = join(addr).await;
        wait_for_queue(server, 1).await;
        let (black_id, mut black) = join(addr).await;

        let record = recv_session(&mut white).await;
        assert_eq!(recv_session(&mut black).await, record);
        assert_eq!(record.state, SessionState::Ready);
        assert_eq!(record.white, Some(white_id));
        assert_eq!(record.black, Some(black_id));
        (white, black, record)
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 5555);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.replay_dir, PathBuf::from("replay"));
        assert_eq!(config.game_clock_secs, 3600);
        assert_eq!(config.player_clock_secs, 600);
    }

    #[test]
    fn test_config_value_parsing() {
        assert_eq!(parse_or("X", Some("42"), 7u32), 42);
        assert_eq!(parse_or("X", Some(" 9 "), 7u32), 9);
        assert_eq!(parse_or("X", Some("lots"), 7u32), 7);
        assert_eq!(parse_or("X", None, 7u32), 7);
        let addr: SocketAddr = parse_or("X", Some("127.0.0.1:6000"), SocketAddr::from(([0, 0, 0, 0], 1)));
        assert_eq!(addr.port(), 6000);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::new(ServerConfig::default());
        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.session_count().await, 0);
        assert_eq!(server.queue_size().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Arc::new(GameServer::new(ServerConfig::default()));
        let task = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };
        // Let the accept loop subscribe first.
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_version_mismatch_refused() {
        let (_dir, _server, addr) = start().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, &Hello { version: PROTOCOL_VERSION + 1, role: Role::Play }).await.unwrap();

        let refusal: ServerError = read_frame(&mut stream).await.unwrap();
        assert_eq!(refusal.code, ErrorCode::VersionMismatch);
        let next = read_frame::<_, PlayServerMessage>(&mut stream).await;
        assert!(matches!(next, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_game_relay_disconnect_and_replay() {
        let (_dir, server, addr) = start().await;
        let (mut white, mut black, record) = start_game(&server, addr).await;

        // White moves; black sees the new board with the turn passed.
        let board = StandardRules.apply_uci(&record.board, "e2e4").unwrap();
        let update = PlayClientMessage::Update(BoardUpdate {
            board: board.clone(),
            annotation: Some(MoveRecord { time_spent: 2, captured: None }),
        });
        write_frame(&mut white, &update).await.unwrap();
        let relayed = recv_session(&mut black).await;
        assert_eq!(relayed.board, board);
        assert_eq!(relayed.turn, Color::Black);
        assert_eq!(relayed.moves, vec![MoveRecord { time_spent: 2, captured: None }]);

        // Black drops; white is told it won.
        drop(black);
        let ended = recv_session(&mut white).await;
        assert_eq!(ended.state, SessionState::Disconnect);
        assert_eq!(ended.winner, Some(Color::White));
        assert_eq!(ended.board, board);

        // The finished game is browsable.
        let mut browser = connect(addr, Role::Replay).await;
        write_frame(&mut browser, &ReplayClientMessage::ListAll).await.unwrap();
        let ReplayServerMessage::Keys { keys } = read_frame(&mut browser).await.unwrap() else {
            panic!("expected keys");
        };
        assert_eq!(keys.len(), 1);
        assert!(keys[0].ends_with(&format!("_{}", record.id)));

        write_frame(&mut browser, &ReplayClientMessage::Fetch { key: keys[0].clone() }).await.unwrap();
        let ReplayServerMessage::Record(stored) = read_frame(&mut browser).await.unwrap() else {
            panic!("expected record");
        };
        assert_eq!(stored.session.winner, Some(Color::White));
        assert_eq!(stored.session.moves.len(), 1);

        // Survivor leaving evicts the session.
        write_frame(&mut white, &PlayClientMessage::Leave).await.unwrap();
        for _ in 0..200 {
            if server.session_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_viewer_watches_live_game() {
        let (_dir, server, addr) = start().await;
        let (_white, _black, record) = start_game(&server, addr).await;

        let mut viewer = connect(addr, Role::View).await;
        write_frame(&mut viewer, &ViewClientMessage::ListSessions).await.unwrap();
        let ViewServerMessage::Sessions { sessions } = read_frame(&mut viewer).await.unwrap() else {
            panic!("expected listing");
        };
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, record.id);

        write_frame(&mut viewer, &ViewClientMessage::Subscribe { session_id: record.id }).await.unwrap();
        write_frame(&mut viewer, &ViewClientMessage::Viewing).await.unwrap();
        let ViewServerMessage::Snapshot(snapshot) = read_frame(&mut viewer).await.unwrap() else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.id, record.id);
        assert_eq!(snapshot.viewers, 1);
        assert_eq!(snapshot.state, SessionState::Ready);
    }

    #[tokio::test]
    async fn test_queued_player_leaving_is_forgotten() {
        let (_dir, server, addr) = start().await;
        let (_id, lone) = join(addr).await;
        wait_for_queue(&server, 1).await;

        drop(lone);
        wait_for_queue(&server, 0).await;
        assert_eq!(server.session_count().await, 0);
    }
}
