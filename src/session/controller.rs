//! Session controller: connect, run, report, reconnect.
//!
//! ```text
//! ConnectStart -> (acquire link, handshake) -> Connected -> Disconnected | Error
//!      ^                                                         |
//!      +------------------- auto_reconnect ----------------------+
//! ```
//!
//! Every attempt starts from nothing: a new link, a new handshake and an
//! empty stream table. Closing the session is terminal and cancels an
//! attempt that is still in flight.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::status::{ConnectionStatus, DisconnectReason};
use crate::connection::{Connection, ConnectionError, ConnectionTask};
use crate::core::{CLOSE_NO_ERROR, LinkConnector, STATUS_CHANNEL_CAPACITY};

struct Inner {
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<ConnectionStatus>,
    connection: watch::Sender<Option<Connection>>,
}

impl Inner {
    fn publish(&self, status: ConnectionStatus) {
        match &status {
            ConnectionStatus::ConnectStart => debug!("connection attempt starting"),
            ConnectionStatus::Connected { metadata } => {
                info!(attempt = metadata.attempt, role = %metadata.role, "session connected")
            }
            ConnectionStatus::Error { cause } => warn!(%cause, "session connection failed"),
            ConnectionStatus::Disconnected { reason } => info!(%reason, "session disconnected"),
        }
        // No subscribers is fine.
        let _ = self.events.send(status.clone());
        self.status.send_replace(status);
    }
}

/// Owns the connection lifecycle for one peer.
///
/// # Example
///
/// ```ignore
/// let config = SessionConfig::builder(ConnectionConfig::pretrusted(Role::Client, key, salt))
///     .auto_reconnect(true)
///     .build();
/// let session = Session::start(connector, config);
/// let mut events = session.subscribe();
/// let conn = session.wait_connected().await.ok_or(ConnectionError::Closed)?;
/// ```
pub struct Session {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    finished: watch::Receiver<bool>,
}

impl Session {
    /// Spawn the session loop. The first attempt starts immediately.
    pub fn start<C: LinkConnector>(connector: C, config: SessionConfig) -> Session {
        let (status, _) = watch::channel(ConnectionStatus::ConnectStart);
        let (events, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let (connection, _) = watch::channel(None);
        let inner = Arc::new(Inner {
            status,
            events,
            connection,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (finished_tx, finished_rx) = watch::channel(false);

        let loop_inner = inner.clone();
        tokio::spawn(async move {
            run(connector, config, &loop_inner, shutdown_rx).await;
            loop_inner.connection.send_replace(None);
            finished_tx.send_replace(true);
        });

        Session {
            inner,
            shutdown: shutdown_tx,
            finished: finished_rx,
        }
    }

    /// Receive every status transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.inner.events.subscribe()
    }

    /// Latest status.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch the latest status.
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Current connection, if one is established.
    pub fn connection(&self) -> Option<Connection> {
        self.inner.connection.borrow().clone()
    }

    /// Wait for an established connection. `None` once the session is over.
    pub async fn wait_connected(&self) -> Option<Connection> {
        let mut connection = self.inner.connection.subscribe();
        let mut finished = self.finished.clone();
        loop {
            if let Some(conn) = connection.borrow_and_update().clone() {
                return Some(conn);
            }
            if *finished.borrow_and_update() {
                return None;
            }
            tokio::select! {
                changed = connection.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                changed = finished.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Check if the session has stopped for good.
    pub fn is_closed(&self) -> bool {
        *self.finished.borrow()
    }

    /// Close the session and wait for its loop to stop.
    ///
    /// The current connection is closed with code 0 and no further
    /// attempts are made.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        let mut finished = self.finished.clone();
        let _ = finished.wait_for(|done| *done).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn run<C: LinkConnector>(
    connector: C,
    config: SessionConfig,
    inner: &Inner,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt = 0u32;
    loop {
        attempt = attempt.wrapping_add(1);
        inner.publish(ConnectionStatus::ConnectStart);

        let result = tokio::select! {
            result = connect(&connector, &config, attempt) => result,
            _ = session_closed(&mut shutdown) => {
                inner.publish(ConnectionStatus::Disconnected {
                    reason: DisconnectReason::SessionClosed,
                });
                return;
            }
        };

        let status = match result {
            Ok((connection, task)) => {
                serve(inner, connection, task, &mut shutdown).await
            }
            Err(err) => ConnectionStatus::from(err),
        };
        inner.publish(status);

        if !config.auto_reconnect || *shutdown.borrow() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = session_closed(&mut shutdown) => return,
        }
    }
}

/// Resolve once the session is closed.
///
/// Releases the watch borrow before returning, so select arms using this
/// may await and the session loop stays `Send`.
async fn session_closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn connect<C: LinkConnector>(
    connector: &C,
    config: &SessionConfig,
    attempt: u32,
) -> Result<(Connection, ConnectionTask), ConnectionError> {
    let link = connector.connect().await.map_err(ConnectionError::Connect)?;
    Connection::establish_attempt(link, config.connection.clone(), attempt).await
}

/// Publish the connection and wait for it to end.
async fn serve(
    inner: &Inner,
    connection: Connection,
    mut task: ConnectionTask,
    shutdown: &mut watch::Receiver<bool>,
) -> ConnectionStatus {
    inner.connection.send_replace(Some(connection.clone()));
    inner.publish(ConnectionStatus::Connected {
        metadata: connection.metadata().clone(),
    });

    let outcome = tokio::select! {
        outcome = &mut task => outcome,
        _ = session_closed(shutdown) => {
            let _ = connection.close(CLOSE_NO_ERROR, "session closed");
            task.await
        }
    };
    inner.connection.send_replace(None);
    ConnectionStatus::from(outcome)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::{broadcast::error::RecvError, mpsc};

    use super::*;
    use crate::connection::{ConnectionConfig, ConnectionOutcome, ErrorCategory};
    use crate::core::{DEFAULT_MTU, Role};
    use crate::transport::{MemoryAcceptor, memory_connector};

    const KEY: &[u8] = b"session test key";
    const SALT: &[u8] = b"session test salt";

    fn client_config(auto_reconnect: bool) -> SessionConfig {
        SessionConfig::builder(ConnectionConfig::pretrusted(Role::Client, KEY, SALT))
            .auto_reconnect(auto_reconnect)
            .reconnect_delay(Duration::from_millis(10))
            .build()
    }

    /// Accept links and run a server handshake on each.
    fn serve_links(
        mut acceptor: MemoryAcceptor,
        key: &'static [u8],
    ) -> mpsc::UnboundedReceiver<(Connection, ConnectionTask)> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(link) = acceptor.accept().await {
                let config = ConnectionConfig::pretrusted(Role::Server, key, SALT);
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok(pair) = Connection::establish(link, config).await {
                        let _ = tx.send(pair);
                    }
                });
            }
        });
        rx
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_session_loop_is_send() {
        let (connector, _acceptor) = memory_connector(DEFAULT_MTU);
        let (_shutdown_tx, shutdown) = watch::channel(false);
        let inner = Inner {
            status: watch::channel(ConnectionStatus::ConnectStart).0,
            events: broadcast::channel(STATUS_CHANNEL_CAPACITY).0,
            connection: watch::channel(None).0,
        };
        let session_loop = run(connector, client_config(true), &inner, shutdown);
        assert_send(&session_loop);
    }

    async fn next_status(events: &mut broadcast::Receiver<ConnectionStatus>) -> ConnectionStatus {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(status)) => status,
            Ok(Err(RecvError::Lagged(n))) => panic!("lagged by {n}"),
            Ok(Err(RecvError::Closed)) => panic!("status channel closed"),
            Err(_) => panic!("no status within timeout"),
        }
    }

    #[tokio::test]
    async fn test_connects_and_exchanges() {
        let (connector, acceptor) = memory_connector(DEFAULT_MTU);
        let mut servers = serve_links(acceptor, KEY);
        let session = Session::start(connector, client_config(false));
        let mut events = session.subscribe();

        assert!(matches!(next_status(&mut events).await, ConnectionStatus::ConnectStart));
        match next_status(&mut events).await {
            ConnectionStatus::Connected { metadata } => {
                assert_eq!(metadata.attempt, 1);
                assert_eq!(metadata.role, Role::Client);
            }
            other => panic!("unexpected status: {other:?}"),
        }

        let conn = session.wait_connected().await.unwrap();
        let (server, _server_task) = servers.recv().await.unwrap();
        let mut stream = conn.open_stream().await.unwrap();
        stream.send(b"ping").await.unwrap();
        let mut accepted = server.accept_stream().await.unwrap();
        assert_eq!(accepted.recv().await.unwrap(), Some(b"ping".to_vec()));
        assert!(session.status().is_connected());
    }

    #[tokio::test]
    async fn test_reconnects_after_link_loss() {
        let (connector, acceptor) = memory_connector(DEFAULT_MTU);
        let mut servers = serve_links(acceptor, KEY);
        let session = Session::start(connector, client_config(true));
        let mut events = session.subscribe();

        assert!(matches!(next_status(&mut events).await, ConnectionStatus::ConnectStart));
        assert!(next_status(&mut events).await.is_connected());
        let first = session.wait_connected().await.unwrap();
        let mut old_stream = first.open_stream().await.unwrap();
        assert_eq!(old_stream.id(), 0);
        let (_server, server_task) = servers.recv().await.unwrap();

        // Killing the server's run loop closes its end of the link.
        server_task.abort();

        assert!(next_status(&mut events).await.is_terminal());
        assert!(matches!(next_status(&mut events).await, ConnectionStatus::ConnectStart));
        match next_status(&mut events).await {
            ConnectionStatus::Connected { metadata } => assert_eq!(metadata.attempt, 2),
            other => panic!("unexpected status: {other:?}"),
        }

        assert!(old_stream.send(b"stale").await.is_err());
        let second = session.wait_connected().await.unwrap();
        assert_eq!(second.metadata().attempt, 2);
        let fresh = second.open_stream().await.unwrap();
        assert_eq!(fresh.id(), 0);
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let (connector, acceptor) = memory_connector(DEFAULT_MTU);
        let mut servers = serve_links(acceptor, KEY);
        let session = Session::start(connector, client_config(true));
        let mut events = session.subscribe();

        session.wait_connected().await.unwrap();
        let (_server, server_task) = servers.recv().await.unwrap();
        session.close().await;

        assert!(matches!(next_status(&mut events).await, ConnectionStatus::ConnectStart));
        assert!(next_status(&mut events).await.is_connected());
        match next_status(&mut events).await {
            ConnectionStatus::Disconnected {
                reason: DisconnectReason::LocalClose { code, .. },
            } => assert_eq!(code, CLOSE_NO_ERROR),
            other => panic!("unexpected status: {other:?}"),
        }
        assert!(matches!(
            server_task.await,
            ConnectionOutcome::PeerClose { code: 0, .. }
        ));

        assert!(session.is_closed());
        assert!(session.connection().is_none());
        assert!(session.wait_connected().await.is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(events.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let (connector, acceptor) = memory_connector(DEFAULT_MTU);
        drop(acceptor);
        let session = Session::start(connector, client_config(false));
        let mut events = session.subscribe();

        assert!(matches!(next_status(&mut events).await, ConnectionStatus::ConnectStart));
        match next_status(&mut events).await {
            ConnectionStatus::Error { cause } => {
                assert_eq!(cause.category(), ErrorCategory::Link)
            }
            other => panic!("unexpected status: {other:?}"),
        }
        assert!(session.wait_connected().await.is_none());
    }

    #[tokio::test]
    async fn test_authentication_failure_is_reported() {
        let (connector, acceptor) = memory_connector(DEFAULT_MTU);
        let _servers = serve_links(acceptor, b"some other key");
        let session = Session::start(connector, client_config(false));
        let mut events = session.subscribe();

        assert!(matches!(next_status(&mut events).await, ConnectionStatus::ConnectStart));
        match next_status(&mut events).await {
            ConnectionStatus::Error { cause } => {
                assert_eq!(cause.category(), ErrorCategory::Authentication)
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }
}
