use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use rtc_peers_protocol::RoutingId;

use super::try_next;
use crate::config::ServerSignalingConfig;
use crate::relay::{tls, RelayServerEvent, RelayServerTransport};
use crate::{Error, Result};

type Connections = Arc<Mutex<HashMap<RoutingId, mpsc::UnboundedSender<Message>>>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Server half of the `WebSocket` relay.
///
/// Each accepted connection gets a fresh [`RoutingId`] and a forwarding task
/// that owns the socket's write half; `send_to` only pushes into that task's
/// queue.
pub struct WebSocketServer {
    runtime: Arc<Runtime>,
    connections: Connections,
    events: mpsc::UnboundedReceiver<RelayServerEvent>,
    shutdown: Option<watch::Sender<bool>>,
}

impl WebSocketServer {
    pub(super) fn new(runtime: Arc<Runtime>) -> Self {
        let (_, events) = mpsc::unbounded_channel();
        Self {
            runtime,
            connections: Connections::default(),
            events,
            shutdown: None,
        }
    }
}

impl RelayServerTransport for WebSocketServer {
    fn listen(&mut self, port: u16, tls_config: Option<&ServerSignalingConfig>) -> Result<()> {
        self.stop();

        let acceptor = tls_config
            .filter(|config| config.enable_tls)
            .map(tls::build_acceptor)
            .transpose()?;

        let listener = std::net::TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        let listener = {
            let _guard = self.runtime.enter();
            TcpListener::from_std(listener)?
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.events = events_rx;
        self.shutdown = Some(shutdown_tx);

        info!(
            "relay listening on port {port}{}",
            if acceptor.is_some() { " with TLS" } else { "" }
        );
        self.runtime.spawn(accept_loop(
            listener,
            acceptor,
            Arc::clone(&self.connections),
            events_tx,
            shutdown_rx,
        ));
        Ok(())
    }

    fn send_to(&mut self, connection: RoutingId, data: Vec<u8>) -> Result<()> {
        let connections = lock(&self.connections);
        let sender = connections
            .get(&connection)
            .ok_or_else(|| Error::Relay(format!("no relay connection with id {connection}")))?;
        let message = match String::from_utf8(data) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        sender
            .send(message)
            .map_err(|e| Error::Relay(format!("relay connection {connection} is closed: {e}")))
    }

    fn disconnect(&mut self, connection: RoutingId) {
        if lock(&self.connections).remove(&connection).is_some() {
            debug!("closing relay connection {connection}");
        }
    }

    fn poll_event(&mut self) -> Option<RelayServerEvent> {
        try_next(&mut self.events)
    }

    fn stop(&mut self) {
        if self.shutdown.take().is_some() {
            info!("relay listener stopped");
        }
        lock(&self.connections).clear();
    }
}

impl Drop for WebSocketServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(
    connections: &Connections,
) -> MutexGuard<'_, HashMap<RoutingId, mpsc::UnboundedSender<Message>>> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    connections: Connections,
    events: mpsc::UnboundedSender<RelayServerEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, address)) => {
                    tokio::spawn(connection(
                        stream,
                        address,
                        acceptor.clone(),
                        Arc::clone(&connections),
                        events.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    warn!("relay accept failed: {e}");
                    events.send(RelayServerEvent::Error(e.to_string())).ok();
                }
            },
        }
    }
}

async fn connection(
    stream: TcpStream,
    address: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    connections: Connections,
    events: mpsc::UnboundedSender<RelayServerEvent>,
    shutdown: watch::Receiver<bool>,
) {
    let result = match acceptor {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => user_connected(stream, connections, events, shutdown).await,
            Err(e) => Err(anyhow::Error::new(e).context("TLS handshake")),
        },
        None => user_connected(stream, connections, events, shutdown).await,
    };
    if let Err(e) = result {
        warn!("relay connection from {address} failed: {e:#}");
    }
}

async fn user_connected<S>(
    stream: S,
    connections: Connections,
    events: mpsc::UnboundedSender<RelayServerEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = accept_async(stream).await.context("websocket handshake")?;
    let id = RoutingId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
    info!("new relay connection: {id}");

    let (ws_tx, mut ws_rx) = ws.split();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        if let Err(e) = UnboundedReceiverStream::new(rx).map(Ok).forward(ws_tx).await {
            warn!("websocket send error (id={id}): {e}");
        }
    });

    lock(&connections).insert(id, tx);
    events.send(RelayServerEvent::Connected(id)).ok();

    let result = read_messages(id, &mut ws_rx, &events, &mut shutdown).await;

    lock(&connections).remove(&id);
    info!("relay connection closed: {id}");
    events.send(RelayServerEvent::Disconnected(id)).ok();
    result
}

async fn read_messages<S>(
    id: RoutingId,
    ws_rx: &mut SplitStream<WebSocketStream<S>>,
    events: &mpsc::UnboundedSender<RelayServerEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            message = ws_rx.next() => match message {
                None => return Ok(()),
                Some(message) => match message.with_context(|| format!("reading from connection {id}"))? {
                    Message::Text(text) => {
                        events.send(RelayServerEvent::Data(id, text.into_bytes())).ok();
                    }
                    Message::Binary(data) => {
                        events.send(RelayServerEvent::Data(id, data)).ok();
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                },
            },
        }
    }
}
