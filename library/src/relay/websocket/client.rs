use std::sync::Arc;

use anyhow::Context;
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::try_next;
use crate::relay::{RelayClientTransport, RelayEndpoint, RelayEvent};
use crate::{Error, Result};

/// Client half of the `WebSocket` relay. One connection per `connect`.
pub struct WebSocketClient {
    runtime: Arc<Runtime>,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    events: mpsc::UnboundedReceiver<RelayEvent>,
    reader: Option<JoinHandle<()>>,
}

impl WebSocketClient {
    pub(super) fn new(runtime: Arc<Runtime>) -> Self {
        let (_, events) = mpsc::unbounded_channel();
        Self {
            runtime,
            outgoing: None,
            events,
            reader: None,
        }
    }
}

impl RelayClientTransport for WebSocketClient {
    fn connect(&mut self, endpoint: &RelayEndpoint) -> Result<()> {
        self.disconnect();

        let url = Url::parse(&endpoint.url())
            .map_err(|e| Error::Relay(format!("invalid relay address {endpoint}: {e}")))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        self.events = events_rx;
        self.outgoing = Some(outgoing_tx);

        debug!("connecting to relay {url}");
        self.reader = Some(self.runtime.spawn(async move {
            if let Err(e) = run(url, outgoing_rx, &events_tx).await {
                warn!("relay client failed: {e:#}");
                events_tx.send(RelayEvent::Error(format!("{e:#}"))).ok();
            }
            events_tx.send(RelayEvent::Disconnected).ok();
        }));
        Ok(())
    }

    fn send(&mut self, data: Vec<u8>) -> Result<()> {
        let outgoing = self
            .outgoing
            .as_ref()
            .ok_or_else(|| Error::Relay("relay client is not connected".to_owned()))?;
        let message = match String::from_utf8(data) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        outgoing
            .send(message)
            .map_err(|e| Error::Relay(format!("relay connection is closed: {e}")))
    }

    fn disconnect(&mut self) {
        // dropping the sender lets the writer send a close frame
        self.outgoing = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn poll_event(&mut self) -> Option<RelayEvent> {
        try_next(&mut self.events)
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run(
    url: Url,
    outgoing: mpsc::UnboundedReceiver<Message>,
    events: &mpsc::UnboundedSender<RelayEvent>,
) -> anyhow::Result<()> {
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {url}"))?;
    info!("connected to relay {url}");
    events.send(RelayEvent::Connected).ok();

    let (ws_tx, mut ws_rx) = ws_stream.split();

    tokio::spawn(async move {
        if let Err(e) = UnboundedReceiverStream::new(outgoing)
            .map(Ok)
            .forward(ws_tx)
            .await
        {
            warn!("relay send error: {e}");
        }
    });

    while let Some(message) = ws_rx.next().await {
        match message.context("reading from relay")? {
            Message::Text(text) => {
                events.send(RelayEvent::Data(text.into_bytes())).ok();
            }
            Message::Binary(data) => {
                events.send(RelayEvent::Data(data)).ok();
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    info!("relay {url} closed the connection");
    Ok(())
}
