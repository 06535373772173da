//! `WebSocket` relay running on a small background tokio runtime.
//!
//! Socket I/O happens on runtime worker threads. Every observation is pushed
//! into an unbounded channel and picked up with `try_recv` from `poll_event`,
//! so the polling thread never blocks and never runs async code.

mod client;
mod server;

use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;

pub use client::WebSocketClient;
pub use server::WebSocketServer;

use super::{RelayClientTransport, RelayFactory, RelayServerTransport};
use crate::Result;

/// [`RelayFactory`] handing out `WebSocket` transports that share one runtime.
#[derive(Clone)]
pub struct WebSocketRelay {
    runtime: Arc<Runtime>,
}

impl WebSocketRelay {
    /// # Errors
    /// Errs if the background runtime cannot be started.
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("rtc-peers-relay")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }
}

impl RelayFactory for WebSocketRelay {
    fn client(&self) -> Box<dyn RelayClientTransport> {
        Box::new(WebSocketClient::new(Arc::clone(&self.runtime)))
    }

    fn server(&self) -> Box<dyn RelayServerTransport> {
        Box::new(WebSocketServer::new(Arc::clone(&self.runtime)))
    }
}

/// Non-blocking receive that treats a closed channel like an empty one.
fn try_next<T>(events: &mut mpsc::UnboundedReceiver<T>) -> Option<T> {
    events.try_recv().ok()
}
