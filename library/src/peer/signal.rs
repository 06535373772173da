use std::fmt;

use super::PeerId;

/// Something a peer reports to its observers during `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSignal<'a> {
    /// Payload received on the data channel. Only valid inside the callback.
    MessageReceived(&'a [u8]),
    ConnectionClosed,
    TimedOut,
    /// The relay went away before the answer arrived.
    SignalingUnreachable,
}

impl PeerSignal<'_> {
    /// Terminal signals are reported at most once per peer, and only one of
    /// them ever is.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::MessageReceived(_))
    }
}

type Observer = Box<dyn FnMut(PeerId, &PeerSignal<'_>)>;

/// Observer list with the once-only rule for terminal signals.
#[derive(Default)]
pub(crate) struct Observers {
    observers: Vec<Observer>,
    terminated: bool,
}

impl Observers {
    pub fn subscribe(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    /// Deliver `signal` to every observer. Returns false, without delivering,
    /// for a terminal signal after the first one.
    pub fn notify(&mut self, peer: PeerId, signal: &PeerSignal<'_>) -> bool {
        if signal.is_terminal() {
            if self.terminated {
                return false;
            }
            self.terminated = true;
        }
        for observer in &mut self.observers {
            observer(peer, signal);
        }
        true
    }

    #[cfg(test)]
    pub const fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.observers.len())
            .field("terminated", &self.terminated)
            .finish()
    }
}
