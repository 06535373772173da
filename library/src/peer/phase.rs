use std::fmt;

use crate::engine::{OperationResult, PendingOperation};

/// Where a peer is in the offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationPhase {
    Idle,
    // client
    AwaitingSignalingConnect,
    CreatingOffer,
    SettingLocalOffer,
    OfferSent,
    SettingRemoteAnswer,
    AwaitingChannelOpen,
    // server
    OfferReceived,
    CreatingAnswer,
    SettingLocalAnswer,
    AnswerSent,
    // both
    AwaitingTrickleWindow,
    ChannelOpen,
    TimedOut,
    Closed,
}

impl NegotiationPhase {
    /// Nothing moves a peer out of a terminal phase.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::TimedOut | Self::Closed)
    }
}

/// Category of asynchronous engine step. A peer holds at most one
/// outstanding operation per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationSlot {
    CreateOffer,
    SetLocalOffer,
    SetRemoteAnswer,
    SetRemoteOffer,
    CreateAnswer,
    SetLocalAnswer,
}

impl OperationSlot {
    pub const ALL: [Self; 6] = [
        Self::CreateOffer,
        Self::SetLocalOffer,
        Self::SetRemoteAnswer,
        Self::SetRemoteOffer,
        Self::CreateAnswer,
        Self::SetLocalAnswer,
    ];

    const fn index(self) -> usize {
        match self {
            Self::CreateOffer => 0,
            Self::SetLocalOffer => 1,
            Self::SetRemoteAnswer => 2,
            Self::SetRemoteOffer => 3,
            Self::CreateAnswer => 4,
            Self::SetLocalAnswer => 5,
        }
    }
}

/// Outstanding engine operations, one cell per [`OperationSlot`].
#[derive(Default)]
pub(crate) struct PendingOperations {
    slots: [Option<Box<dyn PendingOperation>>; 6],
}

impl PendingOperations {
    /// Store `operation` in `slot`, dropping whatever was there.
    pub fn begin(&mut self, slot: OperationSlot, operation: Box<dyn PendingOperation>) {
        if let Some(cell) = self.slots.get_mut(slot.index()) {
            *cell = Some(operation);
        }
    }

    /// Result of the operation in `slot` if it has finished. The slot is
    /// empty afterwards.
    pub fn take_finished(&mut self, slot: OperationSlot) -> Option<OperationResult> {
        let cell = self.slots.get_mut(slot.index())?;
        if !cell.as_ref()?.is_done() {
            return None;
        }
        cell.take().map(|mut operation| operation.take_result())
    }

    #[must_use]
    pub fn is_live(&self, slot: OperationSlot) -> bool {
        self.slots
            .get(slot.index())
            .is_some_and(Option::is_some)
    }

    pub fn clear(&mut self) {
        for cell in &mut self.slots {
            *cell = None;
        }
    }
}

impl fmt::Debug for PendingOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(OperationSlot::ALL.iter().filter(|slot| self.is_live(**slot)))
            .finish()
    }
}
