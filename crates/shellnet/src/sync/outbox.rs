use crate::net::SyncMessage;
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Authority,
    Broadcast,
    Session(SessionId),
}

/// Messages produced during a tick, waiting for the transport.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Vec<(Route, SyncMessage)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, route: Route, message: SyncMessage) {
        self.messages.push((route, message));
    }

    pub fn to_authority(&mut self, message: SyncMessage) {
        self.push(Route::Authority, message);
    }

    pub fn broadcast(&mut self, message: SyncMessage) {
        self.push(Route::Broadcast, message);
    }

    pub fn to_session(&mut self, session: SessionId, message: SyncMessage) {
        self.push(Route::Session(session), message);
    }

    pub fn take_authority_bound(&mut self) -> Vec<SyncMessage> {
        let (bound, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.messages)
            .into_iter()
            .partition(|(route, _)| *route == Route::Authority);
        self.messages = rest;
        bound.into_iter().map(|(_, message)| message).collect()
    }

    pub fn drain(&mut self) -> Vec<(Route, SyncMessage)> {
        std::mem::take(&mut self.messages)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Route, SyncMessage)> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
